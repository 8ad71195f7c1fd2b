use crate::{
    error::{fail, DecodeErrorKind, Failure, PResult},
    reader::{chunk_tag, fixed_text, midi_u16, midi_u32, midi_vlq},
};
use arrayvec::ArrayVec;
use binrw::BinRead;
use nom::{bytes::complete::take, multi::fill, number::complete::be_u8};
use std::io::Cursor;

/// The embedded standard MIDI stream of an AMB file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MidiStream {
    pub ticks_per_quarter_note: u16,
    /// Taken from the single SetTempo event of the first track.
    pub seconds_per_quarter_note: f64,
    pub tracks: Vec<MidiTrack>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MidiTrack {
    /// Length of the track's event data in bytes.
    pub size: u32,
    pub events: Vec<TimedEvent>,
    /// Set when an unrecognised event ended decoding early. Counted in bytes
    /// from the start of this track's event data (just past the `MTrk` size
    /// field), not from the start of the file, and points just past the
    /// unrecognised event. The rest of the track is skipped.
    pub unknown_event_offset: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimedEvent {
    /// Ticks since the previous event of the same track.
    pub delta: u32,
    pub event: MidiEvent,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MidiEvent {
    TrackName(String),
    SmpteOffset {
        hr: u8,
        mn: u8,
        se: u8,
        fr: u8,
        ff: u8,
    },
    TimeSignature {
        nn: u8,
        dd: u8,
        cc: u8,
        bb: u8,
    },
    /// Microseconds per quarter note (24 bit).
    SetTempo(u32),
    EndOfTrack,
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    NoteOff {
        channel: u8,
        key: u8,
        velocity: u8,
    },
    NoteOn {
        channel: u8,
        key: u8,
        velocity: u8,
    },
    /// Signature bytes of an event that could not be decoded.
    Unknown(ArrayVec<u8, 3>),
}

/// Controller numbers from here up are channel mode messages.
const CHANNEL_MODE_FIRST: u8 = 122;

/// Leading fields of `MThd` that decide whether the rest can be read.
#[derive(Debug, BinRead)]
#[br(big)]
struct HeaderChunk {
    length: u32,
    format: u16,
}

impl MidiStream {
    /// Parses a stream starting right after its `MThd` tag.
    pub fn parse(input: &[u8]) -> PResult<'_, Self> {
        let (data, raw) = take(6usize)(input)?;
        let header = HeaderChunk::read(&mut Cursor::new(raw))
            .map_err(|_| nom::Err::Error(Failure::new(input, DecodeErrorKind::UnexpectedEof)))?;
        if header.length != 6 || header.format != 1 {
            return fail(
                input,
                DecodeErrorKind::UnsupportedMidiHeader {
                    length: header.length,
                    format: header.format,
                },
            );
        }
        let (data, track_count) = midi_u16(data)?;
        let (mut data, division) = midi_u16(data)?;
        if division & 0x8000 != 0 {
            return fail(input, DecodeErrorKind::UnsupportedMidiDivision(division));
        }

        let mut tracks = Vec::new();
        for _ in 0..track_count {
            let (d, tag) = chunk_tag(data)?;
            if &tag != b"MTrk" {
                return fail(data, DecodeErrorKind::UnexpectedChunkTag(tag));
            }
            let (d, track) = MidiTrack::parse(d)?;
            tracks.push(track);
            data = d;
        }

        let tempos: Vec<u32> = tracks
            .first()
            .into_iter()
            .flat_map(|t| &t.events)
            .filter_map(|e| match e.event {
                MidiEvent::SetTempo(tempo) => Some(tempo),
                _ => None,
            })
            .collect();
        let &[tempo] = tempos.as_slice() else {
            return fail(input, DecodeErrorKind::AmbiguousTempo(tempos.len()));
        };

        Ok((
            data,
            Self {
                ticks_per_quarter_note: division,
                seconds_per_quarter_note: tempo as f64 / 1_000_000.0,
                tracks,
            },
        ))
    }
    /// Scale factor from ticks to seconds.
    #[inline]
    pub fn seconds_per_tick(&self) -> f64 {
        self.seconds_per_quarter_note / self.ticks_per_quarter_note as f64
    }
}

impl MidiTrack {
    /// Parses a track starting right after its `MTrk` tag.
    pub fn parse(input: &[u8]) -> PResult<'_, Self> {
        let (input, size) = midi_u32(input)?;
        let (rest, mut data) = take(size as usize)(input)?;
        let mut track = Self {
            size,
            ..Default::default()
        };
        while !data.is_empty() {
            let running = track
                .events
                .last()
                .and_then(|e| e.event.running_status());
            let (d, event) = TimedEvent::parse(data, running)?;
            data = d;
            if let MidiEvent::Unknown(sig) = &event.event {
                let offset = size - data.len() as u32;
                log::debug!(
                    "Unknown MIDI event {sig:02x?}, skipping {} bytes of track",
                    data.len()
                );
                track.unknown_event_offset = Some(offset);
                track.events.push(event);
                break;
            }
            track.events.push(event);
        }
        Ok((rest, track))
    }
    /// Text of the first TrackName event.
    pub fn name(&self) -> Option<&str> {
        self.events.iter().find_map(|e| match &e.event {
            MidiEvent::TrackName(name) => Some(name.as_str()),
            _ => None,
        })
    }
    /// Total length in ticks.
    pub fn length(&self) -> u64 {
        self.events.iter().map(|e| e.delta as u64).sum()
    }
    /// Events paired with their absolute time in seconds.
    pub fn timeline(&self, seconds_per_tick: f64) -> impl Iterator<Item = (f64, &TimedEvent)> {
        self.events.iter().scan(0.0, move |time, e| {
            *time += e.delta as f64 * seconds_per_tick;
            Some((*time, e))
        })
    }
}

impl TimedEvent {
    #[inline]
    pub fn new(delta: u32, event: MidiEvent) -> Self {
        Self { delta, event }
    }
    /// Parses one event. `running` is the status the previous event of the
    /// track leaves behind, if any.
    pub fn parse(input: &[u8], running: Option<u8>) -> PResult<'_, Self> {
        let (data, delta) = midi_vlq(input)?;
        let (after_status, byte) = be_u8(data)?;
        let (data, event) = match running {
            // no status byte, `byte` is the first data byte
            Some(status) if byte & 0x80 == 0 => MidiEvent::parse_channel(data, status)?,
            _ => MidiEvent::parse_status(after_status, byte)?,
        };
        Ok((data, Self { delta, event }))
    }
}

fn byte_array<const N: usize>(input: &[u8]) -> PResult<'_, [u8; N]> {
    let mut bytes = [0u8; N];
    let (data, ()) = fill(be_u8, &mut bytes[..])(input)?;
    Ok((data, bytes))
}

fn signature(bytes: &[u8]) -> MidiEvent {
    MidiEvent::Unknown(bytes.iter().copied().collect())
}

impl MidiEvent {
    fn parse_status(input: &[u8], status: u8) -> PResult<'_, Self> {
        match status {
            0xff => Self::parse_meta(input),
            _ => Self::parse_channel(input, status),
        }
    }
    fn parse_meta(input: &[u8]) -> PResult<'_, Self> {
        let (data, typ) = be_u8(input)?;
        let expected_len = match typ {
            0x03 => {
                let (data, len) = midi_vlq(data)?;
                let (data, name) = fixed_text(data, len as usize)?;
                return Ok((data, Self::TrackName(name)));
            }
            0x2f => 0,
            0x51 => 3,
            0x54 => 5,
            0x58 => 4,
            _ => return Ok((data, signature(&[0xff, typ]))),
        };
        let (data, len) = be_u8(data)?;
        if len != expected_len {
            return Ok((data, signature(&[0xff, typ, len])));
        }
        match typ {
            0x51 => {
                let (data, [a, b, c]) = byte_array(data)?;
                Ok((data, Self::SetTempo(u32::from_be_bytes([0, a, b, c]))))
            }
            0x54 => {
                let (data, [hr, mn, se, fr, ff]) = byte_array(data)?;
                Ok((data, Self::SmpteOffset { hr, mn, se, fr, ff }))
            }
            0x58 => {
                let (data, [nn, dd, cc, bb]) = byte_array(data)?;
                Ok((data, Self::TimeSignature { nn, dd, cc, bb }))
            }
            _ => Ok((data, Self::EndOfTrack)),
        }
    }
    fn parse_channel(input: &[u8], status: u8) -> PResult<'_, Self> {
        let channel = status & 0x0f;
        match status >> 4 {
            0x8 => {
                let (data, key) = be_u8(input)?;
                let (data, velocity) = be_u8(data)?;
                Ok((data, Self::NoteOff { channel, key, velocity }))
            }
            0x9 => {
                let (data, key) = be_u8(input)?;
                let (data, velocity) = be_u8(data)?;
                Ok((data, Self::NoteOn { channel, key, velocity }))
            }
            0xb => {
                let (data, controller) = be_u8(input)?;
                if controller >= CHANNEL_MODE_FIRST {
                    return fail(
                        input,
                        DecodeErrorKind::ChannelModeMessageUnsupported {
                            channel,
                            controller,
                        },
                    );
                }
                let (data, value) = be_u8(data)?;
                Ok((
                    data,
                    Self::ControlChange {
                        channel,
                        controller,
                        value,
                    },
                ))
            }
            0xc => {
                let (data, program) = be_u8(input)?;
                Ok((data, Self::ProgramChange { channel, program }))
            }
            _ => Ok((input, signature(&[status]))),
        }
    }
    #[inline]
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            Self::TrackName(_)
                | Self::SmpteOffset { .. }
                | Self::TimeSignature { .. }
                | Self::SetTempo(_)
                | Self::EndOfTrack
        )
    }
    #[inline]
    pub fn channel(&self) -> Option<u8> {
        match *self {
            Self::ControlChange { channel, .. }
            | Self::ProgramChange { channel, .. }
            | Self::NoteOff { channel, .. }
            | Self::NoteOn { channel, .. } => Some(channel),
            _ => None,
        }
    }
    /// Status byte a following event may inherit through running status.
    pub fn running_status(&self) -> Option<u8> {
        let high = match self {
            Self::NoteOff { .. } => 0x80,
            Self::NoteOn { .. } => 0x90,
            Self::ControlChange { .. } => 0xb0,
            Self::ProgramChange { .. } => 0xc0,
            _ => return None,
        };
        self.channel().map(|ch| high | ch)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::DecodeError;
    use pretty_assertions::assert_eq;

    pub const TEMPO_500000: [u8; 7] = [0x00, 0xff, 0x51, 0x03, 0x07, 0xa1, 0x20];

    pub fn track_chunk(events: &[u8]) -> Vec<u8> {
        let mut chunk = b"MTrk".to_vec();
        chunk.extend_from_slice(&(events.len() as u32).to_be_bytes());
        chunk.extend_from_slice(events);
        chunk
    }

    /// `MThd` chunk with a 480 tick division followed by one `MTrk` per entry.
    pub fn midi_chunk(tracks: &[&[u8]]) -> Vec<u8> {
        let mut chunk = b"MThd".to_vec();
        chunk.extend_from_slice(&6u32.to_be_bytes());
        chunk.extend_from_slice(&1u16.to_be_bytes());
        chunk.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
        chunk.extend_from_slice(&480u16.to_be_bytes());
        for events in tracks {
            chunk.extend_from_slice(&track_chunk(events));
        }
        chunk
    }

    fn parse_track(events: &[u8]) -> MidiTrack {
        let data = track_chunk(events);
        let (rest, track) = MidiTrack::parse(&data[4..]).unwrap();
        assert!(rest.is_empty());
        track
    }

    fn track_error(events: &[u8]) -> DecodeError {
        let data = track_chunk(events);
        let e = MidiTrack::parse(&data[4..]).unwrap_err();
        DecodeError::from_nom(&data, e)
    }

    fn stream_error(data: &[u8]) -> DecodeError {
        let e = MidiStream::parse(&data[4..]).unwrap_err();
        DecodeError::from_nom(data, e)
    }

    #[test]
    fn running_status() {
        let track = parse_track(&[0x00, 0x93, 60, 100, 0x10, 64, 100]);
        assert_eq!(
            track.events,
            [
                TimedEvent::new(0, MidiEvent::NoteOn { channel: 3, key: 60, velocity: 100 }),
                TimedEvent::new(0x10, MidiEvent::NoteOn { channel: 3, key: 64, velocity: 100 }),
            ]
        );
        assert_eq!(track.unknown_event_offset, None);
        assert_eq!(track.length(), 0x10);
    }

    #[test]
    fn running_status_every_type() {
        let track = parse_track(&[
            0x00, 0x81, 60, 0, 0x00, 61, 0, // note off
            0x00, 0xb2, 7, 100, 0x00, 10, 64, // control change
            0x00, 0xc5, 12, 0x00, 13, // program change
        ]);
        let events: Vec<_> = track.events.into_iter().map(|e| e.event).collect();
        assert_eq!(
            events,
            [
                MidiEvent::NoteOff { channel: 1, key: 60, velocity: 0 },
                MidiEvent::NoteOff { channel: 1, key: 61, velocity: 0 },
                MidiEvent::ControlChange { channel: 2, controller: 7, value: 100 },
                MidiEvent::ControlChange { channel: 2, controller: 10, value: 64 },
                MidiEvent::ProgramChange { channel: 5, program: 12 },
                MidiEvent::ProgramChange { channel: 5, program: 13 },
            ]
        );
    }

    #[test]
    fn no_running_status_after_meta() {
        let track = parse_track(&[0x00, 0xff, 0x2f, 0x00, 0x00, 0x40, 0x01, 0x02]);
        assert_eq!(
            track.events,
            [
                TimedEvent::new(0, MidiEvent::EndOfTrack),
                TimedEvent::new(0, signature(&[0x40])),
            ]
        );
        assert_eq!(track.unknown_event_offset, Some(6));
    }

    #[test]
    fn meta_events() {
        let track = parse_track(&[
            0x00, 0xff, 0x03, 0x04, b'T', b'e', b's', b't', // track name
            0x00, 0xff, 0x54, 0x05, 1, 2, 3, 4, 5, // smpte offset
            0x00, 0xff, 0x58, 0x04, 4, 2, 24, 8, // time signature
            0x00, 0xff, 0x51, 0x03, 0x07, 0xa1, 0x20, // tempo
            0x83, 0x60, 0xff, 0x2f, 0x00, // end of track
        ]);
        let events: Vec<_> = track.events.iter().map(|e| e.event.clone()).collect();
        assert_eq!(
            events,
            [
                MidiEvent::TrackName("Test".into()),
                MidiEvent::SmpteOffset { hr: 1, mn: 2, se: 3, fr: 4, ff: 5 },
                MidiEvent::TimeSignature { nn: 4, dd: 2, cc: 24, bb: 8 },
                MidiEvent::SetTempo(500000),
                MidiEvent::EndOfTrack,
            ]
        );
        assert!(events.iter().all(MidiEvent::is_meta));
        assert_eq!(track.name(), Some("Test"));
        assert_eq!(track.length(), 480);
    }

    #[test]
    fn unknown_meta_type() {
        let track = parse_track(&[0x00, 0xff, 0x7f, 0x03, 0xaa, 0xbb, 0xcc]);
        assert_eq!(track.events, [TimedEvent::new(0, signature(&[0xff, 0x7f]))]);
        assert_eq!(track.unknown_event_offset, Some(3));
    }

    #[test]
    fn meta_length_mismatch() {
        let track = parse_track(&[0x00, 0xff, 0x51, 0x04, 0x00, 0x07, 0xa1, 0x20]);
        assert_eq!(
            track.events,
            [TimedEvent::new(0, signature(&[0xff, 0x51, 0x04]))]
        );
    }

    #[test]
    fn unknown_event_truncates_track() {
        // pitch bend is not decoded; what follows must not be parsed
        let track = parse_track(&[
            0x00, 0x90, 60, 100, // note on
            0x05, 0xe0, 0x00, 0x40, // pitch bend
            0x00, 0xb0, 127, 0, // would be a channel mode message
        ]);
        assert_eq!(
            track.events,
            [
                TimedEvent::new(0, MidiEvent::NoteOn { channel: 0, key: 60, velocity: 100 }),
                TimedEvent::new(5, signature(&[0xe0])),
            ]
        );
        assert_eq!(track.unknown_event_offset, Some(6));
        assert_eq!(track.size, 12);
    }

    #[test]
    fn channel_mode_message() {
        for controller in 0..=127u8 {
            let data = [0x00, 0xb4, controller, 0x00];
            let chunk = track_chunk(&data);
            if controller >= 122 {
                let err = track_error(&data);
                assert_eq!(
                    err.kind(),
                    &DecodeErrorKind::ChannelModeMessageUnsupported {
                        channel: 4,
                        controller
                    }
                );
                assert_eq!(err.offset(), 10);
            } else {
                assert!(MidiTrack::parse(&chunk[4..]).is_ok(), "controller {controller}");
            }
        }
    }

    #[test]
    fn channel_mode_message_running_status() {
        let err = track_error(&[0x00, 0xb0, 7, 100, 0x00, 123, 0]);
        assert!(matches!(
            err.kind(),
            DecodeErrorKind::ChannelModeMessageUnsupported { controller: 123, .. }
        ));
    }

    #[test]
    fn event_overruns_track() {
        let err = track_error(&[0x00, 0x90, 60]);
        assert_eq!(err.kind(), &DecodeErrorKind::UnexpectedEof);
    }

    #[test]
    fn header() {
        let data = midi_chunk(&[&TEMPO_500000]);
        let (rest, midi) = MidiStream::parse(&data[4..]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(midi.ticks_per_quarter_note, 0x01e0);
        assert_eq!(midi.seconds_per_quarter_note, 0.5);
        assert_eq!(midi.tracks.len(), 1);
    }

    #[test]
    fn smpte_division() {
        let mut data = midi_chunk(&[&TEMPO_500000]);
        data[12..14].copy_from_slice(&0x8000u16.to_be_bytes());
        let err = stream_error(&data);
        assert_eq!(err.kind(), &DecodeErrorKind::UnsupportedMidiDivision(0x8000));
    }

    #[test]
    fn truncated_header() {
        let data = midi_chunk(&[&TEMPO_500000]);
        let err = stream_error(&data[..11]);
        assert_eq!(err.kind(), &DecodeErrorKind::UnexpectedEof);
        assert_eq!(err.offset(), 10);
        let err = stream_error(&data[..8]);
        assert_eq!(err.kind(), &DecodeErrorKind::UnexpectedEof);
        assert_eq!(err.offset(), 4);
    }

    #[test]
    fn unsupported_header() {
        let mut data = midi_chunk(&[&TEMPO_500000]);
        data[9] = 0;
        let err = stream_error(&data);
        assert_eq!(
            err.kind(),
            &DecodeErrorKind::UnsupportedMidiHeader { length: 6, format: 0 }
        );
        let mut data = midi_chunk(&[&TEMPO_500000]);
        data[7] = 8;
        let err = stream_error(&data);
        assert_eq!(
            err.kind(),
            &DecodeErrorKind::UnsupportedMidiHeader { length: 8, format: 1 }
        );
    }

    #[test]
    fn unexpected_track_tag() {
        let mut data = midi_chunk(&[&TEMPO_500000]);
        data[14..18].copy_from_slice(b"MTrx");
        let err = stream_error(&data);
        assert_eq!(err.kind(), &DecodeErrorKind::UnexpectedChunkTag(*b"MTrx"));
        assert_eq!(err.offset(), 14);
    }

    #[test]
    fn missing_track() {
        let mut data = midi_chunk(&[&TEMPO_500000]);
        data[11] = 2;
        let err = stream_error(&data);
        assert_eq!(err.kind(), &DecodeErrorKind::UnexpectedEof);
        assert_eq!(err.offset(), data.len());
    }

    #[test]
    fn tempo_count() {
        let err = stream_error(&midi_chunk(&[&[0x00, 0xff, 0x2f, 0x00]]));
        assert_eq!(err.kind(), &DecodeErrorKind::AmbiguousTempo(0));

        let mut twice = TEMPO_500000.to_vec();
        twice.extend_from_slice(&TEMPO_500000);
        let err = stream_error(&midi_chunk(&[&twice]));
        assert_eq!(err.kind(), &DecodeErrorKind::AmbiguousTempo(2));

        let err = stream_error(&midi_chunk(&[]));
        assert_eq!(err.kind(), &DecodeErrorKind::AmbiguousTempo(0));
    }

    #[test]
    fn tempo_only_counts_first_track() {
        let data = midi_chunk(&[&TEMPO_500000, &TEMPO_500000]);
        let (_, midi) = MidiStream::parse(&data[4..]).unwrap();
        assert_eq!(midi.tracks.len(), 2);
    }

    #[test]
    fn timeline() {
        let data = midi_chunk(&[
            &TEMPO_500000,
            &[0x00, 0x90, 60, 100, 0x83, 0x60, 0x80, 60, 0, 0x81, 0x70, 0xff, 0x2f, 0x00],
        ]);
        let (_, midi) = MidiStream::parse(&data[4..]).unwrap();
        let seconds_per_tick = midi.seconds_per_tick();
        let times: Vec<f64> = midi.tracks[1]
            .timeline(seconds_per_tick)
            .map(|(t, _)| t)
            .collect();
        assert_eq!(times.len(), 3);
        for (time, expected) in times.iter().zip([0.0, 0.5, 0.75]) {
            assert!((time - expected).abs() < 1e-9, "{time} != {expected}");
        }
    }
}
