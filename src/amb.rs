use crate::{
    error::{fail, malformed, DecodeError, DecodeErrorKind, LoadError, PResult},
    midi::MidiStream,
    reader::{amb_i32, amb_u32, chunk_tag, nul_string},
};
use nom::{bytes::complete::take, multi::fill};
use std::path::Path;

/// Terminator word (`FA 00 00 00`) closing PRGM headers and KMAP chunks.
pub const SENTINEL: u32 = 0xfa;

/// Every PRGM chunk carries strings after its fixed 0x1C byte header.
const PRGM_MIN_SIZE: u32 = 0x1c;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ChunkTag {
    Prgm,
    Kmap,
    Glbl,
}

impl ChunkTag {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Prgm => "prgm",
            Self::Kmap => "kmap",
            Self::Glbl => "glbl",
        }
    }
}

impl std::fmt::Display for ChunkTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    Prgm(Prgm),
    Kmap(Kmap),
    Glbl(Glbl),
}

impl Chunk {
    #[inline]
    pub fn tag(&self) -> ChunkTag {
        match self {
            Self::Prgm(_) => ChunkTag::Prgm,
            Self::Kmap(_) => ChunkTag::Kmap,
            Self::Glbl(_) => ChunkTag::Glbl,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Prgm {
    /// Length of the chunk after the size field.
    pub size: u32,
    /// 1-based position among the file's PRGM chunks, with rare exceptions.
    pub number: u32,
    /// Speed lower/upper bound, volume lower/upper bound, unidentified.
    pub dat: [i32; 5],
    pub effect_name: String,
    pub var_name: String,
}

impl Prgm {
    pub fn parse(input: &[u8]) -> PResult<'_, Self> {
        let (data, size) = amb_u32(input)?;
        if size <= PRGM_MIN_SIZE {
            return Err(malformed(input, ChunkTag::Prgm, "chunk too small to hold strings"));
        }
        let (data, number) = amb_u32(data)?;
        let mut dat = [0i32; 5];
        let (data, ()) = fill(amb_i32, &mut dat[..])(data)?;
        let (data, ()) = sentinel(data, ChunkTag::Prgm)?;
        let (data, effect_name) = nul_string(data)?;
        let (data, var_name) = nul_string(data)?;
        Ok((
            data,
            Self {
                size,
                number,
                dat,
                effect_name,
                var_name,
            },
        ))
    }
    #[inline]
    pub fn speed_range(&self) -> (i32, i32) {
        (self.dat[1], self.dat[2])
    }
    #[inline]
    pub fn volume_range(&self) -> (i32, i32) {
        (self.dat[3], self.dat[4])
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct KmapFlags: u32 {
        /// Either bit selects fixed-stride opaque item payloads.
        const OPAQUE_ITEMS = 0b00000110;
    }
}

impl KmapFlags {
    #[inline]
    pub fn has_opaque_items(&self) -> bool {
        self.intersects(Self::OPAQUE_ITEMS)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Kmap {
    pub size: u32,
    pub flags: KmapFlags,
    pub reserved: [u32; 2],
    pub var_name: String,
    /// Byte length of each opaque item payload, present with opaque items.
    pub item_stride: Option<u32>,
    pub items: Vec<KmapItem>,
}

/// Payload layout shared by every item of one KMAP chunk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KmapItemLayout {
    Pair,
    Opaque(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum KmapItemPayload {
    Pair(i32, i32),
    /// Observed as `7F 00 00 00 00 00 00 00 01 00 00 00` in every file.
    Opaque(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct KmapItem {
    pub payload: KmapItemPayload,
    pub wave_file_name: String,
}

impl KmapItem {
    pub fn parse(input: &[u8], layout: KmapItemLayout) -> PResult<'_, Self> {
        let (data, payload) = match layout {
            KmapItemLayout::Pair => {
                let (data, a) = amb_i32(input)?;
                let (data, b) = amb_i32(data)?;
                (data, KmapItemPayload::Pair(a, b))
            }
            KmapItemLayout::Opaque(stride) => {
                let (data, bytes) = take(stride as usize)(input)?;
                (data, KmapItemPayload::Opaque(bytes.to_vec()))
            }
        };
        let (data, wave_file_name) = nul_string(data)?;
        Ok((
            data,
            Self {
                payload,
                wave_file_name,
            },
        ))
    }
}

impl Kmap {
    pub fn parse(input: &[u8]) -> PResult<'_, Self> {
        let (data, size) = amb_u32(input)?;
        let (data, flags) = amb_u32(data)?;
        let flags = KmapFlags::from_bits_retain(flags);
        let mut reserved = [0u32; 2];
        let (data, ()) = fill(amb_u32, &mut reserved[..])(data)?;
        let (data, var_name) = nul_string(data)?;
        let (mut data, item_count) = amb_u32(data)?;
        let mut item_stride = None;
        if flags.has_opaque_items() {
            let (d, stride) = amb_u32(data)?;
            item_stride = Some(stride);
            data = d;
        }
        let layout = match item_stride {
            Some(stride) => KmapItemLayout::Opaque(stride),
            None => KmapItemLayout::Pair,
        };
        // counts come from the file, so grow as items actually parse
        let mut items = Vec::new();
        for _ in 0..item_count {
            let (d, item) = KmapItem::parse(data, layout)?;
            items.push(item);
            data = d;
        }
        let (data, ()) = sentinel(data, ChunkTag::Kmap)?;
        Ok((
            data,
            Self {
                size,
                flags,
                reserved,
                var_name,
                item_stride,
                items,
            },
        ))
    }
    #[inline]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Glbl {
    pub size: u32,
    /// Observed as 12 in every file.
    pub header_len: u32,
    /// Observed as `00 00 00 00 00 00 00 00 CD CD CD CD`.
    pub header: Vec<u8>,
    /// Whatever `size` covers past the header. Empty in every known file.
    pub trailing: Vec<u8>,
}

impl Glbl {
    pub fn parse(input: &[u8]) -> PResult<'_, Self> {
        let (body, size) = amb_u32(input)?;
        let (data, header_len) = amb_u32(body)?;
        let (data, header) = take(header_len as usize)(data)?;
        let consumed = body.len() - data.len();
        let remaining = (size as usize)
            .checked_sub(consumed)
            .ok_or_else(|| malformed(input, ChunkTag::Glbl, "header extends past chunk size"))?;
        let (data, trailing) = take(remaining)(data)?;
        Ok((
            data,
            Self {
                size,
                header_len,
                header: header.to_vec(),
                trailing: trailing.to_vec(),
            },
        ))
    }
}

fn sentinel(input: &[u8], tag: ChunkTag) -> PResult<'_, ()> {
    let (data, value) = amb_u32(input)?;
    if value != SENTINEL {
        return Err(malformed(input, tag, "missing FA 00 00 00 terminator"));
    }
    Ok((data, ()))
}

/// A decoded AMB file: its chunks in file order and the embedded MIDI stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AmbFile {
    pub chunks: Vec<Chunk>,
    pub midi: Option<MidiStream>,
}

impl AmbFile {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        Self::parse_chunks(data)
            .map(|(_, amb)| amb)
            .map_err(|e| DecodeError::from_nom(data, e))
    }
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        log::debug!("Reading `{}`", path.display());
        let data = std::fs::read(path)?;
        let amb = Self::parse(&data)?;
        log::trace!(
            "`{}`: {} chunks, {} MIDI tracks",
            path.display(),
            amb.chunks.len(),
            amb.midi.as_ref().map_or(0, |m| m.tracks.len())
        );
        Ok(amb)
    }
    fn parse_chunks(mut input: &[u8]) -> PResult<'_, Self> {
        let mut amb = Self::default();
        while !input.is_empty() {
            let (data, tag) = chunk_tag(input)?;
            let data = match &tag {
                b"prgm" => {
                    let (data, prgm) = Prgm::parse(data)?;
                    amb.chunks.push(Chunk::Prgm(prgm));
                    data
                }
                b"kmap" => {
                    let (data, kmap) = Kmap::parse(data)?;
                    amb.chunks.push(Chunk::Kmap(kmap));
                    data
                }
                b"glbl" => {
                    let (data, glbl) = Glbl::parse(data)?;
                    amb.chunks.push(Chunk::Glbl(glbl));
                    data
                }
                b"MThd" => {
                    if amb.midi.is_some() {
                        return fail(input, DecodeErrorKind::DuplicateMidiHeader);
                    }
                    let (data, midi) = MidiStream::parse(data)?;
                    amb.midi = Some(midi);
                    data
                }
                _ => return fail(input, DecodeErrorKind::InvalidChunkTag(tag)),
            };
            input = data;
        }
        Ok((input, amb))
    }
    pub fn prgms(&self) -> impl Iterator<Item = &Prgm> {
        self.chunks.iter().filter_map(|c| match c {
            Chunk::Prgm(p) => Some(p),
            _ => None,
        })
    }
    pub fn kmaps(&self) -> impl Iterator<Item = &Kmap> {
        self.chunks.iter().filter_map(|c| match c {
            Chunk::Kmap(k) => Some(k),
            _ => None,
        })
    }
    pub fn glbls(&self) -> impl Iterator<Item = &Glbl> {
        self.chunks.iter().filter_map(|c| match c {
            Chunk::Glbl(g) => Some(g),
            _ => None,
        })
    }
}
