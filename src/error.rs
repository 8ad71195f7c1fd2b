use crate::amb::ChunkTag;
use std::path::PathBuf;
use thiserror::Error;

/// A failure while decoding one AMB file, with the byte offset it occurred at.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind} at offset 0x{offset:x}")]
pub struct DecodeError {
    offset: usize,
    kind: DecodeErrorKind,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum DecodeErrorKind {
    #[error("Unexpected end of data")]
    UnexpectedEof,
    #[error("Malformed {tag} chunk: {reason}")]
    MalformedChunk { tag: ChunkTag, reason: &'static str },
    #[error("Invalid chunk tag {}", .0.escape_ascii())]
    InvalidChunkTag([u8; 4]),
    #[error("Unsupported MIDI header (length {length}, format {format})")]
    UnsupportedMidiHeader { length: u32, format: u16 },
    #[error("Unsupported MIDI division 0x{0:04x}")]
    UnsupportedMidiDivision(u16),
    #[error("Unexpected chunk tag {} while reading MIDI tracks", .0.escape_ascii())]
    UnexpectedChunkTag([u8; 4]),
    #[error("File contains multiple MIDI headers")]
    DuplicateMidiHeader,
    #[error("Expected exactly one SetTempo event in first track, found {0}")]
    AmbiguousTempo(usize),
    #[error("Channel mode message (channel {channel}, controller {controller}) is not supported")]
    ChannelModeMessageUnsupported { channel: u8, controller: u8 },
    #[error("Invalid text: {0}")]
    InvalidText(#[source] std::str::Utf8Error),
}

impl DecodeError {
    pub const fn new(offset: usize, kind: DecodeErrorKind) -> Self {
        Self { offset, kind }
    }
    /// Byte position in the file where decoding failed.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }
    #[inline]
    pub fn kind(&self) -> &DecodeErrorKind {
        &self.kind
    }
    /// Resolves a parser failure against the buffer the parse started from.
    pub(crate) fn from_nom(base: &[u8], e: nom::Err<Failure<'_>>) -> Self {
        match e {
            nom::Err::Incomplete(_) => Self::new(base.len(), DecodeErrorKind::UnexpectedEof),
            nom::Err::Error(f) | nom::Err::Failure(f) => {
                Self::new(nom::Offset::offset(base, f.input), f.kind)
            }
        }
    }
}

/// Error type threaded through the nom parsers. Holds the remaining input at
/// the point of failure so the offset can be recovered afterwards.
#[derive(Debug)]
pub struct Failure<'a> {
    pub input: &'a [u8],
    pub kind: DecodeErrorKind,
}

impl<'a> Failure<'a> {
    #[inline]
    pub fn new(input: &'a [u8], kind: DecodeErrorKind) -> Self {
        Self { input, kind }
    }
}

impl<'a> nom::error::ParseError<&'a [u8]> for Failure<'a> {
    // only the primitive readers reach this, and they only fail on short input
    fn from_error_kind(input: &'a [u8], _kind: nom::error::ErrorKind) -> Self {
        Self::new(input, DecodeErrorKind::UnexpectedEof)
    }
    fn append(_input: &'a [u8], _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

pub(crate) type PResult<'a, T> = nom::IResult<&'a [u8], T, Failure<'a>>;

/// Fails the whole parse at `input` with `kind`.
#[inline]
pub(crate) fn fail<T>(input: &[u8], kind: DecodeErrorKind) -> PResult<'_, T> {
    Err(nom::Err::Failure(Failure::new(input, kind)))
}

#[inline]
pub(crate) fn malformed<'a>(
    input: &'a [u8],
    tag: ChunkTag,
    reason: &'static str,
) -> nom::Err<Failure<'a>> {
    nom::Err::Failure(Failure::new(
        input,
        DecodeErrorKind::MalformedChunk { tag, reason },
    ))
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("No AMB path matches `{0}`")]
    NoMatch(String),
    #[error("Pattern `{pattern}` is ambiguous. Matches: {}", display_paths(.matches))]
    Ambiguous {
        pattern: String,
        matches: Vec<PathBuf>,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    use itertools::Itertools;
    paths.iter().map(|p| p.display()).join(", ")
}
