//! Primitive field readers shared by the AMB and MIDI decoders.
//!
//! AMB fields are little endian while the embedded MIDI stream is big endian.

use crate::error::{DecodeErrorKind, Failure, PResult};
use nom::{
    bytes::complete::{tag, take, take_till},
    number::complete::{be_u16, be_u32, be_u8, le_i32, le_u32},
};

#[inline]
pub fn amb_u32(input: &[u8]) -> PResult<'_, u32> {
    le_u32(input)
}

#[inline]
pub fn amb_i32(input: &[u8]) -> PResult<'_, i32> {
    le_i32(input)
}

#[inline]
pub fn midi_u32(input: &[u8]) -> PResult<'_, u32> {
    be_u32(input)
}

#[inline]
pub fn midi_u16(input: &[u8]) -> PResult<'_, u16> {
    be_u16(input)
}

/// Reads a 4 byte chunk tag.
#[inline]
pub fn chunk_tag(input: &[u8]) -> PResult<'_, [u8; 4]> {
    let (rest, tag) = be_u32(input)?;
    Ok((rest, tag.to_be_bytes()))
}

fn decode_text(bytes: &[u8]) -> Result<String, nom::Err<Failure<'_>>> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| nom::Err::Failure(Failure::new(bytes, DecodeErrorKind::InvalidText(e))))
}

/// Reads text up to and including a NUL byte.
pub fn nul_string(input: &[u8]) -> PResult<'_, String> {
    let (rest, bytes) = take_till(|b| b == 0)(input)?;
    let (rest, _) = tag(&[0u8][..])(rest)?;
    Ok((rest, decode_text(bytes)?))
}

/// Reads exactly `len` bytes of text.
pub fn fixed_text(input: &[u8], len: usize) -> PResult<'_, String> {
    let (rest, bytes) = take(len)(input)?;
    Ok((rest, decode_text(bytes)?))
}

/// Reads a MIDI variable length quantity: 7 bits per byte, most significant
/// first, ending at the first byte with the high bit clear.
pub fn midi_vlq(mut input: &[u8]) -> PResult<'_, u32> {
    let mut value = 0u32;
    loop {
        let (rest, byte) = be_u8(input)?;
        input = rest;
        value = (value << 7) | u32::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok((input, value));
        }
    }
}
