//! Length-field framing parameters.

use bytes::{BufMut, BytesMut};

use crate::error::FrameError;

/// Byte order used for encoding and decoding length fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// Generalized length-field framing scheme.
///
/// Four parameters describe where the length field sits inside a frame and
/// how the declared value maps to the bytes that follow it, so the decoder
/// can handle protocols that include or exclude headers and trailers in the
/// declared length:
///
/// - `length_field_offset` — byte offset of the length field from the start
///   of the frame.
/// - `length_field_length` — width of the length field (1, 2, 4, or 8 bytes);
///   the value is interpreted as a signed integer.
/// - `length_adjustment` — signed correction added to the declared body
///   length to obtain the number of body bytes following the header.
/// - `initial_bytes_to_strip` — leading bytes omitted from emitted payloads,
///   typically the length field itself.
///
/// [`FrameFormat::default`] is the concrete wire convention used by
/// [`Connection`](crate::connection::Connection): a bare 4-byte little-endian
/// signed prefix, stripped from the delivered payload.
#[derive(Clone, Copy, Debug)]
pub struct FrameFormat {
    length_field_offset: usize,
    length_field_length: usize,
    length_adjustment: i64,
    initial_bytes_to_strip: usize,
    endianness: Endianness,
}

impl FrameFormat {
    /// Create a format from the four framing parameters.
    #[must_use]
    pub const fn new(
        length_field_offset: usize,
        length_field_length: usize,
        length_adjustment: i64,
        initial_bytes_to_strip: usize,
        endianness: Endianness,
    ) -> Self {
        Self {
            length_field_offset,
            length_field_length,
            length_adjustment,
            initial_bytes_to_strip,
            endianness,
        }
    }

    /// A bare length prefix of `width` bytes, stripped from the payload.
    #[must_use]
    pub const fn length_prefixed(width: usize, endianness: Endianness) -> Self {
        Self::new(0, width, 0, width, endianness)
    }

    /// Byte offset of the length field within the frame.
    #[must_use]
    pub const fn length_field_offset(&self) -> usize { self.length_field_offset }

    /// Width of the length field in bytes.
    #[must_use]
    pub const fn length_field_length(&self) -> usize { self.length_field_length }

    /// Signed correction applied to the declared body length.
    #[must_use]
    pub const fn length_adjustment(&self) -> i64 { self.length_adjustment }

    /// Leading bytes omitted from emitted payloads.
    #[must_use]
    pub const fn initial_bytes_to_strip(&self) -> usize { self.initial_bytes_to_strip }

    /// Number of bytes required before the length field can be read.
    #[must_use]
    pub const fn head_len(&self) -> usize { self.length_field_offset + self.length_field_length }

    /// Read the declared body length from `bytes`, which must hold at least
    /// `length_field_length` bytes.
    pub(crate) fn read_length(&self, bytes: &[u8]) -> Result<i64, FrameError> {
        let value = match (self.length_field_length, self.endianness) {
            (1, _) => i64::from(i8::from_ne_bytes([bytes[0]])),
            (2, Endianness::Big) => i64::from(i16::from_be_bytes([bytes[0], bytes[1]])),
            (2, Endianness::Little) => i64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            (4, Endianness::Big) => {
                i64::from(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            (4, Endianness::Little) => {
                i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            (8, Endianness::Big) => i64::from_be_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]),
            (8, Endianness::Little) => i64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]),
            (width, _) => return Err(FrameError::UnsupportedLengthWidth(width)),
        };
        Ok(value)
    }

    /// Append a length field declaring `len` body bytes to `dst`.
    ///
    /// Only prefix-style formats are encodable generically; the offset region
    /// of exotic layouts is protocol-specific and written by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::LengthOverflow`] if `len` does not fit the
    /// signed range of the configured width, or
    /// [`FrameError::UnsupportedLengthWidth`] for widths other than 1, 2, 4,
    /// or 8 bytes.
    pub fn write_length(&self, len: usize, dst: &mut BytesMut) -> Result<(), FrameError> {
        let overflow = |_| FrameError::LengthOverflow { len };
        match (self.length_field_length, self.endianness) {
            (1, _) => dst.put_i8(i8::try_from(len).map_err(overflow)?),
            (2, Endianness::Big) => {
                dst.put_slice(&i16::try_from(len).map_err(overflow)?.to_be_bytes());
            }
            (2, Endianness::Little) => {
                dst.put_slice(&i16::try_from(len).map_err(overflow)?.to_le_bytes());
            }
            (4, Endianness::Big) => {
                dst.put_slice(&i32::try_from(len).map_err(overflow)?.to_be_bytes());
            }
            (4, Endianness::Little) => {
                dst.put_slice(&i32::try_from(len).map_err(overflow)?.to_le_bytes());
            }
            (8, Endianness::Big) => {
                dst.put_slice(&i64::try_from(len).map_err(overflow)?.to_be_bytes());
            }
            (8, Endianness::Little) => {
                dst.put_slice(&i64::try_from(len).map_err(overflow)?.to_le_bytes());
            }
            (width, _) => return Err(FrameError::UnsupportedLengthWidth(width)),
        }
        Ok(())
    }

    /// Frame `payload` with a length prefix and append the result to `dst`.
    ///
    /// # Errors
    ///
    /// Propagates [`FrameError`] from [`FrameFormat::write_length`].
    pub fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.reserve(self.length_field_length + payload.len());
        self.write_length(payload.len(), dst)?;
        dst.extend_from_slice(payload);
        Ok(())
    }
}

impl Default for FrameFormat {
    fn default() -> Self { Self::length_prefixed(4, Endianness::Little) }
}
