//! Incremental frame reassembly from an unbounded byte stream.

use crate::error::FrameError;

use super::format::FrameFormat;

/// Default receive buffer capacity, and therefore the hard upper bound on
/// frame size: 64 KiB.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Stateful byte-stream demultiplexer.
///
/// The decoder owns a single fixed-capacity buffer reused across socket
/// reads; it never allocates on the read path. The owner reads into
/// [`spare_capacity_mut`](FrameDecoder::spare_capacity_mut) and then calls
/// [`commit`](FrameDecoder::commit), which extracts every complete frame and
/// compacts the unconsumed remainder to the buffer start. One read may yield
/// zero, one, or many frames.
///
/// The buffer is not resizable: a frame whose declared total length exceeds
/// the capacity can never be reassembled and fails the stream fatally.
#[derive(Debug)]
pub struct FrameDecoder {
    format: FrameFormat,
    buf: Box<[u8]>,
    len: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default 64 KiB buffer.
    #[must_use]
    pub fn new(format: FrameFormat) -> Self {
        Self::with_capacity(format, DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a decoder with an explicit buffer capacity.
    #[must_use]
    pub fn with_capacity(format: FrameFormat, capacity: usize) -> Self {
        Self {
            format,
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Fixed capacity of the receive buffer.
    #[must_use]
    pub fn capacity(&self) -> usize { self.buf.len() }

    /// Number of carried-over bytes awaiting a frame boundary.
    #[must_use]
    pub fn buffered(&self) -> usize { self.len }

    /// The free tail region of the buffer for the next socket read.
    ///
    /// Empty only when the carried-over remainder already fills the buffer,
    /// which with any sane format means the stream is waiting on a frame the
    /// buffer cannot hold.
    pub fn spare_capacity_mut(&mut self) -> &mut [u8] { &mut self.buf[self.len..] }

    /// Account `read` freshly written bytes and extract complete frames.
    ///
    /// Runs the length-field loop: once `head_len` bytes are available the
    /// declared body length is read and the frame's total length computed as
    /// `head_len + length_adjustment + declared`. Complete frames are emitted
    /// with the first `initial_bytes_to_strip` bytes omitted; an incomplete
    /// tail is compacted to the buffer start to await more data.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::CorruptLength`] when the declared length is
    /// negative or yields a frame shorter than its own header or stripped
    /// prefix, and [`FrameError::FrameTooLarge`] when the total length
    /// exceeds the buffer capacity. Both are fatal: the caller must tear the
    /// connection down.
    pub fn commit(&mut self, read: usize) -> Result<Vec<Vec<u8>>, FrameError> {
        debug_assert!(self.len + read <= self.buf.len());
        self.len += read;

        let head_len = self.format.head_len();
        let strip = self.format.initial_bytes_to_strip();
        let mut frames = Vec::new();
        let mut offset = 0;

        loop {
            let remain = self.len - offset;
            if remain < head_len {
                break;
            }

            let field_start = offset + self.format.length_field_offset();
            let declared = self
                .format
                .read_length(&self.buf[field_start..field_start + self.format.length_field_length()])?;
            let total_len = head_len as i64 + self.format.length_adjustment() + declared;
            if declared < 0 || total_len < head_len.max(strip) as i64 {
                return Err(FrameError::CorruptLength {
                    declared,
                    total: total_len,
                });
            }
            // total_len >= head_len >= 1, so the cast cannot wrap
            let total = usize::try_from(total_len).map_err(|_| FrameError::FrameTooLarge {
                total: usize::MAX,
                capacity: self.buf.len(),
            })?;
            if total > self.buf.len() {
                return Err(FrameError::FrameTooLarge {
                    total,
                    capacity: self.buf.len(),
                });
            }
            if remain < total {
                break;
            }

            frames.push(self.buf[offset + strip..offset + total].to_vec());
            offset += total;
        }

        if offset > 0 {
            self.buf.copy_within(offset..self.len, 0);
            self.len -= offset;
        }
        Ok(frames)
    }
}
