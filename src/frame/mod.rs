//! Length-field framing: format parameters and the incremental decoder.

pub mod decoder;
pub mod format;

pub use decoder::{DEFAULT_BUFFER_CAPACITY, FrameDecoder};
pub use format::{Endianness, FrameFormat};
