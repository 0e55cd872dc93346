//! Compression primitives
//!
//! - **bit_stream**: fixed-capacity bit writer and bounded reader
//! - **kuba**: Gorilla-style delta-of-delta timestamp and XOR value codec

pub mod bit_stream;
pub mod kuba;

pub use bit_stream::{BitReader, BitWriter};
pub use kuba::ReplayState;
