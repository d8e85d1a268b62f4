//! Byte-range access to slide files.
//!
//! The TIFF parser only ever needs "give me `len` bytes at `offset`", so the
//! storage backend is hidden behind [`RangeReader`]. Local files go through
//! [`FileRangeReader`]; tests and embedded callers can hand over a byte
//! buffer with [`MemoryRangeReader`].

mod range_reader;

pub use range_reader::{FileRangeReader, MemoryRangeReader, RangeReader};
