//! Minimal TIFF / BigTIFF structure parsing.
//!
//! Only what a pyramid reader needs: the header, the IFD chain, and the
//! values of a handful of tags (dimensions, tiling, tile locations,
//! JPEGTables, ImageDescription).
//!
//! # Layout
//!
//! ```text
//! Classic TIFF header (8 bytes):   II|MM, 42, u32 first IFD offset
//! BigTIFF header (16 bytes):       II|MM, 43, 8, 0, u64 first IFD offset
//!
//! Classic IFD: u16 count, count x 12-byte entries, u32 next offset
//! BigTIFF IFD: u64 count, count x 20-byte entries, u64 next offset
//! ```

use std::collections::HashSet;

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

/// Safety limit on the length of an IFD chain.
const MAX_IFDS: usize = 256;

/// Safety limit on the number of entries in a single IFD.
const MAX_IFD_ENTRIES: u64 = 4096;

/// TIFF tag numbers used by the pyramid reader.
pub mod tag {
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const COMPRESSION: u16 = 259;
    pub const IMAGE_DESCRIPTION: u16 = 270;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const JPEG_TABLES: u16 = 347;
}

/// Compression value for "new style" JPEG.
pub const COMPRESSION_JPEG: u64 = 7;

// =============================================================================
// Byte Order
// =============================================================================

/// Byte order declared in the TIFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// "II"
    LittleEndian,
    /// "MM"
    BigEndian,
}

impl ByteOrder {
    pub fn u16(self, b: &[u8]) -> u16 {
        let raw = [b[0], b[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    pub fn u32(self, b: &[u8]) -> u32 {
        let raw = [b[0], b[1], b[2], b[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    pub fn u64(self, b: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&b[..8]);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }
}

// =============================================================================
// Header
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Read and parse the header at the start of the file.
    pub fn read<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let size = reader.size();
        if size < 8 {
            return Err(TiffError::FileTooSmall {
                required: 8,
                actual: size,
            });
        }
        let bytes = reader.read_exact_at(0, size.min(16) as usize)?;
        Self::parse(&bytes)
    }

    /// Parse a header from its raw bytes (8 for TIFF, 16 for BigTIFF).
    pub fn parse(bytes: &[u8]) -> Result<Self, TiffError> {
        if bytes.len() < 8 {
            return Err(TiffError::FileTooSmall {
                required: 8,
                actual: bytes.len() as u64,
            });
        }

        let byte_order = match [bytes[0], bytes[1]] {
            [0x49, 0x49] => ByteOrder::LittleEndian,
            [0x4D, 0x4D] => ByteOrder::BigEndian,
            other => return Err(TiffError::InvalidMagic(u16::from_be_bytes(other))),
        };

        match byte_order.u16(&bytes[2..4]) {
            42 => Ok(Self {
                byte_order,
                is_bigtiff: false,
                first_ifd_offset: byte_order.u32(&bytes[4..8]) as u64,
            }),
            43 => {
                if bytes.len() < 16 {
                    return Err(TiffError::FileTooSmall {
                        required: 16,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                Ok(Self {
                    byte_order,
                    is_bigtiff: true,
                    first_ifd_offset: byte_order.u64(&bytes[8..16]),
                })
            }
            version => Err(TiffError::InvalidVersion(version)),
        }
    }

    fn entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    fn count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }
}

// =============================================================================
// IFD Entries
// =============================================================================

/// Size in bytes of one value of a TIFF field type.
pub fn field_type_size(field_type: u16) -> Result<usize, TiffError> {
    match field_type {
        1 | 2 | 6 | 7 => Ok(1),
        3 | 8 => Ok(2),
        4 | 9 | 11 | 13 => Ok(4),
        5 | 10 | 12 | 16 | 17 | 18 => Ok(8),
        other => Err(TiffError::UnknownFieldType(other)),
    }
}

/// A single directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u64,
    /// Raw value field: the value itself when it fits, else an offset
    pub value: [u8; 8],
}

impl IfdEntry {
    fn byte_len(&self) -> Result<u64, TiffError> {
        let size = field_type_size(self.field_type)? as u64;
        self.count
            .checked_mul(size)
            .ok_or(TiffError::InvalidTagValue {
                tag: "entry",
                message: format!("count {} overflows", self.count),
            })
    }

    /// Fetch the raw bytes of this entry's values, inline or out of line.
    pub fn read_bytes<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Bytes, TiffError> {
        let len = self.byte_len()?;
        if len <= header.offset_size() as u64 {
            return Ok(Bytes::copy_from_slice(&self.value[..len as usize]));
        }
        let offset = if header.is_bigtiff {
            header.byte_order.u64(&self.value)
        } else {
            header.byte_order.u32(&self.value) as u64
        };
        Ok(reader.read_exact_at(offset, len as usize)?)
    }

    /// Read all values as unsigned integers (BYTE, SHORT, LONG, LONG8).
    pub fn read_unsigned<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<u64>, TiffError> {
        let bytes = self.read_bytes(reader, header)?;
        let bo = header.byte_order;
        let values = match self.field_type {
            1 | 7 => bytes.iter().map(|&b| b as u64).collect(),
            3 => bytes.chunks_exact(2).map(|c| bo.u16(c) as u64).collect(),
            4 | 13 => bytes.chunks_exact(4).map(|c| bo.u32(c) as u64).collect(),
            16 | 18 => bytes.chunks_exact(8).map(|c| bo.u64(c)).collect(),
            other => {
                return Err(TiffError::InvalidTagValue {
                    tag: "unsigned",
                    message: format!("tag {} has non-integer type {}", self.tag, other),
                })
            }
        };
        Ok(values)
    }

    /// Read an ASCII value, dropping the trailing NUL.
    pub fn read_string<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        header: &TiffHeader,
    ) -> Result<String, TiffError> {
        let bytes = self.read_bytes(reader, header)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

// =============================================================================
// IFD
// =============================================================================

/// A parsed Image File Directory.
#[derive(Debug, Clone)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub next_offset: u64,
}

impl Ifd {
    /// Parse the IFD located at `offset`.
    pub fn read<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        offset: u64,
    ) -> Result<Self, TiffError> {
        let bo = header.byte_order;
        let count_bytes = reader
            .read_exact_at(offset, header.count_size())
            .map_err(|_| TiffError::InvalidIfdOffset(offset))?;
        let count = if header.is_bigtiff {
            bo.u64(&count_bytes)
        } else {
            bo.u16(&count_bytes) as u64
        };
        if count > MAX_IFD_ENTRIES {
            return Err(TiffError::InvalidTagValue {
                tag: "IFD",
                message: format!("{} entries at offset {}", count, offset),
            });
        }

        let entry_size = header.entry_size();
        let body_len = count as usize * entry_size + header.offset_size();
        let body = reader.read_exact_at(offset + header.count_size() as u64, body_len)?;

        let entries = body[..count as usize * entry_size]
            .chunks_exact(entry_size)
            .map(|raw| {
                let mut value = [0u8; 8];
                let (count, value_bytes) = if header.is_bigtiff {
                    (bo.u64(&raw[4..12]), &raw[12..20])
                } else {
                    (bo.u32(&raw[4..8]) as u64, &raw[8..12])
                };
                value[..value_bytes.len()].copy_from_slice(value_bytes);
                IfdEntry {
                    tag: bo.u16(&raw[0..2]),
                    field_type: bo.u16(&raw[2..4]),
                    count,
                    value,
                }
            })
            .collect();

        let tail = &body[count as usize * entry_size..];
        let next_offset = if header.is_bigtiff {
            bo.u64(tail)
        } else {
            bo.u32(tail) as u64
        };

        Ok(Self {
            entries,
            next_offset,
        })
    }

    /// Walk the IFD chain starting at the header's first offset.
    pub fn read_chain<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<Ifd>, TiffError> {
        let mut ifds = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS {
            if offset >= reader.size() || !seen.insert(offset) {
                return Err(TiffError::InvalidIfdOffset(offset));
            }
            let ifd = Self::read(reader, header, offset)?;
            offset = ifd.next_offset;
            ifds.push(ifd);
        }

        Ok(ifds)
    }

    pub fn get(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    /// Read a single-valued integer tag.
    pub fn scalar<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        header: &TiffHeader,
        tag: u16,
    ) -> Result<Option<u64>, TiffError> {
        match self.get(tag) {
            None => Ok(None),
            Some(entry) => Ok(entry.read_unsigned(reader, header)?.first().copied()),
        }
    }

    /// Whether this directory describes a tiled image.
    pub fn is_tiled(&self) -> bool {
        self.get(tag::TILE_WIDTH).is_some()
            && self.get(tag::TILE_LENGTH).is_some()
            && self.get(tag::TILE_OFFSETS).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryRangeReader;

    fn classic_le_with_one_ifd() -> Vec<u8> {
        // Header: II, 42, first IFD at 8
        let mut data = vec![0x49, 0x49, 42, 0, 8, 0, 0, 0];
        // IFD with 2 entries
        data.extend_from_slice(&2u16.to_le_bytes());
        // ImageWidth SHORT 1 = 1000
        data.extend_from_slice(&256u16.to_le_bytes());
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&[0xE8, 0x03, 0, 0]);
        // ImageDescription ASCII 6 at offset 38
        data.extend_from_slice(&270u16.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&6u32.to_le_bytes());
        data.extend_from_slice(&38u32.to_le_bytes());
        // next IFD = 0
        data.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(data.len(), 38);
        data.extend_from_slice(b"hello\0");
        data
    }

    #[test]
    fn test_parse_classic_header() {
        let header = TiffHeader::parse(&[0x49, 0x49, 42, 0, 8, 0, 0, 0]).unwrap();
        assert_eq!(header.byte_order, ByteOrder::LittleEndian);
        assert!(!header.is_bigtiff);
        assert_eq!(header.first_ifd_offset, 8);

        let header = TiffHeader::parse(&[0x4D, 0x4D, 0, 42, 0, 0, 0, 16]).unwrap();
        assert_eq!(header.byte_order, ByteOrder::BigEndian);
        assert_eq!(header.first_ifd_offset, 16);
    }

    #[test]
    fn test_parse_bigtiff_header() {
        let mut bytes = vec![0x49, 0x49, 43, 0, 8, 0, 0, 0];
        bytes.extend_from_slice(&1234u64.to_le_bytes());
        let header = TiffHeader::parse(&bytes).unwrap();
        assert!(header.is_bigtiff);
        assert_eq!(header.first_ifd_offset, 1234);

        let mut bad = vec![0x49, 0x49, 43, 0, 4, 0, 0, 0];
        bad.extend_from_slice(&0u64.to_le_bytes());
        assert!(matches!(
            TiffHeader::parse(&bad),
            Err(TiffError::InvalidBigTiffOffsetSize(4))
        ));
    }

    #[test]
    fn test_parse_header_errors() {
        assert!(matches!(
            TiffHeader::parse(&[0x00, 0x01, 42, 0, 8, 0, 0, 0]),
            Err(TiffError::InvalidMagic(0x0001))
        ));
        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49, 7, 0, 8, 0, 0, 0]),
            Err(TiffError::InvalidVersion(7))
        ));
        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49]),
            Err(TiffError::FileTooSmall { .. })
        ));
    }

    #[test]
    fn test_read_ifd_chain_and_values() {
        let reader = MemoryRangeReader::new(classic_le_with_one_ifd(), "test.tif");
        let header = TiffHeader::read(&reader).unwrap();
        let ifds = Ifd::read_chain(&reader, &header).unwrap();
        assert_eq!(ifds.len(), 1);

        let ifd = &ifds[0];
        assert_eq!(
            ifd.scalar(&reader, &header, tag::IMAGE_WIDTH).unwrap(),
            Some(1000)
        );
        assert_eq!(ifd.scalar(&reader, &header, tag::TILE_WIDTH).unwrap(), None);
        assert!(!ifd.is_tiled());

        let description = ifd
            .get(tag::IMAGE_DESCRIPTION)
            .unwrap()
            .read_string(&reader, &header)
            .unwrap();
        assert_eq!(description, "hello");
    }

    #[test]
    fn test_ifd_loop_detected() {
        let mut data = classic_le_with_one_ifd();
        // Point next IFD back at the first one
        data[34..38].copy_from_slice(&8u32.to_le_bytes());
        let reader = MemoryRangeReader::new(data, "loop.tif");
        let header = TiffHeader::read(&reader).unwrap();
        assert!(matches!(
            Ifd::read_chain(&reader, &header),
            Err(TiffError::InvalidIfdOffset(8))
        ));
    }

    #[test]
    fn test_field_type_size() {
        assert_eq!(field_type_size(3).unwrap(), 2);
        assert_eq!(field_type_size(16).unwrap(), 8);
        assert!(matches!(
            field_type_size(99),
            Err(TiffError::UnknownFieldType(99))
        ));
    }
}
