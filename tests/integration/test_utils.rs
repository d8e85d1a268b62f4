//! Test utilities for integration tests.
//!
//! Builders for synthetic tiled JPEG TIFF/SVS files, synthetic slide images
//! and a color-based classifier standing in for a trained model.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, Rgb, RgbImage};

use tsr_analyzer::grid::Label;
use tsr_analyzer::pipeline::{Classifier, Prediction};

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
/// Tumor-like color: red dominant
pub const TUMOR_RGB: Rgb<u8> = Rgb([200, 40, 70]);
/// Stroma-like color: blue dominant
pub const STROMA_RGB: Rgb<u8> = Rgb([70, 40, 200]);

// =============================================================================
// Synthetic slides
// =============================================================================

/// White slide with a rectangular tissue block; tumor left of `split_x`,
/// stroma right of it.
pub fn tissue_image(
    width: u32,
    height: u32,
    block: (u32, u32, u32, u32),
    split_x: u32,
) -> RgbImage {
    let (left, top, right, bottom) = block;
    RgbImage::from_fn(width, height, |x, y| {
        if (left..right).contains(&x) && (top..bottom).contains(&y) {
            if x < split_x {
                TUMOR_RGB
            } else {
                STROMA_RGB
            }
        } else {
            WHITE
        }
    })
}

/// Downsample `base` by `factor` until a level would be smaller than
/// `min_side` on its longer side.
pub fn pyramid_levels(base: &RgbImage, factor: u32, min_side: u32) -> Vec<RgbImage> {
    let mut levels = vec![base.clone()];
    loop {
        let last = &levels[levels.len() - 1];
        let (w, h) = (last.width() / factor, last.height() / factor);
        if w == 0 || h == 0 || w.max(h) < min_side {
            break;
        }
        levels.push(imageops::resize(last, w, h, imageops::FilterType::Triangle));
    }
    levels
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(image).unwrap();
    buf
}

/// Mean absolute per-channel difference between two same-sized images.
pub fn mean_abs_diff(a: &RgbImage, b: &RgbImage) -> f64 {
    assert_eq!(a.dimensions(), b.dimensions());
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| (x as i16 - y as i16).unsigned_abs() as u64)
        .sum();
    total as f64 / a.as_raw().len() as f64
}

/// Per-process scratch directory.
pub fn temp_root() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tsr-it-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write bytes to a unique temp file and return its path.
pub fn temp_file(name: &str, data: &[u8]) -> PathBuf {
    let path = temp_root().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

// =============================================================================
// TIFF builder
// =============================================================================

const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    bytes: Vec<u8>,
}

impl Entry {
    fn short(tag: u16, value: u16) -> Self {
        Self {
            tag,
            field_type: TYPE_SHORT,
            count: 1,
            bytes: value.to_le_bytes().to_vec(),
        }
    }

    fn longs(tag: u16, values: &[u32]) -> Self {
        Self {
            tag,
            field_type: TYPE_LONG,
            count: values.len() as u64,
            bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn ascii(tag: u16, text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        Self {
            tag,
            field_type: TYPE_ASCII,
            count: bytes.len() as u64,
            bytes,
        }
    }
}

/// Little-endian tiled JPEG TIFF writer, classic or BigTIFF.
///
/// Each level becomes one IFD of full (non-abbreviated) JPEG tiles; edge
/// tiles are padded with white. The first IFD carries the description.
pub struct SvsBuilder {
    levels: Vec<RgbImage>,
    tile_size: u32,
    description: Option<String>,
    bigtiff: bool,
    quality: u8,
}

impl SvsBuilder {
    pub fn new(levels: Vec<RgbImage>, tile_size: u32) -> Self {
        Self {
            levels,
            tile_size,
            description: None,
            bigtiff: false,
            quality: 95,
        }
    }

    /// Aperio-style description carrying magnification and mpp.
    pub fn with_aperio(mut self, magnification: f64, mpp: f64) -> Self {
        let (w, h) = self.levels[0].dimensions();
        self.description = Some(format!(
            "Aperio Image Library v12.0.15\n{}x{} ({}x{}) JPEG/RGB Q=95|AppMag = {}|MPP = {}",
            w, h, self.tile_size, self.tile_size, magnification, mpp
        ));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_bigtiff(mut self, bigtiff: bool) -> Self {
        self.bigtiff = bigtiff;
        self
    }

    fn tiles(&self, level: &RgbImage) -> Vec<Vec<u8>> {
        let ts = self.tile_size;
        let tiles_x = level.width().div_ceil(ts);
        let tiles_y = level.height().div_ceil(ts);
        let mut tiles = Vec::new();
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let tile = RgbImage::from_fn(ts, ts, |x, y| {
                    let (gx, gy) = (tx * ts + x, ty * ts + y);
                    if gx < level.width() && gy < level.height() {
                        *level.get_pixel(gx, gy)
                    } else {
                        WHITE
                    }
                });
                tiles.push(encode_jpeg(&tile, self.quality));
            }
        }
        tiles
    }

    pub fn build(&self) -> Vec<u8> {
        let header_size = if self.bigtiff { 16 } else { 8 };
        let mut data = vec![0u8; header_size];

        // Tile payloads first, then one IFD per level.
        let mut ifds: Vec<Vec<Entry>> = Vec::new();
        for (index, level) in self.levels.iter().enumerate() {
            let mut offsets = Vec::new();
            let mut counts = Vec::new();
            for tile in self.tiles(level) {
                offsets.push(data.len() as u32);
                counts.push(tile.len() as u32);
                data.extend(tile);
            }

            let mut entries = vec![
                Entry::longs(256, &[level.width()]),
                Entry::longs(257, &[level.height()]),
                Entry::short(258, 8),
                Entry::short(259, 7),
                Entry::short(262, 2),
                Entry::short(277, 3),
                Entry::short(322, self.tile_size as u16),
                Entry::short(323, self.tile_size as u16),
                Entry::longs(324, &offsets),
                Entry::longs(325, &counts),
            ];
            if index == 0 {
                if let Some(description) = &self.description {
                    entries.push(Entry::ascii(270, description));
                }
            }
            entries.sort_by_key(|e| e.tag);
            ifds.push(entries);
        }

        // Out-of-line values.
        let inline = if self.bigtiff { 8 } else { 4 };
        let mut value_offsets: Vec<Vec<Option<u64>>> = Vec::new();
        for entries in &ifds {
            let mut offsets = Vec::new();
            for entry in entries {
                if entry.bytes.len() > inline {
                    offsets.push(Some(data.len() as u64));
                    data.extend(&entry.bytes);
                } else {
                    offsets.push(None);
                }
            }
            value_offsets.push(offsets);
        }
        if data.len() % 2 == 1 {
            data.push(0);
        }

        let first_ifd = data.len() as u64;
        for (i, entries) in ifds.iter().enumerate() {
            let ifd_size = if self.bigtiff {
                8 + entries.len() * 20 + 8
            } else {
                2 + entries.len() * 12 + 4
            };
            let next = if i + 1 < ifds.len() {
                (data.len() + ifd_size) as u64
            } else {
                0
            };

            if self.bigtiff {
                data.extend((entries.len() as u64).to_le_bytes());
            } else {
                data.extend((entries.len() as u16).to_le_bytes());
            }
            for (entry, offset) in entries.iter().zip(&value_offsets[i]) {
                data.extend(entry.tag.to_le_bytes());
                data.extend(entry.field_type.to_le_bytes());
                let mut value = vec![0u8; inline];
                match offset {
                    Some(o) if self.bigtiff => value.copy_from_slice(&o.to_le_bytes()),
                    Some(o) => value.copy_from_slice(&(*o as u32).to_le_bytes()),
                    None => value[..entry.bytes.len()].copy_from_slice(&entry.bytes),
                }
                if self.bigtiff {
                    data.extend(entry.count.to_le_bytes());
                } else {
                    data.extend((entry.count as u32).to_le_bytes());
                }
                data.extend(value);
            }
            if self.bigtiff {
                data.extend(next.to_le_bytes());
            } else {
                data.extend((next as u32).to_le_bytes());
            }
        }

        data[0] = b'I';
        data[1] = b'I';
        if self.bigtiff {
            data[2..4].copy_from_slice(&43u16.to_le_bytes());
            data[4..6].copy_from_slice(&8u16.to_le_bytes());
            data[6..8].copy_from_slice(&0u16.to_le_bytes());
            data[8..16].copy_from_slice(&first_ifd.to_le_bytes());
        } else {
            data[2..4].copy_from_slice(&42u16.to_le_bytes());
            data[4..8].copy_from_slice(&(first_ifd as u32).to_le_bytes());
        }
        data
    }
}

// =============================================================================
// Classifier stand-in
// =============================================================================

/// Labels a tile by its dominant mean channel: red is tumor, blue is
/// stroma, anything else is other. Counts calls.
#[derive(Default)]
pub struct ColorClassifier {
    calls: AtomicUsize,
}

impl ColorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for ColorClassifier {
    fn classify(&self, tile: &RgbImage) -> Result<Prediction, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut sums = [0u64; 3];
        for p in tile.pixels() {
            for c in 0..3 {
                sums[c] += p[c] as u64;
            }
        }
        let label = if sums[0] > sums[2] + sums[1] / 2 {
            Label::Tumor
        } else if sums[2] > sums[0] + sums[1] / 2 {
            Label::Stroma
        } else {
            Label::Other
        };
        let mut probabilities = vec![0.0; 3];
        probabilities[label.index() as usize] = 1.0;
        Ok(Prediction {
            label,
            probabilities,
        })
    }
}
