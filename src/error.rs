use std::path::Path;

use thiserror::Error;

/// I/O errors that can occur when reading slide files or prediction tables
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// File does not exist
    #[error("File not found: {0}")]
    NotFound(String),

    /// Any other failure reported by the operating system
    #[error("I/O error on {path}: {message}")]
    Os { path: String, message: String },

    /// Requested range exceeds file bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },
}

impl IoError {
    /// Convert a `std::io::Error` raised while accessing `path`.
    pub fn from_std(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        let path = path.as_ref().display().to_string();
        if err.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(path)
        } else {
            IoError::Os {
                path,
                message: err.to_string(),
            }
        }
    }
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// IFD offset points outside the file or loops back on itself
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// No tiled JPEG image in the file qualifies as a pyramid level
    #[error("No tiled JPEG pyramid levels found")]
    NoPyramidLevels,
}

/// Errors raised by a pyramid source.
///
/// Any of these is fatal for the slide being processed.
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// I/O failure while reading the slide
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Structural problem in a TIFF-based slide
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File type cannot be opened as a pyramid
    #[error("Unsupported slide format: {reason}")]
    UnsupportedFormat { reason: String },

    /// Requested pyramid level does not exist
    #[error("Invalid level {level}: slide has {level_count} levels")]
    InvalidLevel { level: usize, level_count: usize },

    /// Pixel data could not be decoded
    #[error("Failed to decode image data: {message}")]
    Decode { message: String },

    /// Required metadata property is absent
    #[error("Missing slide property: {0}")]
    MissingProperty(&'static str),

    /// Metadata property exists but cannot be interpreted
    #[error("Invalid value for slide property {key}: {value}")]
    InvalidProperty { key: &'static str, value: String },
}

/// Errors related to the persisted prediction table
#[derive(Debug, Clone, Error)]
pub enum TableError {
    /// The table expected for denoising / TSR computation does not exist
    #[error("Classification data not found: {path}")]
    MissingClassificationData { path: String },

    /// I/O failure while reading or writing the table
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Header lacks a required column
    #[error("Prediction table has no '{0}' column")]
    MissingColumn(&'static str),

    /// A row cannot be parsed
    #[error("Malformed prediction table at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// Errors that can occur while extracting tiles
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Region read failed
    #[error("Slide error: {0}")]
    Slide(#[from] SlideError),

    /// The output sink rejected a tile
    #[error("Failed to write tile {key}: {message}")]
    Sink { key: String, message: String },
}

/// Errors raised while computing the tumor-stroma ratio
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    /// Microns-per-pixel must be a positive finite number
    #[error("Invalid microns per pixel: {0}")]
    InvalidMpp(f64),

    /// Objective magnification must be a positive finite number
    #[error("Invalid magnification: {0}")]
    InvalidMagnification(f64),

    /// Slide metadata could not be read
    #[error("Slide error: {0}")]
    Slide(#[from] SlideError),

    /// Classification data could not be loaded
    #[error("Table error: {0}")]
    Table(#[from] TableError),
}

/// Per-slide failure of the end-to-end pipeline
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Slide(#[from] SlideError),

    #[error(transparent)]
    Tile(#[from] TileError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// The external classifier failed on a tile
    #[error("Classifier failed on tile {key}: {message}")]
    Classifier { key: String, message: String },
}
