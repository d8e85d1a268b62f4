//! `PyramidSource` trait for format-agnostic multi-resolution image access.
//!
//! Everything downstream of the slide (tissue detection, tile extraction,
//! hotspot search) only talks to this trait. Implementations:
//! - [`crate::slide::SvsSlide`] for Aperio SVS and tiled pyramidal TIFF files
//! - [`crate::slide::ImagePyramid`] for ordinary raster images held in memory

use image::RgbImage;

use crate::error::SlideError;

/// Property key holding the scanner objective power (e.g. "40").
pub const PROPERTY_OBJECTIVE_POWER: &str = "openslide.objective-power";

/// Property key holding microns per pixel along X at level 0.
pub const PROPERTY_MPP_X: &str = "openslide.mpp-x";

/// Property key holding the slide vendor.
pub const PROPERTY_VENDOR: &str = "openslide.vendor";

/// Magnification assumed when the slide does not record one.
pub const DEFAULT_OBJECTIVE_POWER: f64 = 40.0;

// =============================================================================
// Pyramid Level
// =============================================================================

/// Information about a single pyramid level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PyramidLevel {
    /// Index of this level (0 = full resolution)
    pub index: usize,

    /// Width of this level in pixels
    pub width: u32,

    /// Height of this level in pixels
    pub height: u32,

    /// Downsample factor relative to level 0
    pub downsample: f64,
}

// =============================================================================
// PyramidSource Trait
// =============================================================================

/// Read-only access to a multi-resolution image.
///
/// Implementations must be shareable between the tile extraction workers;
/// `read_region` is called concurrently from several threads.
pub trait PyramidSource: Send + Sync {
    /// Number of pyramid levels. Level 0 is the highest resolution.
    fn level_count(&self) -> usize;

    /// Get information about a level, or `None` if it does not exist.
    fn level(&self, index: usize) -> Option<PyramidLevel>;

    /// Read a rectangular region.
    ///
    /// `origin` is `(x, y)` in level-0 pixel coordinates, `size` is
    /// `(width, height)` in pixels of the requested level. Parts of the
    /// region outside the image come back white.
    fn read_region(
        &self,
        origin: (u32, u32),
        level: usize,
        size: (u32, u32),
    ) -> Result<RgbImage, SlideError>;

    /// Look up a metadata property.
    fn property(&self, key: &str) -> Option<String>;

    /// Get `(width, height)` of a level.
    fn dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.level(level).map(|l| (l.width, l.height))
    }

    /// Get the downsample factor of a level.
    fn downsample(&self, level: usize) -> Option<f64> {
        self.level(level).map(|l| l.downsample)
    }

    /// The lowest-resolution level.
    fn lowest_level(&self) -> Option<PyramidLevel> {
        self.level_count()
            .checked_sub(1)
            .and_then(|index| self.level(index))
    }

    /// Read a whole level into memory.
    fn read_level(&self, level: usize) -> Result<RgbImage, SlideError> {
        let info = self.level(level).ok_or(SlideError::InvalidLevel {
            level,
            level_count: self.level_count(),
        })?;
        self.read_region((0, 0), level, (info.width, info.height))
    }

    /// Objective power, defaulting to 40x when the slide does not say.
    fn objective_power(&self) -> Result<f64, SlideError> {
        match self.property(PROPERTY_OBJECTIVE_POWER) {
            None => Ok(DEFAULT_OBJECTIVE_POWER),
            Some(value) => parse_positive(PROPERTY_OBJECTIVE_POWER, &value),
        }
    }

    /// Microns per pixel at level 0. Required for physical distances.
    fn mpp(&self) -> Result<f64, SlideError> {
        let value = self
            .property(PROPERTY_MPP_X)
            .ok_or(SlideError::MissingProperty(PROPERTY_MPP_X))?;
        parse_positive(PROPERTY_MPP_X, &value)
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<f64, SlideError> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(SlideError::InvalidProperty {
            key,
            value: value.to_string(),
        }),
    }
}

/// Physical properties of a slide needed by the ratio analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideProperties {
    /// Microns per pixel at level 0
    pub mpp: f64,

    /// Objective power
    pub magnification: f64,
}

impl SlideProperties {
    /// Read the properties from a pyramid source.
    pub fn from_source(source: &dyn PyramidSource) -> Result<Self, SlideError> {
        Ok(Self {
            mpp: source.mpp()?,
            magnification: source.objective_power()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeSource {
        properties: HashMap<String, String>,
    }

    impl PyramidSource for FakeSource {
        fn level_count(&self) -> usize {
            2
        }

        fn level(&self, index: usize) -> Option<PyramidLevel> {
            match index {
                0 => Some(PyramidLevel {
                    index: 0,
                    width: 400,
                    height: 200,
                    downsample: 1.0,
                }),
                1 => Some(PyramidLevel {
                    index: 1,
                    width: 100,
                    height: 50,
                    downsample: 4.0,
                }),
                _ => None,
            }
        }

        fn read_region(
            &self,
            _origin: (u32, u32),
            _level: usize,
            size: (u32, u32),
        ) -> Result<RgbImage, SlideError> {
            Ok(RgbImage::new(size.0, size.1))
        }

        fn property(&self, key: &str) -> Option<String> {
            self.properties.get(key).cloned()
        }
    }

    fn source_with(props: &[(&str, &str)]) -> FakeSource {
        FakeSource {
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_provided_level_helpers() {
        let source = source_with(&[]);
        assert_eq!(source.dimensions(1), Some((100, 50)));
        assert_eq!(source.downsample(1), Some(4.0));
        assert_eq!(source.dimensions(2), None);
        assert_eq!(source.lowest_level().map(|l| l.index), Some(1));
    }

    #[test]
    fn test_read_level_invalid() {
        let source = source_with(&[]);
        assert!(matches!(
            source.read_level(5),
            Err(SlideError::InvalidLevel {
                level: 5,
                level_count: 2
            })
        ));
        assert_eq!(source.read_level(1).unwrap().dimensions(), (100, 50));
    }

    #[test]
    fn test_objective_power_defaults_to_40() {
        let source = source_with(&[]);
        assert_eq!(source.objective_power().unwrap(), 40.0);

        let source = source_with(&[(PROPERTY_OBJECTIVE_POWER, "20")]);
        assert_eq!(source.objective_power().unwrap(), 20.0);

        let source = source_with(&[(PROPERTY_OBJECTIVE_POWER, "abc")]);
        assert!(source.objective_power().is_err());
    }

    #[test]
    fn test_mpp_required() {
        let source = source_with(&[]);
        assert!(matches!(
            source.mpp(),
            Err(SlideError::MissingProperty(PROPERTY_MPP_X))
        ));

        let source = source_with(&[(PROPERTY_MPP_X, "0")]);
        assert!(source.mpp().is_err());

        let source = source_with(&[(PROPERTY_MPP_X, "0.2520"), (PROPERTY_OBJECTIVE_POWER, "40")]);
        let props = SlideProperties::from_source(&source).unwrap();
        assert_eq!(props.mpp, 0.252);
        assert_eq!(props.magnification, 40.0);
    }
}
