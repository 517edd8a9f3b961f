//! Error taxonomy for segmentation setup and evolution.
//!
//! Recoverable failures are reported through [`SegmentationError`]; programmer
//! errors (out-of-bounds grid access, narrow-band bookkeeping violations) are
//! asserted and panic. Cancellation is not an error, it is a run outcome.

use thiserror::Error;

use crate::speed::SpeedMethod;

/// Errors surfaced from raster construction, speed-field construction, and
/// the evolution loop.
#[derive(Debug, Error)]
pub enum SegmentationError {
    /// A raster was built with zero dimensions or a buffer whose length does
    /// not match the requested width and height.
    #[error("invalid {width}x{height} raster with a buffer of {len} pixels")]
    InvalidRaster {
        /// Requested width in pixels
        width: usize,
        /// Requested height in pixels
        height: usize,
        /// Length of the supplied buffer
        len: usize,
    },

    /// Image and initialization mask dimensions disagree.
    #[error("image is {image_width}x{image_height} but mask is {mask_width}x{mask_height}")]
    DimensionMismatch {
        image_width: usize,
        image_height: usize,
        mask_width: usize,
        mask_height: usize,
    },

    /// The smoothing kernel half-width produces a scale factor above the
    /// supported ceiling of 255 (half-width at most 7).
    #[error("gaussian kernel half-width {half_width} gives scale {scale}, exceeding 255")]
    KernelTooLarge {
        /// Requested kernel half-width
        half_width: usize,
        /// `(2 * half_width + 1)^2`
        scale: u32,
    },

    /// A recognized speed method with no implementation was requested.
    #[error("speed method {0:?} is not implemented")]
    NotImplemented(SpeedMethod),

    /// Region statistics with an empty partition: the initialization mask is
    /// entirely foreground or entirely background, or evolution emptied one
    /// side. Means are undefined in this state.
    #[error("degenerate region statistics: {area_in} pixels inside, {area_out} outside")]
    DegenerateRegion {
        /// Pixels currently counted inside the region
        area_in: u64,
        /// Pixels currently counted outside the region
        area_out: u64,
    },

    /// A parameter value outside its documented range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Field name in [`crate::params::SegmentationParams`]
        name: &'static str,
        /// Human-readable constraint description
        reason: String,
    },
}
