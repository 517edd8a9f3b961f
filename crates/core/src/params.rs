//! Evolution parameters.

use serde::{Deserialize, Serialize};

use crate::error::SegmentationError;

/// Parameters controlling the two-phase evolution loop and the speed fields.
///
/// Defaults match the reference tuning for fluorescence-microscopy slices;
/// hosts typically deserialize these from their own configuration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationParams {
    /// Outer iterations; each runs a speed phase then a smoothing phase.
    pub max_iterations: usize,
    /// Speed sub-iterations per outer iteration.
    pub speed_iterations: usize,
    /// Smoothing sub-iterations per outer iteration.
    pub smooth_iterations: usize,
    /// Gaussian kernel half-width `g`; the kernel spans `2g + 1` cells.
    pub gauss_width: usize,
    /// Standard deviation of the smoothing Gaussian.
    pub gauss_sigma: f64,
    /// Local-window half-edge for the hybrid speed field.
    pub neighbourhood_radius: usize,
    /// Intensity cutoff for the hybrid pre-filter; 0 disables it.
    pub cutoff_intensity: u32,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            speed_iterations: 5,
            smooth_iterations: 2,
            gauss_width: 3,
            gauss_sigma: 3.0,
            neighbourhood_radius: 16,
            cutoff_intensity: 0,
        }
    }
}

impl SegmentationParams {
    /// Check the parameter ranges that can be rejected before any grid is
    /// allocated. Smoothing constraints only apply when smoothing is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::KernelTooLarge`] when `gauss_width`
    /// exceeds 7, and [`SegmentationError::InvalidParameter`] for a
    /// non-positive `gauss_sigma`, both only when `smooth_iterations > 0`.
    pub fn validate(&self) -> Result<(), SegmentationError> {
        if self.smooth_iterations > 0 {
            let size = 2 * self.gauss_width + 1;
            let scale = (size * size) as u32;
            if scale > 255 {
                return Err(SegmentationError::KernelTooLarge {
                    half_width: self.gauss_width,
                    scale,
                });
            }
            if self.gauss_sigma <= 0.0 {
                return Err(SegmentationError::InvalidParameter {
                    name: "gauss_sigma",
                    reason: format!("must be positive, got {}", self.gauss_sigma),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_tuning() {
        let p = SegmentationParams::default();
        assert_eq!(p.max_iterations, 10);
        assert_eq!(p.speed_iterations, 5);
        assert_eq!(p.smooth_iterations, 2);
        assert_eq!(p.gauss_width, 3);
        assert_eq!(p.gauss_sigma, 3.0);
        assert_eq!(p.neighbourhood_radius, 16);
        assert_eq!(p.cutoff_intensity, 0);
    }

    #[test]
    fn test_validate_rejects_oversized_kernel() {
        let p = SegmentationParams {
            gauss_width: 8,
            ..SegmentationParams::default()
        };
        assert!(matches!(
            p.validate(),
            Err(SegmentationError::KernelTooLarge { half_width: 8, .. })
        ));
    }

    #[test]
    fn test_validate_ignores_kernel_when_smoothing_disabled() {
        let p = SegmentationParams {
            gauss_width: 100,
            gauss_sigma: -1.0,
            smooth_iterations: 0,
            ..SegmentationParams::default()
        };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(SegmentationParams::default().validate().is_ok());
    }
}
