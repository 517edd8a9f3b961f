//! Integer Gaussian kernel for the curvature-smoothing sweeps.
//!
//! Smoothing approximates curvature flow by thresholding a Gaussian-weighted
//! count of inside cells around each boundary point: a point surrounded by
//! mostly-inside cells is pulled in, a point surrounded by mostly-outside
//! cells is pushed out. Weights are pre-scaled integers so the whole
//! convolution stays in integer arithmetic.

use crate::error::SegmentationError;
use crate::grid::CellGrid;
use crate::point::GridPoint;

/// Pre-scaled integer Gaussian kernel of size `(2g + 1)^2` with its decision
/// threshold.
#[derive(Debug, Clone)]
pub struct SmoothKernel {
    weights: Vec<u32>,
    half_width: usize,
    size: usize,
    threshold: u32,
}

impl SmoothKernel {
    /// Build a kernel of half-width `g` for a Gaussian of standard deviation
    /// `sigma`.
    ///
    /// Each weight is `(1 / sigma^2) * exp(-r^2 / (2 sigma^2)) * scale`
    /// truncated to an integer, with `scale = (2g + 1)^2`. The threshold is
    /// half the total weight.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::KernelTooLarge`] when the scale factor
    /// exceeds 255 (half-width above 7), and
    /// [`SegmentationError::InvalidParameter`] for a non-positive `sigma`.
    pub fn build(half_width: usize, sigma: f64) -> Result<Self, SegmentationError> {
        let size = 2 * half_width + 1;
        let scale = (size * size) as u32;
        if scale > 255 {
            return Err(SegmentationError::KernelTooLarge { half_width, scale });
        }
        if sigma <= 0.0 {
            return Err(SegmentationError::InvalidParameter {
                name: "gauss_sigma",
                reason: format!("must be positive, got {sigma}"),
            });
        }

        let inv_var = 1.0 / (sigma * sigma);
        let mut weights = vec![0_u32; size * size];
        let mut total: u32 = 0;
        for dy in 0..size {
            for dx in 0..size {
                let rx = dx as f64 - half_width as f64;
                let ry = dy as f64 - half_width as f64;
                let w = inv_var * (-(rx * rx + ry * ry) * inv_var / 2.0).exp() * f64::from(scale);
                let w = w as u32;
                weights[dy * size + dx] = w;
                total += w;
            }
        }

        Ok(Self {
            weights,
            half_width,
            size,
            threshold: total / 2,
        })
    }

    /// Half the total kernel weight; the switch decision boundary.
    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    #[must_use]
    pub fn half_width(&self) -> usize {
        self.half_width
    }

    /// Weight at kernel offset `(dx, dy)` measured from the top-left corner.
    ///
    /// # Panics
    ///
    /// Panics if the offset is outside the kernel.
    #[must_use]
    pub fn weight(&self, dx: usize, dy: usize) -> u32 {
        assert!(dx < self.size && dy < self.size, "Offset outside kernel");
        self.weights[dy * self.size + dx]
    }

    /// Gaussian-weighted count of inside (`phi < 0`) cells in the kernel
    /// window around `p`, clipped to the grid.
    #[must_use]
    pub fn convolve_inside(&self, phi: &CellGrid, p: GridPoint) -> u32 {
        let g = self.half_width as isize;
        let width = phi.width() as isize;
        let height = phi.height() as isize;
        let x = p.x as isize;
        let y = p.y as isize;

        let dx_lo = (-g).max(-x);
        let dx_hi = (g + 1).min(width - x);
        let dy_lo = (-g).max(-y);
        let dy_hi = (g + 1).min(height - y);

        let mut f: u32 = 0;
        for dy in dy_lo..dy_hi {
            for dx in dx_lo..dx_hi {
                if phi.get((x + dx) as usize, (y + dy) as usize) < 0 {
                    f += self.weights[((g + dy) as usize) * self.size + (g + dx) as usize];
                }
            }
        }
        f
    }
}
