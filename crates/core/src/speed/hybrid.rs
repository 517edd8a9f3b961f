//! Local-region speed field.

use std::sync::Arc;

use crate::error::SegmentationError;
use crate::grid::CellGrid;
use crate::params::SegmentationParams;
use crate::point::GridPoint;
use crate::raster::GrayImage;
use crate::speed::{engine_sign, SpeedField};

/// Chan-Vese criterion evaluated over a moving window.
///
/// Statistics are recomputed from the current phi partition inside the
/// square window `[x - r, x + r) x [y - r, y + r)` around each query point,
/// clipped to the image. Nothing carries over between sweeps, so the default
/// no-op notification methods apply.
#[derive(Debug)]
pub struct HybridField {
    image: Arc<GrayImage>,
    radius: usize,
}

impl HybridField {
    /// Build the field, applying the intensity pre-filter when
    /// `cutoff_intensity > 0`.
    ///
    /// The pre-filter replaces each intensity `I` by
    /// `I / sqrt(1 + (I / c)^2)` truncated, a smooth low-pass that compresses
    /// values far above the cutoff `c` while leaving small ones nearly
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::InvalidParameter`] when
    /// `neighbourhood_radius` is zero.
    pub fn new(
        image: &Arc<GrayImage>,
        params: &SegmentationParams,
    ) -> Result<Self, SegmentationError> {
        if params.neighbourhood_radius == 0 {
            return Err(SegmentationError::InvalidParameter {
                name: "neighbourhood_radius",
                reason: "must be at least 1".to_string(),
            });
        }
        let image = if params.cutoff_intensity > 0 {
            Arc::new(prefilter(image, params.cutoff_intensity))
        } else {
            Arc::clone(image)
        };
        Ok(Self {
            image,
            radius: params.neighbourhood_radius,
        })
    }

    /// The image the field samples (pre-filtered when a cutoff was set).
    #[must_use]
    pub fn sampled_image(&self) -> &GrayImage {
        &self.image
    }
}

impl SpeedField for HybridField {
    fn compute_sign(&self, phi: &CellGrid, p: GridPoint) -> i8 {
        let x0 = p.x.saturating_sub(self.radius);
        let x1 = (p.x + self.radius).min(self.image.width());
        let y0 = p.y.saturating_sub(self.radius);
        let y1 = (p.y + self.radius).min(self.image.height());

        let mut area_in = 0_u64;
        let mut area_out = 0_u64;
        let mut sum_in = 0_i64;
        let mut sum_out = 0_i64;
        for wy in y0..y1 {
            for wx in x0..x1 {
                let intensity = i64::from(self.image.get(wx, wy));
                if phi.get(wx, wy) < 0 {
                    area_in += 1;
                    sum_in += intensity;
                } else {
                    area_out += 1;
                    sum_out += intensity;
                }
            }
        }

        // An empty partition leaves the local means undefined; treat the
        // point as force-free rather than dividing by zero.
        if area_in == 0 || area_out == 0 {
            return 0;
        }

        let mean_in = sum_in as f64 / area_in as f64;
        let mean_out = sum_out as f64 / area_out as f64;
        let intensity = f64::from(self.image.get(p.x, p.y));
        engine_sign((mean_in - mean_out) * (mean_in + mean_out - 2.0 * intensity))
    }
}

fn prefilter(image: &GrayImage, cutoff: u32) -> GrayImage {
    let c = f64::from(cutoff);
    image.map_intensities(|v| {
        let i = f64::from(v);
        (i / (1.0 + (i / c) * (i / c)).sqrt()) as u32
    })
}
