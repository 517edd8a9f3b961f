//! Global region speed field with incrementally maintained statistics.

use std::sync::Arc;

use crate::error::SegmentationError;
use crate::grid::CellGrid;
use crate::point::GridPoint;
use crate::raster::{BinaryMask, GrayImage};
use crate::speed::{engine_sign, SpeedField};

/// Chan-Vese region field.
///
/// Tracks the pixel count and intensity sum of each side of the partition.
/// The continuous speed at a pixel of intensity `I` is
/// `(mean_in - mean_out) * (mean_in + mean_out - 2 I)`: positive when moving
/// the pixel inside would worsen the two-phase fit, negative when it would
/// improve it. Boundary crossings reported by the engine are queued and
/// folded into the counters in bulk, so a full sweep reads one fixed pair of
/// means.
#[derive(Debug)]
pub struct ChanVeseField {
    image: Arc<GrayImage>,
    area_in: u64,
    area_out: u64,
    sum_in: i64,
    sum_out: i64,
    /// `mean_in + mean_out`, refreshed on every update.
    mean_sum: f64,
    /// `mean_in - mean_out`, refreshed on every update.
    mean_diff: f64,
    in2out: Vec<GridPoint>,
    out2in: Vec<GridPoint>,
}

impl ChanVeseField {
    /// Seed the statistics from an initialization mask.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::DimensionMismatch`] when image and mask
    /// disagree, and [`SegmentationError::DegenerateRegion`] when the mask is
    /// entirely foreground or entirely background.
    pub fn new(image: Arc<GrayImage>, mask: &BinaryMask) -> Result<Self, SegmentationError> {
        if image.dimensions() != mask.dimensions() {
            return Err(SegmentationError::DimensionMismatch {
                image_width: image.width(),
                image_height: image.height(),
                mask_width: mask.width(),
                mask_height: mask.height(),
            });
        }

        let mut area_in = 0_u64;
        let mut area_out = 0_u64;
        let mut sum_in = 0_i64;
        let mut sum_out = 0_i64;
        for y in 0..image.height() {
            for x in 0..image.width() {
                let intensity = i64::from(image.get(x, y));
                if mask.is_foreground(x, y) {
                    area_in += 1;
                    sum_in += intensity;
                } else {
                    area_out += 1;
                    sum_out += intensity;
                }
            }
        }

        let mut field = Self {
            image,
            area_in,
            area_out,
            sum_in,
            sum_out,
            mean_sum: 0.0,
            mean_diff: 0.0,
            in2out: Vec::new(),
            out2in: Vec::new(),
        };
        field.refresh_means()?;
        Ok(field)
    }

    /// Current region means `(mean_in, mean_out)`.
    #[must_use]
    pub fn region_means(&self) -> (f64, f64) {
        (
            (self.mean_sum + self.mean_diff) / 2.0,
            (self.mean_sum - self.mean_diff) / 2.0,
        )
    }

    /// Current counters `(area_in, area_out, sum_in, sum_out)`.
    #[must_use]
    pub fn statistics(&self) -> (u64, u64, i64, i64) {
        (self.area_in, self.area_out, self.sum_in, self.sum_out)
    }

    fn refresh_means(&mut self) -> Result<(), SegmentationError> {
        if self.area_in == 0 || self.area_out == 0 {
            return Err(SegmentationError::DegenerateRegion {
                area_in: self.area_in,
                area_out: self.area_out,
            });
        }
        let mean_in = self.sum_in as f64 / self.area_in as f64;
        let mean_out = self.sum_out as f64 / self.area_out as f64;
        self.mean_sum = mean_in + mean_out;
        self.mean_diff = mean_in - mean_out;
        Ok(())
    }
}

impl SpeedField for ChanVeseField {
    fn compute_sign(&self, _phi: &CellGrid, p: GridPoint) -> i8 {
        let intensity = f64::from(self.image.get(p.x, p.y));
        engine_sign(self.mean_diff * (self.mean_sum - 2.0 * intensity))
    }

    fn requires_update(&self) -> bool {
        !self.in2out.is_empty() || !self.out2in.is_empty()
    }

    fn notify_switch_in(&mut self, p: GridPoint) {
        self.out2in.push(p);
    }

    fn notify_switch_out(&mut self, p: GridPoint) {
        self.in2out.push(p);
    }

    fn apply_pending_updates(&mut self) -> Result<(), SegmentationError> {
        for p in std::mem::take(&mut self.out2in) {
            let intensity = i64::from(self.image.get(p.x, p.y));
            self.area_in += 1;
            self.area_out -= 1;
            self.sum_in += intensity;
            self.sum_out -= intensity;
        }
        for p in std::mem::take(&mut self.in2out) {
            let intensity = i64::from(self.image.get(p.x, p.y));
            self.area_in -= 1;
            self.area_out += 1;
            self.sum_in -= intensity;
            self.sum_out += intensity;
        }
        self.refresh_means()
    }
}
