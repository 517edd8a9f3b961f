//! Data-driven speed fields.
//!
//! A speed field turns image evidence into a per-point motion sign for the
//! boundary. The engine only ever sees the quantized, engine-facing sign:
//! `+1` pulls an outside boundary point into the region, `-1` pushes an
//! inside boundary point out, `0` leaves the point alone. Implementations
//! derive that sign from a real-valued speed `s` as `-signum(s)`.
//!
//! The capability set is closed: the global region field, the local-region
//! hybrid field, and an edge-based method that is recognized but has no
//! implementation.

mod chan_vese;
mod hybrid;

pub use chan_vese::ChanVeseField;
pub use hybrid::HybridField;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SegmentationError;
use crate::grid::CellGrid;
use crate::params::SegmentationParams;
use crate::point::GridPoint;
use crate::raster::{BinaryMask, GrayImage};

/// Per-point signed speed driving boundary motion.
///
/// Fields with incrementally maintained statistics record boundary crossings
/// through the notify methods and fold them in when the engine calls
/// [`apply_pending_updates`]; stateless fields keep the no-op defaults.
///
/// [`apply_pending_updates`]: SpeedField::apply_pending_updates
pub trait SpeedField: std::fmt::Debug {
    /// Quantized engine-facing sign of the speed at `p`: one of -1, 0, +1.
    fn compute_sign(&self, phi: &CellGrid, p: GridPoint) -> i8;

    /// Whether boundary crossings have accumulated since the last update.
    fn requires_update(&self) -> bool {
        false
    }

    /// Record that `p` moved from outside to inside the region.
    fn notify_switch_in(&mut self, _p: GridPoint) {}

    /// Record that `p` moved from inside to outside the region.
    fn notify_switch_out(&mut self, _p: GridPoint) {}

    /// Drain recorded crossings and refresh internal statistics.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::DegenerateRegion`] when the drained
    /// crossings leave one side of the partition empty.
    fn apply_pending_updates(&mut self) -> Result<(), SegmentationError> {
        Ok(())
    }
}

/// Recognized speed-field methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedMethod {
    /// Global region statistics (Chan-Vese).
    ChanVese,
    /// Chan-Vese criterion over a moving local window.
    Hybrid,
    /// Edge-based speed; recognized but not implemented.
    Edge,
}

/// Construct the speed field for `method`.
///
/// # Errors
///
/// Returns [`SegmentationError::NotImplemented`] for [`SpeedMethod::Edge`]
/// and propagates construction failures from the concrete fields
/// (degenerate initialization, dimension mismatch, bad parameters).
pub fn create_speed_field(
    method: SpeedMethod,
    image: &Arc<GrayImage>,
    mask: &BinaryMask,
    params: &SegmentationParams,
) -> Result<Box<dyn SpeedField>, SegmentationError> {
    match method {
        SpeedMethod::ChanVese => {
            info!("Using Chan-Vese speed field with incremental region statistics");
            Ok(Box::new(ChanVeseField::new(Arc::clone(image), mask)?))
        }
        SpeedMethod::Hybrid => {
            info!(
                "Using hybrid speed field: window radius {}, intensity cutoff {}",
                params.neighbourhood_radius, params.cutoff_intensity
            );
            Ok(Box::new(HybridField::new(image, params)?))
        }
        SpeedMethod::Edge => Err(SegmentationError::NotImplemented(SpeedMethod::Edge)),
    }
}

/// Quantize a continuous speed to the engine-facing sign convention.
pub(crate) fn engine_sign(s: f64) -> i8 {
    if s > 0.0 {
        -1
    } else if s < 0.0 {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_image() -> Arc<GrayImage> {
        Arc::new(GrayImage::from_u8(4, 4, vec![100; 16]).unwrap())
    }

    fn two_tone_mask() -> BinaryMask {
        let mut mask = BinaryMask::new(4, 4);
        mask.set_foreground(1, 1);
        mask.set_foreground(2, 1);
        mask
    }

    #[test]
    fn test_edge_method_is_recognized_but_unimplemented() {
        let err = create_speed_field(
            SpeedMethod::Edge,
            &flat_image(),
            &two_tone_mask(),
            &SegmentationParams::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SegmentationError::NotImplemented(SpeedMethod::Edge)
        ));
    }

    #[test]
    fn test_factory_builds_both_implemented_fields() {
        let params = SegmentationParams::default();
        assert!(
            create_speed_field(SpeedMethod::ChanVese, &flat_image(), &two_tone_mask(), &params)
                .is_ok()
        );
        assert!(
            create_speed_field(SpeedMethod::Hybrid, &flat_image(), &two_tone_mask(), &params)
                .is_ok()
        );
    }

    #[test]
    fn test_engine_sign_is_negated_signum() {
        assert_eq!(engine_sign(2.5), -1);
        assert_eq!(engine_sign(-0.1), 1);
        assert_eq!(engine_sign(0.0), 0);
    }
}
