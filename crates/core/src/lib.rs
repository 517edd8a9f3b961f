//! Fast Level-Set Segmentation Core
//!
//! An integer-only approximation of level-set curve evolution for 2D
//! grayscale images. A seed region's boundary is grown or shrunk by
//! data-driven speed fields and regularized by an integer Gaussian smoothing
//! pass, producing a binary foreground/background segmentation without ever
//! leaving integer grid arithmetic.
//!
//! The host application supplies the image, an initialization mask, and
//! parameters; this crate owns everything between seeding and the final
//! binary mask.

pub mod band;
pub mod cancel;
pub mod engine;
pub mod error;
pub mod grid;
pub mod kernel;
pub mod observer;
pub mod params;
pub mod point;
pub mod raster;
pub mod speed;

// Re-export main types
pub use cancel::CancelToken;
pub use engine::{LevelSetEngine, RunOutcome};
pub use error::SegmentationError;
pub use grid::{CellGrid, PHI_EXTERIOR, PHI_INNER, PHI_INTERIOR, PHI_OUTER};
pub use kernel::SmoothKernel;
pub use observer::{BoundaryObserver, ProgressObserver};
pub use params::SegmentationParams;
pub use point::{GridPoint, Neighborhood};
pub use raster::{BinaryMask, GrayImage};
pub use speed::{create_speed_field, ChanVeseField, HybridField, SpeedField, SpeedMethod};
