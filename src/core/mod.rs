//! Core cross-calibration stages

pub mod align;
pub mod calibrate;
pub mod composite;
pub mod pipeline;
pub mod reflectance;

// Re-export main types
pub use align::{GridAligner, OutputGrid};
pub use calibrate::{BandFactor, BandReport, CalibratedBand, CalibrationEngine, CalibrationParams, CalibrationReport};
pub use composite::BandCompositor;
pub use pipeline::PipelineOrchestrator;
pub use reflectance::{ClipOutcome, ClipParams, ConversionParams, ReflectanceConverter};
