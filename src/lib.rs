//! crosscal: radiometric cross-calibration of LISS/AWiFS scenes
//!
//! Converts target-sensor radiance bands to top-of-atmosphere reflectance,
//! stacks them, resamples the stack onto a reference scene's pixel size and
//! rescales each band so its mean reflectance matches the reference sensor.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use config::{CalibrationConfig, MetadataMatch};
pub use core::{BandFactor, CalibrationReport, PipelineOrchestrator};
pub use io::{GdalRasterIo, Metadata, RasterIo};
pub use types::{
    Band, BandStack, CalError, CalResult, Composite, Raster, RasterProfile, ReferenceSensor,
    SensorFamily, SensorRole, Stage,
};
