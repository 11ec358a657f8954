pub mod discovery;
pub mod metadata;
pub mod raster;

pub use discovery::{BandFile, list_rasters, order_by_band, reference_band_number, target_band_number};
pub use metadata::Metadata;
pub use raster::{GdalRasterIo, RasterIo};
