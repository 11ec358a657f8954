use crate::types::{CalError, CalResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// How a field name is matched against metadata lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataMatch {
    /// Field name appears anywhere in the line; the last matching line wins
    Substring,
    /// Key left of `=` equals the field name
    ExactKey,
}

/// Cross-calibration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Mean exo-atmospheric solar irradiance per LISS-III/AWiFS band (W m^-2 um^-1)
    pub solar_irradiance: BTreeMap<u32, f64>,
    /// Radiance quantisation levels of the LISS-III/AWiFS product
    pub dn_levels: f64,
    /// Percentile above which reflectance is treated as an outlier
    pub clip_threshold_percentile: f64,
    /// Percentile whose value replaces outliers
    pub clip_ceiling_percentile: f64,
    /// Sentinel-2 integer reflectance scale
    pub sentinel2_scale: f64,
    /// EPSG code of the common projected grid (UTM 43N by default)
    pub target_epsg: u32,
    /// Raster file extensions picked up from scene folders
    pub raster_extensions: Vec<String>,
    pub reflectance_dir: String,
    pub calibrated_dir: String,
    /// Extension of every raster the pipeline writes (GeoTIFF)
    pub output_extension: String,
    pub metadata_match: MetadataMatch,
    /// Target means with a smaller magnitude make the factor degenerate
    pub min_target_mean: f64,
    /// Skip degenerate bands with a warning instead of aborting
    pub skip_degenerate_bands: bool,
    /// Keep per-band reflectance rasters after compositing, for the target and
    /// for a converted Landsat-8 reference
    pub keep_reflectance: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            solar_irradiance: BTreeMap::from([
                (2, 1849.5),
                (3, 1553.0),
                (4, 1092.0),
                (5, 239.52),
            ]),
            dn_levels: 1024.0,
            clip_threshold_percentile: 99.99,
            clip_ceiling_percentile: 99.999,
            sentinel2_scale: 0.0001,
            target_epsg: 32643,
            raster_extensions: vec!["tif".to_string(), "TIF".to_string(), "img".to_string()],
            reflectance_dir: "Reflectance".to_string(),
            calibrated_dir: "Calibrated".to_string(),
            output_extension: "TIF".to_string(),
            metadata_match: MetadataMatch::Substring,
            min_target_mean: 1e-12,
            skip_degenerate_bands: false,
            keep_reflectance: true,
        }
    }
}

impl CalibrationConfig {
    /// Load a JSON configuration; missing keys fall back to defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> CalResult<Self> {
        log::info!("Loading calibration config: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| CalError::InvalidConfig(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CalResult<()> {
        if self.solar_irradiance.is_empty() {
            return Err(CalError::InvalidConfig("solar irradiance table is empty".to_string()));
        }
        for (band, esun) in &self.solar_irradiance {
            if !esun.is_finite() || *esun <= 0.0 {
                return Err(CalError::InvalidConfig(format!(
                    "solar irradiance for band {} must be positive, got {}",
                    band, esun
                )));
            }
        }
        if !(self.dn_levels > 0.0) {
            return Err(CalError::InvalidConfig(format!("dn_levels must be positive, got {}", self.dn_levels)));
        }

        let in_range = |p: f64| p > 0.0 && p <= 100.0;
        if !in_range(self.clip_threshold_percentile) || !in_range(self.clip_ceiling_percentile) {
            return Err(CalError::InvalidConfig("clip percentiles must lie in (0, 100]".to_string()));
        }
        if self.clip_threshold_percentile > self.clip_ceiling_percentile {
            return Err(CalError::InvalidConfig(format!(
                "clip threshold percentile {} exceeds ceiling percentile {}",
                self.clip_threshold_percentile, self.clip_ceiling_percentile
            )));
        }

        if !(self.sentinel2_scale > 0.0) || !self.sentinel2_scale.is_finite() {
            return Err(CalError::InvalidConfig("sentinel2_scale must be positive".to_string()));
        }
        if self.raster_extensions.is_empty() {
            return Err(CalError::InvalidConfig("no raster extensions configured".to_string()));
        }
        if self.reflectance_dir.is_empty() || self.calibrated_dir.is_empty() || self.output_extension.is_empty() {
            return Err(CalError::InvalidConfig("output names must not be empty".to_string()));
        }
        if self.min_target_mean < 0.0 {
            return Err(CalError::InvalidConfig("min_target_mean must not be negative".to_string()));
        }
        Ok(())
    }

    /// Solar irradiance of a target band
    pub fn irradiance(&self, band: u32) -> CalResult<f64> {
        self.solar_irradiance
            .get(&band)
            .copied()
            .ok_or(CalError::UnknownBand(band))
    }

    /// Whether a file extension is on the raster allow-list
    pub fn is_raster_extension(&self, ext: &str) -> bool {
        self.raster_extensions.iter().any(|e| e == ext)
    }
}
