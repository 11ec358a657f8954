use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Real-valued single band grid (rows x cols)
pub type Band = Array2<f32>;

/// Multi-band grid (band x rows x cols)
pub type BandStack = Array3<f32>;

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Ground sample distance as (x, y), both positive for a north-up grid
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.pixel_width, -self.pixel_height)
    }

    /// Map coordinates of a (fractional) pixel position
    pub fn pixel_to_map(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }
}

/// Geospatial profile carried alongside raster data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterProfile {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub geo_transform: Option<GeoTransform>,
    /// Coordinate reference system as WKT
    pub crs_wkt: Option<String>,
    pub nodata: Option<f64>,
}

impl RasterProfile {
    /// Same grid and CRS with a different band count
    pub fn with_band_count(&self, band_count: usize) -> Self {
        Self {
            band_count,
            ..self.clone()
        }
    }
}

/// Raster data with its profile
#[derive(Debug, Clone)]
pub struct Raster {
    pub data: BandStack,
    pub profile: RasterProfile,
}

impl Raster {
    /// Build a raster, checking the stack shape against the profile
    pub fn new(data: BandStack, profile: RasterProfile) -> CalResult<Self> {
        let (bands, rows, cols) = data.dim();
        if bands != profile.band_count || rows != profile.height || cols != profile.width {
            return Err(CalError::DimensionMismatch(format!(
                "data is {}x{}x{} but profile says {}x{}x{}",
                bands, rows, cols, profile.band_count, profile.height, profile.width
            )));
        }
        Ok(Self { data, profile })
    }

    /// Wrap a single band grid
    pub fn from_band(band: Band, profile: &RasterProfile) -> CalResult<Self> {
        let data = band.insert_axis(Axis(0));
        Self::new(data, profile.with_band_count(1))
    }

    pub fn band_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// 0-based band view
    pub fn band(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }
}

/// Sensor family determining the radiance to reflectance formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorFamily {
    /// Resourcesat LISS-III / AWiFS
    LissAwifs,
    /// Landsat-8 OLI
    Landsat8,
}

impl SensorFamily {
    /// File name suffix of the scene metadata file
    pub fn metadata_suffix(&self) -> &'static str {
        match self {
            SensorFamily::LissAwifs => "_META.txt",
            SensorFamily::Landsat8 => "_MTL.txt",
        }
    }
}

impl std::fmt::Display for SensorFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorFamily::LissAwifs => write!(f, "LISS III/AWiFS"),
            SensorFamily::Landsat8 => write!(f, "Landsat 8"),
        }
    }
}

/// Reference sensor for cross-calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceSensor {
    /// Sentinel-2 L1C/L2A, reflectance stored as integers scaled by 10000
    Sentinel2,
    Landsat8,
    /// Any pre-processed reflectance product
    Others,
}

impl ReferenceSensor {
    pub const LABELS: [&'static str; 3] = ["Sentinel 2", "Landsat 8", "Others"];
}

impl FromStr for ReferenceSensor {
    type Err = CalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        match compact.as_str() {
            "sentinel2" | "s2" => Ok(ReferenceSensor::Sentinel2),
            "landsat8" | "l8" => Ok(ReferenceSensor::Landsat8),
            "others" | "other" => Ok(ReferenceSensor::Others),
            _ => Err(CalError::InvalidSensor(s.trim().to_string())),
        }
    }
}

impl std::fmt::Display for ReferenceSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceSensor::Sentinel2 => write!(f, "Sentinel 2"),
            ReferenceSensor::Landsat8 => write!(f, "Landsat 8"),
            ReferenceSensor::Others => write!(f, "Others"),
        }
    }
}

/// Role of a composite in the calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorRole {
    Target,
    Reference,
}

/// Multi-band composite with the physical band number of each layer
#[derive(Debug, Clone)]
pub struct Composite {
    pub raster: Raster,
    pub band_numbers: Vec<u32>,
    pub role: SensorRole,
}

impl Composite {
    pub fn band_count(&self) -> usize {
        self.raster.band_count()
    }
}

/// Pipeline stage, used to tag errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovery,
    Metadata,
    Reflectance,
    Composite,
    Alignment,
    Calibration,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Discovery => "band discovery",
            Stage::Metadata => "metadata",
            Stage::Reflectance => "reflectance conversion",
            Stage::Composite => "band compositing",
            Stage::Alignment => "grid alignment",
            Stage::Calibration => "calibration",
        };
        write!(f, "{}", name)
    }
}

/// Error types for cross-calibration
#[derive(Debug, thiserror::Error)]
pub enum CalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("no metadata file matching *{pattern} in {}", .folder.display())]
    MetadataNotFound { folder: PathBuf, pattern: String },

    #[error("field '{field}' not found in {}", .file.display())]
    FieldNotFound { field: String, file: PathBuf },

    #[error("field '{field}' in {} has a non-numeric value: '{line}'", .file.display())]
    MalformedValue {
        field: String,
        file: PathBuf,
        line: String,
    },

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("band count mismatch: target has {target} bands, reference has {reference}")]
    BandCountMismatch { target: usize, reference: usize },

    #[error("no band number in file name '{0}'")]
    MissingBandNumber(String),

    #[error("band {band} appears more than once ('{first}' and '{second}')")]
    DuplicateBand {
        band: u32,
        first: String,
        second: String,
    },

    #[error("no solar irradiance configured for band {0}")]
    UnknownBand(u32),

    #[error("no raster files found in {}", .0.display())]
    NoRasters(PathBuf),

    #[error("alignment error: {0}")]
    AlignmentError(String),

    #[error("degenerate calibration for band {band}: reference mean {reference_mean}, target mean {target_mean}, factor {factor}")]
    DegenerateCalibration {
        band: u32,
        reference_mean: f64,
        target_mean: f64,
        factor: f64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown reference sensor '{0}' (expected one of \"Sentinel 2\", \"Landsat 8\", \"Others\")")]
    InvalidSensor(String),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<CalError>,
    },
}

impl CalError {
    /// Tag an error with the pipeline stage that raised it
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            CalError::Stage { .. } => self,
            other => CalError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, without stage tagging
    pub fn root(&self) -> &CalError {
        match self {
            CalError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for calibration operations
pub type CalResult<T> = Result<T, CalError>;
