use crate::config::CalibrationConfig;
use crate::core::align::GridAligner;
use crate::core::calibrate::{CalibrationEngine, CalibrationReport};
use crate::core::composite::BandCompositor;
use crate::core::reflectance::{ConversionParams, ReflectanceConverter};
use crate::io::discovery::recreate_dir;
use crate::io::metadata::has_metadata;
use crate::io::{
    list_rasters, order_by_band, reference_band_number, target_band_number, BandFile, GdalRasterIo,
    Metadata, RasterIo,
};
use crate::types::{CalError, CalResult, ReferenceSensor, SensorFamily, SensorRole, Stage};
use std::path::{Path, PathBuf};

/// Band files paired with their resolved conversion parameters
type ConversionPlan = Vec<(BandFile, ConversionParams)>;

/// Runs reflectance conversion, compositing, alignment and calibration for one scene pair
pub struct PipelineOrchestrator {
    config: CalibrationConfig,
    io: Box<dyn RasterIo>,
}

impl PipelineOrchestrator {
    /// Orchestrator backed by GDAL
    pub fn new(config: CalibrationConfig) -> CalResult<Self> {
        Self::with_io(config, Box::new(GdalRasterIo::new()))
    }

    pub fn with_io(config: CalibrationConfig, io: Box<dyn RasterIo>) -> CalResult<Self> {
        config.validate()?;
        Ok(Self { config, io })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Calibrate the target scene in `target_folder` against `reference_folder`
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        target_folder: P,
        reference_folder: Q,
        reference_sensor: ReferenceSensor,
    ) -> CalResult<CalibrationReport> {
        let target_folder = target_folder.as_ref();
        let reference_folder = reference_folder.as_ref();
        log::info!(
            "Cross-calibrating {} against {} reference {}",
            target_folder.display(),
            reference_sensor,
            reference_folder.display()
        );

        // Resolve every input before anything on disk is touched
        let target_files = self
            .discover(target_folder, target_band_number)
            .map_err(|e| e.in_stage(Stage::Discovery))?;
        let reference_files = self
            .discover(reference_folder, reference_band_number)
            .map_err(|e| e.in_stage(Stage::Discovery))?;
        if target_files.len() != reference_files.len() {
            return Err(CalError::BandCountMismatch {
                target: target_files.len(),
                reference: reference_files.len(),
            }
            .in_stage(Stage::Discovery));
        }

        let target_plan = self
            .plan_conversion(target_folder, SensorFamily::LissAwifs, target_files)
            .map_err(|e| e.in_stage(Stage::Metadata))?;
        let reference_plan = if reference_sensor == ReferenceSensor::Landsat8
            && has_metadata(reference_folder, SensorFamily::Landsat8)
        {
            Some(
                self.plan_conversion(reference_folder, SensorFamily::Landsat8, reference_files.clone())
                    .map_err(|e| e.in_stage(Stage::Metadata))?,
            )
        } else {
            None
        };

        // Radiance to reflectance; only the target folder is cleared
        let reflectance_dir = target_folder.join(&self.config.reflectance_dir);
        let target_reflectance = recreate_dir(&reflectance_dir)
            .and_then(|_| self.convert_all(&target_plan, &reflectance_dir, |stem| format!("{}_ref", stem)))
            .map_err(|e| e.in_stage(Stage::Reflectance))?;
        let (reference_reflectance, reference_converted) = match reference_plan {
            Some(plan) => {
                log::info!("Converting Landsat 8 reference to reflectance");
                let dir = reference_folder.join(&self.config.reflectance_dir);
                let converted = self
                    .convert_all(&plan, &dir, |stem| stem.to_string())
                    .map_err(|e| e.in_stage(Stage::Reflectance))?;
                (converted, true)
            }
            None => (reference_files, false),
        };

        // Stacking
        let ext = &self.config.output_extension;
        let target_composite_path = reflectance_dir.join(format!("composite.{}", ext));
        let reference_composite_path = reference_folder.join(format!("composite_ref.{}", ext));
        let compositor = BandCompositor::from_config(&self.config);
        let (target_composite, reference_composite) = (|| -> CalResult<_> {
            let target = compositor.composite_files(
                self.io.as_ref(),
                &target_reflectance,
                SensorRole::Target,
                reference_sensor,
                &target_composite_path,
            )?;
            let reference = compositor.composite_files(
                self.io.as_ref(),
                &reference_reflectance,
                SensorRole::Reference,
                reference_sensor,
                &reference_composite_path,
            )?;
            Ok((target, reference))
        })()
        .map_err(|e| e.in_stage(Stage::Composite))?;

        if !self.config.keep_reflectance {
            let converted_reference: &[BandFile] = if reference_converted {
                reference_reflectance.as_slice()
            } else {
                &[]
            };
            for file in target_reflectance.iter().chain(converted_reference) {
                log::debug!("Removing {}", file.path.display());
                std::fs::remove_file(&file.path).map_err(|e| CalError::from(e).in_stage(Stage::Composite))?;
            }
        }

        // Alignment
        let aligned_path = reflectance_dir.join(format!("composite_resample.{}", ext));
        let aligner = GridAligner::new(self.config.target_epsg);
        let aligned = (|| -> CalResult<_> {
            let aligned = aligner.align(self.io.as_ref(), &target_composite, &reference_composite)?;
            self.io.write(&aligned_path, &aligned.raster)?;
            Ok(aligned)
        })()
        .map_err(|e| e.in_stage(Stage::Alignment))?;

        // Calibration
        let engine = CalibrationEngine::from_config(&self.config);
        let report = engine
            .run(
                self.io.as_ref(),
                &aligned,
                &reference_composite,
                &target_folder.join(&self.config.calibrated_dir),
                ext,
                &[aligned_path, target_composite_path, reference_composite_path],
            )
            .map_err(|e| e.in_stage(Stage::Calibration))?;

        for band in &report.bands {
            log::info!(
                "Band {}: factor {:.6} (reference mean {:.6}, target mean {:.6})",
                band.factor.band,
                band.factor.factor,
                band.factor.reference_mean,
                band.factor.target_mean
            );
        }
        log::info!("Done");
        Ok(report)
    }

    fn discover<F>(&self, folder: &Path, band_of: F) -> CalResult<Vec<BandFile>>
    where
        F: Fn(&str) -> Option<u32>,
    {
        let files = list_rasters(folder, &self.config)?;
        let bands = order_by_band(files, band_of)?;
        log::debug!(
            "{}: bands {:?}",
            folder.display(),
            bands.iter().map(|b| b.band).collect::<Vec<_>>()
        );
        Ok(bands)
    }

    fn plan_conversion(
        &self,
        folder: &Path,
        family: SensorFamily,
        files: Vec<BandFile>,
    ) -> CalResult<ConversionPlan> {
        let metadata = Metadata::load(folder, family)?;
        files
            .into_iter()
            .map(|file| {
                let params = ConversionParams::from_metadata(&metadata, family, file.band, &self.config)?;
                Ok((file, params))
            })
            .collect()
    }

    /// Convert every planned band into `output_dir`, creating it if needed.
    ///
    /// Existing files are left alone unless a converted band overwrites them.
    fn convert_all<F>(&self, plan: &ConversionPlan, output_dir: &Path, name_of: F) -> CalResult<Vec<BandFile>>
    where
        F: Fn(&str) -> String,
    {
        std::fs::create_dir_all(output_dir)?;
        let converter = ReflectanceConverter::from_config(&self.config);

        let mut outputs = Vec::with_capacity(plan.len());
        for (file, params) in plan {
            let stem = file
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("band{}", file.band));
            let output: PathBuf =
                output_dir.join(format!("{}.{}", name_of(&stem), self.config.output_extension));
            converter.convert_file(self.io.as_ref(), &file.path, &output, params)?;
            outputs.push(BandFile {
                path: output,
                band: file.band,
            });
        }
        Ok(outputs)
    }
}
