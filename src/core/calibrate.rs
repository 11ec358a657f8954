use crate::config::CalibrationConfig;
use crate::io::discovery::recreate_dir;
use crate::io::RasterIo;
use crate::types::{Band, CalError, CalResult, Composite, Raster};
use ndarray::{ArrayView2, Axis};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Ratio of reference to target mean reflectance for one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandFactor {
    /// Physical band number of the target sensor
    pub band: u32,
    pub reference_mean: f64,
    pub target_mean: f64,
    pub factor: f64,
}

impl BandFactor {
    pub fn new(band: u32, reference_mean: f64, target_mean: f64) -> Self {
        Self {
            band,
            reference_mean,
            target_mean,
            factor: reference_mean / target_mean,
        }
    }

    /// Non-finite factor, or a target mean too close to zero to divide by
    pub fn is_degenerate(&self, min_target_mean: f64) -> bool {
        !self.factor.is_finite() || !self.target_mean.is_finite() || self.target_mean.abs() <= min_target_mean
    }

    fn degenerate_error(&self) -> CalError {
        CalError::DegenerateCalibration {
            band: self.band,
            reference_mean: self.reference_mean,
            target_mean: self.target_mean,
            factor: self.factor,
        }
    }
}

/// Target band rescaled by its factor
#[derive(Debug, Clone)]
pub struct CalibratedBand {
    pub factor: BandFactor,
    pub data: Band,
}

/// One written calibrated band
#[derive(Debug, Clone, Serialize)]
pub struct BandReport {
    #[serde(flatten)]
    pub factor: BandFactor,
    pub output: PathBuf,
}

/// Outcome of a calibration run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CalibrationReport {
    pub bands: Vec<BandReport>,
    /// Degenerate bands left out when skipping is enabled
    pub skipped: Vec<BandFactor>,
}

impl CalibrationReport {
    pub fn factors(&self) -> Vec<f64> {
        self.bands.iter().map(|b| b.factor.factor).collect()
    }
}

/// Calibration engine parameters
#[derive(Debug, Clone)]
pub struct CalibrationParams {
    pub min_target_mean: f64,
    pub skip_degenerate_bands: bool,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            min_target_mean: 1e-12,
            skip_degenerate_bands: false,
        }
    }
}

/// Derives per-band scale factors and applies them to the aligned target
pub struct CalibrationEngine {
    params: CalibrationParams,
}

impl CalibrationEngine {
    pub fn new(params: CalibrationParams) -> Self {
        Self { params }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(CalibrationParams {
            min_target_mean: config.min_target_mean,
            skip_degenerate_bands: config.skip_degenerate_bands,
        })
    }

    /// Mean of the non-NaN pixels; NaN when there are none
    pub fn nan_mean(band: ArrayView2<'_, f32>) -> f64 {
        let (sum, count) = band
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0f64, 0usize), |(sum, count), &v| (sum + v as f64, count + 1));
        if count == 0 {
            f64::NAN
        } else {
            sum / count as f64
        }
    }

    /// Factor per band, in the target's band order
    pub fn compute_factors(&self, target: &Composite, reference: &Composite) -> CalResult<Vec<BandFactor>> {
        if target.band_count() != reference.band_count() {
            return Err(CalError::BandCountMismatch {
                target: target.band_count(),
                reference: reference.band_count(),
            });
        }
        if target.band_numbers.len() != target.band_count() {
            return Err(CalError::Processing(format!(
                "target composite has {} bands but {} band numbers",
                target.band_count(),
                target.band_numbers.len()
            )));
        }

        let factors = target
            .band_numbers
            .iter()
            .enumerate()
            .map(|(i, &band)| {
                let target_mean = Self::nan_mean(target.raster.band(i));
                let reference_mean = Self::nan_mean(reference.raster.band(i));
                let factor = BandFactor::new(band, reference_mean, target_mean);
                log::debug!(
                    "Band {}: reference mean {:.6}, target mean {:.6}",
                    band,
                    reference_mean,
                    target_mean
                );
                factor
            })
            .collect();
        Ok(factors)
    }

    /// Factors and calibrated bands; degenerate bands abort unless skipping is enabled
    pub fn calibrate(
        &self,
        target: &Composite,
        reference: &Composite,
    ) -> CalResult<(Vec<CalibratedBand>, Vec<BandFactor>)> {
        let factors = self.compute_factors(target, reference)?;

        let mut calibrated = Vec::with_capacity(factors.len());
        let mut skipped = Vec::new();
        for (i, factor) in factors.into_iter().enumerate() {
            if factor.is_degenerate(self.params.min_target_mean) {
                if !self.params.skip_degenerate_bands {
                    return Err(factor.degenerate_error());
                }
                log::warn!("Skipping band {}: {}", factor.band, factor.degenerate_error());
                skipped.push(factor);
                continue;
            }

            let scale = factor.factor as f32;
            let data = target.raster.data.index_axis(Axis(0), i).mapv(|v| v * scale);
            calibrated.push(CalibratedBand { factor, data });
        }
        Ok((calibrated, skipped))
    }

    /// Calibrate, write `Band_<n>_cal.<ext>` into a fresh `output_dir`, then
    /// remove `intermediates` once every band is on disk
    pub fn run(
        &self,
        io: &dyn RasterIo,
        target: &Composite,
        reference: &Composite,
        output_dir: &Path,
        extension: &str,
        intermediates: &[PathBuf],
    ) -> CalResult<CalibrationReport> {
        log::info!("Calculating calibration factors");
        let (calibrated, skipped) = self.calibrate(target, reference)?;

        recreate_dir(output_dir)?;
        let profile = target.raster.profile.with_band_count(1);
        let mut report = CalibrationReport {
            bands: Vec::with_capacity(calibrated.len()),
            skipped,
        };

        for band in calibrated {
            log::info!("Calibrating band {}... factor: {}", band.factor.band, band.factor.factor);
            let output = output_dir.join(format!("Band_{}_cal.{}", band.factor.band, extension));
            io.write(&output, &Raster::from_band(band.data, &profile)?)?;
            report.bands.push(BandReport {
                factor: band.factor,
                output,
            });
        }

        for path in intermediates {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    log::warn!("Failed to remove intermediate {}: {}", path.display(), e);
                } else {
                    log::debug!("Removed intermediate {}", path.display());
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BandStack, RasterProfile, SensorRole};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn composite(means: &[f32], role: SensorRole) -> Composite {
        let (height, width) = (4, 5);
        let mut data = BandStack::zeros((means.len(), height, width));
        for (i, &mean) in means.iter().enumerate() {
            // symmetric spread around the mean, with one invalid pixel
            let band = Array2::from_shape_fn((height, width), |(r, c)| {
                if r == 0 && c == 0 {
                    f32::NAN
                } else if (r + c) % 2 == 0 {
                    mean * 0.5
                } else {
                    mean * 1.5
                }
            });
            data.index_axis_mut(Axis(0), i).assign(&band);
        }
        // NaN at (0,0) leaves 9 low and 10 high pixels; rebalance one high pixel
        for i in 0..means.len() {
            data[[i, 0, 1]] = means[i];
        }
        let profile = RasterProfile {
            width,
            height,
            band_count: means.len(),
            geo_transform: None,
            crs_wkt: None,
            nodata: Some(f64::NAN),
        };
        Composite {
            raster: Raster::new(data, profile).unwrap(),
            band_numbers: (2..2 + means.len() as u32).collect(),
            role,
        }
    }

    #[test]
    fn test_nan_mean_ignores_invalid() {
        let band = ndarray::array![[1.0f32, f32::NAN], [3.0, f32::NAN]];
        assert_eq!(CalibrationEngine::nan_mean(band.view()), 2.0);
        assert!(CalibrationEngine::nan_mean(Array2::from_elem((2, 2), f32::NAN).view()).is_nan());
    }

    #[test]
    fn test_known_means_give_expected_factors() {
        let target = composite(&[10.0, 20.0, 30.0], SensorRole::Target);
        let reference = composite(&[5.0, 40.0, 15.0], SensorRole::Reference);
        let engine = CalibrationEngine::new(CalibrationParams::default());

        let (calibrated, skipped) = engine.calibrate(&target, &reference).unwrap();
        assert!(skipped.is_empty());

        let factors: Vec<f64> = calibrated.iter().map(|c| c.factor.factor).collect();
        assert_relative_eq!(factors[0], 0.5, epsilon = 1e-9);
        assert_relative_eq!(factors[1], 2.0, epsilon = 1e-9);
        assert_relative_eq!(factors[2], 0.5, epsilon = 1e-9);

        for (i, band) in calibrated.iter().enumerate() {
            assert_eq!(band.factor.band, 2 + i as u32);
            let source = target.raster.band(i);
            let scale = band.factor.factor as f32;
            for (out, src) in band.data.iter().zip(source.iter()) {
                if src.is_nan() {
                    assert!(out.is_nan());
                } else {
                    assert_eq!(*out, src * scale);
                }
            }
        }
    }

    #[test]
    fn test_factor_reproduces_reference_mean() {
        let target = composite(&[0.11, 0.23, 0.37, 0.41], SensorRole::Target);
        let reference = composite(&[0.13, 0.19, 0.29, 0.52], SensorRole::Reference);
        let engine = CalibrationEngine::new(CalibrationParams::default());

        let (calibrated, _) = engine.calibrate(&target, &reference).unwrap();
        for (i, band) in calibrated.iter().enumerate() {
            let reference_mean = CalibrationEngine::nan_mean(reference.raster.band(i));
            let calibrated_mean = CalibrationEngine::nan_mean(band.data.view());
            assert_relative_eq!(calibrated_mean, reference_mean, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_zero_target_mean_is_degenerate() {
        let target = composite(&[10.0, 0.0], SensorRole::Target);
        let reference = composite(&[5.0, 40.0], SensorRole::Reference);

        let engine = CalibrationEngine::new(CalibrationParams::default());
        let err = engine.calibrate(&target, &reference).unwrap_err();
        assert!(matches!(err, CalError::DegenerateCalibration { band: 3, .. }));

        let engine = CalibrationEngine::new(CalibrationParams {
            skip_degenerate_bands: true,
            ..CalibrationParams::default()
        });
        let (calibrated, skipped) = engine.calibrate(&target, &reference).unwrap();
        assert_eq!(calibrated.len(), 1);
        assert_eq!(skipped.len(), 1);
        assert!(!skipped[0].factor.is_finite());
    }

    #[test]
    fn test_band_count_mismatch_fails_loudly() {
        let target = composite(&[10.0, 20.0, 30.0], SensorRole::Target);
        let reference = composite(&[5.0, 40.0], SensorRole::Reference);
        let engine = CalibrationEngine::new(CalibrationParams::default());
        assert!(matches!(
            engine.compute_factors(&target, &reference),
            Err(CalError::BandCountMismatch { target: 3, reference: 2 })
        ));
    }
}
