use crate::config::CalibrationConfig;
use crate::io::{Metadata, RasterIo};
use crate::types::{Band, CalError, CalResult, Raster, SensorFamily};
use ndarray::ArrayView2;
use std::f64::consts::PI;
use std::path::Path;

/// Per-band inputs of the radiance to TOA reflectance formula
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionParams {
    /// LISS-III / AWiFS: DN scaled between Lmin and Lmax over `dn_levels`
    LissAwifs {
        band: u32,
        lmax: f64,
        lmin: f64,
        /// Exo-atmospheric solar irradiance (W m^-2 um^-1)
        esun: f64,
        sun_elevation_deg: f64,
        dn_levels: f64,
    },
    /// Landsat-8 OLI reflectance rescaling coefficients
    Landsat8 {
        mult: f64,
        add: f64,
        sun_elevation_deg: f64,
    },
}

impl ConversionParams {
    /// Resolve every field needed for `band` from scene metadata
    pub fn from_metadata(
        metadata: &Metadata,
        family: SensorFamily,
        band: u32,
        config: &CalibrationConfig,
    ) -> CalResult<Self> {
        let mode = config.metadata_match;
        let field = |name: &str| metadata.lookup_with(name, mode);

        let params = match family {
            SensorFamily::LissAwifs => ConversionParams::LissAwifs {
                band,
                lmax: field(&format!("B{}_Lmax", band))?,
                lmin: field(&format!("B{}_Lmin", band))?,
                esun: config.irradiance(band)?,
                sun_elevation_deg: field("SunElevationAtCenter")?,
                dn_levels: config.dn_levels,
            },
            // OLI band 1 coefficients are shared by the reflective bands
            SensorFamily::Landsat8 => ConversionParams::Landsat8 {
                mult: field("REFLECTANCE_MULT_BAND_1")?,
                add: field("REFLECTANCE_ADD_BAND_1")?,
                sun_elevation_deg: field("SUN_ELEVATION")?,
            },
        };

        let elevation = params.sun_elevation_deg();
        if !(elevation > 0.0 && elevation <= 90.0) {
            return Err(CalError::Processing(format!(
                "sun elevation {} deg in {} is not above the horizon",
                elevation,
                metadata.source().display()
            )));
        }
        log::debug!("Band {} conversion parameters: {:?}", band, params);
        Ok(params)
    }

    pub fn family(&self) -> SensorFamily {
        match self {
            ConversionParams::LissAwifs { .. } => SensorFamily::LissAwifs,
            ConversionParams::Landsat8 { .. } => SensorFamily::Landsat8,
        }
    }

    pub fn sun_elevation_deg(&self) -> f64 {
        match self {
            ConversionParams::LissAwifs { sun_elevation_deg, .. }
            | ConversionParams::Landsat8 { sun_elevation_deg, .. } => *sun_elevation_deg,
        }
    }

    /// Reflectance of one non-zero digital number, before range checks
    pub fn reflectance(&self, dn: f64) -> f64 {
        let sin_elev = self.sun_elevation_deg().to_radians().sin();
        match *self {
            ConversionParams::LissAwifs { lmax, lmin, esun, dn_levels, .. } => {
                let radiance = lmin + ((lmax - lmin) / dn_levels) * dn;
                (PI * radiance) / (esun * sin_elev)
            }
            ConversionParams::Landsat8 { mult, add, .. } => (mult * dn + add) / sin_elev,
        }
    }
}

/// Outlier clipping percentiles
#[derive(Debug, Clone, Copy)]
pub struct ClipParams {
    /// Values at or above this percentile are outliers
    pub threshold_percentile: f64,
    /// Outliers are replaced by the value at this percentile
    pub ceiling_percentile: f64,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self {
            threshold_percentile: 99.99,
            ceiling_percentile: 99.999,
        }
    }
}

/// Result of an outlier clip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipOutcome {
    pub threshold: f32,
    pub ceiling: f32,
    pub replaced: usize,
}

/// Converts single-band radiance rasters into TOA reflectance
pub struct ReflectanceConverter {
    clip: ClipParams,
}

impl ReflectanceConverter {
    pub fn new(clip: ClipParams) -> Self {
        Self { clip }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(ClipParams {
            threshold_percentile: config.clip_threshold_percentile,
            ceiling_percentile: config.clip_ceiling_percentile,
        })
    }

    /// Apply the sensor formula and its validity range.
    ///
    /// DN 0 is nodata. LISS-III/AWiFS values outside [0, 1] become NaN; Landsat-8
    /// values at or above 1 become NaN while negative values are clamped to 0.
    pub fn to_reflectance(dn: ArrayView2<'_, f32>, params: &ConversionParams) -> Band {
        let family = params.family();
        dn.mapv(|value| {
            if value == 0.0 || value.is_nan() {
                return f32::NAN;
            }
            let r = params.reflectance(value as f64) as f32;
            match family {
                SensorFamily::LissAwifs if r > 1.0 || r < 0.0 => f32::NAN,
                SensorFamily::Landsat8 if r >= 1.0 => f32::NAN,
                SensorFamily::Landsat8 if r < 0.0 => 0.0,
                _ => r,
            }
        })
    }

    /// Soft ceiling clamp of the brightest valid pixels.
    ///
    /// Only applied when the maximum exceeds the threshold percentile; every value at
    /// or above that percentile then takes the ceiling percentile value.
    ///
    /// A second pass leaves the band unchanged only while the ceiling rank sits at
    /// least one position past the threshold rank, which with the default
    /// percentiles means roughly 11,112 or more valid pixels. On smaller bands each
    /// further pass pulls the clipped values down slightly.
    pub fn clip_outliers(&self, reflectance: &mut Band) -> Option<ClipOutcome> {
        let mut valid: Vec<f64> = reflectance
            .iter()
            .filter(|v| !v.is_nan())
            .map(|&v| v as f64)
            .collect();
        if valid.is_empty() {
            return None;
        }
        valid.sort_by(|a, b| a.total_cmp(b));

        let threshold = percentile_sorted(&valid, self.clip.threshold_percentile) as f32;
        let max = valid[valid.len() - 1] as f32;
        if max <= threshold {
            return None;
        }

        let ceiling = percentile_sorted(&valid, self.clip.ceiling_percentile) as f32;
        let mut replaced = 0;
        reflectance.mapv_inplace(|v| {
            if v >= threshold {
                replaced += 1;
                ceiling
            } else {
                v
            }
        });
        Some(ClipOutcome {
            threshold,
            ceiling,
            replaced,
        })
    }

    /// Formula, validity range and outlier clip
    pub fn convert(&self, dn: ArrayView2<'_, f32>, params: &ConversionParams) -> Band {
        let mut reflectance = Self::to_reflectance(dn, params);
        if let Some(clip) = self.clip_outliers(&mut reflectance) {
            log::debug!(
                "Clipped {} pixels at or above {:.6} to {:.6}",
                clip.replaced,
                clip.threshold,
                clip.ceiling
            );
        }
        reflectance
    }

    /// Convert the first band of `input` and write the result to `output`
    pub fn convert_file(
        &self,
        io: &dyn RasterIo,
        input: &Path,
        output: &Path,
        params: &ConversionParams,
    ) -> CalResult<()> {
        log::info!(
            "Radiance to reflectance ({}): {}",
            params.family(),
            input.display()
        );
        let radiance = io.read(input)?;
        let reflectance = self.convert(radiance.band(0), params);

        let valid = reflectance.iter().filter(|v| !v.is_nan()).count();
        log::debug!("{} of {} pixels valid", valid, reflectance.len());

        let mut profile = radiance.profile.with_band_count(1);
        profile.nodata = Some(f64::NAN);
        io.write(output, &Raster::from_band(reflectance, &profile)?)
    }
}

/// Linear-interpolation percentile of ascending, NaN-free values
pub fn percentile_sorted(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (percentile / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let t = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};
    use std::path::PathBuf;

    fn liss_params() -> ConversionParams {
        ConversionParams::LissAwifs {
            band: 2,
            lmax: 100.0,
            lmin: 0.0,
            esun: 1849.5,
            sun_elevation_deg: 45.0,
            dn_levels: 1024.0,
        }
    }

    #[test]
    fn test_liss_formula_closed_form() {
        let dn = array![[0.0f32, 512.0, 1023.0]];
        let refl = ReflectanceConverter::to_reflectance(dn.view(), &liss_params());

        assert!(refl[[0, 0]].is_nan());
        let sin45 = 45.0f64.to_radians().sin();
        for (col, value) in [(1, 512.0f64), (2, 1023.0)] {
            let radiance = 0.0 + (100.0 - 0.0) / 1024.0 * value;
            let expected = (PI * radiance / (1849.5 * sin45)) as f32;
            assert_eq!(refl[[0, col]], expected);
        }
        assert_relative_eq!(refl[[0, 1]], 0.1201, epsilon = 1e-4);
    }

    #[test]
    fn test_liss_out_of_range_is_invalid() {
        let params = ConversionParams::LissAwifs {
            band: 5,
            lmax: 100.0,
            lmin: -10.0,
            esun: 239.52,
            sun_elevation_deg: 30.0,
            dn_levels: 1024.0,
        };
        // DN 1 gives negative radiance, DN 1000 exceeds unit reflectance
        let dn = array![[1.0f32, 1000.0, 100.0]];
        let refl = ReflectanceConverter::to_reflectance(dn.view(), &params);
        assert!(refl[[0, 0]].is_nan());
        assert!(refl[[0, 1]].is_nan());
        assert!(refl[[0, 2]] > 0.0 && refl[[0, 2]] <= 1.0);
    }

    #[test]
    fn test_landsat_clamps_negative_and_drops_bright() {
        let params = ConversionParams::Landsat8 {
            mult: 2.0e-5,
            add: -0.1,
            sun_elevation_deg: 90.0,
        };
        let dn = array![[0.0f32, 1000.0, 10000.0, 60000.0]];
        let refl = ReflectanceConverter::to_reflectance(dn.view(), &params);

        assert!(refl[[0, 0]].is_nan());
        assert_eq!(refl[[0, 1]], 0.0);
        assert_relative_eq!(refl[[0, 2]], 0.1, epsilon = 1e-6);
        assert!(refl[[0, 3]].is_nan());
    }

    #[test]
    fn test_every_output_in_unit_range_or_nan() {
        let dn = Array2::from_shape_fn((16, 64), |(i, j)| ((i * 64 + j) % 1024) as f32);
        let converter = ReflectanceConverter::new(ClipParams::default());
        let refl = converter.convert(dn.view(), &liss_params());
        assert!(refl.iter().all(|v| v.is_nan() || (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_percentile_matches_linear_interpolation() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&values, 50.0), 3.0);
        assert_eq!(percentile_sorted(&values, 100.0), 5.0);
        assert_relative_eq!(percentile_sorted(&values, 90.0), 4.6, epsilon = 1e-12);

        assert!(percentile_sorted(&[], 50.0).is_nan());
    }

    #[test]
    fn test_clip_replaces_top_values_with_ceiling() {
        let converter = ReflectanceConverter::new(ClipParams::default());
        let mut band = array![[f32::NAN, 0.1, 0.2, 0.9]];
        let outcome = converter.clip_outliers(&mut band).unwrap();

        let sorted = [0.1f32 as f64, 0.2f32 as f64, 0.9f32 as f64];
        assert_eq!(outcome.ceiling, percentile_sorted(&sorted, 99.999) as f32);
        assert_eq!(outcome.replaced, 1);
        assert_eq!(band[[0, 3]], outcome.ceiling);
        assert_eq!(band[[0, 1]], 0.1);
        assert!(band[[0, 0]].is_nan());
    }

    #[test]
    fn test_clip_skipped_when_max_within_threshold() {
        let converter = ReflectanceConverter::new(ClipParams::default());
        let mut band = Array2::from_elem((4, 4), 0.25f32);
        assert!(converter.clip_outliers(&mut band).is_none());
        assert!(band.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn test_clip_is_idempotent_on_large_bands() {
        let converter = ReflectanceConverter::new(ClipParams::default());
        // whole-number ranks (20001) and fractional ranks (15000)
        for n in [20001usize, 15000] {
            let mut band = Array2::from_shape_fn((1, n), |(_, j)| j as f32 / n as f32);
            assert!(converter.clip_outliers(&mut band).is_some());
            let once = band.clone();

            converter.clip_outliers(&mut band);
            assert_eq!(band, once, "second clip changed a {}-pixel band", n);
        }
    }

    #[test]
    fn test_clip_repeats_on_small_bands() {
        let converter = ReflectanceConverter::new(ClipParams::default());
        let mut band = array![[f32::NAN, 0.1, 0.2, 0.9]];
        let first = converter.clip_outliers(&mut band).unwrap();

        let second = converter.clip_outliers(&mut band).unwrap();
        assert_eq!(second.replaced, 1);
        assert!(second.ceiling < first.ceiling);
        assert_eq!(band[[0, 3]], second.ceiling);
        assert_eq!(band[[0, 1]], 0.1);
        assert_eq!(band[[0, 2]], 0.2);
        assert!(band[[0, 0]].is_nan());
    }

    #[test]
    fn test_params_from_metadata() {
        let metadata = Metadata::parse(
            PathBuf::from("scene_META.txt"),
            "SunElevationAtCenter = 45.0\nB3_Lmax = 80.0\nB3_Lmin = 1.0\n",
        );
        let config = CalibrationConfig::default();
        let params = ConversionParams::from_metadata(&metadata, SensorFamily::LissAwifs, 3, &config).unwrap();
        assert_eq!(
            params,
            ConversionParams::LissAwifs {
                band: 3,
                lmax: 80.0,
                lmin: 1.0,
                esun: 1553.0,
                sun_elevation_deg: 45.0,
                dn_levels: 1024.0,
            }
        );

        let err = ConversionParams::from_metadata(&metadata, SensorFamily::LissAwifs, 2, &config).unwrap_err();
        assert!(matches!(err, CalError::FieldNotFound { ref field, .. } if field == "B2_Lmax"));

        let err = ConversionParams::from_metadata(&metadata, SensorFamily::Landsat8, 3, &config).unwrap_err();
        assert!(matches!(err, CalError::FieldNotFound { .. }));
    }

    #[test]
    fn test_sun_below_horizon_rejected() {
        let metadata = Metadata::parse(
            PathBuf::from("x_MTL.txt"),
            "REFLECTANCE_MULT_BAND_1 = 2.0E-05\nREFLECTANCE_ADD_BAND_1 = -0.1\nSUN_ELEVATION = -3.0\n",
        );
        let config = CalibrationConfig::default();
        assert!(matches!(
            ConversionParams::from_metadata(&metadata, SensorFamily::Landsat8, 4, &config),
            Err(CalError::Processing(_))
        ));
    }
}
