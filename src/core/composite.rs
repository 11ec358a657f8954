use crate::config::CalibrationConfig;
use crate::io::{BandFile, RasterIo};
use crate::types::{BandStack, CalError, CalResult, Composite, Raster, ReferenceSensor, SensorRole};
use ndarray::Axis;
use std::path::Path;

/// Stacks single-band rasters into one multi-band composite
pub struct BandCompositor {
    sentinel2_scale: f64,
}

impl Default for BandCompositor {
    fn default() -> Self {
        Self {
            sentinel2_scale: 0.0001,
        }
    }
}

impl BandCompositor {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            sentinel2_scale: config.sentinel2_scale,
        }
    }

    /// Multiplier applied to every layer, if any
    pub fn scale_for(&self, role: SensorRole, reference: ReferenceSensor) -> Option<f64> {
        match (role, reference) {
            (SensorRole::Reference, ReferenceSensor::Sentinel2) => Some(self.sentinel2_scale),
            _ => None,
        }
    }

    /// Stack the first band of each raster, in the given (ascending) band order
    pub fn stack(
        &self,
        layers: Vec<(u32, Raster)>,
        role: SensorRole,
        reference: ReferenceSensor,
    ) -> CalResult<Composite> {
        let first = layers
            .first()
            .ok_or_else(|| CalError::Processing("no rasters to composite".to_string()))?;
        let base_profile = first.1.profile.clone();
        let (width, height) = (base_profile.width, base_profile.height);

        for pair in layers.windows(2) {
            if pair[0].0 >= pair[1].0 {
                return Err(CalError::Processing(format!(
                    "bands must be strictly ascending, got {} before {}",
                    pair[0].0, pair[1].0
                )));
            }
        }

        let scale = self.scale_for(role, reference);
        let mut data = BandStack::zeros((layers.len(), height, width));
        let mut band_numbers = Vec::with_capacity(layers.len());

        for (i, (band, raster)) in layers.iter().enumerate() {
            if raster.profile.width != width || raster.profile.height != height {
                return Err(CalError::DimensionMismatch(format!(
                    "band {} is {}x{}, expected {}x{}",
                    band, raster.profile.width, raster.profile.height, width, height
                )));
            }
            let mut layer = data.index_axis_mut(Axis(0), i);
            match scale {
                Some(s) => layer.assign(&raster.band(0).mapv(|v| (v as f64 * s) as f32)),
                None => layer.assign(&raster.band(0)),
            }
            band_numbers.push(*band);
        }

        let mut profile = base_profile.with_band_count(layers.len());
        profile.nodata = Some(f64::NAN);
        Ok(Composite {
            raster: Raster::new(data, profile)?,
            band_numbers,
            role,
        })
    }

    /// Read, stack and write a composite of `files`
    pub fn composite_files(
        &self,
        io: &dyn RasterIo,
        files: &[BandFile],
        role: SensorRole,
        reference: ReferenceSensor,
        output: &Path,
    ) -> CalResult<Composite> {
        match role {
            SensorRole::Target => log::info!("Stacking target bands ({} files)", files.len()),
            SensorRole::Reference => log::info!("Stacking {} bands ({} files)", reference, files.len()),
        }

        let layers = files
            .iter()
            .map(|f| -> CalResult<(u32, Raster)> { Ok((f.band, io.read(&f.path)?)) })
            .collect::<CalResult<Vec<_>>>()?;
        let composite = self.stack(layers, role, reference)?;

        io.write(output, &composite.raster)?;
        log::debug!(
            "Composite bands {:?} written to {}",
            composite.band_numbers,
            output.display()
        );
        Ok(composite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RasterProfile;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn single(values: Array2<f32>) -> Raster {
        let (height, width) = values.dim();
        let profile = RasterProfile {
            width,
            height,
            band_count: 1,
            geo_transform: None,
            crs_wkt: None,
            nodata: None,
        };
        Raster::from_band(values, &profile).unwrap()
    }

    #[test]
    fn test_sentinel2_reference_is_scaled() {
        let compositor = BandCompositor::default();
        let layers = vec![(3, single(array![[10000.0f32, 20000.0]]))];
        let composite = compositor
            .stack(layers, SensorRole::Reference, ReferenceSensor::Sentinel2)
            .unwrap();

        assert_relative_eq!(composite.raster.data[[0, 0, 0]], 1.0);
        assert_relative_eq!(composite.raster.data[[0, 0, 1]], 2.0);
    }

    #[test]
    fn test_other_references_and_target_unscaled() {
        let compositor = BandCompositor::default();
        for (role, reference) in [
            (SensorRole::Reference, ReferenceSensor::Landsat8),
            (SensorRole::Reference, ReferenceSensor::Others),
            (SensorRole::Target, ReferenceSensor::Sentinel2),
        ] {
            let layers = vec![(2, single(array![[0.25f32, 0.5]]))];
            let composite = compositor.stack(layers, role, reference).unwrap();
            assert_eq!(composite.raster.data[[0, 0, 1]], 0.5);
        }
    }

    #[test]
    fn test_band_count_and_order() {
        let compositor = BandCompositor::default();
        let layers = vec![
            (2, single(Array2::from_elem((2, 3), 2.0))),
            (3, single(Array2::from_elem((2, 3), 3.0))),
            (5, single(Array2::from_elem((2, 3), 5.0))),
        ];
        let composite = compositor
            .stack(layers, SensorRole::Target, ReferenceSensor::Others)
            .unwrap();

        assert_eq!(composite.band_count(), 3);
        assert_eq!(composite.raster.profile.band_count, 3);
        assert_eq!(composite.band_numbers, vec![2, 3, 5]);
        assert_eq!(composite.raster.data[[2, 1, 2]], 5.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let compositor = BandCompositor::default();
        let layers = vec![
            (2, single(Array2::zeros((2, 3)))),
            (3, single(Array2::zeros((3, 3)))),
        ];
        assert!(matches!(
            compositor.stack(layers, SensorRole::Target, ReferenceSensor::Others),
            Err(CalError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_unsorted_bands_rejected() {
        let compositor = BandCompositor::default();
        let layers = vec![
            (4, single(Array2::zeros((1, 1)))),
            (2, single(Array2::zeros((1, 1)))),
        ];
        assert!(compositor
            .stack(layers, SensorRole::Target, ReferenceSensor::Others)
            .is_err());
    }
}
