use crate::io::RasterIo;
use crate::types::{CalError, CalResult, Composite, GeoTransform, RasterProfile};

/// North-up output grid of a reprojection
#[derive(Debug, Clone, PartialEq)]
pub struct OutputGrid {
    pub geo_transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

impl OutputGrid {
    /// Smallest grid at `resolution` whose origin is the top-left of the points' extent.
    ///
    /// Pixel counts are rounded the way gdalwarp does for an explicit resolution.
    pub fn covering(xs: &[f64], ys: &[f64], resolution: (f64, f64)) -> CalResult<Self> {
        let (x_res, y_res) = resolution;
        if !(x_res > 0.0 && y_res > 0.0) || !x_res.is_finite() || !y_res.is_finite() {
            return Err(CalError::AlignmentError(format!(
                "invalid output resolution {} x {}",
                x_res, y_res
            )));
        }
        if xs.is_empty() || xs.len() != ys.len() {
            return Err(CalError::AlignmentError("empty footprint".to_string()));
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(CalError::AlignmentError(
                "footprint could not be transformed to the output projection".to_string(),
            ));
        }

        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let width = (((max_x - min_x) + x_res / 2.0) / x_res).floor().max(1.0) as usize;
        let height = (((max_y - min_y) + y_res / 2.0) / y_res).floor().max(1.0) as usize;

        Ok(Self {
            geo_transform: GeoTransform {
                top_left_x: min_x,
                pixel_width: x_res,
                rotation_x: 0.0,
                top_left_y: max_y,
                rotation_y: 0.0,
                pixel_height: -y_res,
            },
            width,
            height,
        })
    }
}

/// Puts the target composite on the reference pixel size in a fixed projection
pub struct GridAligner {
    target_epsg: u32,
}

impl GridAligner {
    pub fn new(target_epsg: u32) -> Self {
        Self { target_epsg }
    }

    pub fn target_epsg(&self) -> u32 {
        self.target_epsg
    }

    /// Ground sample distance (x, y) of the reference grid
    pub fn reference_resolution(profile: &RasterProfile) -> CalResult<(f64, f64)> {
        let gt = profile
            .geo_transform
            .ok_or_else(|| CalError::AlignmentError("reference composite has no geotransform".to_string()))?;
        let (x_res, y_res) = gt.pixel_size();
        let (x_res, y_res) = (x_res.abs(), y_res.abs());
        if !(x_res > 0.0 && y_res > 0.0) || !x_res.is_finite() || !y_res.is_finite() {
            return Err(CalError::AlignmentError(format!(
                "reference geotransform has unusable pixel size {} x {}",
                gt.pixel_width, gt.pixel_height
            )));
        }
        Ok((x_res, y_res))
    }

    /// Resample `target` to the reference pixel size in the output projection
    pub fn align(
        &self,
        io: &dyn RasterIo,
        target: &Composite,
        reference: &Composite,
    ) -> CalResult<Composite> {
        let resolution = Self::reference_resolution(&reference.raster.profile)?;
        log::info!(
            "Resampling target composite to {:.3} x {:.3} in EPSG:{}",
            resolution.0,
            resolution.1,
            self.target_epsg
        );

        let raster = io.reproject(&target.raster, self.target_epsg, resolution)?;
        log::debug!(
            "Aligned target: {}x{} (reference {}x{})",
            raster.profile.width,
            raster.profile.height,
            reference.raster.profile.width,
            reference.raster.profile.height
        );

        Ok(Composite {
            raster,
            band_numbers: target.band_numbers.clone(),
            role: target.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(gt: Option<[f64; 6]>) -> RasterProfile {
        RasterProfile {
            width: 10,
            height: 10,
            band_count: 1,
            geo_transform: gt.map(GeoTransform::from_gdal),
            crs_wkt: None,
            nodata: None,
        }
    }

    #[test]
    fn test_reference_resolution() {
        let p = profile(Some([500000.0, 20.0, 0.0, 2000000.0, 0.0, -20.0]));
        assert_eq!(GridAligner::reference_resolution(&p).unwrap(), (20.0, 20.0));

        let p = profile(Some([0.0, 30.0, 0.0, 0.0, 0.0, 30.0]));
        assert_eq!(GridAligner::reference_resolution(&p).unwrap(), (30.0, 30.0));
    }

    #[test]
    fn test_missing_or_degenerate_geotransform() {
        assert!(matches!(
            GridAligner::reference_resolution(&profile(None)),
            Err(CalError::AlignmentError(_))
        ));
        assert!(matches!(
            GridAligner::reference_resolution(&profile(Some([0.0, 0.0, 0.0, 0.0, 0.0, -10.0]))),
            Err(CalError::AlignmentError(_))
        ));
    }

    #[test]
    fn test_output_grid_covering() {
        let xs = [500000.0, 500400.0, 500000.0, 500400.0];
        let ys = [2000000.0, 2000000.0, 1999800.0, 1999800.0];
        let grid = OutputGrid::covering(&xs, &ys, (20.0, 20.0)).unwrap();

        assert_eq!((grid.width, grid.height), (20, 10));
        assert_eq!(grid.geo_transform.top_left_x, 500000.0);
        assert_eq!(grid.geo_transform.top_left_y, 2000000.0);
        assert_eq!(grid.geo_transform.pixel_size(), (20.0, 20.0));
    }

    #[test]
    fn test_output_grid_rejects_bad_input() {
        assert!(OutputGrid::covering(&[0.0, 1.0], &[0.0, 1.0], (0.0, 1.0)).is_err());
        assert!(OutputGrid::covering(&[0.0, f64::INFINITY], &[0.0, 1.0], (1.0, 1.0)).is_err());
        assert!(OutputGrid::covering(&[], &[], (1.0, 1.0)).is_err());
    }
}
