use crate::core::align::OutputGrid;
use crate::types::{BandStack, CalError, CalResult, GeoTransform, Raster, RasterProfile};
use gdal::raster::Buffer;
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::{Dataset, DriverManager};
use ndarray::Axis;
use std::path::Path;

/// Samples per footprint edge when projecting a raster outline
const FOOTPRINT_SAMPLES: usize = 21;

/// Raster file access and resampling used by the pipeline
pub trait RasterIo {
    /// Read every band of a raster as f32, with its profile
    fn read(&self, path: &Path) -> CalResult<Raster>;

    /// Write a raster as f32 bands with NaN nodata
    fn write(&self, path: &Path, raster: &Raster) -> CalResult<()>;

    /// Resample onto a north-up grid in `epsg` with the given pixel size
    fn reproject(&self, raster: &Raster, epsg: u32, resolution: (f64, f64)) -> CalResult<Raster>;
}

/// GDAL-backed raster access (GeoTIFF output)
#[derive(Debug, Clone, Default)]
pub struct GdalRasterIo;

impl GdalRasterIo {
    pub fn new() -> Self {
        Self
    }

    fn read_dataset(dataset: &Dataset) -> CalResult<Raster> {
        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count() as usize;
        if band_count == 0 {
            return Err(CalError::Processing("raster has no bands".to_string()));
        }

        let mut data = BandStack::zeros((band_count, height, width));
        let mut nodata = None;
        for b in 0..band_count {
            let rasterband = dataset.rasterband((b + 1) as isize)?;
            if b == 0 {
                nodata = rasterband.no_data_value();
            }
            let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
            let grid = ndarray::Array2::from_shape_vec((height, width), buffer.data)
                .map_err(|e| CalError::Processing(format!("Failed to reshape band {}: {}", b + 1, e)))?;
            data.index_axis_mut(Axis(0), b).assign(&grid);
        }

        let projection = dataset.projection();
        let profile = RasterProfile {
            width,
            height,
            band_count,
            geo_transform: dataset.geo_transform().ok().map(GeoTransform::from_gdal),
            crs_wkt: if projection.is_empty() { None } else { Some(projection) },
            nodata,
        };
        Raster::new(data, profile)
    }

    fn write_bands(dataset: &mut Dataset, raster: &Raster) -> CalResult<()> {
        let profile = &raster.profile;
        if let Some(gt) = &profile.geo_transform {
            dataset.set_geo_transform(&gt.to_gdal())?;
        }
        if let Some(wkt) = &profile.crs_wkt {
            dataset.set_projection(wkt)?;
        }

        let (width, height) = (profile.width, profile.height);
        for b in 0..raster.band_count() {
            let mut rasterband = dataset.rasterband((b + 1) as isize)?;
            let flat_data: Vec<f32> = raster.band(b).iter().cloned().collect();
            let buffer = Buffer::new((width, height), flat_data);
            rasterband.write((0, 0), (width, height), &buffer)?;
            rasterband.set_no_data_value(Some(f64::NAN))?;
        }
        Ok(())
    }

    fn to_mem_dataset(raster: &Raster) -> CalResult<Dataset> {
        let driver = DriverManager::get_driver_by_name("MEM")?;
        let profile = &raster.profile;
        let mut dataset = driver.create_with_band_type::<f32, _>(
            "",
            profile.width as isize,
            profile.height as isize,
            profile.band_count as isize,
        )?;
        Self::write_bands(&mut dataset, raster)?;
        Ok(dataset)
    }
}

impl RasterIo for GdalRasterIo {
    fn read(&self, path: &Path) -> CalResult<Raster> {
        log::debug!("Reading raster: {}", path.display());
        let dataset = Dataset::open(path)?;
        Self::read_dataset(&dataset)
    }

    fn write(&self, path: &Path, raster: &Raster) -> CalResult<()> {
        log::debug!(
            "Writing {}-band raster ({}x{}): {}",
            raster.band_count(),
            raster.profile.width,
            raster.profile.height,
            path.display()
        );

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<f32, _>(
            path,
            raster.profile.width as isize,
            raster.profile.height as isize,
            raster.band_count() as isize,
        )?;
        Self::write_bands(&mut dataset, raster)
    }

    fn reproject(&self, raster: &Raster, epsg: u32, resolution: (f64, f64)) -> CalResult<Raster> {
        let src_transform = raster
            .profile
            .geo_transform
            .ok_or_else(|| CalError::AlignmentError("target composite has no geotransform".to_string()))?;
        if raster.profile.crs_wkt.is_none() {
            return Err(CalError::AlignmentError(
                "target composite has no coordinate reference system".to_string(),
            ));
        }

        let src_ds = Self::to_mem_dataset(raster)?;
        // dataset SRS keeps GDAL's traditional x/y axis order
        let src_srs = src_ds.spatial_ref()?;
        let dst_srs = SpatialRef::from_epsg(epsg)?;
        let transform = CoordTransform::new(&src_srs, &dst_srs)?;

        let (mut xs, mut ys) =
            footprint(&src_transform, raster.profile.width, raster.profile.height, FOOTPRINT_SAMPLES);
        let mut zs = vec![0.0; xs.len()];
        transform.transform_coords(&mut xs, &mut ys, &mut zs)?;

        let grid = OutputGrid::covering(&xs, &ys, resolution)?;
        log::debug!(
            "Reprojecting to EPSG:{} grid {}x{} at {:.3} x {:.3}",
            epsg,
            grid.width,
            grid.height,
            resolution.0,
            resolution.1
        );

        let band_count = raster.band_count();
        let profile = RasterProfile {
            width: grid.width,
            height: grid.height,
            band_count,
            geo_transform: Some(grid.geo_transform),
            crs_wkt: Some(dst_srs.to_wkt()?),
            nodata: Some(f64::NAN),
        };
        // pre-fill so pixels outside the source footprint stay invalid
        let empty = Raster::new(
            BandStack::from_elem((band_count, grid.height, grid.width), f32::NAN),
            profile,
        )?;
        let dst_ds = Self::to_mem_dataset(&empty)?;

        gdal::raster::reproject(&src_ds, &dst_ds)?;
        Self::read_dataset(&dst_ds)
    }
}

/// Map coordinates sampled along the outline of a raster
fn footprint(gt: &GeoTransform, width: usize, height: usize, samples: usize) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::with_capacity(samples * 4);
    let mut ys = Vec::with_capacity(samples * 4);
    let (w, h) = (width as f64, height as f64);
    let steps = (samples.max(2) - 1) as f64;

    for i in 0..samples.max(2) {
        let t = i as f64 / steps;
        for (col, row) in [(t * w, 0.0), (t * w, h), (0.0, t * h), (w, t * h)] {
            let (x, y) = gt.pixel_to_map(col, row);
            xs.push(x);
            ys.push(y);
        }
    }
    (xs, ys)
}
