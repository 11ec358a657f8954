//! Scene folder listing, band-number assignment and output folder setup

use crate::config::CalibrationConfig;
use crate::types::{CalError, CalResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A raster file with its physical band number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandFile {
    pub path: PathBuf,
    pub band: u32,
}

impl BandFile {
    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Raster files directly inside `folder`, sorted by name.
///
/// Only allow-listed extensions are kept; earlier pipeline composites are skipped.
pub fn list_rasters(folder: &Path, config: &CalibrationConfig) -> CalResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let allowed = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| config.is_raster_extension(e))
            .unwrap_or(false);
        if !allowed {
            continue;
        }
        if file_name(&path).starts_with("composite") {
            log::debug!("Skipping previous composite: {}", path.display());
            continue;
        }
        files.push(path);
    }
    files.sort();

    if files.is_empty() {
        return Err(CalError::NoRasters(folder.to_path_buf()));
    }
    Ok(files)
}

/// Remove `dir` with its contents, if present, and create it empty
pub fn recreate_dir(dir: &Path) -> CalResult<()> {
    if dir.exists() {
        log::debug!("Clearing {}", dir.display());
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Band number of a target-sensor file: every digit of the stem, in order
pub fn target_band_number(name: &str) -> Option<u32> {
    let digits: String = file_stem(name).chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn band_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[^a-z0-9])b(?:and)?[_-]?(\d{1,2})(?:[^0-9]|$)").expect("band token pattern is valid")
    })
}

/// Band number of a reference file: last `B<nn>`/`band<nn>` token, else all digits
pub fn reference_band_number(name: &str) -> Option<u32> {
    let stem = file_stem(name);
    band_token()
        .captures_iter(stem)
        .last()
        .and_then(|cap| cap[1].parse().ok())
        .or_else(|| target_band_number(name))
}

/// Assign band numbers and sort ascending; missing or repeated numbers are fatal
pub fn order_by_band<F>(files: Vec<PathBuf>, band_of: F) -> CalResult<Vec<BandFile>>
where
    F: Fn(&str) -> Option<u32>,
{
    let mut bands = files
        .into_iter()
        .map(|path| -> CalResult<BandFile> {
            let name = file_name(&path);
            let band = band_of(&name).ok_or_else(|| CalError::MissingBandNumber(name.clone()))?;
            Ok(BandFile { path, band })
        })
        .collect::<CalResult<Vec<_>>>()?;

    bands.sort_by_key(|b| b.band);
    for pair in bands.windows(2) {
        if pair[0].band == pair[1].band {
            return Err(CalError::DuplicateBand {
                band: pair[0].band,
                first: pair[0].file_name(),
                second: pair[1].file_name(),
            });
        }
    }
    Ok(bands)
}
