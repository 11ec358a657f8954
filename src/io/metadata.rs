use crate::config::MetadataMatch;
use crate::types::{CalError, CalResult, SensorFamily};
use std::path::{Path, PathBuf};

/// Scene metadata parsed from a `KEY = VALUE` text file
#[derive(Debug, Clone)]
pub struct Metadata {
    source: PathBuf,
    lines: Vec<String>,
}

impl Metadata {
    /// Locate and read the metadata file of `family` inside `folder`
    pub fn load<P: AsRef<Path>>(folder: P, family: SensorFamily) -> CalResult<Self> {
        let folder = folder.as_ref();
        let path = find_metadata_file(folder, family)?;
        log::debug!("Reading {} metadata: {}", family, path.display());
        let text = std::fs::read_to_string(&path)?;
        Ok(Self::parse(path, &text))
    }

    pub fn parse(source: PathBuf, text: &str) -> Self {
        let lines = text.lines().map(|l| l.to_string()).collect();
        Self { source, lines }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Numeric value of the last line containing `field`
    pub fn lookup(&self, field: &str) -> CalResult<f64> {
        self.lookup_with(field, MetadataMatch::Substring)
    }

    /// Numeric value of the line whose key is exactly `field`
    pub fn lookup_exact(&self, field: &str) -> CalResult<f64> {
        self.lookup_with(field, MetadataMatch::ExactKey)
    }

    pub fn lookup_with(&self, field: &str, mode: MetadataMatch) -> CalResult<f64> {
        let line = self
            .lines
            .iter()
            .rev()
            .find(|line| match mode {
                MetadataMatch::Substring => line.contains(field),
                MetadataMatch::ExactKey => line
                    .split_once('=')
                    .map(|(key, _)| key.trim() == field)
                    .unwrap_or(false),
            })
            .ok_or_else(|| CalError::FieldNotFound {
                field: field.to_string(),
                file: self.source.clone(),
            })?;

        parse_value(line).ok_or_else(|| CalError::MalformedValue {
            field: field.to_string(),
            file: self.source.clone(),
            line: line.trim().to_string(),
        })
    }
}

fn parse_value(line: &str) -> Option<f64> {
    let (_, raw) = line.rsplit_once('=')?;
    raw.trim().parse::<f64>().ok()
}

/// First file in `folder` ending with the family's metadata suffix
fn find_metadata_file(folder: &Path, family: SensorFamily) -> CalResult<PathBuf> {
    let suffix = family.metadata_suffix();
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(suffix))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();

    if candidates.len() > 1 {
        log::warn!(
            "{} metadata files in {}, using {}",
            candidates.len(),
            folder.display(),
            candidates[0].display()
        );
    }

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| CalError::MetadataNotFound {
            folder: folder.to_path_buf(),
            pattern: suffix.to_string(),
        })
}

/// Whether `folder` holds a metadata file for `family`
pub fn has_metadata<P: AsRef<Path>>(folder: P, family: SensorFamily) -> bool {
    find_metadata_file(folder.as_ref(), family).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const META: &str = "\
ProductID = 123456
SunElevationAtCenter = 45.0
B2_Lmax = 100.0
B2_Lmin = 0.0
B3_Lmax = 80.5
B3_Lmin = 1.5
SatID = IRS-R2
";

    fn meta() -> Metadata {
        Metadata::parse(PathBuf::from("scene_META.txt"), META)
    }

    #[test]
    fn test_lookup_values() {
        let m = meta();
        assert_eq!(m.lookup("SunElevationAtCenter").unwrap(), 45.0);
        assert_eq!(m.lookup("B3_Lmax").unwrap(), 80.5);
        assert_eq!(m.lookup("B3_Lmin").unwrap(), 1.5);
    }

    #[test]
    fn test_missing_field_fails() {
        let err = meta().lookup("B4_Lmax").unwrap_err();
        assert!(matches!(err, CalError::FieldNotFound { ref field, .. } if field == "B4_Lmax"));
    }

    #[test]
    fn test_non_numeric_value_fails() {
        let err = meta().lookup("SatID").unwrap_err();
        assert!(matches!(err, CalError::MalformedValue { .. }));
    }

    #[test]
    fn test_last_substring_match_wins() {
        let m = Metadata::parse(
            PathBuf::from("x_MTL.txt"),
            "REFLECTANCE_MULT_BAND_1 = 2.0E-05\nREFLECTANCE_MULT_BAND_10 = 3.0E-05\n",
        );
        // substring lookup picks BAND_10, the last line containing the name
        assert_eq!(m.lookup("REFLECTANCE_MULT_BAND_1").unwrap(), 3.0e-5);
        assert_eq!(m.lookup_exact("REFLECTANCE_MULT_BAND_1").unwrap(), 2.0e-5);
    }

    #[test]
    fn test_load_from_folder() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            Metadata::load(dir.path(), SensorFamily::LissAwifs),
            Err(CalError::MetadataNotFound { .. })
        ));

        std::fs::write(dir.path().join("L3_scene_META.txt"), META).unwrap();
        let m = Metadata::load(dir.path(), SensorFamily::LissAwifs).unwrap();
        assert_eq!(m.lookup("B2_Lmax").unwrap(), 100.0);
        assert!(!has_metadata(dir.path(), SensorFamily::Landsat8));
    }
}
