//! On-disk catalog document.
//!
//! The catalog is a small JSON document written atomically: it is serialized
//! to a sibling temp file which then replaces the previous document.

use crate::error::{GeoFilterError, Result};
use crate::grid::{GeoBoundingBox, GeoPointE2, MapViewState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Current document schema version.
pub const CATALOG_VERSION: u32 = 1;

/// Root of the persisted catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: u32,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub active_geo_filter_id: Option<String>,
    #[serde(default)]
    pub filter_enabled: Option<bool>,
    #[serde(default)]
    pub filters: Vec<GeoFilterRecord>,
}

impl Default for CatalogDocument {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION,
            saved_at: None,
            app_version: None,
            active_geo_filter_id: None,
            filter_enabled: None,
            filters: Vec::new(),
        }
    }
}

/// Four corner values in normalized (non-negative) E2 units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NormalizedBox {
    #[serde(default)]
    pub top_left_lat: i32,
    #[serde(default)]
    pub top_left_lon: i32,
    #[serde(default)]
    pub bottom_right_lat: i32,
    #[serde(default)]
    pub bottom_right_lon: i32,
}

impl From<&GeoBoundingBox> for NormalizedBox {
    fn from(bbox: &GeoBoundingBox) -> Self {
        Self {
            top_left_lat: bbox.top_left.normalized_lat(),
            top_left_lon: bbox.top_left.normalized_lon(),
            bottom_right_lat: bbox.bottom_right.normalized_lat(),
            bottom_right_lon: bbox.bottom_right.normalized_lon(),
        }
    }
}

impl TryFrom<NormalizedBox> for GeoBoundingBox {
    type Error = GeoFilterError;

    /// Corners must lie on the normalized grid. Orientation is not checked,
    /// an inverted box covers no geo parts.
    fn try_from(b: NormalizedBox) -> Result<Self> {
        let top_left = GeoPointE2::from_normalized(b.top_left_lat, b.top_left_lon);
        let bottom_right = GeoPointE2::from_normalized(b.bottom_right_lat, b.bottom_right_lon);
        if !top_left.is_valid() || !bottom_right.is_valid() {
            return Err(GeoFilterError::InvalidFormat(format!(
                "stored box out of range: {:?}",
                b
            )));
        }
        Ok(GeoBoundingBox::from_corners_unchecked(top_left, bottom_right))
    }
}

const fn default_zoom_level() -> u32 {
    MapViewState::DEFAULT_ZOOM_LEVEL
}

/// One persisted geo filter. Missing fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFilterRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub num_geo_parts: u64,
    #[serde(default)]
    pub geo_location: NormalizedBox,
    #[serde(default)]
    pub geo_parts: Option<NormalizedBox>,
    #[serde(default = "default_zoom_level")]
    pub map_zoom_level: u32,
    #[serde(default)]
    pub map_center_latitude: f64,
    #[serde(default)]
    pub map_center_longitude: f64,
}

/// Location of the catalog document.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    path: PathBuf,
}

impl CatalogFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the document. A missing or empty file is `Ok(None)`.
    pub fn read(&self) -> Result<Option<CatalogDocument>> {
        if !self.exists() {
            return Ok(None);
        }

        let file = File::open(&self.path)?;
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }

        let document: CatalogDocument = serde_json::from_reader(BufReader::new(file))?;
        if document.version > CATALOG_VERSION {
            return Err(GeoFilterError::UnsupportedVersion {
                found: document.version,
                supported: CATALOG_VERSION,
            });
        }
        if document.version == 0 {
            return Err(GeoFilterError::InvalidFormat(
                "catalog version must be at least 1".to_string(),
            ));
        }

        Ok(Some(document))
    }

    pub fn write(&self, document: &CatalogDocument) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.temp_path();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, document)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_reads_none() {
        let dir = TempDir::new().unwrap();
        let file = CatalogFile::new(dir.path().join("tour-geo-filter.json"));
        assert!(file.read().unwrap().is_none());
    }

    #[test]
    fn test_empty_file_reads_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tour-geo-filter.json");
        fs::write(&path, b"").unwrap();
        assert!(CatalogFile::new(&path).read().unwrap().is_none());
    }

    #[test]
    fn test_record_defaults() {
        let json = r#"{"version": 1, "filters": [{"id": "a"}]}"#;
        let document: CatalogDocument = serde_json::from_str(json).unwrap();
        let record = &document.filters[0];
        assert_eq!(record.map_zoom_level, 6);
        assert_eq!(record.map_center_latitude, 0.0);
        assert_eq!(record.map_center_longitude, 0.0);
        assert_eq!(record.num_geo_parts, 0);
        assert!(record.geo_parts.is_none());
        assert!(document.active_geo_filter_id.is_none());
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, r#"{"version": 2}"#).unwrap();
        let err = CatalogFile::new(&path).read().unwrap_err();
        assert!(matches!(
            err,
            GeoFilterError::UnsupportedVersion {
                found: 2,
                supported: 1
            }
        ));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            CatalogFile::new(&path).read(),
            Err(GeoFilterError::Json(_))
        ));
    }

    #[test]
    fn test_write_replaces_atomically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("catalog.json");
        let file = CatalogFile::new(&path);

        let mut document = CatalogDocument {
            active_geo_filter_id: Some("x".to_string()),
            ..Default::default()
        };
        file.write(&document).unwrap();
        document.active_geo_filter_id = None;
        file.write(&document).unwrap();

        assert_eq!(file.read().unwrap(), Some(document));
        assert!(!dir.path().join("nested").join("catalog.json.tmp").exists());
    }

    #[test]
    fn test_normalized_box_conversion() {
        let bbox = GeoBoundingBox::from_degrees(47.50, 8.00, 47.40, 8.20).unwrap();
        let normalized = NormalizedBox::from(&bbox);
        assert_eq!(normalized.top_left_lat, 13_750);
        assert_eq!(normalized.bottom_right_lon, 18_820);
        assert_eq!(GeoBoundingBox::try_from(normalized).unwrap(), bbox);
    }

    #[test]
    fn test_normalized_box_off_grid_is_rejected() {
        let off_grid = NormalizedBox {
            top_left_lat: 30_000,
            top_left_lon: 18_000,
            bottom_right_lat: 29_990,
            bottom_right_lon: 18_010,
        };
        assert!(matches!(
            GeoBoundingBox::try_from(off_grid),
            Err(GeoFilterError::InvalidFormat(_))
        ));

        let inverted = NormalizedBox {
            top_left_lat: 13_740,
            top_left_lon: 18_820,
            bottom_right_lat: 13_750,
            bottom_right_lon: 18_800,
        };
        assert_eq!(GeoBoundingBox::try_from(inverted).unwrap().cell_count(), 0);
    }
}
