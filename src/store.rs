//! Calibration persistence keyed by wavelength pair
//!
//! Layout of a store folder:
//!
//! ```text
//! calibrations/
//!   index.json                       {"561_488": "488_561_20260102_101500.json", ...}
//!   488_561_20260102_101500.json     one CalibrationRecord
//! ```
//!
//! The index is the only source of truth for key → file resolution and is
//! re-read on every query. Entries are file names relative to the store
//! folder, so the folder can be moved or reached through any path; absolute
//! entries are still honoured. There is no file locking: two processes saving at
//! the same time can lose one index update.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::calibration::CalibrationRecord;
use crate::error::{Error, Result};

const INDEX_FILE: &str = "index.json";

type Index = BTreeMap<String, PathBuf>;

/// Identity of a calibration: the corrected channel against the reference one.
///
/// Not symmetric: 488 → 561 and 561 → 488 are distinct calibrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CalibrationKey {
    pub reference_wavelength: u32,
    pub corrected_wavelength: u32,
}

impl CalibrationKey {
    pub fn new(reference_wavelength: u32, corrected_wavelength: u32) -> Self {
        Self {
            reference_wavelength,
            corrected_wavelength,
        }
    }

    /// Parse an index key of the form `"{corrected}_{reference}"`
    pub fn parse(key: &str) -> Option<Self> {
        let (corrected, reference) = key.split_once('_')?;
        Some(Self::new(reference.parse().ok()?, corrected.parse().ok()?))
    }
}

/// Index keys list the corrected wavelength first
impl fmt::Display for CalibrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.corrected_wavelength, self.reference_wavelength)
    }
}

/// Folder of calibration files plus their index
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    folder: PathBuf,
}

impl CalibrationStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn index_path(&self) -> PathBuf {
        self.folder.join(INDEX_FILE)
    }

    /// Whether a calibration is indexed for the pair
    pub fn exists(&self, reference_wavelength: u32, corrected_wavelength: u32) -> Result<bool> {
        let key = CalibrationKey::new(reference_wavelength, corrected_wavelength);
        Ok(self.read_index()?.contains_key(&key.to_string()))
    }

    /// Write the record to its own file and point the index at it.
    ///
    /// Any previous index entry for the same pair is replaced; the old file
    /// is left on disk.
    pub fn save(&self, record: &CalibrationRecord) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.folder).map_err(|source| Error::Io {
            path: self.folder.clone(),
            source,
        })?;

        let file_name = format!(
            "{}_{}_{}.json",
            record.reference_wavelength,
            record.corrected_wavelength,
            sanitize(&record.timestamp)
        );
        let path = self.folder.join(&file_name);
        write_json(&path, record)?;

        let key = CalibrationKey::new(record.reference_wavelength, record.corrected_wavelength);
        let mut index = self.read_index()?;
        if let Some(previous) = index.insert(key.to_string(), PathBuf::from(file_name)) {
            debug!("Replacing calibration {} (was {:?})", key, previous);
        }
        write_json(&self.index_path(), &index)?;

        info!("Calibration saved at {:?}", path);
        Ok(path)
    }

    /// Load the record indexed for the pair
    pub fn load(
        &self,
        reference_wavelength: u32,
        corrected_wavelength: u32,
    ) -> Result<CalibrationRecord> {
        let key = CalibrationKey::new(reference_wavelength, corrected_wavelength);
        let index = self.read_index()?;
        let entry = index.get(&key.to_string()).ok_or(Error::NotFound {
            reference: reference_wavelength,
            corrected: corrected_wavelength,
        })?;
        let path = self.resolve(entry);

        let content = std::fs::read_to_string(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        let record: CalibrationRecord =
            serde_json::from_str(&content).map_err(|source| Error::Serialization {
                path: path.clone(),
                source,
            })?;

        if record.reference_wavelength != reference_wavelength
            || record.corrected_wavelength != corrected_wavelength
        {
            return Err(Error::invalid(format!(
                "{:?} holds calibration {}nm -> {}nm but is indexed under {}",
                path, record.reference_wavelength, record.corrected_wavelength, key
            )));
        }

        debug!("Loaded calibration {} from {:?}", key, path);
        Ok(record)
    }

    /// All indexed calibrations, in key order
    pub fn list(&self) -> Result<Vec<(CalibrationKey, PathBuf)>> {
        Ok(self
            .read_index()?
            .into_iter()
            .filter_map(|(key, entry)| {
                CalibrationKey::parse(&key).map(|k| (k, self.resolve(&entry)))
            })
            .collect())
    }

    /// Drop the index entry for the pair. The calibration file is kept.
    pub fn remove(&self, reference_wavelength: u32, corrected_wavelength: u32) -> Result<bool> {
        let key = CalibrationKey::new(reference_wavelength, corrected_wavelength);
        let mut index = self.read_index()?;
        if index.remove(&key.to_string()).is_none() {
            return Ok(false);
        }
        write_json(&self.index_path(), &index)?;
        info!("Removed calibration {} from index", key);
        Ok(true)
    }

    /// Index entries are relative to the folder; absolute ones pass through
    fn resolve(&self, entry: &Path) -> PathBuf {
        if entry.is_absolute() {
            entry.to_path_buf()
        } else {
            self.folder.join(entry)
        }
    }

    fn read_index(&self) -> Result<Index> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Index::new());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| Error::Serialization { path, source })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).map_err(|source| Error::Serialization {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, content).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Keep timestamps usable as file name components
fn sanitize(timestamp: &str) -> String {
    timestamp
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polynomial::{LinearModel, PolynomialFeatures};
    use crate::transform::{AxisModels, PolynomialTransform};
    use crate::units::VoxelSize;
    use tempfile::TempDir;

    fn shift(dz: f64, dy: f64, dx: f64) -> PolynomialTransform {
        PolynomialTransform::new(
            PolynomialFeatures::new(1, 3).unwrap(),
            AxisModels::Volumetric {
                z: LinearModel::new(vec![dz, 1.0, 0.0, 0.0]),
                y: LinearModel::new(vec![dy, 0.0, 1.0, 0.0]),
                x: LinearModel::new(vec![dx, 0.0, 0.0, 1.0]),
            },
        )
        .unwrap()
    }

    fn record(reference: u32, corrected: u32, timestamp: &str) -> CalibrationRecord {
        CalibrationRecord {
            reference_wavelength: reference,
            corrected_wavelength: corrected,
            forward: shift(10.0, 0.1 + 0.2, -1.0 / 3.0),
            inverse: shift(-10.0, -(0.1 + 0.2), 1.0 / 3.0),
            voxel_size: VoxelSize::new(300.0, 100.0, 100.0).unwrap(),
            degree: 1,
            timestamp: timestamp.to_string(),
            report: None,
        }
    }

    #[test]
    fn test_key_format() {
        let key = CalibrationKey::new(488, 561);
        assert_eq!(key.to_string(), "561_488");
        assert_eq!(CalibrationKey::parse("561_488"), Some(key));
        assert_eq!(CalibrationKey::parse("garbage"), None);
    }

    #[test]
    fn test_missing_index_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path().join("not_created_yet"));
        assert!(!store.exists(488, 561).unwrap());
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(
            store.load(488, 561),
            Err(Error::NotFound {
                reference: 488,
                corrected: 561
            })
        ));
    }

    #[test]
    fn test_save_load_lossless() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        let rec = record(488, 561, "20260102_101500");

        let path = store.save(&rec).unwrap();
        assert!(path.ends_with("488_561_20260102_101500.json"));
        assert!(store.exists(488, 561).unwrap());

        let loaded = store.load(488, 561).unwrap();
        assert_eq!(loaded, rec);
    }

    #[test]
    fn test_key_is_not_commutative() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        store.save(&record(488, 561, "20260102_101500")).unwrap();

        assert!(store.exists(488, 561).unwrap());
        assert!(!store.exists(561, 488).unwrap());
        assert!(matches!(store.load(561, 488), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_resave_overwrites_index_entry() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());

        let first = store.save(&record(488, 561, "20260102_101500")).unwrap();
        let second = store.save(&record(488, 561, "20260103_090000")).unwrap();
        assert_ne!(first, second);
        assert!(first.exists());

        let listed = store.list().unwrap();
        assert_eq!(listed, vec![(CalibrationKey::new(488, 561), second.clone())]);
        assert_eq!(store.load(488, 561).unwrap().timestamp, "20260103_090000");
    }

    #[test]
    fn test_index_read_fresh_across_handles() {
        let dir = TempDir::new().unwrap();
        let a = CalibrationStore::new(dir.path());
        let b = CalibrationStore::new(dir.path());

        assert!(!b.exists(405, 488).unwrap());
        a.save(&record(488, 405, "t1")).unwrap();
        assert!(b.exists(488, 405).unwrap());
    }

    #[test]
    fn test_index_is_human_readable() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        let path = store.save(&record(488, 640, "20260102_101500")).unwrap();

        let content = std::fs::read_to_string(store.index_path()).unwrap();
        let index: BTreeMap<String, PathBuf> = serde_json::from_str(&content).unwrap();
        assert_eq!(index.get("640_488"), Some(&PathBuf::from("488_640_20260102_101500.json")));
        assert!(path.ends_with("488_640_20260102_101500.json"));
        assert!(content.contains('\n'));
    }

    #[test]
    fn test_index_entries_follow_the_folder() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let store = CalibrationStore::new(dir.path().join("calibrations"));
        let rec = record(488, 561, "20260102_101500");
        store.save(&rec).unwrap();

        // Same folder through another spelling
        let other = CalibrationStore::new(dir.path().join("sub").join("..").join("calibrations"));
        assert!(other.exists(488, 561).unwrap());
        assert_eq!(other.load(488, 561).unwrap(), rec);

        // Folder moved after saving
        let moved_path = dir.path().join("moved");
        std::fs::rename(store.folder(), &moved_path).unwrap();
        let moved = CalibrationStore::new(&moved_path);
        assert_eq!(moved.load(488, 561).unwrap(), rec);
        assert_eq!(moved.list().unwrap()[0].1, moved_path.join("488_561_20260102_101500.json"));
    }

    #[test]
    fn test_absolute_index_entries_still_load() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        let rec = record(488, 561, "20260102_101500");
        let path = store.save(&rec).unwrap();

        let mut index = Index::new();
        index.insert("561_488".to_string(), path.canonicalize().unwrap());
        write_json(&store.index_path(), &index).unwrap();

        assert_eq!(store.load(488, 561).unwrap(), rec);
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        store.save(&record(488, 561, "t")).unwrap();

        assert!(store.remove(488, 561).unwrap());
        assert!(!store.remove(488, 561).unwrap());
        assert!(!store.exists(488, 561).unwrap());
    }

    #[test]
    fn test_timestamp_sanitized() {
        assert_eq!(sanitize("2026-01-02 10:15:00"), "2026-01-02_10_15_00");
    }
}
