//! Per-source spectral energy distributions
//!
//! JSON layout:
//!
//! ```json
//! {"sources": [{"id": 1, "wavelengths": [1.0, 2.0], "fluxes": [3.0e-18, 2.0e-18]}]}
//! ```
//!
//! Wavelengths are microns and fluxes f_lambda in arbitrary units. Only the
//! shape matters: every source is renormalized to its direct-image rate.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::DisperserError;
use crate::photometry::spectrum::SampledSpectrum;

#[derive(Debug, Serialize, Deserialize)]
struct SedFile {
    sources: Vec<SedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SedEntry {
    id: i32,
    wavelengths: Vec<f64>,
    fluxes: Vec<f64>,
}

/// SEDs keyed by segmentation id
#[derive(Debug, Clone, Default)]
pub struct SedCatalog {
    seds: BTreeMap<i32, SampledSpectrum>,
}

impl SedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DisperserError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| DisperserError::SedIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn from_json(text: &str) -> Result<Self, DisperserError> {
        Self::parse(text, Path::new("<inline>"))
    }

    fn parse(text: &str, path: &Path) -> Result<Self, DisperserError> {
        let file: SedFile =
            serde_json::from_str(text).map_err(|source| DisperserError::SedJson {
                path: path.to_path_buf(),
                source,
            })?;
        let mut catalog = Self::new();
        for entry in file.sources {
            let sed = SampledSpectrum::new(entry.wavelengths, entry.fluxes)
                .map_err(|source| DisperserError::Sed { id: entry.id, source })?;
            catalog.insert(entry.id, sed);
        }
        Ok(catalog)
    }

    /// Write the catalog in the same JSON layout it is read from
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DisperserError> {
        let path = path.as_ref();
        let file = SedFile {
            sources: self
                .seds
                .iter()
                .map(|(id, sed)| SedEntry {
                    id: *id,
                    wavelengths: sed.wavelengths().to_vec(),
                    fluxes: sed.values().to_vec(),
                })
                .collect(),
        };
        let file_handle = File::create(path).map_err(|source| DisperserError::SedIo {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file_handle);
        serde_json::to_writer_pretty(&mut writer, &file).map_err(|source| {
            DisperserError::SedJson {
                path: path.to_path_buf(),
                source,
            }
        })?;
        writer.flush().map_err(|source| DisperserError::SedIo {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn insert(&mut self, id: i32, sed: SampledSpectrum) {
        self.seds.insert(id, sed);
    }

    pub fn get(&self, id: i32) -> Option<&SampledSpectrum> {
        self.seds.get(&id)
    }

    pub fn len(&self) -> usize {
        self.seds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CATALOG: &str = r#"{"sources": [
        {"id": 1, "wavelengths": [1.0, 2.0, 3.0], "fluxes": [3.0, 2.0, 1.0]},
        {"id": 4, "wavelengths": [0.5, 5.0], "fluxes": [1.0, 1.0]}
    ]}"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = SedCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(1).unwrap().at(1.5), 2.5);
        assert!(catalog.get(2).is_none());
    }

    #[test]
    fn test_unsorted_sed_rejected() {
        let text = r#"{"sources": [{"id": 9, "wavelengths": [2.0, 1.0], "fluxes": [1.0, 1.0]}]}"#;
        let err = SedCatalog::from_json(text).unwrap_err();
        assert!(matches!(err, DisperserError::Sed { id: 9, .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seds.json");
        let catalog = SedCatalog::from_json(CATALOG).unwrap();
        catalog.save(&path).unwrap();

        let reloaded = SedCatalog::load(&path).unwrap();
        assert_eq!(reloaded.get(4), catalog.get(4));
    }

    #[test]
    fn test_missing_file() {
        let err = SedCatalog::load("/nonexistent/seds.json").unwrap_err();
        assert!(matches!(err, DisperserError::SedIo { .. }));
    }
}
