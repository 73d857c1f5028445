//! Simulation parameter documents
//!
//! Parameter files are YAML documents with `Inst`, `Readout`, `Output`,
//! `simSignals`, `Telescope` and `Reffiles` sections. The typed view only
//! covers the keys the dispersion stage reads; the raw YAML tree is kept
//! alongside it so rewritten copies preserve every key untouched.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yml::Value;

use crate::config::ConfigError;
use crate::logging::RunLog;

/// `simSignals` entries that reference source catalogs
pub const CATALOG_KEYS: [&str; 7] = [
    "pointsource",
    "galaxyListFile",
    "extended",
    "movingTargetList",
    "movingTargetSersic",
    "movingTargetExtended",
    "movingTargetToTrack",
];

/// File name prefix of parameter documents rewritten into WFSS mode
pub const WFSS_REWRITE_PREFIX: &str = "tmp_update_to_wfss_mode_";

/// Observing mode declared in `Inst.mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservingMode {
    Imaging,
    Wfss,
    Pom,
}

impl ObservingMode {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_lowercase().as_str() {
            "imaging" => Ok(ObservingMode::Imaging),
            "wfss" => Ok(ObservingMode::Wfss),
            "pom" => Ok(ObservingMode::Pom),
            _ => Err(ConfigError::invalid("Inst.mode", value)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstSection {
    pub instrument: String,
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadoutSection {
    pub array_name: String,
    pub filter: String,
    pub pupil: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    pub file: String,
    pub directory: PathBuf,
    #[serde(default)]
    pub date_obs: Option<String>,
    #[serde(default)]
    pub grism_source_image: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimSignalsSection {
    #[serde(default)]
    pub bkgdrate: Value,
    #[serde(default)]
    pub use_dateobs_for_background: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelescopeSection {
    #[serde(default)]
    pub ra: f64,
    #[serde(default)]
    pub dec: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReffilesSection {
    #[serde(default)]
    pub subarray_defs: Option<String>,
}

/// Typed view of the keys read from a parameter document
#[derive(Debug, Clone, Deserialize)]
pub struct SimParams {
    #[serde(rename = "Inst")]
    pub inst: InstSection,
    #[serde(rename = "Readout")]
    pub readout: ReadoutSection,
    #[serde(rename = "Output")]
    pub output: OutputSection,
    #[serde(rename = "simSignals")]
    pub sim_signals: SimSignalsSection,
    #[serde(rename = "Telescope", default)]
    pub telescope: TelescopeSection,
    #[serde(rename = "Reffiles", default)]
    pub reffiles: ReffilesSection,
}

/// A parameter document loaded from disk
#[derive(Debug, Clone)]
pub struct ParamDocument {
    path: PathBuf,
    params: SimParams,
    raw: Value,
}

impl ParamDocument {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let yaml_err = |source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        };
        let raw: Value = serde_yml::from_str(text).map_err(yaml_err)?;
        let params: SimParams = serde_yml::from_value(raw.clone()).map_err(yaml_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            params,
            raw,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn mode(&self) -> Result<ObservingMode, ConfigError> {
        ObservingMode::parse(&self.params.inst.mode)
    }

    /// Output file name with everything from `.fits` onward removed
    pub fn output_stem(&self) -> &str {
        let file = self.params.output.file.as_str();
        match file.find(".fits") {
            Some(idx) => &file[..idx],
            None => file,
        }
    }

    /// `<Output.directory>/<stem><suffix>`
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        self.params
            .output
            .directory
            .join(format!("{}{}", self.output_stem(), suffix))
    }

    /// Catalog file references, skipping `None` entries
    pub fn catalog_files(&self) -> Vec<String> {
        let Some(signals) = self.raw.get("simSignals") else {
            return Vec::new();
        };
        CATALOG_KEYS
            .iter()
            .filter_map(|key| signals.get(*key))
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case("none"))
            .map(str::to_string)
            .collect()
    }

    /// Write a WFSS-mode copy of this document next to the original
    ///
    /// `Inst.mode` becomes `wfss` and `Output.grism_source_image` becomes
    /// true; every other key is carried over unchanged. The copy is named
    /// `tmp_update_to_wfss_mode_<basename>`.
    pub fn rewrite_as_wfss(&self) -> Result<ParamDocument, ConfigError> {
        let mut raw = self.raw.clone();
        set_key(&mut raw, &self.path, "Inst", "mode", Value::String("wfss".to_string()))?;
        set_key(&mut raw, &self.path, "Output", "grism_source_image", Value::Bool(true))?;

        let basename = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let new_path = self
            .path
            .with_file_name(format!("{WFSS_REWRITE_PREFIX}{basename}"));

        let text = serde_yml::to_string(&raw).map_err(|source| ConfigError::Yaml {
            path: new_path.clone(),
            source,
        })?;
        fs::write(&new_path, text).map_err(|source| ConfigError::Io {
            path: new_path.clone(),
            source,
        })?;

        let mut params = self.params.clone();
        params.inst.mode = "wfss".to_string();
        params.output.grism_source_image = true;
        Ok(ParamDocument {
            path: new_path,
            params,
            raw,
        })
    }
}

fn set_key(
    raw: &mut Value,
    path: &Path,
    section: &str,
    key: &str,
    value: Value,
) -> Result<(), ConfigError> {
    let mapping = raw
        .get_mut(section)
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| ConfigError::MissingField {
            path: path.to_path_buf(),
            field: section.to_string(),
        })?;
    mapping.insert(Value::String(key.to_string()), value);
    Ok(())
}

/// Index of the single WFSS-mode document
///
/// Every document must declare `imaging`, `pom` or `wfss`, and exactly one
/// must declare `wfss`.
pub fn find_wfss_document(documents: &[ParamDocument]) -> Result<usize, ConfigError> {
    let mut wfss: Option<usize> = None;
    for (idx, doc) in documents.iter().enumerate() {
        if doc.mode()? == ObservingMode::Wfss {
            if let Some(first) = wfss {
                return Err(ConfigError::MultipleWfssParamFiles {
                    first: documents[first].path.clone(),
                    second: doc.path.clone(),
                });
            }
            wfss = Some(idx);
        }
    }
    wfss.ok_or(ConfigError::NoWfssParamFile)
}

/// Parameter documents in seeding order: the WFSS document first, followed by
/// WFSS-mode rewrites of the imaging/pom documents in the order given
#[derive(Debug, Clone)]
pub struct ParamSet {
    documents: Vec<ParamDocument>,
}

impl ParamSet {
    pub fn resolve(documents: Vec<ParamDocument>, log: &RunLog) -> Result<Self, ConfigError> {
        let wfss_idx = find_wfss_document(&documents)?;

        let mut ordered = Vec::with_capacity(documents.len());
        ordered.push(documents[wfss_idx].clone());
        for (idx, doc) in documents.iter().enumerate() {
            if idx == wfss_idx {
                continue;
            }
            let rewritten = doc.rewrite_as_wfss()?;
            log.info(format_args!(
                "Rewrote {} in WFSS mode as {}",
                doc.path.display(),
                rewritten.path.display()
            ));
            ordered.push(rewritten);
        }

        Ok(Self { documents: ordered })
    }

    pub fn wfss(&self) -> &ParamDocument {
        &self.documents[0]
    }

    pub fn documents(&self) -> &[ParamDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Catalog references across all documents, first occurrence wins
    pub fn catalog_files(&self) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for name in self.documents.iter().flat_map(ParamDocument::catalog_files) {
            if !files.contains(&name) {
                files.push(name);
            }
        }
        files
    }
}
