//! Run configuration and its validation
//!
//! [`RunConfig::validate`] turns caller options plus the parameter documents
//! into a fully checked configuration. Every check happens here, before any
//! seed image or dispersion work, and every failure names the offending field
//! and the value it received.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde_yml::Value;
use thiserror::Error;

use crate::instrument::{mean_gain, DispersionAxis, DispersionMode, Instrument, Module};
use crate::logging::RunLog;
use crate::params::{find_wfss_document, ParamDocument, ParamSet, SimParams};
use crate::photometry::pointing::Pointing;

/// Environment variable holding the reference data root
pub const DATA_ROOT_ENV: &str = "WFSS_SIM_DATA";

/// Year whose observable days define the named background tiers when the
/// parameters carry no observation date
pub const DEFAULT_REFERENCE_YEAR: i32 = 2021;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("reference data root is not set: pass --data-root or set WFSS_SIM_DATA")]
    MissingDataRoot,

    #[error("reference data root {0} is not an existing directory")]
    DataRootNotFound(PathBuf),

    #[error("override dark file {0} does not exist")]
    DarkNotFound(PathBuf),

    #[error("no parameter files given")]
    NoParamFiles,

    #[error("no WFSS mode parameter file found; exactly one must set Inst.mode to wfss")]
    NoWfssParamFile,

    #[error("only one parameter file may be in WFSS mode, found {first} and {second}")]
    MultipleWfssParamFiles { first: PathBuf, second: PathBuf },

    #[error("an SED file can only be combined with a single parameter file, got {0}")]
    SedWithMultipleParamFiles(usize),

    #[error("bkgdrate {rate} is a numeric rate, which {instrument} does not support; use low, medium or high")]
    NumericBackgroundRate { instrument: Instrument, rate: f64 },

    #[error("subarray bounds {bounds} are outside the {rows}x{cols} frame")]
    SubarrayOutOfBounds {
        bounds: SubarrayBounds,
        rows: usize,
        cols: usize,
    },

    #[error("aperture {aperture} is not listed in {table}")]
    UnknownAperture { aperture: String, table: PathBuf },

    #[error("missing {field} in {path}")]
    MissingField { path: PathBuf, field: String },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, value: impl ToString) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            value: value.to_string(),
        }
    }
}

/// Validated root of the reference data tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRoot(PathBuf);

impl DataRoot {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ConfigError::MissingDataRoot);
        }
        if !path.is_dir() {
            return Err(ConfigError::DataRootNotFound(path));
        }
        Ok(Self(path))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Directory holding grism configurations for an instrument
    pub fn grism_dir(&self, instrument: Instrument) -> PathBuf {
        instrument.grism_config_dir(&self.0)
    }

    /// Default subarray definition table for an instrument
    pub fn subarray_table(&self, instrument: Instrument) -> PathBuf {
        self.0
            .join(instrument.name())
            .join("config")
            .join(format!("{}_subarray_definitions.list", instrument.name()))
    }
}

/// Named background level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundTier {
    Low,
    Medium,
    High,
}

impl BackgroundTier {
    /// Case-insensitive tier name lookup
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(BackgroundTier::Low),
            "medium" => Some(BackgroundTier::Medium),
            "high" => Some(BackgroundTier::High),
            _ => None,
        }
    }

    /// Percentile of the reference-year distribution this tier selects
    pub fn percentile(&self) -> f64 {
        match self {
            BackgroundTier::Low => 10.0,
            BackgroundTier::Medium => 50.0,
            BackgroundTier::High => 90.0,
        }
    }
}

impl fmt::Display for BackgroundTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackgroundTier::Low => "low",
            BackgroundTier::Medium => "medium",
            BackgroundTier::High => "high",
        };
        write!(f, "{name}")
    }
}

/// Requested background level
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackgroundRequest {
    /// Derive the level from the observation date and pointing
    DateObs(NaiveDate),
    /// Percentile of the pointing's background over the reference year
    Tier(BackgroundTier),
    /// Direct-image rate in ADU/s/pixel
    Rate(f64),
}

impl BackgroundRequest {
    /// Interpret `simSignals.bkgdrate`, `simSignals.use_dateobs_for_background`
    /// and `Output.date_obs` for an instrument
    pub fn from_params(params: &SimParams, instrument: Instrument) -> Result<Self, ConfigError> {
        if params.sim_signals.use_dateobs_for_background {
            let date = params
                .output
                .date_obs
                .as_deref()
                .ok_or_else(|| ConfigError::invalid("Output.date_obs", "missing"))?;
            return parse_date(date).map(BackgroundRequest::DateObs);
        }

        match &params.sim_signals.bkgdrate {
            Value::String(name) => BackgroundTier::parse(name)
                .map(BackgroundRequest::Tier)
                .ok_or_else(|| ConfigError::invalid("bkgdrate", name)),
            Value::Number(number) => {
                let rate = number
                    .as_f64()
                    .filter(|rate| rate.is_finite() && *rate >= 0.0)
                    .ok_or_else(|| ConfigError::invalid("bkgdrate", number))?;
                match instrument {
                    Instrument::Niriss => Ok(BackgroundRequest::Rate(rate)),
                    Instrument::NirCam => {
                        Err(ConfigError::NumericBackgroundRate { instrument, rate })
                    }
                }
            }
            other => Err(ConfigError::invalid("bkgdrate", format!("{other:?}"))),
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, ConfigError> {
    let date_part = value.trim().get(0..10).unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| ConfigError::invalid("Output.date_obs", value))
}

/// Inclusive pixel rectangle of a subarray within the full frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubarrayBounds {
    pub xstart: usize,
    pub ystart: usize,
    pub xend: usize,
    pub yend: usize,
}

impl SubarrayBounds {
    /// Bounds covering a whole frame of the given shape
    pub fn full_frame(rows: usize, cols: usize) -> Self {
        Self {
            xstart: 0,
            ystart: 0,
            xend: cols.saturating_sub(1),
            yend: rows.saturating_sub(1),
        }
    }

    /// Shape `(rows, cols)` of the cropped image
    pub fn shape(&self) -> (usize, usize) {
        (
            self.yend.saturating_sub(self.ystart) + 1,
            self.xend.saturating_sub(self.xstart) + 1,
        )
    }

    /// Check every bound lies within a `rows` x `cols` frame
    pub fn validate(&self, rows: usize, cols: usize) -> Result<(), ConfigError> {
        let inside = self.xstart < cols
            && self.xend < cols
            && self.ystart < rows
            && self.yend < rows
            && self.xstart <= self.xend
            && self.ystart <= self.yend;
        if inside {
            Ok(())
        } else {
            Err(ConfigError::SubarrayOutOfBounds {
                bounds: *self,
                rows,
                cols,
            })
        }
    }
}

impl fmt::Display for SubarrayBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(xstart={}, ystart={}, xend={}, yend={})",
            self.xstart, self.ystart, self.xend, self.yend
        )
    }
}

/// Subarray definitions keyed by aperture name
///
/// Whitespace-separated text; `#` lines are comments and the first other line
/// is a header naming at least `AperName xstart ystart xend yend`.
#[derive(Debug, Clone)]
pub struct SubarrayTable {
    path: PathBuf,
    rows: Vec<(String, SubarrayBounds)>,
}

impl SubarrayTable {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let parse_err = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));
        let header: Vec<&str> = lines
            .next()
            .ok_or_else(|| parse_err("empty subarray table".to_string()))?
            .split_whitespace()
            .collect();
        let column = |name: &str| {
            header
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or_else(|| parse_err(format!("header has no {name} column")))
        };
        let name_col = column("AperName")?;
        let cols = [
            column("xstart")?,
            column("ystart")?,
            column("xend")?,
            column("yend")?,
        ];

        let mut rows = Vec::new();
        for line in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let field = |idx: usize| {
                fields
                    .get(idx)
                    .ok_or_else(|| parse_err(format!("short row: {line}")))
            };
            let number = |idx: usize| -> Result<usize, ConfigError> {
                let text = field(idx)?;
                text.parse::<usize>()
                    .map_err(|_| parse_err(format!("bad bound {text} in row: {line}")))
            };
            let bounds = SubarrayBounds {
                xstart: number(cols[0])?,
                ystart: number(cols[1])?,
                xend: number(cols[2])?,
                yend: number(cols[3])?,
            };
            rows.push((field(name_col)?.to_string(), bounds));
        }

        Ok(Self {
            path: path.to_path_buf(),
            rows,
        })
    }

    pub fn lookup(&self, aperture: &str) -> Result<SubarrayBounds, ConfigError> {
        self.rows
            .iter()
            .find(|(name, _)| name == aperture)
            .map(|(_, bounds)| *bounds)
            .ok_or_else(|| ConfigError::UnknownAperture {
                aperture: aperture.to_string(),
                table: self.path.clone(),
            })
    }
}

/// Caller-facing options, before validation
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub param_files: Vec<PathBuf>,
    pub data_root: PathBuf,
    pub sed_file: Option<PathBuf>,
    pub sed_normalizing_column: Option<String>,
    pub final_sed_file: Option<PathBuf>,
    pub save_dispersed_seed: bool,
    pub dispersed_seed_file: Option<PathBuf>,
    pub source_stamps_file: Option<PathBuf>,
    pub extrapolate_sed: bool,
    pub override_dark: Option<Vec<PathBuf>>,
    pub create_continuum_seds: bool,
    pub orders: Option<Vec<String>>,
}

impl SimulationOptions {
    pub fn new(param_files: Vec<PathBuf>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            param_files,
            data_root: data_root.into(),
            sed_file: None,
            sed_normalizing_column: None,
            final_sed_file: None,
            save_dispersed_seed: true,
            dispersed_seed_file: None,
            source_stamps_file: None,
            extrapolate_sed: true,
            override_dark: None,
            create_continuum_seds: true,
            orders: None,
        }
    }
}

/// Files written by the run
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub dispersed_seed: Option<PathBuf>,
    pub background_image: PathBuf,
    pub source_stamps: Option<PathBuf>,
}

/// Fully validated run configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub instrument: Instrument,
    pub module: Module,
    pub detector: String,
    pub crossing_filter: String,
    pub dispersion: DispersionMode,
    pub gain: f64,
    pub aperture: String,
    pub background: BackgroundRequest,
    pub reference_year: i32,
    pub pointing: Pointing,
    pub data_root: DataRoot,
    pub params: ParamSet,
    pub sed_file: Option<PathBuf>,
    pub sed_normalizing_column: Option<String>,
    pub final_sed_file: Option<PathBuf>,
    pub extrapolate_sed: bool,
    pub create_continuum_seds: bool,
    pub override_dark: Option<Vec<PathBuf>>,
    pub orders: Option<Vec<String>>,
    pub outputs: OutputPaths,
}

impl RunConfig {
    pub fn validate(options: SimulationOptions, log: &RunLog) -> Result<Self, ConfigError> {
        let n_params = options.param_files.len();
        if n_params == 0 {
            return Err(ConfigError::NoParamFiles);
        }
        if options.sed_file.is_some() && n_params > 1 {
            return Err(ConfigError::SedWithMultipleParamFiles(n_params));
        }

        let data_root = DataRoot::new(options.data_root)?;

        if let Some(darks) = &options.override_dark {
            if let Some(missing) = darks.iter().find(|path| !path.is_file()) {
                return Err(ConfigError::DarkNotFound(missing.clone()));
            }
        }

        let documents = options
            .param_files
            .iter()
            .map(ParamDocument::load)
            .collect::<Result<Vec<_>, _>>()?;

        // Instrument, module and detector come from the first document given
        let first = documents[0].params();
        let instrument = Instrument::parse(&first.inst.instrument)?;
        let module = Module::from_aperture(instrument, &first.readout.array_name)?;
        let detector = match instrument {
            Instrument::NirCam => first
                .readout
                .array_name
                .get(0..5)
                .ok_or_else(|| ConfigError::invalid("array_name", &first.readout.array_name))?
                .to_string(),
            Instrument::Niriss => "NIS".to_string(),
        };
        let gain = mean_gain(instrument, module)?;

        let wfss_idx = find_wfss_document(&documents)?;
        let wfss = documents[wfss_idx].params().clone();
        let (crossing_filter, direction_source) = match instrument {
            Instrument::NirCam => (&wfss.readout.filter, &wfss.readout.pupil),
            Instrument::Niriss => (&wfss.readout.pupil, &wfss.readout.filter),
        };
        let crossing_filter = crossing_filter.to_uppercase();
        instrument.validate_crossing_filter(&crossing_filter)?;
        let direction = direction_source
            .chars()
            .last()
            .map(|c| c.to_ascii_uppercase().to_string())
            .unwrap_or_default();
        let axis = DispersionAxis::parse(&direction)?;

        let background = BackgroundRequest::from_params(&wfss, instrument)?;
        let reference_year = wfss
            .output
            .date_obs
            .as_deref()
            .and_then(|date| parse_date(date).ok())
            .map(|date| date.year())
            .unwrap_or(DEFAULT_REFERENCE_YEAR);
        let pointing = Pointing::new(wfss.telescope.ra, wfss.telescope.dec);

        let create_continuum_seds =
            n_params == 1 || options.sed_file.is_some() || options.create_continuum_seds;

        let params = ParamSet::resolve(documents, log)?;
        let wfss_doc = params.wfss();
        let dispersed_seed = options.save_dispersed_seed.then(|| {
            options
                .dispersed_seed_file
                .clone()
                .unwrap_or_else(|| wfss_doc.output_path("_dispersed_seed_image.fits"))
        });
        let outputs = OutputPaths {
            dispersed_seed,
            background_image: wfss_doc.output_path("_background_image.fits"),
            source_stamps: options.source_stamps_file,
        };

        let config = Self {
            instrument,
            module,
            detector,
            crossing_filter,
            dispersion: DispersionMode {
                instrument,
                module,
                axis,
            },
            gain,
            aperture: wfss.readout.array_name.clone(),
            background,
            reference_year,
            pointing,
            data_root,
            params,
            sed_file: options.sed_file,
            sed_normalizing_column: options.sed_normalizing_column,
            final_sed_file: options.final_sed_file,
            extrapolate_sed: options.extrapolate_sed,
            create_continuum_seds,
            override_dark: options.override_dark,
            orders: options.orders,
            outputs,
        };
        log.info(format_args!(
            "Validated {} {} detector {} crossing filter {} mode {}",
            config.instrument,
            config.aperture,
            config.detector,
            config.crossing_filter,
            config.dispersion
        ));
        Ok(config)
    }

    /// Subarray definition table named by the WFSS document, or the default
    /// table under the data root
    pub fn subarray_table_path(&self) -> PathBuf {
        match self.params.wfss().params().reffiles.subarray_defs.as_deref() {
            Some(path) if !path.eq_ignore_ascii_case("config") => PathBuf::from(path),
            _ => self.data_root.subarray_table(self.instrument),
        }
    }

    /// Parameter documents fed to the seed generator
    ///
    /// With continuum SED synthesis on, only the WFSS document is seeded.
    pub fn seeding_documents(&self) -> &[ParamDocument] {
        if self.create_continuum_seds {
            &self.params.documents()[..1]
        } else {
            self.params.documents()
        }
    }
}
