//! Instrument identities and fixed instrument constants
//!
//! Everything here is a lookup table: which crossing filters each grism
//! instrument accepts, how the dispersion mode is named on disk, detector
//! geometry, and the mean gains used to convert e-/s into ADU/s.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::ConfigError;

/// NIRCam long-wave crossing filters usable with the grisms
pub const NIRCAM_GRISM_CROSSING_FILTERS: [&str; 14] = [
    "F322W2", "F277W", "F356W", "F444W", "F250M", "F300M", "F335M", "F360M", "F410M", "F430M",
    "F323N", "F405N", "F466N", "F470N",
];

/// NIRISS crossing filters usable with the GR150 grisms
pub const NIRISS_GRISM_CROSSING_FILTERS: [&str; 6] =
    ["F200W", "F150W", "F140M", "F158M", "F115W", "F090W"];

/// Apertures that read out the whole detector
pub const FULL_FRAME_APERTURES: [&str; 3] = ["NRCA5_FULL", "NRCB5_FULL", "NIS_CEN"];

/// Edge length of the full detector frame in pixels
pub const FULL_FRAME_SIZE: usize = 2048;

/// Width of the reference pixel border on each detector edge
pub const REFERENCE_PIXEL_WIDTH: usize = 4;

/// Fraction of light transmitted when the NIRISS grism is in the beam
pub const NIRISS_GRISM_THROUGHPUT_FACTOR: f64 = 0.8;

/// Telescope collecting area in square meters
pub const COLLECTING_AREA_M2: f64 = 25.4;

/// Mean gain (e-/ADU) of the NIRCam long-wave detector in module A
pub const NIRCAM_LWA_GAIN: f64 = 2.1923546;

/// Mean gain (e-/ADU) of the NIRCam long-wave detector in module B
pub const NIRCAM_LWB_GAIN: f64 = 2.1811386;

/// Mean gain (e-/ADU) of the NIRISS detector
pub const NIRISS_GAIN: f64 = 1.611;

/// Supported grism instruments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instrument {
    NirCam,
    Niriss,
}

impl Instrument {
    /// Parse an instrument name (case-insensitive)
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_lowercase().as_str() {
            "nircam" => Ok(Instrument::NirCam),
            "niriss" => Ok(Instrument::Niriss),
            _ => Err(ConfigError::invalid("instrument", value)),
        }
    }

    /// Lower-case name as used in directory names
    pub fn name(&self) -> &'static str {
        match self {
            Instrument::NirCam => "nircam",
            Instrument::Niriss => "niriss",
        }
    }

    /// Crossing filters that may be paired with this instrument's grisms
    pub fn crossing_filters(&self) -> &'static [&'static str] {
        match self {
            Instrument::NirCam => &NIRCAM_GRISM_CROSSING_FILTERS,
            Instrument::Niriss => &NIRISS_GRISM_CROSSING_FILTERS,
        }
    }

    /// Check that `filter` is in this instrument's crossing filter allow-list
    pub fn validate_crossing_filter(&self, filter: &str) -> Result<(), ConfigError> {
        if self.crossing_filters().contains(&filter) {
            Ok(())
        } else {
            Err(ConfigError::invalid("crossing_filter", filter))
        }
    }

    /// Detector pixel scale in arcseconds (long-wave channel for NIRCam)
    pub fn pixel_scale_arcsec(&self) -> f64 {
        match self {
            Instrument::NirCam => 0.063,
            Instrument::Niriss => 0.0656,
        }
    }

    /// Directory holding grism trace configurations and background references
    pub fn grism_config_dir(&self, data_root: &Path) -> PathBuf {
        data_root
            .join(self.name())
            .join(format!("GRISM_{}", self.name().to_uppercase()))
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Detector module (NIRCam) or the single NIRISS channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    A,
    B,
    /// NIRISS has no modules
    N,
}

impl Module {
    /// Determine the module for an instrument from the aperture name
    ///
    /// NIRCam apertures carry the module letter in their 4th character
    /// (`NRCA5_FULL` -> A). NIRISS always uses `N`.
    pub fn from_aperture(instrument: Instrument, aperture: &str) -> Result<Self, ConfigError> {
        match instrument {
            Instrument::Niriss => Ok(Module::N),
            Instrument::NirCam => match aperture.chars().nth(3) {
                Some('A') => Ok(Module::A),
                Some('B') => Ok(Module::B),
                Some(other) => Err(ConfigError::invalid("module", other)),
                None => Err(ConfigError::invalid("module", aperture)),
            },
        }
    }

    pub fn letter(&self) -> char {
        match self {
            Module::A => 'A',
            Module::B => 'B',
            Module::N => 'N',
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Detector axis along which the grism disperses light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispersionAxis {
    /// Along rows (`R`)
    Row,
    /// Along columns (`C`)
    Column,
}

impl DispersionAxis {
    /// Parse the single-letter dispersion direction
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "R" => Ok(DispersionAxis::Row),
            "C" => Ok(DispersionAxis::Column),
            _ => Err(ConfigError::invalid("dispersion_direction", value)),
        }
    }

    pub fn letter(&self) -> char {
        match self {
            DispersionAxis::Row => 'R',
            DispersionAxis::Column => 'C',
        }
    }
}

/// Instrument, module and axis combination that keys trace configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispersionMode {
    pub instrument: Instrument,
    pub module: Module,
    pub axis: DispersionAxis,
}

impl DispersionMode {
    /// On-disk name of the mode: `modA_R` for NIRCam, `GR150C` for NIRISS
    pub fn name(&self) -> String {
        match self.instrument {
            Instrument::NirCam => format!("mod{}_{}", self.module, self.axis.letter()),
            Instrument::Niriss => format!("GR150{}", self.axis.letter()),
        }
    }
}

impl fmt::Display for DispersionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Mean gain in e-/ADU for an instrument/module pair
///
/// The grisms only exist on the NIRCam long-wave channel, so NIRCam gains are
/// the long-wave values.
pub fn mean_gain(instrument: Instrument, module: Module) -> Result<f64, ConfigError> {
    match (instrument, module) {
        (Instrument::NirCam, Module::A) => Ok(NIRCAM_LWA_GAIN),
        (Instrument::NirCam, Module::B) => Ok(NIRCAM_LWB_GAIN),
        (Instrument::Niriss, _) => Ok(NIRISS_GAIN),
        (Instrument::NirCam, Module::N) => Err(ConfigError::invalid("module", module)),
    }
}

/// Pivot wavelength in microns encoded in a filter name (`F444W` -> 4.44)
pub fn pivot_wavelength_um(filter: &str) -> Option<f64> {
    let digits = filter.strip_prefix('F').or_else(|| filter.strip_prefix('f'))?;
    let digits = digits.get(0..3)?;
    digits.parse::<u32>().ok().map(|v| v as f64 / 100.0)
}

/// Whether the aperture reads out the full detector
pub fn is_full_frame(aperture: &str) -> bool {
    FULL_FRAME_APERTURES.contains(&aperture)
}
