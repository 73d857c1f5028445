//! Conversion of the composite seed to the instrument's native units

use std::fmt;

use ndarray::Array2;

use crate::config::{ConfigError, SubarrayBounds};
use crate::disperser::SourceClass;
use crate::instrument::{mean_gain, Instrument, Module};

/// Units of a seed image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedUnits {
    ElectronsPerSecond,
    AduPerSecond,
}

impl fmt::Display for SeedUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedUnits::ElectronsPerSecond => write!(f, "e/sec"),
            SeedUnits::AduPerSecond => write!(f, "ADU/sec"),
        }
    }
}

/// Header-like record travelling with the seed image
#[derive(Debug, Clone, PartialEq)]
pub struct SeedMetadata {
    pub units: SeedUnits,
    pub instrument: Instrument,
    pub module: Module,
    pub aperture: String,
    /// Full-frame (rows, cols) before cropping
    pub frame: (usize, usize),
    pub subarray: SubarrayBounds,
    /// Populated classes, in dispersal order
    pub classes: Vec<SourceClass>,
}

/// Divide a seed in e-/s by the mean gain, leaving ADU/s
///
/// Every call divides again; the pipeline calls it once.
pub fn to_native_units(
    image: &mut Array2<f64>,
    metadata: &mut SeedMetadata,
) -> Result<f64, ConfigError> {
    let gain = mean_gain(metadata.instrument, metadata.module)?;
    image.mapv_inplace(|v| v / gain);
    metadata.units = SeedUnits::AduPerSecond;
    Ok(gain)
}
