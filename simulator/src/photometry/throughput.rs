//! Wavelength-dependent throughput curves
//!
//! Used for both the direct-imaging throughput of a crossing filter and the
//! per-order grism sensitivity. Both are electrons per incident photon,
//! tabulated against wavelength in microns and zero outside the table.

use serde::Deserialize;
use thiserror::Error;

use crate::algo::misc::{interp_or_zero, validate_table, InterpError};

#[derive(Debug, Error)]
pub enum ThroughputError {
    #[error("invalid throughput table: {0}")]
    Table(#[from] InterpError),

    #[error("throughput values must be non-negative, found {0}")]
    Negative(f64),
}

/// Tabulated throughput as it appears in configuration files
#[derive(Debug, Clone, Deserialize)]
pub struct ThroughputTable {
    pub wavelengths: Vec<f64>,
    pub values: Vec<f64>,
}

/// Validated throughput curve
#[derive(Debug, Clone)]
pub struct Throughput {
    /// Wavelengths in microns
    wavelengths: Vec<f64>,
    /// Electrons per photon at each wavelength
    values: Vec<f64>,
}

impl Throughput {
    /// Build a throughput curve
    ///
    /// # Errors
    ///
    /// Returns an error if the table is too short, has mismatched lengths,
    /// is not strictly increasing in wavelength, or holds negative values.
    pub fn from_table(wavelengths: Vec<f64>, values: Vec<f64>) -> Result<Self, ThroughputError> {
        validate_table(&wavelengths, &values)?;
        if let Some(&negative) = values.iter().find(|v| **v < 0.0) {
            return Err(ThroughputError::Negative(negative));
        }
        Ok(Self {
            wavelengths,
            values,
        })
    }

    /// Flat throughput over a wavelength range
    pub fn flat(lower_um: f64, upper_um: f64, value: f64) -> Result<Self, ThroughputError> {
        Self::from_table(vec![lower_um, upper_um], vec![value, value])
    }

    /// Throughput at a wavelength, zero outside the table
    pub fn at(&self, wavelength_um: f64) -> f64 {
        interp_or_zero(wavelength_um, &self.wavelengths, &self.values)
    }

    /// Wavelength range `(lower, upper)` covered by the table
    pub fn range(&self) -> (f64, f64) {
        (self.wavelengths[0], self.wavelengths[self.wavelengths.len() - 1])
    }

    /// Integrate `throughput(lambda) * f(lambda)` over the table
    ///
    /// Each table segment is subdivided so that curves with coarse sampling
    /// still integrate smooth functions accurately.
    pub fn integrate<F>(&self, f: F) -> f64
    where
        F: Fn(f64) -> f64,
    {
        const SUBSTEPS: usize = 8;
        let mut sum = 0.0;
        for (w, v) in self.wavelengths.windows(2).zip(self.values.windows(2)) {
            let step = (w[1] - w[0]) / SUBSTEPS as f64;
            for k in 0..SUBSTEPS {
                let x1 = w[0] + k as f64 * step;
                let x2 = x1 + step;
                let t1 = v[0] + (v[1] - v[0]) * (k as f64 / SUBSTEPS as f64);
                let t2 = v[0] + (v[1] - v[0]) * ((k + 1) as f64 / SUBSTEPS as f64);
                sum += step * (t1 * f(x1) + t2 * f(x2)) / 2.0;
            }
        }
        sum
    }
}

impl TryFrom<ThroughputTable> for Throughput {
    type Error = ThroughputError;

    fn try_from(table: ThroughputTable) -> Result<Self, Self::Error> {
        Self::from_table(table.wavelengths, table.values)
    }
}
