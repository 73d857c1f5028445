//! Background provider
//!
//! The background is produced one of two ways depending on the instrument,
//! chosen once when the run configuration is validated:
//!
//! - [`SpectrumBackground`] (NIRCam): a 1D sky spectrum handed to the
//!   disperser, which integrates it through every trace order.
//! - [`ReferenceImageBackground`] (NIRISS): a canned full-frame background
//!   image rescaled so its sigma-clipped mean matches the requested level.

pub mod levels;
pub mod reference_image;
pub mod spectrum;

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use ndarray::Array2;
use shared::fits::FitsError;
use thiserror::Error;

use crate::config::RunConfig;
use crate::instrument::Instrument;
use crate::logging::RunLog;
use crate::photometry::spectrum::{SampledSpectrum, SpectrumError};
use crate::photometry::throughput::Throughput;
use crate::photometry::zodical::ZodicalError;

pub use levels::BackgroundLevels;
pub use reference_image::{write_background_image, ReferenceImageBackground};
pub use spectrum::SpectrumBackground;

#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("pointing is outside the field of regard on {date}: solar elongation {elongation_deg:.1} deg")]
    NotObservable {
        date: NaiveDate,
        elongation_deg: f64,
    },

    #[error("pointing is never inside the field of regard during {year}")]
    NeverObservable { year: i32 },

    #[error("a numeric background rate ({0}) has no background spectrum")]
    RateHasNoSpectrum(f64),

    #[error("crossing filter {0} does not encode a pivot wavelength")]
    NoPivotWavelength(String),

    #[error("reference background {0} has no finite pixels")]
    EmptyReference(PathBuf),

    #[error("reference background {0} has a zero sigma-clipped mean")]
    ZeroReferenceMean(PathBuf),

    #[error(transparent)]
    Zodical(#[from] ZodicalError),

    #[error(transparent)]
    Spectrum(#[from] SpectrumError),

    #[error(transparent)]
    Fits(#[from] FitsError),
}

/// A background ready to be composited
#[derive(Debug, Clone)]
pub enum ResolvedBackground {
    /// Uniform sky in photons/s/micron/pixel, to be dispersed through every
    /// selected trace order
    Spectrum(SampledSpectrum),
    /// Full-frame image in e-/s, added as is
    Image(Array2<f64>),
}

/// Produces the background for a run
pub trait BackgroundModel: fmt::Debug {
    /// Short description for logs
    fn describe(&self) -> String;

    /// Compute the background
    ///
    /// # Arguments
    /// * `crossing_throughput` - Direct-imaging throughput of the crossing filter
    fn resolve(&self, crossing_throughput: &Throughput)
        -> Result<ResolvedBackground, BackgroundError>;
}

/// Pick the background model for a validated configuration
pub fn select_model(config: &RunConfig, log: &RunLog) -> Box<dyn BackgroundModel> {
    let log = log.component("background");
    match config.instrument {
        Instrument::NirCam => Box::new(SpectrumBackground::new(config, log)),
        Instrument::Niriss => Box::new(ReferenceImageBackground::new(config, log)),
    }
}
