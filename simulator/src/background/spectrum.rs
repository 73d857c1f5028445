//! Spectrum-based background for NIRCam

use super::levels::{photon_rate_spectrum, BackgroundLevels};
use super::{BackgroundError, BackgroundModel, ResolvedBackground};
use crate::config::{BackgroundRequest, RunConfig};
use crate::instrument::{pivot_wavelength_um, Instrument};
use crate::logging::RunLog;
use crate::photometry::pointing::Pointing;
use crate::photometry::throughput::Throughput;

/// Sky spectrum for the pointing, converted to detector photon rates
#[derive(Debug, Clone)]
pub struct SpectrumBackground {
    request: BackgroundRequest,
    pointing: Pointing,
    reference_year: i32,
    crossing_filter: String,
    instrument: Instrument,
    log: RunLog,
}

impl SpectrumBackground {
    pub fn new(config: &RunConfig, log: RunLog) -> Self {
        Self {
            request: config.background,
            pointing: config.pointing,
            reference_year: config.reference_year,
            crossing_filter: config.crossing_filter.clone(),
            instrument: config.instrument,
            log,
        }
    }
}

impl BackgroundModel for SpectrumBackground {
    fn describe(&self) -> String {
        format!("{:?} sky spectrum for {}", self.request, self.instrument)
    }

    fn resolve(
        &self,
        _crossing_throughput: &Throughput,
    ) -> Result<ResolvedBackground, BackgroundError> {
        let pivot = pivot_wavelength_um(&self.crossing_filter)
            .ok_or_else(|| BackgroundError::NoPivotWavelength(self.crossing_filter.clone()))?;
        let levels = BackgroundLevels::new(&self.pointing);
        let (date, mjy_sr) = levels.requested_spectrum(&self.request, self.reference_year, pivot)?;

        self.log.info(format_args!(
            "Background spectrum from {date}: {:.4} MJy/sr at {pivot} micron",
            mjy_sr.at(pivot)
        ));
        Ok(ResolvedBackground::Spectrum(photon_rate_spectrum(
            &mjy_sr,
            self.instrument,
        )))
    }
}
