//! Background spectra for a pointing on a date or at a named tier
//!
//! Tiers are percentiles of the pointing's background over a reference year.
//! Only days on which the pointing is inside the field of regard count, and
//! days are ranked by flux at the crossing filter's pivot wavelength.

use chrono::{Datelike, NaiveDate};

use super::BackgroundError;
use crate::config::{BackgroundRequest, BackgroundTier};
use crate::instrument::{Instrument, COLLECTING_AREA_M2};
use crate::photometry::pointing::{EclipticCoordinates, Pointing, SolarAngularCoordinates};
use crate::photometry::spectrum::{mjy_sr_to_photon_rate, SampledSpectrum};
use crate::photometry::zodical::ZodicalLight;

/// Zodiacal background spectra for one pointing
pub struct BackgroundLevels {
    zodi: ZodicalLight,
    target: EclipticCoordinates,
}

impl BackgroundLevels {
    pub fn new(pointing: &Pointing) -> Self {
        Self {
            zodi: ZodicalLight::new(),
            target: pointing.ecliptic(),
        }
    }

    /// Background spectrum (MJy/sr) on `date`
    ///
    /// Fails when the pointing is outside the field of regard on that date.
    pub fn day_spectrum(&self, date: NaiveDate) -> Result<SampledSpectrum, BackgroundError> {
        let coords = SolarAngularCoordinates::on_date(&self.target, date);
        if !coords.in_field_of_regard() {
            return Err(BackgroundError::NotObservable {
                date,
                elongation_deg: coords.elongation_deg,
            });
        }
        Ok(self.zodi.nir_spectrum(&coords)?)
    }

    /// Spectra of every day in `year` on which the pointing is observable
    pub fn observable_days(
        &self,
        year: i32,
    ) -> Result<Vec<(NaiveDate, SampledSpectrum)>, BackgroundError> {
        let first = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or(BackgroundError::NeverObservable { year })?;
        let mut days = Vec::new();
        for date in first.iter_days().take_while(|d| d.year() == year) {
            let coords = SolarAngularCoordinates::on_date(&self.target, date);
            if coords.in_field_of_regard() {
                days.push((date, self.zodi.nir_spectrum(&coords)?));
            }
        }
        Ok(days)
    }

    /// Spectrum of the day at the tier's percentile, ranked at `pivot_um`
    pub fn tier_spectrum(
        &self,
        tier: BackgroundTier,
        year: i32,
        pivot_um: f64,
    ) -> Result<(NaiveDate, SampledSpectrum), BackgroundError> {
        let mut days = self.observable_days(year)?;
        if days.is_empty() {
            return Err(BackgroundError::NeverObservable { year });
        }
        days.sort_by(|a, b| a.1.at(pivot_um).total_cmp(&b.1.at(pivot_um)));
        let idx = percentile_index(days.len(), tier.percentile());
        Ok(days.swap_remove(idx))
    }

    /// Spectrum (MJy/sr) for a date or tier request
    pub fn requested_spectrum(
        &self,
        request: &BackgroundRequest,
        year: i32,
        pivot_um: f64,
    ) -> Result<(NaiveDate, SampledSpectrum), BackgroundError> {
        match request {
            BackgroundRequest::DateObs(date) => Ok((*date, self.day_spectrum(*date)?)),
            BackgroundRequest::Tier(tier) => self.tier_spectrum(*tier, year, pivot_um),
            BackgroundRequest::Rate(rate) => Err(BackgroundError::RateHasNoSpectrum(*rate)),
        }
    }
}

/// Index of the `percentile` element of `n` sorted samples
fn percentile_index(n: usize, percentile: f64) -> usize {
    let idx = (percentile / 100.0 * (n.saturating_sub(1)) as f64).round() as usize;
    idx.min(n.saturating_sub(1))
}

/// Convert a MJy/sr spectrum into photons/s/micron/pixel on an instrument
pub fn photon_rate_spectrum(mjy_sr: &SampledSpectrum, instrument: Instrument) -> SampledSpectrum {
    let scale = instrument.pixel_scale_arcsec();
    mjy_sr.map(|w, v| mjy_sr_to_photon_rate(v, w, scale, COLLECTING_AREA_M2))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Near the ecliptic at RA 90, observable for two windows a year
    fn ecliptic_pointing() -> Pointing {
        Pointing::new(90.0, 23.4393)
    }

    // North ecliptic pole, observable every day
    fn pole_pointing() -> Pointing {
        Pointing::new(270.0, 66.5607)
    }

    #[test]
    fn test_percentile_index() {
        assert_eq!(percentile_index(1, 50.0), 0);
        assert_eq!(percentile_index(11, 10.0), 1);
        assert_eq!(percentile_index(11, 50.0), 5);
        assert_eq!(percentile_index(11, 90.0), 9);
        assert_eq!(percentile_index(365, 90.0), 328);
    }

    #[test]
    fn test_pole_always_observable() {
        let levels = BackgroundLevels::new(&pole_pointing());
        let days = levels.observable_days(2021).unwrap();
        assert_eq!(days.len(), 365);
    }

    #[test]
    fn test_ecliptic_brighter_than_pole() {
        let ecliptic = BackgroundLevels::new(&ecliptic_pointing());
        let pole = BackgroundLevels::new(&pole_pointing());

        let (_, near) = ecliptic
            .tier_spectrum(BackgroundTier::Medium, 2021, 4.44)
            .unwrap();
        let (_, far) = pole.tier_spectrum(BackgroundTier::Medium, 2021, 4.44).unwrap();
        assert!(near.at(4.44) > far.at(4.44));
        assert!(near.at(1.5) > far.at(1.5));
    }

    #[test]
    fn test_tiers_ordered() {
        let levels = BackgroundLevels::new(&ecliptic_pointing());
        let pivot = 3.56;
        let flux = |tier| levels.tier_spectrum(tier, 2021, pivot).unwrap().1.at(pivot);
        let (low, medium, high) = (
            flux(BackgroundTier::Low),
            flux(BackgroundTier::Medium),
            flux(BackgroundTier::High),
        );
        assert!(low <= medium && medium <= high, "{low} {medium} {high}");
        assert!(low < high);
    }

    #[test]
    fn test_unobservable_date() {
        let levels = BackgroundLevels::new(&ecliptic_pointing());
        // Target at ecliptic longitude ~90 is close to the Sun at the June solstice
        let date = NaiveDate::from_ymd_opt(2021, 6, 21).unwrap();
        let err = levels.day_spectrum(date).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, BackgroundError::NotObservable { .. }));
        assert!(msg.contains("2021-06-21"), "{msg}");

        // A quarter year later it is at quadrature
        let date = NaiveDate::from_ymd_opt(2021, 9, 21).unwrap();
        assert!(levels.day_spectrum(date).is_ok());
    }

    #[test]
    fn test_photon_rate_spectrum_scales_with_pixel_area() {
        let flat = SampledSpectrum::new(vec![1.0, 5.0], vec![0.2, 0.2]).unwrap();
        let nircam = photon_rate_spectrum(&flat, Instrument::NirCam);
        let niriss = photon_rate_spectrum(&flat, Instrument::Niriss);
        let ratio = niriss.at(3.0) / nircam.at(3.0);
        let expected = (0.0656_f64 / 0.063).powi(2);
        assert!((ratio - expected).abs() < 1e-9);
    }
}
