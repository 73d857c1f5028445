//! Sampled spectra and radiometric conversions
//!
//! Spectra are tabulated against wavelength in microns. Flux units depend on
//! the producer: sky backgrounds are MJy/sr, source SEDs are f_lambda in
//! arbitrary units, and detector-ready spectra are photons/s/micron/pixel.

use thiserror::Error;

use crate::algo::misc::{interp_clamped, interp_or_zero, trapezoid, validate_table, InterpError};

/// Constants in CGS units
pub struct CGS {}

impl CGS {
    /// Planck's constant
    /// Units: 6.62607015e-27 erg⋅s (erg-seconds in CGS)
    pub const PLANCK_CONSTANT: f64 = 6.62607015e-27;

    /// Speed of light in vacuum
    /// Units: 2.99792458e10 cm/s (centimeters per second in CGS)
    pub const SPEED_OF_LIGHT: f64 = 2.99792458e10;

    /// Boltzmann constant
    /// Units: 1.380649e-16 erg/K
    pub const BOLTZMANN_CONSTANT: f64 = 1.380649e-16;

    /// 1 MJy in CGS units
    /// Units: 1e-17 erg s⁻¹ cm⁻² Hz⁻¹
    pub const MEGAJANSKY_IN_CGS: f64 = 1e-17;

    /// AB magnitude system zero-point flux density
    /// Units: 3631e-23 erg s⁻¹ cm⁻² Hz⁻¹
    pub const AB_ZERO_POINT_FLUX_DENSITY: f64 = 3631e-23;
}

/// Arcseconds per radian
pub const ARCSEC_PER_RADIAN: f64 = 206_264.806_247_096_36;

/// Microns per centimeter
const MICRONS_PER_CM: f64 = 1e4;

#[derive(Debug, Error)]
pub enum SpectrumError {
    #[error("invalid spectrum table: {0}")]
    Table(#[from] InterpError),
}

/// A spectrum tabulated at strictly increasing wavelengths
#[derive(Debug, Clone, PartialEq)]
pub struct SampledSpectrum {
    wavelengths_um: Vec<f64>,
    values: Vec<f64>,
}

impl SampledSpectrum {
    /// Build a spectrum, rejecting tables that are not strictly increasing in
    /// wavelength or contain non-finite values
    pub fn new(wavelengths_um: Vec<f64>, values: Vec<f64>) -> Result<Self, SpectrumError> {
        validate_table(&wavelengths_um, &values)?;
        Ok(Self {
            wavelengths_um,
            values,
        })
    }

    /// Evaluate `f` on a wavelength grid
    pub fn from_fn<F>(wavelengths_um: Vec<f64>, f: F) -> Result<Self, SpectrumError>
    where
        F: Fn(f64) -> f64,
    {
        let values = wavelengths_um.iter().map(|&w| f(w)).collect();
        Self::new(wavelengths_um, values)
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths_um
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn min_wavelength(&self) -> f64 {
        self.wavelengths_um[0]
    }

    pub fn max_wavelength(&self) -> f64 {
        self.wavelengths_um[self.wavelengths_um.len() - 1]
    }

    /// Value at a wavelength, zero outside the tabulated range
    pub fn at(&self, wavelength_um: f64) -> f64 {
        interp_or_zero(wavelength_um, &self.wavelengths_um, &self.values)
    }

    /// Value at a wavelength, holding the end values outside the range
    pub fn at_clamped(&self, wavelength_um: f64) -> f64 {
        interp_clamped(wavelength_um, &self.wavelengths_um, &self.values)
    }

    /// Evaluate with or without end-value extrapolation
    pub fn sample(&self, wavelength_um: f64, extrapolate: bool) -> f64 {
        if extrapolate {
            self.at_clamped(wavelength_um)
        } else {
            self.at(wavelength_um)
        }
    }

    /// Apply `f(wavelength, value)` to every sample
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f64, f64) -> f64,
    {
        let values = self
            .wavelengths_um
            .iter()
            .zip(&self.values)
            .map(|(&w, &v)| f(w, v))
            .collect();
        Self {
            wavelengths_um: self.wavelengths_um.clone(),
            values,
        }
    }

    /// Trapezoidal integral over the tabulated range
    pub fn integrate(&self) -> f64 {
        trapezoid(&self.wavelengths_um, &self.values)
    }
}

/// Uniform wavelength grid from `start` to `end` inclusive
pub fn wavelength_grid(start_um: f64, end_um: f64, step_um: f64) -> Vec<f64> {
    let n = ((end_um - start_um) / step_um).round() as usize + 1;
    (0..n).map(|i| start_um + i as f64 * step_um).collect()
}

/// Blackbody specific intensity B_nu in CGS units (erg s⁻¹ cm⁻² Hz⁻¹ sr⁻¹)
pub fn planck_nu(wavelength_um: f64, temperature_k: f64) -> f64 {
    let wavelength_cm = wavelength_um / MICRONS_PER_CM;
    let nu = CGS::SPEED_OF_LIGHT / wavelength_cm;
    let x = CGS::PLANCK_CONSTANT * nu / (CGS::BOLTZMANN_CONSTANT * temperature_k);
    2.0 * CGS::PLANCK_CONSTANT * nu.powi(3) / (CGS::SPEED_OF_LIGHT * CGS::SPEED_OF_LIGHT)
        / x.exp_m1()
}

/// Solid angle of a square pixel in steradians
pub fn pixel_solid_angle(pixel_scale_arcsec: f64) -> f64 {
    let side = pixel_scale_arcsec / ARCSEC_PER_RADIAN;
    side * side
}

/// Convert a surface brightness in MJy/sr into photons/s/micron/pixel
///
/// `F_nu * 1e-17 * Omega_pix * A_tel / (h * lambda_cm) * 1e-4`
///
/// # Arguments
/// * `mjy_per_sr` - Surface brightness
/// * `wavelength_um` - Wavelength in microns
/// * `pixel_scale_arcsec` - Detector pixel scale
/// * `area_m2` - Telescope collecting area
pub fn mjy_sr_to_photon_rate(
    mjy_per_sr: f64,
    wavelength_um: f64,
    pixel_scale_arcsec: f64,
    area_m2: f64,
) -> f64 {
    let wavelength_cm = wavelength_um / MICRONS_PER_CM;
    let area_cm2 = area_m2 * 1e4;
    mjy_per_sr * CGS::MEGAJANSKY_IN_CGS * pixel_solid_angle(pixel_scale_arcsec) * area_cm2
        / (CGS::PLANCK_CONSTANT * wavelength_cm)
        / MICRONS_PER_CM
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constructor_rejects_bad_tables() {
        assert!(SampledSpectrum::new(vec![1.0, 2.0], vec![1.0, 2.0]).is_ok());
        assert!(SampledSpectrum::new(vec![2.0, 1.0], vec![1.0, 2.0]).is_err());
        assert!(SampledSpectrum::new(vec![1.0, 1.0], vec![1.0, 2.0]).is_err());
        assert!(SampledSpectrum::new(vec![1.0, 2.0], vec![1.0]).is_err());
    }

    #[test]
    fn test_sampling_modes() {
        let spectrum = SampledSpectrum::new(vec![1.0, 2.0, 3.0], vec![2.0, 4.0, 6.0]).unwrap();
        assert_relative_eq!(spectrum.at(1.5), 3.0);
        assert_eq!(spectrum.at(0.5), 0.0);
        assert_eq!(spectrum.at_clamped(0.5), 2.0);
        assert_eq!(spectrum.sample(3.5, true), 6.0);
        assert_eq!(spectrum.sample(3.5, false), 0.0);
        assert_relative_eq!(spectrum.integrate(), 8.0);

        let doubled = spectrum.map(|_, v| v * 2.0);
        assert_relative_eq!(doubled.at(2.0), 8.0);
    }

    #[test]
    fn test_wavelength_grid() {
        let grid = wavelength_grid(0.5, 5.5, 0.01);
        assert_eq!(grid.len(), 501);
        assert_relative_eq!(grid[0], 0.5);
        assert_relative_eq!(grid[500], 5.5, epsilon = 1e-9);
    }

    #[test]
    fn test_planck_peak_and_ratio() {
        // B_nu of the Sun peaks near 0.88 micron in wavelength
        let peak = planck_nu(0.88, 5778.0);
        assert!(peak > planck_nu(0.5, 5778.0));
        assert!(peak > planck_nu(2.0, 5778.0));

        // Rayleigh-Jeans limit: B_nu ~ 2 nu^2 k T / c^2
        let lambda_um = 1.0e5;
        let nu = CGS::SPEED_OF_LIGHT / (lambda_um / 1e4);
        let rj = 2.0 * nu * nu * CGS::BOLTZMANN_CONSTANT * 300.0
            / (CGS::SPEED_OF_LIGHT * CGS::SPEED_OF_LIGHT);
        assert_relative_eq!(planck_nu(lambda_um, 300.0), rj, max_relative = 1e-3);
    }

    #[test]
    fn test_photon_rate_conversion() {
        // 0.25 MJy/sr at 4.44 micron on a 0.063 arcsec pixel with 25.4 m^2
        let rate = mjy_sr_to_photon_rate(0.25, 4.44, 0.063, 25.4);
        assert_relative_eq!(rate, 2.01, max_relative = 0.01);

        // Linear in brightness
        assert_relative_eq!(
            mjy_sr_to_photon_rate(0.5, 4.44, 0.063, 25.4),
            2.0 * rate,
            max_relative = 1e-12
        );
    }
}
