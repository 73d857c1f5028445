//! Zodiacal light brightness and near-infrared spectrum
//!
//! Brightness comes from the Leinert et al. (1998) V-band table as tabulated
//! by the STScI ETC: https://etc.stsci.edu/etcstatic/users_guide/1_ref_9_background.html#zodiacal-light
//! (https://doi.org/10.1051/aas:1998105), indexed by helio-ecliptic longitude
//! and absolute ecliptic latitude and interpolated bilinearly. Grid cells
//! inside the solar exclusion zone are NaN and are dropped from the
//! interpolation with the remaining weights renormalized.
//!
//! The near-infrared spectrum is the sum of scattered sunlight, a 5778 K
//! blackbody pinned to the V-band brightness at 0.55 micron, and thermal dust
//! emission, a 265 K blackbody pinned to 25 MJy/sr at 12 micron at the
//! anti-solar point and scaled with the local brightness.

use ndarray::Array2;
use thiserror::Error;

use super::pointing::SolarAngularCoordinates;
use super::spectrum::{
    planck_nu, wavelength_grid, SampledSpectrum, SpectrumError, ARCSEC_PER_RADIAN, CGS,
};

#[derive(Error, Debug)]
pub enum ZodicalError {
    #[error("Coordinates out of range: helio-ecliptic longitude {0}, ecliptic latitude {1}")]
    OutOfRange(f64, f64),

    #[error("No valid brightness samples around helio-ecliptic longitude {0}, latitude {1}")]
    NoValidSamples(f64, f64),

    #[error("Spectrum error: {0}")]
    Spectrum(#[from] SpectrumError),
}

/// Solar temperature used for the scattered component
pub const SOLAR_TEMPERATURE_K: f64 = 5778.0;

/// Dust temperature used for the thermal component
pub const DUST_TEMPERATURE_K: f64 = 265.0;

/// Thermal emission at [`THERMAL_REFERENCE_UM`] at the anti-solar point, MJy/sr
pub const THERMAL_REFERENCE_MJY_SR: f64 = 25.0;

pub const THERMAL_REFERENCE_UM: f64 = 12.0;

/// Effective wavelength of the V band in microns
pub const V_BAND_UM: f64 = 0.55;

/// Wavelength grid of the near-infrared background spectrum, microns
pub const NIR_GRID_START_UM: f64 = 0.5;
pub const NIR_GRID_END_UM: f64 = 5.5;
pub const NIR_GRID_STEP_UM: f64 = 0.01;

/// Zodiacal brightness table as a function of solar-relative coordinates
pub struct ZodicalLight {
    /// Brightness in V mag/arcsec^2, rows by helio-ecliptic longitude,
    /// columns by ecliptic latitude
    data: Array2<f64>,
}

// Hardcoded ecliptic coordinate grids
const LONGITUDES: [f64; 20] = [
    0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 35.0, 40.0, 45.0, 50.0, 60.0, 75.0, 90.0, 105.0, 120.0,
    135.0, 150.0, 165.0, 180.0,
];

const LATITUDES: [f64; 13] = [
    0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 35.0, 45.0, 50.0, 60.0, 75.0, 90.0,
];

// Hardcoded data table (embedded at compile time)
// Each row corresponds to an ecliptic longitude
// Each column corresponds to an ecliptic latitude
// format-off
#[rustfmt::skip]
fn zodical_raw_data() -> [[f64; 13]; 20] {
    [
        [ f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 22.0708, 22.5136, 22.9538, 23.2298],
        [ f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 22.0816, 22.5136, 22.9538, 23.2298],
        [ f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 22.1033, 22.5210, 22.9538, 23.2298],
        [ f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 22.1454, 22.5360, 22.9538, 23.2298],
        [ f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 22.2004, 22.5743, 22.9649, 23.2298],
        [ f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 22.0808,  22.2586, 22.6141, 22.9762, 23.2298],
        [ f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 22.1578,  22.3237, 22.6554, 23.0107, 23.2298],
        [ f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 21.9203,  22.2350,  22.3924, 22.7071, 23.0224, 23.2298],
        [ f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 21.8257,  22.0287,  22.3181,  22.4628, 22.7522, 23.0343, 23.2298],
        [ f64::NAN, f64::NAN, 21.0810,  21.3356,  21.5717,  21.7872,  21.9545,  22.1379,  22.3948,  22.5232, 22.7801, 23.0707, 23.2298],
        [ 20.8432,  21.0663,  21.3194,  21.5397,  21.7408,  21.9486,  22.0833,  22.2472,  22.4715,  22.5837, 22.8080, 23.1071, 23.2298],
        [ 21.1844,  21.3356,  21.5842,  21.7872,  21.9859,  22.1525,  22.2937,  22.4437,  22.6304,  22.7237, 22.9104, 23.1212, 23.2298],
        [ 21.6258,  21.6965,  21.8737,  22.0611,  22.2180,  22.3621,  22.4989,  22.6319,  22.7801,  22.8542, 23.0024, 23.1607, 23.2298],
        [ 21.9155,  21.9768,  22.0660,  22.2350,  22.3948,  22.5284,  22.6470,  22.7699,  22.9104,  22.9807, 23.1212, 23.2016, 23.2298],
        [ 22.1315,  22.1419,  22.2124,  22.3686,  22.5136,  22.6387,  22.7614,  22.8912,  22.9990,  23.0529, 23.1607, 23.2298, 23.2298],
        [ 22.2639,  22.2757,  22.3305,  22.4844,  22.5980,  22.7071,  22.8186,  22.9646,  23.0707,  23.1237, 23.2298, 23.2736, 23.2298],
        [ 22.3181,  22.3243,  22.3948,  22.5284,  22.6304,  22.7339,  22.8483,  22.9224,  23.0707,  23.1237, 23.2298, 23.2885, 23.2298],
        [ 22.3181,  22.3243,  22.4014,  22.5210,  22.6060,  22.6896,  22.7801,  22.8639,  22.9990,  23.0665, 23.2016, 23.3037, 23.2298],
        [ 22.2180,  22.2407,  22.3181,  22.4014,  22.4989,  22.5743,  22.6554,  22.7435,  22.9104,  22.9938, 23.1607, 23.3037, 23.2298],
        [ 22.0418,  22.1315,  22.2236,  22.3243,  22.4216,  22.5210,  22.6304,  22.7348,  22.8998,  22.9823, 23.1473, 23.3037, 23.2298],
    ]
}

impl Default for ZodicalLight {
    fn default() -> Self {
        Self::new()
    }
}

impl ZodicalLight {
    pub fn new() -> Self {
        let raw = zodical_raw_data();
        let data = Array2::from_shape_fn((LONGITUDES.len(), LATITUDES.len()), |(i, j)| raw[i][j]);
        Self { data }
    }

    /// Lower index, upper index and the weight of the lower sample
    fn find_indices_and_weights(array: &[f64], value: f64) -> Option<(usize, usize, f64)> {
        let last = array.len().checked_sub(1)?;
        if last == 0 || !(array[0]..=array[last]).contains(&value) {
            return None;
        }

        let upper = array.partition_point(|probe| *probe < value);
        if array[upper] == value {
            return Some((upper, upper, 1.0));
        }
        let lower = upper - 1;
        let weight = (value - array[lower]) / (array[upper] - array[lower]);
        Some((lower, upper, 1.0 - weight))
    }

    /// V-band surface brightness in mag/arcsec^2
    pub fn v_band_brightness(&self, coords: &SolarAngularCoordinates) -> Result<f64, ZodicalError> {
        let longitude = coords.helio_longitude_deg;
        let latitude = coords.abs_latitude();
        let out_of_range = || ZodicalError::OutOfRange(longitude, coords.latitude_deg);

        let (lon_lo, lon_hi, lon_w) =
            Self::find_indices_and_weights(&LONGITUDES, longitude).ok_or_else(out_of_range)?;
        let (lat_lo, lat_hi, lat_w) =
            Self::find_indices_and_weights(&LATITUDES, latitude).ok_or_else(out_of_range)?;

        let corners = [
            (lon_lo, lat_lo, lon_w * lat_w),
            (lon_lo, lat_hi, lon_w * (1.0 - lat_w)),
            (lon_hi, lat_lo, (1.0 - lon_w) * lat_w),
            (lon_hi, lat_hi, (1.0 - lon_w) * (1.0 - lat_w)),
        ];

        let (sum, weight_sum) = corners
            .iter()
            .map(|&(i, j, w)| (self.data[[i, j]], w))
            .filter(|(value, _)| !value.is_nan())
            .fold((0.0, 0.0), |(sum, total), (value, w)| (sum + value * w, total + w));

        if weight_sum <= 0.0 {
            return Err(ZodicalError::NoValidSamples(longitude, coords.latitude_deg));
        }
        Ok(sum / weight_sum)
    }

    /// Flux ratio between `coords` and the anti-solar point on the ecliptic
    pub fn spectrum_scale_factor(
        &self,
        coords: &SolarAngularCoordinates,
    ) -> Result<f64, ZodicalError> {
        let reference = SolarAngularCoordinates {
            elongation_deg: 180.0,
            helio_longitude_deg: 180.0,
            latitude_deg: 0.0,
        };
        let mag_diff = self.v_band_brightness(coords)? - self.v_band_brightness(&reference)?;
        Ok(10_f64.powf(-0.4 * mag_diff))
    }

    /// Near-infrared background spectrum in MJy/sr versus microns
    pub fn nir_spectrum(
        &self,
        coords: &SolarAngularCoordinates,
    ) -> Result<SampledSpectrum, ZodicalError> {
        let v_mag = self.v_band_brightness(coords)?;
        let scale = self.spectrum_scale_factor(coords)?;

        let v_flux = v_band_mjy_sr(v_mag);
        let solar_norm = planck_nu(V_BAND_UM, SOLAR_TEMPERATURE_K);
        let dust_norm = planck_nu(THERMAL_REFERENCE_UM, DUST_TEMPERATURE_K);

        let grid = wavelength_grid(NIR_GRID_START_UM, NIR_GRID_END_UM, NIR_GRID_STEP_UM);
        let spectrum = SampledSpectrum::from_fn(grid, |w| {
            let scattered = v_flux * planck_nu(w, SOLAR_TEMPERATURE_K) / solar_norm;
            let thermal = THERMAL_REFERENCE_MJY_SR * scale * planck_nu(w, DUST_TEMPERATURE_K)
                / dust_norm;
            scattered + thermal
        })?;
        Ok(spectrum)
    }
}

/// Surface brightness in MJy/sr of a V magnitude per square arcsecond
pub fn v_band_mjy_sr(mag_per_arcsec2: f64) -> f64 {
    let per_arcsec2 = CGS::AB_ZERO_POINT_FLUX_DENSITY * 10_f64.powf(-0.4 * mag_per_arcsec2);
    per_arcsec2 * ARCSEC_PER_RADIAN * ARCSEC_PER_RADIAN / CGS::MEGAJANSKY_IN_CGS
}
