//! Pointing geometry for zodiacal background lookups
//!
//! Converts equatorial pointings to ecliptic coordinates and places them
//! relative to the Sun on a given date. Solar positions use the low-precision
//! almanac formula, good to about 0.01 degree, which is far finer than the
//! zodiacal brightness table grid.

use chrono::{Datelike, NaiveDate};

/// Days from 0001-01-01 (day 1) to the J2000 epoch date 2000-01-01
const J2000_DAYS_FROM_CE: i32 = 730_120;

/// Mean obliquity of the ecliptic at J2000 in degrees
pub const OBLIQUITY_DEG: f64 = 23.4393;

/// Smallest solar elongation the observatory can point at
pub const FIELD_OF_REGARD_MIN_DEG: f64 = 85.0;

/// Largest solar elongation the observatory can point at
pub const FIELD_OF_REGARD_MAX_DEG: f64 = 135.0;

/// Equatorial pointing in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pointing {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

/// Ecliptic coordinates in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EclipticCoordinates {
    /// Ecliptic longitude (0 to 360 degrees)
    pub longitude_deg: f64,
    /// Ecliptic latitude (-90 to 90 degrees)
    pub latitude_deg: f64,
}

impl Pointing {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self { ra_deg, dec_deg }
    }

    pub fn ecliptic(&self) -> EclipticCoordinates {
        let (ra, dec) = (self.ra_deg.to_radians(), self.dec_deg.to_radians());
        let eps = OBLIQUITY_DEG.to_radians();

        let sin_beta = dec.sin() * eps.cos() - dec.cos() * eps.sin() * ra.sin();
        let latitude = sin_beta.clamp(-1.0, 1.0).asin();
        let longitude = (ra.sin() * eps.cos() + dec.tan() * eps.sin()).atan2(ra.cos());

        EclipticCoordinates {
            longitude_deg: longitude.to_degrees().rem_euclid(360.0),
            latitude_deg: latitude.to_degrees(),
        }
    }
}

/// Apparent ecliptic longitude of the Sun at noon UT on `date`, in degrees
pub fn sun_ecliptic_longitude(date: NaiveDate) -> f64 {
    let n = (date.num_days_from_ce() - J2000_DAYS_FROM_CE) as f64;

    let mean_longitude = 280.460 + 0.985_647_4 * n;
    let mean_anomaly = (357.528 + 0.985_600_3 * n).to_radians();
    (mean_longitude + 1.915 * mean_anomaly.sin() + 0.020 * (2.0 * mean_anomaly).sin())
        .rem_euclid(360.0)
}

/// Position of a target relative to the Sun, in the coordinates of the
/// zodiacal brightness table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarAngularCoordinates {
    /// Angle between the Sun and the target (0 to 180 degrees)
    pub elongation_deg: f64,
    /// Ecliptic longitude difference from the Sun, folded into 0 to 180 degrees
    pub helio_longitude_deg: f64,
    /// Ecliptic latitude of the target (-90 to 90 degrees)
    pub latitude_deg: f64,
}

impl SolarAngularCoordinates {
    pub fn from_ecliptic(target: &EclipticCoordinates, sun_longitude_deg: f64) -> Self {
        let delta = (target.longitude_deg - sun_longitude_deg).rem_euclid(360.0);
        let helio_longitude_deg = if delta > 180.0 { 360.0 - delta } else { delta };

        let beta = target.latitude_deg.to_radians();
        let cos_elongation = beta.cos() * helio_longitude_deg.to_radians().cos();
        let elongation_deg = cos_elongation.clamp(-1.0, 1.0).acos().to_degrees();

        Self {
            elongation_deg,
            helio_longitude_deg,
            latitude_deg: target.latitude_deg,
        }
    }

    pub fn on_date(target: &EclipticCoordinates, date: NaiveDate) -> Self {
        Self::from_ecliptic(target, sun_ecliptic_longitude(date))
    }

    pub fn abs_latitude(&self) -> f64 {
        self.latitude_deg.abs()
    }

    pub fn in_field_of_regard(&self) -> bool {
        (FIELD_OF_REGARD_MIN_DEG..=FIELD_OF_REGARD_MAX_DEG).contains(&self.elongation_deg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_equinox_directions() {
        // The vernal equinox lies on both the equator and the ecliptic
        let ecl = Pointing::new(0.0, 0.0).ecliptic();
        assert_relative_eq!(ecl.longitude_deg, 0.0, epsilon = 1e-9);
        assert_relative_eq!(ecl.latitude_deg, 0.0, epsilon = 1e-9);

        // The north celestial pole sits at 90 - obliquity ecliptic latitude
        let pole = Pointing::new(0.0, 90.0).ecliptic();
        assert_relative_eq!(pole.latitude_deg, 90.0 - OBLIQUITY_DEG, epsilon = 1e-9);

        // North ecliptic pole: RA 18h, Dec 90 - obliquity
        let nep = Pointing::new(270.0, 90.0 - OBLIQUITY_DEG).ecliptic();
        assert_relative_eq!(nep.latitude_deg, 90.0, epsilon = 1e-4);
    }

    #[test]
    fn test_sun_longitude_at_equinox_and_solstice() {
        let march = sun_ecliptic_longitude(NaiveDate::from_ymd_opt(2021, 3, 20).unwrap());
        let folded = if march > 180.0 { march - 360.0 } else { march };
        assert!(folded.abs() < 1.5, "equinox longitude {march}");

        let june = sun_ecliptic_longitude(NaiveDate::from_ymd_opt(2021, 6, 21).unwrap());
        assert_relative_eq!(june, 90.0, epsilon = 1.5);
    }

    #[test]
    fn test_elongation_geometry() {
        let target = EclipticCoordinates {
            longitude_deg: 100.0,
            latitude_deg: 0.0,
        };
        let coords = SolarAngularCoordinates::from_ecliptic(&target, 0.0);
        assert_relative_eq!(coords.elongation_deg, 100.0, epsilon = 1e-9);
        assert_relative_eq!(coords.helio_longitude_deg, 100.0, epsilon = 1e-9);
        assert!(coords.in_field_of_regard());

        // Longitude differences fold around 180 degrees
        let coords = SolarAngularCoordinates::from_ecliptic(&target, 300.0);
        assert_relative_eq!(coords.helio_longitude_deg, 160.0, epsilon = 1e-9);
        assert!(!coords.in_field_of_regard());

        // The ecliptic pole is always 90 degrees from the Sun
        let pole = EclipticCoordinates {
            longitude_deg: 0.0,
            latitude_deg: 90.0,
        };
        for sun in [0.0, 73.0, 181.0, 359.0] {
            let coords = SolarAngularCoordinates::from_ecliptic(&pole, sun);
            assert_relative_eq!(coords.elongation_deg, 90.0, epsilon = 1e-9);
        }
    }
}
