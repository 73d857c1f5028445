//! Image-based background for NIRISS
//!
//! The grism configuration directory ships a medium-level dispersed background
//! image per crossing filter and grism. The image is rescaled so that its
//! sigma-clipped mean equals the requested level in e-/s.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use shared::fits::{read_image, write_fits, HduRef, HeaderCard, ImageHdu, ImagePayload};
use shared::stats::sigma_clip;

use super::levels::{photon_rate_spectrum, BackgroundLevels};
use super::{BackgroundError, BackgroundModel, ResolvedBackground};
use crate::config::{BackgroundRequest, RunConfig};
use crate::instrument::{pivot_wavelength_um, Instrument, NIRISS_GRISM_THROUGHPUT_FACTOR};
use crate::logging::RunLog;
use crate::photometry::pointing::Pointing;
use crate::photometry::throughput::Throughput;

/// Rejection threshold, in standard deviations, for the reference mean
pub const REFERENCE_CLIP_SIGMA: f64 = 3.0;

/// Reference background rescaled to the requested level
#[derive(Debug, Clone)]
pub struct ReferenceImageBackground {
    reference: PathBuf,
    request: BackgroundRequest,
    gain: f64,
    pointing: Pointing,
    reference_year: i32,
    crossing_filter: String,
    instrument: Instrument,
    log: RunLog,
}

/// `<crossing>_<dmode>_medium_background.fits`, lower case
pub fn reference_file_name(crossing_filter: &str, dispersion_mode: &str) -> String {
    format!(
        "{}_{}_medium_background.fits",
        crossing_filter.to_lowercase(),
        dispersion_mode.to_lowercase()
    )
}

impl ReferenceImageBackground {
    pub fn new(config: &RunConfig, log: RunLog) -> Self {
        let reference = config.data_root.grism_dir(config.instrument).join(reference_file_name(
            &config.crossing_filter,
            &config.dispersion.name(),
        ));
        Self {
            reference,
            request: config.background,
            gain: config.gain,
            pointing: config.pointing,
            reference_year: config.reference_year,
            crossing_filter: config.crossing_filter.clone(),
            instrument: config.instrument,
            log,
        }
    }

    pub fn reference(&self) -> &Path {
        &self.reference
    }

    /// Requested mean level of the dispersed background in e-/s/pixel
    pub fn target_rate(&self, crossing_throughput: &Throughput) -> Result<f64, BackgroundError> {
        match self.request {
            BackgroundRequest::Rate(adu_per_sec) => {
                Ok(adu_per_sec * self.gain * NIRISS_GRISM_THROUGHPUT_FACTOR)
            }
            request => {
                let pivot = pivot_wavelength_um(&self.crossing_filter).ok_or_else(|| {
                    BackgroundError::NoPivotWavelength(self.crossing_filter.clone())
                })?;
                let levels = BackgroundLevels::new(&self.pointing);
                let (date, mjy_sr) =
                    levels.requested_spectrum(&request, self.reference_year, pivot)?;
                let photons = photon_rate_spectrum(&mjy_sr, self.instrument);

                let direct_electrons = crossing_throughput.integrate(|w| photons.at(w));
                let direct_adu = direct_electrons / self.gain;
                self.log.info(format_args!(
                    "Direct-image background from {date}: {direct_electrons:.4} e/s/pixel ({direct_adu:.4} ADU/s)"
                ));
                Ok(direct_adu * NIRISS_GRISM_THROUGHPUT_FACTOR * self.gain)
            }
        }
    }
}

impl BackgroundModel for ReferenceImageBackground {
    fn describe(&self) -> String {
        format!(
            "{:?} rescaling of {}",
            self.request,
            self.reference.display()
        )
    }

    fn resolve(
        &self,
        crossing_throughput: &Throughput,
    ) -> Result<ResolvedBackground, BackgroundError> {
        let target = self.target_rate(crossing_throughput)?;
        let image = read_image(&self.reference, HduRef::Index(1))?;
        let scaled = rescale_to_mean(image, target, &self.reference)?;
        self.log.info(format_args!(
            "Rescaled {} to a sigma-clipped mean of {target:.4} e/s",
            self.reference.display()
        ));
        Ok(ResolvedBackground::Image(scaled))
    }
}

/// Scale `image` so its sigma-clipped mean equals `target`
pub fn rescale_to_mean(
    image: Array2<f64>,
    target: f64,
    source: &Path,
) -> Result<Array2<f64>, BackgroundError> {
    let clipped = sigma_clip(
        image.iter().copied(),
        REFERENCE_CLIP_SIGMA,
        REFERENCE_CLIP_SIGMA,
    )
    .ok_or_else(|| BackgroundError::EmptyReference(source.to_path_buf()))?;
    if clipped.mean == 0.0 {
        return Err(BackgroundError::ZeroReferenceMean(source.to_path_buf()));
    }
    Ok(image * (target / clipped.mean))
}

/// Write the background image: header-only primary plus a `BACKGRND`
/// extension in e/s
pub fn write_background_image(path: &Path, image: &Array2<f64>) -> Result<(), BackgroundError> {
    write_fits(
        path,
        &[],
        &[ImageHdu::new("BACKGRND", ImagePayload::F64(image))
            .with_card(HeaderCard::text("UNITS", "e/s"))],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackgroundTier;
    use approx::assert_relative_eq;
    use shared::fits::read_key_string;
    use tempfile::TempDir;

    fn model(dir: &TempDir, request: BackgroundRequest) -> ReferenceImageBackground {
        ReferenceImageBackground {
            reference: dir.path().join(reference_file_name("F150W", "GR150R")),
            request,
            gain: 1.611,
            pointing: Pointing::new(270.0, 66.5607),
            reference_year: 2021,
            crossing_filter: "F150W".to_string(),
            instrument: Instrument::Niriss,
            log: RunLog::new("test").component("background"),
        }
    }

    fn write_reference(path: &Path) -> Array2<f64> {
        let mut image = Array2::from_shape_fn((32, 32), |(y, x)| 2.0 + 0.01 * ((x + y) % 5) as f64);
        image[[3, 3]] = 5000.0;
        write_fits(path, &[], &[ImageHdu::new("SCI", ImagePayload::F64(&image))]).unwrap();
        image
    }

    #[test]
    fn test_reference_name() {
        assert_eq!(
            reference_file_name("F150W", "GR150R"),
            "f150w_gr150r_medium_background.fits"
        );
    }

    #[test]
    fn test_numeric_rate_target() {
        let dir = TempDir::new().unwrap();
        let filter = Throughput::flat(1.3, 1.7, 0.3).unwrap();
        let target = model(&dir, BackgroundRequest::Rate(0.5))
            .target_rate(&filter)
            .unwrap();
        assert_relative_eq!(target, 0.5 * 1.611 * 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_rescale_ignores_outliers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ref.fits");
        let image = write_reference(&path);

        let scaled = rescale_to_mean(image, 1.0, &path).unwrap();
        let clipped = sigma_clip(scaled.iter().copied(), 3.0, 3.0).unwrap();
        assert_relative_eq!(clipped.mean, 1.0, epsilon = 1e-9);
        // The hot pixel is scaled along with everything else
        assert!(scaled[[3, 3]] > 1000.0);
    }

    #[test]
    fn test_zero_reference_rejected() {
        let zeros = Array2::<f64>::zeros((4, 4));
        let err = rescale_to_mean(zeros, 1.0, Path::new("zeros.fits")).unwrap_err();
        assert!(matches!(err, BackgroundError::ZeroReferenceMean(_)));
    }

    #[test]
    fn test_tier_resolution_and_output_file() {
        let dir = TempDir::new().unwrap();
        let background = model(&dir, BackgroundRequest::Tier(BackgroundTier::Medium));
        write_reference(background.reference());
        let filter = Throughput::flat(1.3, 1.7, 0.3).unwrap();

        let target = background.target_rate(&filter).unwrap();
        assert!(target > 0.0);

        let ResolvedBackground::Image(image) = background.resolve(&filter).unwrap() else {
            panic!("expected an image background");
        };
        let clipped = sigma_clip(image.iter().copied(), 3.0, 3.0).unwrap();
        assert_relative_eq!(clipped.mean, target, max_relative = 1e-9);

        let out = dir.path().join("obs_background_image.fits");
        write_background_image(&out, &image).unwrap();
        let units = read_key_string(&out, HduRef::Name("BACKGRND"), "UNITS").unwrap();
        assert_eq!(units.as_deref(), Some("e/s"));
        let back = read_image(&out, HduRef::Name("BACKGRND")).unwrap();
        assert_eq!(back.dim(), (32, 32));
    }

    #[test]
    fn test_missing_reference_is_error() {
        let dir = TempDir::new().unwrap();
        let filter = Throughput::flat(1.3, 1.7, 0.3).unwrap();
        let err = model(&dir, BackgroundRequest::Rate(1.0))
            .resolve(&filter)
            .unwrap_err();
        assert!(matches!(err, BackgroundError::Fits(_)));
    }
}
