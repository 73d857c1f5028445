//! External stages of the simulation
//!
//! Seed rendering, SED synthesis, dark preparation and ramp synthesis are
//! outside the dispersion core. The pipeline talks to them through the traits
//! below; the implementations here are simple file-backed stand-ins that make
//! the `wfss_sim` binary usable end to end.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, Axis};
use shared::fits::{read_key_i64, write_fits, HduRef, HeaderCard, ImageHdu, ImagePayload};
use shared::FitsError;
use thiserror::Error;

use crate::config::{ConfigError, RunConfig, SubarrayBounds, SubarrayTable};
use crate::dark::{DarkError, DarkInput, DarkProduct};
use crate::disperser::seed::seed_file_name;
use crate::disperser::{DisperserError, SedCatalog, SourceClass};
use crate::instrument::{is_full_frame, pivot_wavelength_um, Instrument, FULL_FRAME_SIZE};
use crate::logging::RunLog;
use crate::params::ParamDocument;
use crate::units::SeedMetadata;

/// Frame time of a full-frame read, seconds
pub const FULL_FRAME_TIME_S: f64 = 10.73677;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("no seed images for {document}; expected files such as {example}")]
    NoSeedImages { document: PathBuf, example: PathBuf },

    #[error("frame size {value} in {path} is not a positive integer")]
    InvalidFrameSize { path: PathBuf, value: i64 },

    #[error("dark preparation is unavailable for {0}; supply override dark file(s)")]
    DarkPreparationUnavailable(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error(transparent)]
    Disperser(#[from] DisperserError),

    #[error(transparent)]
    Dark(#[from] DarkError),
}

/// Products of seed rendering for one parameter document
#[derive(Debug, Clone)]
pub struct DirectSeedProducts {
    /// Parameter document the seeds were rendered from
    pub document: PathBuf,
    /// Seed file per populated source class
    pub seed_files: BTreeMap<SourceClass, PathBuf>,
    /// Full-frame (rows, cols)
    pub frame: (usize, usize),
    /// Subarray of the frame read out by the aperture
    pub subarray: SubarrayBounds,
    /// Filter the seeds were rendered through
    pub direct_filter: String,
}

impl DirectSeedProducts {
    pub fn seed_file(&self, class: SourceClass) -> Option<&Path> {
        self.seed_files.get(&class).map(PathBuf::as_path)
    }
}

/// Renders direct seed images from a parameter document
pub trait SeedImageGenerator {
    fn make_seed(&self, document: &ParamDocument) -> Result<DirectSeedProducts, CollaboratorError>;
}

/// Inputs to continuum SED synthesis
#[derive(Debug, Clone)]
pub struct SedRequest<'a> {
    pub catalog_files: Vec<String>,
    pub sed_file: Option<&'a Path>,
    pub normalizing_column: Option<&'a str>,
    pub output_file: Option<&'a Path>,
    pub extrapolate: bool,
}

/// Produces an SED file covering every catalog source
pub trait SedSynthesizer {
    fn make_all_spectra(
        &self,
        request: &SedRequest<'_>,
    ) -> Result<Option<PathBuf>, CollaboratorError>;
}

/// Prepares the dark-current product for an exposure
pub trait DarkPreparer {
    fn prepare(&self, document: &ParamDocument) -> Result<DarkInput, CollaboratorError>;
}

/// Everything exposure assembly receives
#[derive(Debug)]
pub struct ObservationInputs<'a> {
    /// Seed in ADU/s
    pub seed: &'a Array2<f64>,
    pub segmap: &'a Array2<i32>,
    pub metadata: &'a SeedMetadata,
    pub dark: &'a DarkInput,
    pub document: &'a ParamDocument,
}

/// Synthesizes ramps from a seed and a dark, returning the files written
pub trait ObservationGenerator {
    fn create(&self, inputs: &ObservationInputs<'_>) -> Result<Vec<PathBuf>, CollaboratorError>;
}

/// Reads seeds that were rendered ahead of time into the output directory as
/// `<stem>_{ptsrc,galaxy,extended}_seed_image.fits`
///
/// The frame size comes from the optional `FFSIZE` keyword of the `SCI`
/// extension. Subarray bounds come from the subarray definition table.
#[derive(Debug, Clone)]
pub struct PrerenderedSeedGenerator {
    instrument: Instrument,
    subarray_table: PathBuf,
    log: RunLog,
}

impl PrerenderedSeedGenerator {
    pub fn new(config: &RunConfig, log: RunLog) -> Self {
        Self {
            instrument: config.instrument,
            subarray_table: config.subarray_table_path(),
            log,
        }
    }

    fn direct_filter(&self, document: &ParamDocument) -> String {
        let readout = &document.params().readout;
        let preferred = match self.instrument {
            Instrument::NirCam => [&readout.filter, &readout.pupil],
            Instrument::Niriss => [&readout.pupil, &readout.filter],
        };
        preferred
            .into_iter()
            .find(|name| pivot_wavelength_um(name).is_some())
            .unwrap_or(preferred[0])
            .to_uppercase()
    }
}

impl SeedImageGenerator for PrerenderedSeedGenerator {
    fn make_seed(&self, document: &ParamDocument) -> Result<DirectSeedProducts, CollaboratorError> {
        let directory = &document.params().output.directory;
        let stem = document.output_stem();
        let seed_files: BTreeMap<SourceClass, PathBuf> = SourceClass::ALL
            .iter()
            .map(|class| (*class, directory.join(seed_file_name(stem, *class))))
            .filter(|(_, path)| path.is_file())
            .collect();

        let Some(first) = seed_files.values().next() else {
            return Err(CollaboratorError::NoSeedImages {
                document: document.path().to_path_buf(),
                example: directory.join(seed_file_name(stem, SourceClass::PointSource)),
            });
        };

        let size = match read_key_i64(first, HduRef::Name("SCI"), "FFSIZE")? {
            None => FULL_FRAME_SIZE,
            Some(value) if value > 0 => value as usize,
            Some(value) => {
                return Err(CollaboratorError::InvalidFrameSize {
                    path: first.clone(),
                    value,
                })
            }
        };

        let aperture = &document.params().readout.array_name;
        let subarray = if is_full_frame(aperture) {
            SubarrayBounds::full_frame(size, size)
        } else {
            let bounds = SubarrayTable::load(&self.subarray_table)?.lookup(aperture)?;
            bounds.validate(size, size)?;
            bounds
        };

        let direct_filter = self.direct_filter(document);
        self.log.info(format_args!(
            "Found {} seed image(s) for {} ({size}x{size} frame, {aperture} {subarray}, filter {direct_filter})",
            seed_files.len(),
            document.path().display()
        ));
        Ok(DirectSeedProducts {
            document: document.path().to_path_buf(),
            seed_files,
            frame: (size, size),
            subarray,
            direct_filter,
        })
    }
}

/// Hands the caller's SED file through, copying it to the requested final
/// location when one is given
#[derive(Debug, Clone)]
pub struct PassthroughSedSynthesizer {
    log: RunLog,
}

impl PassthroughSedSynthesizer {
    pub fn new(log: RunLog) -> Self {
        Self { log }
    }
}

impl SedSynthesizer for PassthroughSedSynthesizer {
    fn make_all_spectra(
        &self,
        request: &SedRequest<'_>,
    ) -> Result<Option<PathBuf>, CollaboratorError> {
        let Some(sed_file) = request.sed_file else {
            self.log.info(format_args!(
                "No SED file supplied; sources from {} catalog(s) get spectra from their direct images",
                request.catalog_files.len()
            ));
            return Ok(None);
        };

        match request.output_file {
            Some(output) => {
                let catalog = SedCatalog::load(sed_file)?;
                catalog.save(output)?;
                self.log.info(format_args!(
                    "Copied {} SEDs from {} to {}",
                    catalog.len(),
                    sed_file.display(),
                    output.display()
                ));
                Ok(Some(output.to_path_buf()))
            }
            None => Ok(Some(sed_file.to_path_buf())),
        }
    }
}

/// Dark preparer that requires an override dark
#[derive(Debug, Clone, Copy, Default)]
pub struct OverrideOnlyDarkPreparer;

impl DarkPreparer for OverrideOnlyDarkPreparer {
    fn prepare(&self, document: &ParamDocument) -> Result<DarkInput, CollaboratorError> {
        Err(CollaboratorError::DarkPreparationUnavailable(
            document.path().to_path_buf(),
        ))
    }
}

/// Noiseless ramp: group `g` is `dark[g] + seed * frame_time * (g + 1)`
#[derive(Debug, Clone)]
pub struct LinearRampGenerator {
    frame_time_s: f64,
    log: RunLog,
}

impl LinearRampGenerator {
    pub fn new(frame_time_s: f64, log: RunLog) -> Self {
        Self { frame_time_s, log }
    }

    /// Build the ramp cube for one dark
    pub fn ramp(&self, seed: &Array2<f64>, dark: &DarkProduct) -> Result<Array3<f64>, DarkError> {
        dark.check_shape(seed.dim())?;
        let mut ramp = dark.data().clone();
        for (g, mut group) in ramp.axis_iter_mut(Axis(0)).enumerate() {
            let exposure = self.frame_time_s * (g + 1) as f64;
            group.scaled_add(exposure, seed);
        }
        Ok(ramp)
    }

    fn write(
        &self,
        path: &Path,
        ramp: &Array3<f64>,
        inputs: &ObservationInputs<'_>,
    ) -> Result<(), CollaboratorError> {
        let meta = inputs.metadata;
        write_fits(
            path,
            &[
                HeaderCard::text("INSTRUME", meta.instrument.name()),
                HeaderCard::text("APERTURE", &meta.aperture),
                HeaderCard::integer("NGROUPS", ramp.shape()[0] as i64),
                HeaderCard::real("TFRAME", self.frame_time_s),
            ],
            &[
                ImageHdu::new("SCI", ImagePayload::Cube(ramp))
                    .with_card(HeaderCard::text("UNITS", "ADU")),
                ImageHdu::new("SEGMAP", ImagePayload::I32(inputs.segmap)),
            ],
        )?;
        self.log.info(format_args!(
            "Wrote {}-group ramp to {}",
            ramp.shape()[0],
            path.display()
        ));
        Ok(())
    }
}

impl ObservationGenerator for LinearRampGenerator {
    fn create(&self, inputs: &ObservationInputs<'_>) -> Result<Vec<PathBuf>, CollaboratorError> {
        let output = &inputs.document.params().output;
        match inputs.dark {
            DarkInput::Prepared(dark) => {
                let path = output.directory.join(&output.file);
                let ramp = self.ramp(inputs.seed, dark)?;
                self.write(&path, &ramp, inputs)?;
                Ok(vec![path])
            }
            DarkInput::Files(files) => {
                let mut written = Vec::with_capacity(files.len());
                for (i, file) in files.iter().enumerate() {
                    let dark = DarkProduct::load(file)?;
                    let path = inputs
                        .document
                        .output_path(&format!("_seg{:03}.fits", i + 1));
                    let ramp = self.ramp(inputs.seed, &dark)?;
                    self.write(&path, &ramp, inputs)?;
                    written.push(path);
                }
                Ok(written)
            }
        }
    }
}
