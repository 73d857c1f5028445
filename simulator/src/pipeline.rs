//! End-to-end WFSS seed simulation
//!
//! [`WfssSimulation`] validates its configuration on construction, then
//! [`WfssSimulation::create`] walks a fixed sequence of stages:
//!
//! ```text
//! ValidatingConfig -> ResolvingBackground -> DispersingClasses -> Compositing
//!     -> Cropping -> NormalizingUnits -> Done
//! ```
//!
//! Any error moves the run to `Failed` and is returned to the caller.

use std::fmt;
use std::path::PathBuf;

use ndarray::Array2;
use shared::FitsError;
use thiserror::Error;

use crate::background::{
    select_model, write_background_image, BackgroundError, BackgroundModel, ResolvedBackground,
};
use crate::collaborators::{
    CollaboratorError, DarkPreparer, LinearRampGenerator, ObservationGenerator, ObservationInputs,
    OverrideOnlyDarkPreparer, PassthroughSedSynthesizer, PrerenderedSeedGenerator, SedRequest,
    SedSynthesizer, SeedImageGenerator, FULL_FRAME_TIME_S,
};
use crate::composite::{
    crop_to_subarray, merge_segmaps, write_dispersed_seed, zero_reference_pixels,
    CompositeAccumulator, CompositeError,
};
use crate::config::{ConfigError, RunConfig, SimulationOptions};
use crate::dark::{resolve_override, DarkError, DarkInput};
use crate::disperser::{
    write_source_stamps, ClassDisperser, DirectSeed, DisperserError, GrismConfig, SedCatalog,
    SourceClass,
};
use crate::instrument::{is_full_frame, REFERENCE_PIXEL_WIDTH};
use crate::logging::RunLog;
use crate::units::{to_native_units, SeedMetadata, SeedUnits};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("background error: {0}")]
    Background(#[from] BackgroundError),

    #[error("dispersion error: {0}")]
    Disperser(#[from] DisperserError),

    #[error("composite error: {0}")]
    Composite(#[from] CompositeError),

    #[error("dark error: {0}")]
    Dark(#[from] DarkError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error("the seed generator returned no products")]
    NoSeedProducts,

    #[error("simulation has already run (stage {0})")]
    AlreadyRun(PipelineStage),
}

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    ValidatingConfig,
    ResolvingBackground,
    DispersingClasses,
    Compositing,
    Cropping,
    NormalizingUnits,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The external stages a simulation drives
pub struct Collaborators {
    pub seed_generator: Box<dyn SeedImageGenerator>,
    pub sed_synthesizer: Box<dyn SedSynthesizer>,
    pub dark_preparer: Box<dyn DarkPreparer>,
    pub observation: Box<dyn ObservationGenerator>,
}

impl Collaborators {
    /// The file-backed implementations shipped with the crate
    pub fn file_backed(config: &RunConfig, log: &RunLog) -> Self {
        Self {
            seed_generator: Box::new(PrerenderedSeedGenerator::new(config, log.component("seed"))),
            sed_synthesizer: Box::new(PassthroughSedSynthesizer::new(log.component("sed"))),
            dark_preparer: Box::new(OverrideOnlyDarkPreparer),
            observation: Box::new(LinearRampGenerator::new(
                FULL_FRAME_TIME_S,
                log.component("observation"),
            )),
        }
    }
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct SimulationOutput {
    /// Seed image in ADU/s, cropped to the aperture
    pub seed: Array2<f64>,
    pub segmap: Array2<i32>,
    pub metadata: SeedMetadata,
    pub dark: DarkInput,
    /// Files written by exposure assembly
    pub exposures: Vec<PathBuf>,
    pub background_file: Option<PathBuf>,
    pub dispersed_seed_file: Option<PathBuf>,
}

/// One WFSS simulation run
pub struct WfssSimulation {
    config: RunConfig,
    background: Box<dyn BackgroundModel>,
    collaborators: Collaborators,
    stage: PipelineStage,
    log: RunLog,
}

impl WfssSimulation {
    /// Validate `options` and set up the run
    ///
    /// Nothing is rendered or dispersed until [`WfssSimulation::create`].
    pub fn new(options: SimulationOptions) -> Result<Self, PipelineError> {
        let run = options
            .param_files
            .first()
            .and_then(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wfss".to_string());
        let log = RunLog::new(&run);
        log.info(format_args!("Stage {}", PipelineStage::ValidatingConfig));

        let config = RunConfig::validate(options, &log).map_err(|err| {
            log.error(format_args!(
                "Stage {} -> {}: {err}",
                PipelineStage::ValidatingConfig,
                PipelineStage::Failed
            ));
            err
        })?;
        let background = select_model(&config, &log);
        log.info(format_args!("Background model: {}", background.describe()));
        let collaborators = Collaborators::file_backed(&config, &log);

        Ok(Self {
            config,
            background,
            collaborators,
            stage: PipelineStage::ValidatingConfig,
            log,
        })
    }

    /// Replace the external stages
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Run every stage and hand the seed to exposure assembly
    pub fn create(&mut self) -> Result<SimulationOutput, PipelineError> {
        if self.stage != PipelineStage::ValidatingConfig {
            return Err(PipelineError::AlreadyRun(self.stage));
        }
        let Self {
            config,
            background,
            collaborators,
            stage,
            log,
        } = self;

        match run(config, &**background, collaborators, stage, log) {
            Ok(output) => {
                advance(stage, log, PipelineStage::Done);
                Ok(output)
            }
            Err(err) => {
                log.error(format_args!(
                    "Stage {} -> {}: {err}",
                    stage,
                    PipelineStage::Failed
                ));
                *stage = PipelineStage::Failed;
                Err(err)
            }
        }
    }
}

fn advance(stage: &mut PipelineStage, log: &RunLog, next: PipelineStage) {
    log.info(format_args!("Stage {stage} -> {next}"));
    *stage = next;
}

fn run(
    config: &RunConfig,
    background: &dyn BackgroundModel,
    collaborators: &Collaborators,
    stage: &mut PipelineStage,
    log: &RunLog,
) -> Result<SimulationOutput, PipelineError> {
    advance(stage, log, PipelineStage::ResolvingBackground);
    let grism_path =
        GrismConfig::locate(&config.data_root, &config.crossing_filter, &config.dispersion);
    let grism = GrismConfig::load(&grism_path)?;
    log.info(format_args!(
        "Loaded {} with {} order(s)",
        grism_path.display(),
        grism.orders().len()
    ));
    let resolved = background.resolve(grism.filter_throughput())?;
    let background_file = match &resolved {
        ResolvedBackground::Image(image) => {
            let path = config.outputs.background_image.clone();
            write_background_image(&path, image)?;
            log.info(format_args!("Background image saved to {}", path.display()));
            Some(path)
        }
        ResolvedBackground::Spectrum(_) => None,
    };

    advance(stage, log, PipelineStage::DispersingClasses);
    let products = config
        .seeding_documents()
        .iter()
        .map(|document| collaborators.seed_generator.make_seed(document))
        .collect::<Result<Vec<_>, _>>()?;
    let primary = products.first().ok_or(PipelineError::NoSeedProducts)?;
    let frame = primary.frame;

    let sed_file = if config.create_continuum_seds {
        let request = SedRequest {
            catalog_files: config.params.catalog_files(),
            sed_file: config.sed_file.as_deref(),
            normalizing_column: config.sed_normalizing_column.as_deref(),
            output_file: config.final_sed_file.as_deref(),
            extrapolate: config.extrapolate_sed,
        };
        collaborators.sed_synthesizer.make_all_spectra(&request)?
    } else {
        None
    };
    let seds = sed_file.as_deref().map(SedCatalog::load).transpose()?;
    if let (Some(path), Some(seds)) = (&sed_file, &seds) {
        log.info(format_args!("Using {} SEDs from {}", seds.len(), path.display()));
    }

    let disperser = ClassDisperser::new(
        &grism,
        config.orders.as_deref(),
        frame,
        log.component("disperser"),
    )?
    .with_seds(seds.as_ref(), config.extrapolate_sed)
    .with_stamps(config.outputs.source_stamps.is_some());

    let mut accumulator = CompositeAccumulator::new(frame);
    let mut stamps = Vec::new();
    let mut class_seeds: Vec<DirectSeed> = Vec::new();
    for class in SourceClass::ALL {
        // Only the crossing-filter seed decides whether a class is dispersed
        let Some(primary_file) = primary.seed_file(class) else {
            log.info(format_args!("No {class} seed image; skipping"));
            continue;
        };
        let mut seeds = vec![DirectSeed::load(primary_file, class, &primary.direct_filter)?];
        if !seeds[0].is_populated() {
            log.info(format_args!("{class} seed image is empty; skipping"));
            continue;
        }
        for product in &products[1..] {
            if let Some(path) = product.seed_file(class) {
                seeds.push(DirectSeed::load(path, class, &product.direct_filter)?);
            }
        }

        let mut dispersed = disperser.disperse(class, &seeds)?;
        if accumulator.needs_background() {
            let background_frame = disperser.background_frame(&resolved, seeds[0].shape())?;
            accumulator.inject_background(&mut dispersed, &background_frame)?;
            log.info(format_args!("Background added to the {class} image"));
        }
        stamps.extend_from_slice(dispersed.stamps());
        accumulator.add(dispersed)?;
        class_seeds.push(seeds.swap_remove(0));
    }
    let classes = accumulator.classes().to_vec();

    advance(stage, log, PipelineStage::Compositing);
    let mut composite = accumulator.finish()?;
    log.info(format_args!(
        "Composite of {} class(es): {:.3} e/s total",
        classes.len(),
        composite.sum()
    ));

    advance(stage, log, PipelineStage::Cropping);
    zero_reference_pixels(&mut composite, REFERENCE_PIXEL_WIDTH);
    let full_segmap = merge_segmaps(frame, &class_seeds.iter().collect::<Vec<_>>());
    let (mut seed, segmap) = if is_full_frame(&config.aperture) {
        (composite, full_segmap)
    } else {
        log.info(format_args!(
            "Cropping to {} {}",
            config.aperture, primary.subarray
        ));
        (
            crop_to_subarray(&composite, &primary.subarray)?,
            crop_to_subarray(&full_segmap, &primary.subarray)?,
        )
    };

    if let Some(path) = &config.outputs.dispersed_seed {
        write_dispersed_seed(path, &seed)?;
        log.info(format_args!("Dispersed seed image saved to {}", path.display()));
    }
    if let Some(path) = &config.outputs.source_stamps {
        write_source_stamps(path, &stamps)?;
        log.info(format_args!(
            "{} source stamp(s) saved to {}",
            stamps.len(),
            path.display()
        ));
    }

    advance(stage, log, PipelineStage::NormalizingUnits);
    let mut metadata = SeedMetadata {
        units: SeedUnits::ElectronsPerSecond,
        instrument: config.instrument,
        module: config.module,
        aperture: config.aperture.clone(),
        frame,
        subarray: primary.subarray,
        classes,
    };
    let gain = to_native_units(&mut seed, &mut metadata)?;
    log.info(format_args!("Seed converted to {} with gain {gain}", metadata.units));

    let dark = match &config.override_dark {
        Some(paths) => {
            log.info(format_args!("Using {} override dark file(s)", paths.len()));
            resolve_override(paths)?
        }
        None => collaborators.dark_preparer.prepare(config.params.wfss())?,
    };
    let exposures = collaborators.observation.create(&ObservationInputs {
        seed: &seed,
        segmap: &segmap,
        metadata: &metadata,
        dark: &dark,
        document: config.params.wfss(),
    })?;

    Ok(SimulationOutput {
        seed,
        segmap,
        metadata,
        dark,
        exposures,
        background_file,
        dispersed_seed_file: config.outputs.dispersed_seed.clone(),
    })
}
