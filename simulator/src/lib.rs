//! WFSS exposure simulation
//!
//! Disperses direct seed images of each source class through the grism
//! trace model, adds the sky background exactly once, and hands a seed in
//! ADU/s to exposure assembly. [`WfssSimulation`] drives the run; the other
//! modules hold the pieces it composes.

pub mod algo;
pub mod background;
pub mod collaborators;
pub mod composite;
pub mod config;
pub mod dark;
pub mod disperser;
pub mod instrument;
pub mod logging;
pub mod params;
pub mod photometry;
pub mod pipeline;
pub mod units;

pub use background::{BackgroundModel, ResolvedBackground};
pub use collaborators::{
    DarkPreparer, DirectSeedProducts, ObservationGenerator, SedSynthesizer, SeedImageGenerator,
};
pub use config::{ConfigError, RunConfig, SimulationOptions};
pub use disperser::{DirectSeed, SourceClass};
pub use instrument::{Instrument, Module};
pub use logging::RunLog;
pub use pipeline::{Collaborators, PipelineError, PipelineStage, SimulationOutput, WfssSimulation};
pub use units::{SeedMetadata, SeedUnits};
