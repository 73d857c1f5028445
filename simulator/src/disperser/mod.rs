//! Per-source-class dispersion
//!
//! A direct seed image for one source class is spread along the grism trace
//! orders described by a grism configuration file. Each populated direct
//! pixel is given a photon spectrum shape (from an SED, from several direct
//! seeds in different filters, or flat) normalized to its direct rate, and the
//! trace is walked in half-pixel steps depositing signal bilinearly.

pub mod class_disperser;
pub mod sed;
pub mod seed;
pub mod trace;

use std::path::PathBuf;

use shared::fits::FitsError;
use thiserror::Error;

use crate::photometry::spectrum::SpectrumError;
use crate::photometry::throughput::ThroughputError;

pub use class_disperser::{write_source_stamps, ClassDisperser, DispersedClassImage, SourceStamp};
pub use sed::SedCatalog;
pub use seed::{DirectSeed, SourceClass};
pub use trace::{GrismConfig, TraceOrder, TraceSample};

#[derive(Debug, Error)]
pub enum DisperserError {
    #[error("failed to read grism configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse grism configuration {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("grism configuration {0} defines no orders")]
    NoOrders(PathBuf),

    #[error("order '{order}' in {path}: {source}")]
    OrderThroughput {
        path: PathBuf,
        order: String,
        #[source]
        source: ThroughputError,
    },

    #[error("filter throughput in {path}: {source}")]
    FilterThroughput {
        path: PathBuf,
        #[source]
        source: ThroughputError,
    },

    #[error("order '{order}' in {path} needs at least one coefficient for {field}")]
    EmptyPolynomial {
        path: PathBuf,
        order: String,
        field: &'static str,
    },

    #[error("unknown trace order '{order}' (available: {available})")]
    UnknownOrder { order: String, available: String },

    #[error("failed to read SED catalog {path}: {source}")]
    SedIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse SED catalog {path}: {source}")]
    SedJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("SED for source {id}: {source}")]
    Sed {
        id: i32,
        #[source]
        source: SpectrumError,
    },

    #[error("no direct seed images supplied for {0}")]
    NoSeeds(SourceClass),

    #[error("direct seeds for {class} differ in shape: {expected:?} and {found:?}")]
    SeedShapeMismatch {
        class: SourceClass,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("segmentation map is {found:?} but the seed image is {expected:?}")]
    SegmapShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("background image is {found:?} but the frame is {expected:?}")]
    BackgroundShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("dispersed {0} image was already finalized")]
    AlreadyFinalized(SourceClass),

    #[error(transparent)]
    Fits(#[from] FitsError),
}
