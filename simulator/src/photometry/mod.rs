//! Photometry models: spectra, throughput curves, pointing geometry and the
//! zodiacal background

pub mod pointing;
pub mod spectrum;
pub mod throughput;
pub mod zodical;

pub use pointing::{EclipticCoordinates, Pointing, SolarAngularCoordinates};
pub use spectrum::{SampledSpectrum, SpectrumError, CGS};
pub use throughput::{Throughput, ThroughputError, ThroughputTable};
pub use zodical::{ZodicalError, ZodicalLight};
