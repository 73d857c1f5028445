//! Shared components for the WFSS simulator
//!
//! FITS image I/O and the robust statistics used when normalizing
//! reference images live here so the simulator crate only deals in arrays.

pub mod fits;
pub mod stats;

pub use fits::{FitsError, HeaderCard, HeaderValue, ImageHdu, ImagePayload};
pub use stats::{sigma_clip, SigmaClipped};
