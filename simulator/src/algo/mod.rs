//! Numerical helpers for spectra, throughput curves and trace polynomials

pub mod misc;

pub use misc::{interp, polyval, trapezoid, InterpError};
