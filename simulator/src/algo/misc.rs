//! Interpolation, polynomial and quadrature helpers shared by the photometry
//! and trace code.
//!
//! Tables passed to the lookup functions are validated once with
//! [`validate_table`]; the per-sample functions then assume sorted abscissae
//! and never fail, which keeps them usable in the inner dispersion loops.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum InterpError {
    #[error("Value {0} is out of bounds for interpolation range [{1}, {2}]")]
    OutOfBounds(f64, f64, f64),
    #[error("Input vectors must have at least 2 points")]
    InsufficientData,
    #[error("Input vectors must have the same length")]
    MismatchedLengths,
    #[error("X values must be strictly increasing")]
    UnsortedData,
    #[error("Table contains a non-finite value")]
    NonFinite,
}

/// Check that `xs`/`ys` form a usable lookup table
///
/// Requires matching lengths, at least two points, finite values, and
/// strictly increasing `xs`.
pub fn validate_table(xs: &[f64], ys: &[f64]) -> Result<(), InterpError> {
    if xs.len() != ys.len() {
        return Err(InterpError::MismatchedLengths);
    }
    if xs.len() < 2 {
        return Err(InterpError::InsufficientData);
    }
    if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
        return Err(InterpError::NonFinite);
    }
    if xs.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(InterpError::UnsortedData);
    }
    Ok(())
}

/// Index `i` such that `xs[i] <= x <= xs[i + 1]`, assuming `x` is in range
fn segment(x: f64, xs: &[f64]) -> usize {
    let idx = xs.partition_point(|probe| *probe <= x);
    idx.saturating_sub(1).min(xs.len() - 2)
}

fn lerp_segment(x: f64, xs: &[f64], ys: &[f64], i: usize) -> f64 {
    let t = (x - xs[i]) / (xs[i + 1] - xs[i]);
    ys[i] + t * (ys[i + 1] - ys[i])
}

/// Linear interpolation that fails outside the table
///
/// # Errors
///
/// * `InterpError::OutOfBounds` - x is outside the range \\[xs\\[0\\], xs\\[n-1\\]\\]
/// * Any error from [`validate_table`]
pub fn interp(x: f64, xs: &[f64], ys: &[f64]) -> Result<f64, InterpError> {
    validate_table(xs, ys)?;

    let min_x = xs[0];
    let max_x = xs[xs.len() - 1];
    if !(min_x..=max_x).contains(&x) {
        return Err(InterpError::OutOfBounds(x, min_x, max_x));
    }
    Ok(lerp_segment(x, xs, ys, segment(x, xs)))
}

/// Linear interpolation returning zero outside a validated table
pub fn interp_or_zero(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    if x < xs[0] || x > xs[xs.len() - 1] || x.is_nan() {
        return 0.0;
    }
    lerp_segment(x, xs, ys, segment(x, xs))
}

/// Linear interpolation holding the end values outside a validated table
pub fn interp_clamped(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let last = xs.len() - 1;
    if x <= xs[0] {
        ys[0]
    } else if x >= xs[last] {
        ys[last]
    } else {
        lerp_segment(x, xs, ys, segment(x, xs))
    }
}

/// Evaluate a polynomial with coefficients in ascending powers of `t`
pub fn polyval(coefficients: &[f64], t: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * t + c)
}

/// Trapezoidal integral of tabulated samples
pub fn trapezoid(xs: &[f64], ys: &[f64]) -> f64 {
    xs.windows(2)
        .zip(ys.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[0] + y[1]) / 2.0)
        .sum()
}
