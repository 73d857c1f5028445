//! Robust image statistics
//!
//! Sigma clipping follows the classic iterative scheme: compute the mean and
//! population standard deviation of the surviving samples, drop everything
//! outside `[mean - low * std, mean + high * std]`, and repeat until a pass
//! removes nothing.

/// Result of an iterative sigma clip
#[derive(Debug, Clone, PartialEq)]
pub struct SigmaClipped {
    /// Mean of the surviving samples
    pub mean: f64,
    /// Lower rejection bound of the final pass
    pub lower: f64,
    /// Upper rejection bound of the final pass
    pub upper: f64,
    /// Number of surviving samples
    pub kept: usize,
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Iteratively sigma clip a set of samples
///
/// Non-finite samples are discarded before the first pass.
///
/// # Arguments
/// * `values` - Samples to clip (any iterator of f64, e.g. `array.iter().copied()`)
/// * `low` - Lower rejection threshold in standard deviations
/// * `high` - Upper rejection threshold in standard deviations
///
/// # Returns
/// `None` when no finite samples are present, otherwise the clipped statistics
pub fn sigma_clip<I>(values: I, low: f64, high: f64) -> Option<SigmaClipped>
where
    I: IntoIterator<Item = f64>,
{
    let mut kept: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if kept.is_empty() {
        return None;
    }

    loop {
        let (mean, std) = mean_and_std(&kept);
        let lower = mean - std * low;
        let upper = mean + std * high;

        let size = kept.len();
        let mut write_idx = 0;
        for i in 0..size {
            if kept[i] >= lower && kept[i] <= upper {
                kept[write_idx] = kept[i];
                write_idx += 1;
            }
        }
        kept.truncate(write_idx);

        if write_idx == size {
            return Some(SigmaClipped {
                mean,
                lower,
                upper,
                kept: size,
            });
        }
    }
}
