use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_CLIP_ITERATIONS, DEFAULT_KAPPA, MAD_TO_SIGMA};
use crate::error::{HdrlError, Result};
use crate::image::PixelValue;
use crate::view::ImageListView;

use super::median::compute_median;
use super::{mean_with_error, reduce_pixels, BlockResult, CollapseMethod, PixelStack};

/// Parameters for kappa-sigma clipped mean stacking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SigmaClipParams {
    /// Samples below `median - kappa_low * sigma` are rejected (default: 3).
    pub kappa_low: f64,
    /// Samples above `median + kappa_high * sigma` are rejected (default: 3).
    pub kappa_high: f64,
    /// Maximum number of rejection iterations (default: 3).
    pub niter: usize,
}

impl Default for SigmaClipParams {
    fn default() -> Self {
        Self {
            kappa_low: DEFAULT_KAPPA,
            kappa_high: DEFAULT_KAPPA,
            niter: DEFAULT_CLIP_ITERATIONS,
        }
    }
}

impl SigmaClipParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.kappa_low >= 0.0 && self.kappa_high >= 0.0) {
            return Err(HdrlError::IllegalInput(format!(
                "sigma clip kappas must be non-negative, got {} / {}",
                self.kappa_low, self.kappa_high
            )));
        }
        Ok(())
    }
}

/// Kappa-sigma clipped mean.
///
/// Per pixel: estimate the centre with the median and the spread with the
/// scaled median absolute deviation, reject samples outside
/// `[median - kappa_low * sigma, median + kappa_high * sigma]`, and repeat on
/// the survivors until nothing changes or `niter` passes ran. The result is
/// the mean of the survivors. Extra outputs are the final low and high
/// rejection thresholds.
#[derive(Clone, Debug, Default)]
pub struct SigmaClip {
    pub params: SigmaClipParams,
}

impl SigmaClip {
    pub fn new(params: SigmaClipParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }
}

impl CollapseMethod for SigmaClip {
    fn name(&self) -> &str {
        "sigma clip"
    }

    fn extra_outputs(&self) -> &'static [&'static str] {
        &["reject_low", "reject_high"]
    }

    fn reduce(&self, block: &ImageListView<'_>) -> Result<BlockResult> {
        let mut scratch = Vec::new();
        reduce_pixels(block, 2, |px, extra| {
            let (value, lo, hi) = clip_pixel(px, &self.params, &mut scratch)?;
            extra[0] = lo;
            extra[1] = hi;
            Some((value, px.len()))
        })
    }
}

/// Clip one pixel stack in place. Returns the clipped mean and the final
/// `(low, high)` thresholds.
fn clip_pixel(
    px: &mut PixelStack,
    params: &SigmaClipParams,
    scratch: &mut Vec<f64>,
) -> Option<(PixelValue, f64, f64)> {
    if px.is_empty() {
        return None;
    }
    let mut lo = px.values.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = px.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    for _ in 0..params.niter {
        scratch.clear();
        scratch.extend_from_slice(&px.values);
        let median = compute_median(scratch);
        for v in scratch.iter_mut() {
            *v = (*v - median).abs();
        }
        let sigma = compute_median(scratch) * MAD_TO_SIGMA;

        lo = median - params.kappa_low * sigma;
        hi = median + params.kappa_high * sigma;
        let rejected = px.retain(|v| v >= lo && v <= hi);
        if rejected == 0 || px.is_empty() {
            break;
        }
    }

    let value = mean_with_error(&px.values, &px.errors)?;
    Some((value, lo, hi))
}
