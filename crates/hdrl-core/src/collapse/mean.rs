use crate::error::Result;
use crate::image::PixelValue;
use crate::view::ImageListView;

use super::{mean_with_error, reduce_pixels, BlockResult, CollapseMethod};

/// Plain mean of the good samples at each pixel.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mean;

impl CollapseMethod for Mean {
    fn name(&self) -> &str {
        "mean"
    }

    fn reduce(&self, block: &ImageListView<'_>) -> Result<BlockResult> {
        reduce_pixels(block, 0, |px, _| {
            mean_with_error(&px.values, &px.errors).map(|v| (v, px.len()))
        })
    }
}

/// Inverse-variance weighted mean, `w = 1 / e^2`.
///
/// Falls back to the plain mean at pixels where any sample has a zero error.
#[derive(Clone, Copy, Debug, Default)]
pub struct WeightedMean;

impl CollapseMethod for WeightedMean {
    fn name(&self) -> &str {
        "weighted mean"
    }

    fn reduce(&self, block: &ImageListView<'_>) -> Result<BlockResult> {
        reduce_pixels(block, 0, |px, _| {
            weighted_mean(&px.values, &px.errors).map(|v| (v, px.len()))
        })
    }
}

fn weighted_mean(values: &[f64], errors: &[f64]) -> Option<PixelValue> {
    if values.is_empty() {
        return None;
    }
    if errors.iter().any(|&e| e <= 0.0) {
        return mean_with_error(values, errors);
    }
    let mut wsum = 0.0;
    let mut sum = 0.0;
    for (&v, &e) in values.iter().zip(errors) {
        let w = 1.0 / (e * e);
        wsum += w;
        sum += w * v;
    }
    Some(PixelValue::new(sum / wsum, 1.0 / wsum.sqrt()))
}
