use std::f64::consts::FRAC_PI_2;

use crate::error::Result;
use crate::image::PixelValue;
use crate::view::ImageListView;

use super::{mean_with_error, reduce_pixels, BlockResult, CollapseMethod};

/// Median of the good samples at each pixel.
///
/// The error is the error of the mean scaled by `sqrt(pi / 2)`, the
/// asymptotic efficiency loss of the median for Gaussian noise. For two or
/// fewer samples the median equals the mean and so does its error.
#[derive(Clone, Copy, Debug, Default)]
pub struct Median;

impl CollapseMethod for Median {
    fn name(&self) -> &str {
        "median"
    }

    fn reduce(&self, block: &ImageListView<'_>) -> Result<BlockResult> {
        reduce_pixels(block, 0, |px, _| {
            let n = px.len();
            let mean = mean_with_error(&px.values, &px.errors)?;
            let error = if n > 2 {
                mean.error * FRAC_PI_2.sqrt()
            } else {
                mean.error
            };
            let median = compute_median(&mut px.values);
            Some((PixelValue::new(median, error), n))
        })
    }
}

/// Median via `select_nth_unstable`, reordering `values`. `values` must not
/// be empty.
pub(crate) fn compute_median(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 1 {
        values[0]
    } else if n % 2 == 1 {
        let mid = n / 2;
        *values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1
    } else {
        let mid = n / 2;
        values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        let upper = values[mid];
        values[..mid].select_nth_unstable_by(mid - 1, |a, b| a.total_cmp(b));
        (values[mid - 1] + upper) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_and_even() {
        assert_eq!(compute_median(&mut [0.9, 0.1, 0.5]), 0.5);
        assert_eq!(compute_median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(compute_median(&mut [4.0]), 4.0);
    }
}
