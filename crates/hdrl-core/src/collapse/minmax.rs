use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::view::ImageListView;

use super::{mean_with_error, reduce_pixels, BlockResult, CollapseMethod};

/// Parameters for min/max rejection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MinMaxParams {
    /// Number of lowest samples dropped per pixel.
    pub nlow: usize,
    /// Number of highest samples dropped per pixel.
    pub nhigh: usize,
}

/// Mean after dropping the `nlow` lowest and `nhigh` highest good samples.
///
/// Pixels with no samples left are rejected. Extra outputs are the smallest
/// and largest retained sample.
#[derive(Clone, Debug, Default)]
pub struct MinMax {
    pub params: MinMaxParams,
}

impl MinMax {
    pub fn new(params: MinMaxParams) -> Self {
        Self { params }
    }
}

impl CollapseMethod for MinMax {
    fn name(&self) -> &str {
        "minmax"
    }

    fn extra_outputs(&self) -> &'static [&'static str] {
        &["reject_low", "reject_high"]
    }

    fn reduce(&self, block: &ImageListView<'_>) -> Result<BlockResult> {
        let MinMaxParams { nlow, nhigh } = self.params;
        reduce_pixels(block, 2, |px, extra| {
            let n = px.len();
            if nlow + nhigh >= n {
                return None;
            }
            px.sort();
            let kept = nlow..n - nhigh;
            let value = mean_with_error(&px.values[kept.clone()], &px.errors[kept.clone()])?;
            extra[0] = px.values[kept.start];
            extra[1] = px.values[kept.end - 1];
            Some((value, kept.len()))
        })
    }
}
