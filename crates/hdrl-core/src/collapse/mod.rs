//! Statistical reduction of an image list along the image axis.
//!
//! [`engine`] splits the list into row blocks and reduces them in parallel;
//! the per-pixel statistics live in one module per method.

pub mod dispatcher;
pub mod engine;
pub mod mean;
pub mod median;
pub mod minmax;
pub mod sigma_clip;

use ndarray::{Array2, ArrayView2};

use crate::error::{HdrlError, Result};
use crate::image::{Image, PixelValue};
use crate::view::ImageListView;

pub use dispatcher::{collapse_with, method_for, CollapseOutput, RejectionMaps};
pub use engine::{
    block_rows_for_budget, collapse, collapse_blocked, collapse_budgeted, CollapseResult,
};

/// Output of reducing one row block.
#[derive(Clone, Debug)]
pub struct BlockResult {
    pub image: Image,
    /// Number of inputs that contributed to each pixel.
    pub contrib: Array2<i32>,
    /// Method-specific extra outputs, in [`CollapseMethod::extra_outputs`] order.
    pub extra: Vec<Image>,
}

/// A reduction method the collapse engine can drive.
///
/// Methods must be order-independent along the image axis and must not keep
/// state between calls, as blocks are reduced concurrently.
pub trait CollapseMethod: Sync {
    fn name(&self) -> &str;

    /// Names of the whole-image extra outputs this method fills.
    fn extra_outputs(&self) -> &'static [&'static str] {
        &[]
    }

    /// Allocate the full-size extra output buffers.
    fn create_extra(&self, ny: usize, nx: usize) -> Vec<Image> {
        self.extra_outputs()
            .iter()
            .map(|_| {
                let mut img = Image::zeros(ny, nx);
                img.ensure_mask();
                img
            })
            .collect()
    }

    fn reduce(&self, block: &ImageListView<'_>) -> Result<BlockResult>;
}

/// Good (unmasked) samples of one pixel across the image stack.
#[derive(Clone, Debug, Default)]
pub struct PixelStack {
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
}

impl PixelStack {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            values: Vec::with_capacity(n),
            errors: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.errors.clear();
    }

    pub fn push(&mut self, value: f64, error: f64) {
        self.values.push(value);
        self.errors.push(error);
    }

    /// Sort samples by value, keeping errors paired.
    pub fn sort(&mut self) {
        let mut pairs: Vec<(f64, f64)> = self
            .values
            .iter()
            .copied()
            .zip(self.errors.iter().copied())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (i, (v, e)) in pairs.into_iter().enumerate() {
            self.values[i] = v;
            self.errors[i] = e;
        }
    }

    /// Keep only samples whose value satisfies `keep`. Returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(f64) -> bool) -> usize {
        let before = self.values.len();
        let mut w = 0;
        for r in 0..before {
            if keep(self.values[r]) {
                self.values[w] = self.values[r];
                self.errors[w] = self.errors[r];
                w += 1;
            }
        }
        self.values.truncate(w);
        self.errors.truncate(w);
        before - w
    }
}

/// Mean of the samples with the error of the mean, `sqrt(sum e^2) / n`.
pub(crate) fn mean_with_error(values: &[f64], errors: &[f64]) -> Option<PixelValue> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let err = errors.iter().map(|e| e * e).sum::<f64>().sqrt() / n;
    Some(PixelValue::new(mean, err))
}

/// Run a per-pixel kernel over every pixel of a row block.
///
/// The kernel receives the pixel's good samples and a slice for its extra
/// outputs, and returns the reduced value plus the number of contributing
/// samples. Returning `None` marks the output pixel as rejected.
pub fn reduce_pixels<F>(
    block: &ImageListView<'_>,
    n_extra: usize,
    mut kernel: F,
) -> Result<BlockResult>
where
    F: FnMut(&mut PixelStack, &mut [f64]) -> Option<(PixelValue, usize)>,
{
    let (ny, nx) = block
        .dim()
        .ok_or_else(|| HdrlError::NullInput("cannot reduce an empty image list".into()))?;

    let planes: Vec<(ArrayView2<'_, f64>, ArrayView2<'_, f64>, Option<ArrayView2<'_, bool>>)> =
        block.iter().map(|v| (v.data(), v.error(), v.mask())).collect();

    let mut data = Array2::<f64>::zeros((ny, nx));
    let mut error = Array2::<f64>::zeros((ny, nx));
    let mut mask = Array2::from_elem((ny, nx), false);
    let mut contrib = Array2::<i32>::zeros((ny, nx));
    let mut extra: Vec<Array2<f64>> = (0..n_extra).map(|_| Array2::zeros((ny, nx))).collect();

    let mut stack = PixelStack::with_capacity(planes.len());
    let mut extra_px = vec![0.0f64; n_extra];

    for row in 0..ny {
        for col in 0..nx {
            let idx = [row, col];
            stack.clear();
            for (d, e, m) in &planes {
                if m.as_ref().is_some_and(|m| m[idx]) {
                    continue;
                }
                stack.push(d[idx], e[idx]);
            }

            extra_px.fill(0.0);
            match kernel(&mut stack, &mut extra_px) {
                Some((value, n)) => {
                    data[idx] = value.data;
                    error[idx] = value.error;
                    contrib[idx] = n as i32;
                    for (plane, &v) in extra.iter_mut().zip(&extra_px) {
                        plane[idx] = v;
                    }
                }
                None => mask[idx] = true,
            }
        }
    }

    let extra = extra
        .into_iter()
        .map(|plane| Image::from_raw(plane, Array2::zeros((ny, nx)), Some(mask.clone())))
        .collect();

    Ok(BlockResult {
        image: Image::from_raw(data, error, Some(mask)),
        contrib,
        extra,
    })
}
