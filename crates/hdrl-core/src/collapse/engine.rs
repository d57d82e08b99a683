//! Parallel row-block driver for [`CollapseMethod`]s.
//!
//! Row iteration stays single-threaded: every block view is materialized
//! before the parallel region starts, and only the per-block reduction runs
//! on the rayon pool. Each task writes into its own disjoint row range of the
//! pre-allocated outputs.

use ndarray::{Array2, ArrayViewMut2, Axis};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::consts::DEFAULT_BLOCK_BYTES;
use crate::error::{HdrlError, Result};
use crate::image::Image;
use crate::imagelist::ImageList;
use crate::view::{ImageListView, ImageViewMut};

use super::CollapseMethod;

/// Input bytes held per pixel of one image: data, error and mask.
const BYTES_PER_SAMPLE: usize = 2 * std::mem::size_of::<f64>() + std::mem::size_of::<bool>();

/// Whole-image result of a collapse.
#[derive(Clone, Debug)]
pub struct CollapseResult {
    pub image: Image,
    /// Number of inputs retained at each pixel.
    pub contrib: Array2<i32>,
    /// Method-specific extra outputs, in [`CollapseMethod::extra_outputs`] order.
    pub extra: Vec<Image>,
}

/// Rows per block so that one block of `n_images` inputs of width `nx` stays
/// close to `budget` bytes. Always at least one row and at most `ny`.
pub fn block_rows_for_budget(n_images: usize, ny: usize, nx: usize, budget: usize) -> usize {
    let row_bytes = (n_images * nx * BYTES_PER_SAMPLE).max(1);
    (budget / row_bytes).clamp(1, ny.max(1))
}

/// Collapse `list` with the default per-block memory budget.
pub fn collapse(list: &ImageList, method: &dyn CollapseMethod) -> Result<CollapseResult> {
    collapse_budgeted(list, method, DEFAULT_BLOCK_BYTES)
}

/// Collapse `list` with row blocks sized for roughly `budget` input bytes.
pub fn collapse_budgeted(
    list: &ImageList,
    method: &dyn CollapseMethod,
    budget: usize,
) -> Result<CollapseResult> {
    let (ny, nx) = validate(list)?;
    let rows = block_rows_for_budget(list.len(), ny, nx, budget);
    collapse_blocked(list, method, rows)
}

/// Collapse `list` in blocks of `block_rows` rows.
///
/// All blocks run to completion. If any fails, every output is dropped and
/// the error of the lowest failing block is returned inside
/// [`HdrlError::CollapseFailed`].
pub fn collapse_blocked(
    list: &ImageList,
    method: &dyn CollapseMethod,
    block_rows: usize,
) -> Result<CollapseResult> {
    let (ny, nx) = validate(list)?;
    if block_rows == 0 {
        return Err(HdrlError::IllegalInput(
            "row block size must be positive".into(),
        ));
    }
    let block_rows = block_rows.min(ny);

    info!(
        images = list.len(),
        nx,
        ny,
        block_rows,
        method = method.name(),
        "Collapsing image list"
    );

    let mut image = Image::zeros(ny, nx);
    image.ensure_mask();
    let mut contrib = Array2::<i32>::zeros((ny, nx));
    let mut extra = method.create_extra(ny, nx);
    check_extra(method, &extra, (ny, nx))?;

    let blocks = list
        .row_slices(block_rows, 0)?
        .map(|slice| slice.map(|s| s.view))
        .collect::<Result<Vec<_>>>()?;
    let total = blocks.len();
    debug!(blocks = total, "Row blocks materialized");

    let results: Vec<Result<()>> = {
        let out_chunks = image.row_chunks_mut(block_rows);
        let contrib_chunks: Vec<ArrayViewMut2<'_, i32>> =
            contrib.axis_chunks_iter_mut(Axis(0), block_rows).collect();
        let mut extra_iters: Vec<_> = extra
            .iter_mut()
            .map(|e| e.row_chunks_mut(block_rows).into_iter())
            .collect();
        let extra_chunks: Vec<Vec<ImageViewMut<'_>>> = (0..total)
            .map(|_| extra_iters.iter_mut().filter_map(|it| it.next()).collect())
            .collect();

        blocks
            .into_par_iter()
            .zip(out_chunks)
            .zip(contrib_chunks)
            .zip(extra_chunks)
            .map(|(((view, mut out), mut counts), mut maps)| {
                reduce_block(method, &view, &mut out, &mut counts, &mut maps)
            })
            .collect()
    };

    let mut failed = 0;
    let mut first = None;
    for (idx, result) in results.into_iter().enumerate() {
        if let Err(e) = result {
            warn!(block = idx, error = %e, "Block reduction failed");
            failed += 1;
            if first.is_none() {
                first = Some(e);
            }
        }
    }
    if let Some(source) = first {
        return Err(HdrlError::CollapseFailed {
            failed,
            total,
            source: Box::new(source),
        });
    }

    info!(rejected = image.count_rejected(), "Collapse complete");
    Ok(CollapseResult {
        image,
        contrib,
        extra,
    })
}

fn validate(list: &ImageList) -> Result<(usize, usize)> {
    let (ny, nx) = list
        .dim()
        .ok_or_else(|| HdrlError::NullInput("cannot collapse an empty image list".into()))?;
    if ny == 0 || nx == 0 {
        return Err(HdrlError::IllegalInput(format!(
            "cannot collapse images of shape {:?}",
            (ny, nx)
        )));
    }
    Ok((ny, nx))
}

fn check_extra(method: &dyn CollapseMethod, extra: &[Image], dim: (usize, usize)) -> Result<()> {
    let expected = method.extra_outputs().len();
    if extra.len() != expected {
        return Err(HdrlError::IncompatibleInput(format!(
            "{} created {} extra outputs, expected {expected}",
            method.name(),
            extra.len()
        )));
    }
    if let Some(bad) = extra.iter().find(|e| e.dim() != dim) {
        return Err(HdrlError::IncompatibleInput(format!(
            "extra output shape {:?} does not match {:?}",
            bad.dim(),
            dim
        )));
    }
    Ok(())
}

fn reduce_block(
    method: &dyn CollapseMethod,
    view: &ImageListView<'_>,
    out: &mut ImageViewMut<'_>,
    counts: &mut ArrayViewMut2<'_, i32>,
    extra: &mut [ImageViewMut<'_>],
) -> Result<()> {
    let block = method.reduce(view)?;
    if block.contrib.dim() != counts.dim() {
        return Err(HdrlError::IncompatibleInput(format!(
            "contribution map shape {:?} does not match block {:?}",
            block.contrib.dim(),
            counts.dim()
        )));
    }
    if block.extra.len() != extra.len() {
        return Err(HdrlError::IncompatibleInput(format!(
            "block produced {} extra outputs, expected {}",
            block.extra.len(),
            extra.len()
        )));
    }
    out.copy_from(&block.image)?;
    counts.assign(&block.contrib);
    for (dst, src) in extra.iter_mut().zip(&block.extra) {
        dst.copy_from(src)?;
    }
    Ok(())
}
