//! Row-block iteration over images and image lists.
//!
//! Blocks of `block_rows` rows are produced top to bottom, optionally padded
//! with `overlap` halo rows on each side (clamped at the image edges). The
//! halo-free part of each block, [`RowBlock::new_ly`]..=[`RowBlock::new_uy`],
//! partitions the full row range, so results computed on padded windows can
//! be stitched back without seams.
//!
//! Iteration is single-threaded; callers that want parallelism collect the
//! views first and process them concurrently.

use crate::error::{HdrlError, Result};
use crate::image::Image;
use crate::imagelist::ImageList;
use crate::view::{ImageListView, ImageListViewMut, ImageView};

/// Rows covered by one iteration step, 1-based and inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowBlock {
    /// First row of the window, halo included.
    pub ly: usize,
    /// Last row of the window, halo included.
    pub uy: usize,
    /// First row not covered by a previous block.
    pub new_ly: usize,
    /// Last row owned by this block.
    pub new_uy: usize,
}

impl RowBlock {
    /// Number of rows in the window.
    pub fn rows(&self) -> usize {
        self.uy + 1 - self.ly
    }

    /// The owned rows expressed relative to the window (1-based).
    pub fn new_rows_in_window(&self) -> (usize, usize) {
        (self.new_ly + 1 - self.ly, self.new_uy + 1 - self.ly)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    BeforeFirst,
    InProgress,
    Exhausted,
}

/// Position bookkeeping shared by the read-only and mutable iterators.
#[derive(Clone, Debug)]
pub struct RowCursor {
    pos: usize,
    block_rows: usize,
    overlap: usize,
    ny: usize,
    last: Option<RowBlock>,
}

impl RowCursor {
    /// Block size and halo are clamped to `ny`; larger values cover the same
    /// rows.
    pub fn new(ny: usize, block_rows: usize, overlap: usize) -> Result<Self> {
        if block_rows == 0 {
            return Err(HdrlError::IllegalInput(
                "row block size must be positive".into(),
            ));
        }
        Ok(Self {
            pos: 1,
            block_rows: block_rows.min(ny.max(1)),
            overlap: overlap.min(ny),
            ny,
            last: None,
        })
    }

    /// Total number of blocks, independent of the overlap.
    pub fn length(&self) -> usize {
        self.ny.div_ceil(self.block_rows)
    }

    pub fn remaining(&self) -> usize {
        if self.pos > self.ny {
            0
        } else {
            (self.ny - self.pos) / self.block_rows + 1
        }
    }

    pub fn state(&self) -> CursorState {
        if self.pos > self.ny {
            CursorState::Exhausted
        } else if self.last.is_none() {
            CursorState::BeforeFirst
        } else {
            CursorState::InProgress
        }
    }

    /// The most recently produced block.
    pub fn last(&self) -> Option<RowBlock> {
        self.last
    }

    pub fn advance(&mut self) -> Option<RowBlock> {
        if self.pos > self.ny {
            return None;
        }
        let new_uy = (self.pos.saturating_add(self.block_rows) - 1).min(self.ny);
        let block = RowBlock {
            ly: self.pos.saturating_sub(self.overlap).max(1),
            uy: new_uy.saturating_add(self.overlap).min(self.ny),
            new_ly: self.pos,
            new_uy,
        };
        self.pos = new_uy + 1;
        self.last = Some(block);
        Some(block)
    }
}

/// Something a read-only row view can be cut from.
pub trait RowSource {
    type View;

    fn total_rows(&self) -> usize;

    fn rows(&self, ly: usize, uy: usize) -> Result<Self::View>;
}

impl<'a> RowSource for &'a Image {
    type View = ImageView<'a>;

    fn total_rows(&self) -> usize {
        self.ny()
    }

    fn rows(&self, ly: usize, uy: usize) -> Result<ImageView<'a>> {
        Image::row_view(*self, ly, uy)
    }
}

impl<'a> RowSource for &'a ImageList {
    type View = ImageListView<'a>;

    fn total_rows(&self) -> usize {
        self.dim().map_or(0, |(ny, _)| ny)
    }

    fn rows(&self, ly: usize, uy: usize) -> Result<ImageListView<'a>> {
        ImageList::row_view(*self, ly, uy)
    }
}

impl<'a> RowSource for ImageListView<'a> {
    type View = ImageListView<'a>;

    fn total_rows(&self) -> usize {
        self.ny()
    }

    fn rows(&self, ly: usize, uy: usize) -> Result<ImageListView<'a>> {
        self.row_view(ly, uy)
    }
}

/// One step of a row iteration: the window rows and its view.
#[derive(Clone, Debug)]
pub struct RowSlice<V> {
    pub block: RowBlock,
    pub view: V,
}

/// Iterator over read-only row views. Produced views are independent of
/// each other and may be kept after the iterator moves on.
#[derive(Clone, Debug)]
pub struct RowSlices<S> {
    source: S,
    cursor: RowCursor,
}

impl<S: RowSource> RowSlices<S> {
    pub fn new(source: S, block_rows: usize, overlap: usize) -> Result<Self> {
        let cursor = RowCursor::new(source.total_rows(), block_rows, overlap)?;
        Ok(Self { source, cursor })
    }

    /// Total number of blocks, `ceil(rows / block_rows)`.
    pub fn length(&self) -> usize {
        self.cursor.length()
    }

    pub fn state(&self) -> CursorState {
        self.cursor.state()
    }

    /// Halo-free rows of the most recently produced block.
    pub fn last_new_rows(&self) -> Option<(usize, usize)> {
        self.cursor.last().map(|b| (b.new_ly, b.new_uy))
    }
}

impl<S: RowSource> Iterator for RowSlices<S> {
    type Item = Result<RowSlice<S::View>>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.cursor.advance()?;
        Some(
            self.source
                .rows(block.ly, block.uy)
                .map(|view| RowSlice { block, view }),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.cursor.remaining();
        (n, Some(n))
    }
}

impl<S: RowSource> ExactSizeIterator for RowSlices<S> {}

/// Iterator over mutable row views of an image list.
///
/// Each call to [`RowSlicesMut::next_slice`] invalidates the previous view,
/// so at most one mutable view exists at a time. Overlapping halos are
/// therefore allowed.
#[derive(Debug)]
pub struct RowSlicesMut<'a> {
    list: &'a mut ImageList,
    cursor: RowCursor,
}

impl<'a> RowSlicesMut<'a> {
    pub fn new(list: &'a mut ImageList, block_rows: usize, overlap: usize) -> Result<Self> {
        let ny = list.dim().map_or(0, |(ny, _)| ny);
        let cursor = RowCursor::new(ny, block_rows, overlap)?;
        Ok(Self { list, cursor })
    }

    pub fn length(&self) -> usize {
        self.cursor.length()
    }

    pub fn state(&self) -> CursorState {
        self.cursor.state()
    }

    pub fn last_new_rows(&self) -> Option<(usize, usize)> {
        self.cursor.last().map(|b| (b.new_ly, b.new_uy))
    }

    pub fn next_slice(&mut self) -> Option<Result<RowSlice<ImageListViewMut<'_>>>> {
        let block = self.cursor.advance()?;
        Some(
            self.list
                .row_view_mut(block.ly, block.uy)
                .map(|view| RowSlice { block, view }),
        )
    }
}

impl Image {
    pub fn row_slices(&self, block_rows: usize, overlap: usize) -> Result<RowSlices<&Image>> {
        RowSlices::new(self, block_rows, overlap)
    }
}

impl ImageList {
    pub fn row_slices(
        &self,
        block_rows: usize,
        overlap: usize,
    ) -> Result<RowSlices<&ImageList>> {
        RowSlices::new(self, block_rows, overlap)
    }

    pub fn row_slices_mut(
        &mut self,
        block_rows: usize,
        overlap: usize,
    ) -> Result<RowSlicesMut<'_>> {
        RowSlicesMut::new(self, block_rows, overlap)
    }
}
