//! Zero-copy views over images and image lists.
//!
//! A view borrows row ranges and/or image ranges of its parent, so the parent
//! cannot be dropped or modified through another path while a view is alive.
//! Read-only views skip mask creation; mutable views materialize the parent's
//! masks first so rejections made through the view land in the parent.
//!
//! Row ranges are 1-based and inclusive (`ly..=uy`), image ranges are
//! 0-based half-open like list positions.

use std::ops::Range;

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2, Axis, Zip};

use crate::error::{HdrlError, Result};
use crate::image::{Image, PixelValue};
use crate::imagelist::ImageList;

pub(crate) fn check_rows(ly: usize, uy: usize, ny: usize) -> Result<()> {
    if uy < ly {
        return Err(HdrlError::IllegalInput(format!(
            "upper row {uy} below lower row {ly}"
        )));
    }
    if ly == 0 {
        return Err(HdrlError::AccessOutOfRange {
            what: "lower row",
            index: ly,
            lo: 1,
            hi: ny,
        });
    }
    if uy > ny {
        return Err(HdrlError::AccessOutOfRange {
            what: "upper row",
            index: uy,
            lo: 1,
            hi: ny,
        });
    }
    Ok(())
}

fn with_image_index(i: usize, err: HdrlError) -> HdrlError {
    match err {
        HdrlError::IncompatibleInput(msg) => {
            HdrlError::IncompatibleInput(format!("image {i}: {msg}"))
        }
        other => other,
    }
}

fn check_images(range: &Range<usize>, len: usize) -> Result<()> {
    if range.start > range.end {
        return Err(HdrlError::IllegalInput(format!(
            "image range {}..{} is reversed",
            range.start, range.end
        )));
    }
    if range.end > len {
        return Err(HdrlError::AccessOutOfRange {
            what: "image range end",
            index: range.end,
            lo: 0,
            hi: len,
        });
    }
    Ok(())
}

/// Error plane of a read-only view: borrowed from the parent, or a zero
/// plane owned by the view when no errors were supplied.
#[derive(Clone, Debug)]
enum ErrorPlane<'a> {
    Borrowed(ArrayView2<'a, f64>),
    Synthetic(Array2<f64>),
}

impl ErrorPlane<'_> {
    fn view(&self) -> ArrayView2<'_, f64> {
        match self {
            ErrorPlane::Borrowed(v) => v.view(),
            ErrorPlane::Synthetic(a) => a.view(),
        }
    }
}

/// Read-only view over a row range of an image.
#[derive(Clone, Debug)]
pub struct ImageView<'a> {
    data: ArrayView2<'a, f64>,
    error: ErrorPlane<'a>,
    mask: Option<ArrayView2<'a, bool>>,
}

impl<'a> ImageView<'a> {
    /// Wrap bare arrays. Without `error` the view owns a zero error plane.
    pub fn new(
        data: ArrayView2<'a, f64>,
        error: Option<ArrayView2<'a, f64>>,
        mask: Option<ArrayView2<'a, bool>>,
    ) -> Result<Self> {
        if let Some(e) = &error {
            if e.dim() != data.dim() {
                return Err(HdrlError::IncompatibleInput(format!(
                    "error shape {:?} does not match data shape {:?}",
                    e.dim(),
                    data.dim()
                )));
            }
        }
        if let Some(m) = &mask {
            if m.dim() != data.dim() {
                return Err(HdrlError::IncompatibleInput(format!(
                    "mask shape {:?} does not match data shape {:?}",
                    m.dim(),
                    data.dim()
                )));
            }
        }
        let error = match error {
            Some(e) => ErrorPlane::Borrowed(e),
            None => ErrorPlane::Synthetic(Array2::zeros(data.dim())),
        };
        Ok(Self { data, error, mask })
    }

    pub fn nx(&self) -> usize {
        self.data.ncols()
    }

    pub fn ny(&self) -> usize {
        self.data.nrows()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn error(&self) -> ArrayView2<'_, f64> {
        self.error.view()
    }

    pub fn mask(&self) -> Option<ArrayView2<'_, bool>> {
        self.mask.as_ref().map(|m| m.view())
    }

    /// Whether the error plane was synthesized by this view.
    pub fn owns_error(&self) -> bool {
        matches!(self.error, ErrorPlane::Synthetic(_))
    }

    /// Narrow the view to rows `ly..=uy` (relative to this view).
    pub fn row_view(&self, ly: usize, uy: usize) -> Result<ImageView<'a>> {
        check_rows(ly, uy, self.ny())?;
        let rows = s![ly - 1..uy, ..];
        let error = match &self.error {
            ErrorPlane::Borrowed(v) => ErrorPlane::Borrowed(v.slice_move(rows)),
            ErrorPlane::Synthetic(_) => {
                ErrorPlane::Synthetic(Array2::zeros((uy + 1 - ly, self.nx())))
            }
        };
        Ok(ImageView {
            data: self.data.slice_move(rows),
            error,
            mask: self.mask.map(|m| m.slice_move(rows)),
        })
    }

    /// Copy the viewed pixels into a new image.
    pub fn to_image(&self) -> Image {
        Image::from_raw(
            self.data.to_owned(),
            self.error.view().to_owned(),
            self.mask.map(|m| m.to_owned()),
        )
    }
}

/// Mutable view over a row range of an image.
///
/// Both parent masks exist while this view is alive; [`ImageViewMut::reject`]
/// and [`ImageViewMut::accept`] update them together.
#[derive(Debug)]
pub struct ImageViewMut<'a> {
    data: ArrayViewMut2<'a, f64>,
    error: ArrayViewMut2<'a, f64>,
    mask: ArrayViewMut2<'a, bool>,
    error_mask: ArrayViewMut2<'a, bool>,
}

impl<'a> ImageViewMut<'a> {
    pub(crate) fn from_parts(
        data: ArrayViewMut2<'a, f64>,
        error: ArrayViewMut2<'a, f64>,
        mask: ArrayViewMut2<'a, bool>,
        error_mask: ArrayViewMut2<'a, bool>,
    ) -> Self {
        Self {
            data,
            error,
            mask,
            error_mask,
        }
    }

    pub fn nx(&self) -> usize {
        self.data.ncols()
    }

    pub fn ny(&self) -> usize {
        self.data.nrows()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn data_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        self.data.view_mut()
    }

    pub fn error(&self) -> ArrayView2<'_, f64> {
        self.error.view()
    }

    pub fn error_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        self.error.view_mut()
    }

    pub fn mask(&self) -> ArrayView2<'_, bool> {
        self.mask.view()
    }

    fn index(&self, x: usize, y: usize) -> Result<[usize; 2]> {
        let (ny, nx) = self.dim();
        if x == 0 || x > nx {
            return Err(HdrlError::AccessOutOfRange {
                what: "column",
                index: x,
                lo: 1,
                hi: nx,
            });
        }
        if y == 0 || y > ny {
            return Err(HdrlError::AccessOutOfRange {
                what: "row",
                index: y,
                lo: 1,
                hi: ny,
            });
        }
        Ok([y - 1, x - 1])
    }

    pub fn get_pixel(&self, x: usize, y: usize) -> Result<(PixelValue, bool)> {
        let idx = self.index(x, y)?;
        Ok((
            PixelValue::new(self.data[idx], self.error[idx]),
            self.mask[idx],
        ))
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, value: PixelValue) -> Result<()> {
        let idx = self.index(x, y)?;
        self.data[idx] = value.data;
        self.error[idx] = value.error;
        Ok(())
    }

    pub fn reject(&mut self, x: usize, y: usize) -> Result<()> {
        let idx = self.index(x, y)?;
        self.mask[idx] = true;
        self.error_mask[idx] = true;
        Ok(())
    }

    pub fn accept(&mut self, x: usize, y: usize) -> Result<()> {
        let idx = self.index(x, y)?;
        self.mask[idx] = false;
        self.error_mask[idx] = false;
        Ok(())
    }

    /// Overwrite the viewed pixels (values and rejection state) with `src`.
    pub fn copy_from(&mut self, src: &Image) -> Result<()> {
        if src.dim() != self.dim() {
            return Err(HdrlError::IncompatibleInput(format!(
                "source shape {:?} does not match view shape {:?}",
                src.dim(),
                self.dim()
            )));
        }
        self.data.assign(src.data());
        self.error.assign(src.error());
        match src.mask() {
            Some(m) => {
                self.mask.assign(m);
                self.error_mask.assign(m);
            }
            None => {
                self.mask.fill(false);
                self.error_mask.fill(false);
            }
        }
        Ok(())
    }

    /// Set rejected pixels' data and error to zero.
    pub fn zero_rejected(&mut self) {
        Zip::from(&mut self.data)
            .and(&mut self.error)
            .and(&self.mask)
            .for_each(|d, e, &bad| {
                if bad {
                    *d = 0.0;
                    *e = 0.0;
                }
            });
    }

    /// Read-only reborrow of this view.
    pub fn as_view(&self) -> ImageView<'_> {
        ImageView {
            data: self.data.view(),
            error: ErrorPlane::Borrowed(self.error.view()),
            mask: Some(self.mask.view()),
        }
    }
}

impl Image {
    /// Read-only view of the whole image. An image with no rows gives an
    /// empty view.
    pub fn view(&self) -> Result<ImageView<'_>> {
        self.rows_view(0..self.ny())
    }

    /// Read-only view of rows `ly..=uy`.
    ///
    /// No mask is created when the image has none. Fails with
    /// `IncompatibleInput` if the data and error masks disagree.
    pub fn row_view(&self, ly: usize, uy: usize) -> Result<ImageView<'_>> {
        check_rows(ly, uy, self.ny())?;
        self.rows_view(ly - 1..uy)
    }

    /// Read-only view of the 0-based row range `rows`, already bounds-checked.
    fn rows_view(&self, rows: Range<usize>) -> Result<ImageView<'_>> {
        if !self.masks_consistent() {
            return Err(HdrlError::IncompatibleInput(
                "data and error masks reject different pixels".into(),
            ));
        }
        let rows = s![rows, ..];
        let mask = self
            .data_plane()
            .mask()
            .or_else(|| self.error_plane().mask())
            .map(|m| m.slice(rows));
        Ok(ImageView {
            data: self.data().slice(rows),
            error: ErrorPlane::Borrowed(self.error().slice(rows)),
            mask,
        })
    }

    /// Mutable view of the whole image.
    pub fn view_mut(&mut self) -> ImageViewMut<'_> {
        let ny = self.ny();
        self.rows_view_mut(0..ny)
    }

    /// Mutable view of rows `ly..=uy`. Materializes the image's masks.
    pub fn row_view_mut(&mut self, ly: usize, uy: usize) -> Result<ImageViewMut<'_>> {
        check_rows(ly, uy, self.ny())?;
        Ok(self.rows_view_mut(ly - 1..uy))
    }

    fn rows_view_mut(&mut self, rows: Range<usize>) -> ImageViewMut<'_> {
        self.ensure_mask();
        let rows = s![rows, ..];
        let (data, error) = self.planes_mut();
        let (dv, dm) = data.parts_mut();
        let (ev, em) = error.parts_mut();
        ImageViewMut::from_parts(
            dv.slice_mut(rows),
            ev.slice_mut(rows),
            dm.slice_mut(rows),
            em.slice_mut(rows),
        )
    }

    /// Split the image into disjoint mutable views of `rows` rows each
    /// (the last one may be shorter). `rows` must be positive.
    pub(crate) fn row_chunks_mut(&mut self, rows: usize) -> Vec<ImageViewMut<'_>> {
        self.ensure_mask();
        let (data, error) = self.planes_mut();
        let (dv, dm) = data.parts_mut();
        let (ev, em) = error.parts_mut();
        dv.axis_chunks_iter_mut(Axis(0), rows)
            .zip(ev.axis_chunks_iter_mut(Axis(0), rows))
            .zip(dm.axis_chunks_iter_mut(Axis(0), rows))
            .zip(em.axis_chunks_iter_mut(Axis(0), rows))
            .map(|(((d, e), m), em)| ImageViewMut::from_parts(d, e, m, em))
            .collect()
    }
}

/// Read-only view over a row range and/or image range of an image list.
#[derive(Clone, Debug, Default)]
pub struct ImageListView<'a> {
    images: Vec<ImageView<'a>>,
}

impl<'a> ImageListView<'a> {
    pub fn from_views(images: Vec<ImageView<'a>>) -> Result<Self> {
        if let Some(first) = images.first() {
            if let Some(bad) = images.iter().position(|v| v.dim() != first.dim()) {
                return Err(HdrlError::IncompatibleInput(format!(
                    "view {bad} has shape {:?}, expected {:?}",
                    images[bad].dim(),
                    first.dim()
                )));
            }
        }
        Ok(Self { images })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn dim(&self) -> Option<(usize, usize)> {
        self.images.first().map(|v| v.dim())
    }

    pub fn ny(&self) -> usize {
        self.dim().map_or(0, |(ny, _)| ny)
    }

    pub fn get(&self, i: usize) -> Option<&ImageView<'a>> {
        self.images.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImageView<'a>> {
        self.images.iter()
    }

    /// Narrow every image to rows `ly..=uy`.
    pub fn row_view(&self, ly: usize, uy: usize) -> Result<ImageListView<'a>> {
        check_rows(ly, uy, self.ny())?;
        let images = self
            .images
            .iter()
            .map(|v| v.row_view(ly, uy))
            .collect::<Result<Vec<_>>>()?;
        Ok(ImageListView { images })
    }

    /// Restrict to the images at positions `range`.
    pub fn image_view(&self, range: Range<usize>) -> Result<ImageListView<'a>> {
        check_images(&range, self.images.len())?;
        Ok(ImageListView {
            images: self.images[range].to_vec(),
        })
    }

    /// Deep copy into a standalone list.
    pub fn to_list(&self) -> Result<ImageList> {
        ImageList::try_from(self.images.iter().map(|v| v.to_image()).collect::<Vec<_>>())
    }
}

/// Mutable view over a row range and/or image range of an image list.
#[derive(Debug, Default)]
pub struct ImageListViewMut<'a> {
    images: Vec<ImageViewMut<'a>>,
}

impl<'a> ImageListViewMut<'a> {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn dim(&self) -> Option<(usize, usize)> {
        self.images.first().map(|v| v.dim())
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut ImageViewMut<'a>> {
        self.images.get_mut(i)
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ImageViewMut<'a>> {
        self.images.iter_mut()
    }

    pub fn as_view(&self) -> ImageListView<'_> {
        ImageListView {
            images: self.images.iter().map(|v| v.as_view()).collect(),
        }
    }
}

impl ImageList {
    /// Read-only view of every image and row. Images with no rows give
    /// empty views, one per image.
    pub fn view(&self) -> Result<ImageListView<'_>> {
        let images = self
            .iter()
            .enumerate()
            .map(|(i, img)| img.view().map_err(|e| with_image_index(i, e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(ImageListView { images })
    }

    /// Read-only view of rows `ly..=uy` of every image.
    ///
    /// Fails with `IncompatibleInput` if any image's data and error masks
    /// disagree.
    pub fn row_view(&self, ly: usize, uy: usize) -> Result<ImageListView<'_>> {
        let ny = self.dim().map_or(0, |(ny, _)| ny);
        check_rows(ly, uy, ny)?;
        let images = self
            .iter()
            .enumerate()
            .map(|(i, img)| img.row_view(ly, uy).map_err(|e| with_image_index(i, e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(ImageListView { images })
    }

    /// Read-only view of the images at positions `range`, all rows.
    pub fn image_view(&self, range: Range<usize>) -> Result<ImageListView<'_>> {
        check_images(&range, self.len())?;
        self.view()?.image_view(range)
    }

    /// Mutable view of rows `ly..=uy` of every image.
    ///
    /// Fails with `IncompatibleInput` if a viewed image is shared with another
    /// slot or an outside handle. [`ImageList::get_mut`] or
    /// [`ImageList::duplicate`] give the slot its own copy first.
    pub fn row_view_mut(&mut self, ly: usize, uy: usize) -> Result<ImageListViewMut<'_>> {
        let ny = self.dim().map_or(0, |(ny, _)| ny);
        check_rows(ly, uy, ny)?;
        self.mut_views(0..self.len(), ly - 1..uy)
    }

    /// Mutable view of the images at positions `range`, all rows. Shared
    /// images are refused as in [`ImageList::row_view_mut`].
    pub fn image_view_mut(&mut self, range: Range<usize>) -> Result<ImageListViewMut<'_>> {
        check_images(&range, self.len())?;
        let ny = self.dim().map_or(0, |(ny, _)| ny);
        self.mut_views(range, 0..ny)
    }

    fn mut_views(
        &mut self,
        range: Range<usize>,
        rows: Range<usize>,
    ) -> Result<ImageListViewMut<'_>> {
        let start = range.start;
        let images = self.handles_mut()[range]
            .iter_mut()
            .enumerate()
            .map(|(i, h)| {
                std::sync::Arc::get_mut(h)
                    .ok_or_else(|| {
                        HdrlError::IncompatibleInput(format!(
                            "image {} is shared and cannot be viewed mutably",
                            start + i
                        ))
                    })
                    .map(|img| img.rows_view_mut(rows.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ImageListViewMut { images })
    }
}
