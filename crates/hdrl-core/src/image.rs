use ndarray::{Array2, Zip};

use crate::error::{HdrlError, Result};

/// A pixel value together with its 1-sigma uncertainty.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PixelValue {
    pub data: f64,
    pub error: f64,
}

impl PixelValue {
    pub fn new(data: f64, error: f64) -> Self {
        Self { data, error }
    }
}

/// One numeric plane of an [`Image`] with its own optional bad-pixel mask.
///
/// `true` in the mask marks a rejected pixel. A missing mask means no pixel
/// is rejected.
#[derive(Clone, Debug)]
pub struct Plane {
    values: Array2<f64>,
    mask: Option<Array2<bool>>,
}

impl Plane {
    pub fn new(values: Array2<f64>) -> Self {
        Self { values, mask: None }
    }

    pub fn with_mask(values: Array2<f64>, mask: Array2<bool>) -> Result<Self> {
        if values.dim() != mask.dim() {
            return Err(HdrlError::IncompatibleInput(format!(
                "mask shape {:?} does not match plane shape {:?}",
                mask.dim(),
                values.dim()
            )));
        }
        Ok(Self {
            values,
            mask: Some(mask),
        })
    }

    /// Shape as `(rows, cols)`.
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Array2<f64> {
        &mut self.values
    }

    pub fn mask(&self) -> Option<&Array2<bool>> {
        self.mask.as_ref()
    }

    /// Mutable mask, created all-good if the plane has none yet.
    pub fn mask_mut(&mut self) -> &mut Array2<bool> {
        let dim = self.values.dim();
        self.mask.get_or_insert_with(|| Array2::from_elem(dim, false))
    }

    pub fn set_mask(&mut self, mask: Option<Array2<bool>>) -> Result<()> {
        if let Some(m) = &mask {
            if m.dim() != self.values.dim() {
                return Err(HdrlError::IncompatibleInput(format!(
                    "mask shape {:?} does not match plane shape {:?}",
                    m.dim(),
                    self.values.dim()
                )));
            }
        }
        self.mask = mask;
        Ok(())
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Array2<f64>, &mut Array2<bool>) {
        let dim = self.values.dim();
        let mask = self.mask.get_or_insert_with(|| Array2::from_elem(dim, false));
        (&mut self.values, mask)
    }
}

/// An image with per-pixel uncertainties.
///
/// Data and error planes always share one shape. Each plane carries its own
/// optional mask; the high-level pixel API keeps the two in sync, while
/// [`Image::data_plane_mut`] and [`Image::error_plane_mut`] give raw access
/// that can let them drift apart.
///
/// Pixel coordinates are 1-based (FITS convention): `x` is the column in
/// `1..=nx`, `y` the row in `1..=ny`.
#[derive(Clone, Debug)]
pub struct Image {
    data: Plane,
    error: Plane,
}

impl Image {
    pub fn new(data: Array2<f64>, error: Array2<f64>) -> Result<Self> {
        if data.dim() != error.dim() {
            return Err(HdrlError::IncompatibleInput(format!(
                "error plane shape {:?} does not match data shape {:?}",
                error.dim(),
                data.dim()
            )));
        }
        Ok(Self {
            data: Plane::new(data),
            error: Plane::new(error),
        })
    }

    /// Build an image whose error plane is all zeros.
    pub fn from_data(data: Array2<f64>) -> Self {
        let error = Array2::zeros(data.dim());
        Self {
            data: Plane::new(data),
            error: Plane::new(error),
        }
    }

    pub fn from_planes(data: Plane, error: Plane) -> Result<Self> {
        if data.dim() != error.dim() {
            return Err(HdrlError::IncompatibleInput(format!(
                "error plane shape {:?} does not match data shape {:?}",
                error.dim(),
                data.dim()
            )));
        }
        Ok(Self { data, error })
    }

    /// Assemble an image from arrays already known to share one shape.
    pub(crate) fn from_raw(
        data: Array2<f64>,
        error: Array2<f64>,
        mask: Option<Array2<bool>>,
    ) -> Self {
        debug_assert_eq!(data.dim(), error.dim());
        Self {
            data: Plane {
                values: data,
                mask: mask.clone(),
            },
            error: Plane {
                values: error,
                mask,
            },
        }
    }

    pub fn zeros(ny: usize, nx: usize) -> Self {
        Self::from_data(Array2::zeros((ny, nx)))
    }

    pub fn nx(&self) -> usize {
        self.data.values.ncols()
    }

    pub fn ny(&self) -> usize {
        self.data.values.nrows()
    }

    /// Shape as `(ny, nx)`.
    pub fn dim(&self) -> (usize, usize) {
        self.data.values.dim()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data.values
    }

    pub fn error(&self) -> &Array2<f64> {
        &self.error.values
    }

    pub fn data_plane(&self) -> &Plane {
        &self.data
    }

    pub fn error_plane(&self) -> &Plane {
        &self.error
    }

    pub fn data_plane_mut(&mut self) -> &mut Plane {
        &mut self.data
    }

    pub fn error_plane_mut(&mut self) -> &mut Plane {
        &mut self.error
    }

    pub(crate) fn planes_mut(&mut self) -> (&mut Plane, &mut Plane) {
        (&mut self.data, &mut self.error)
    }

    /// Bad-pixel mask of the image (the data-plane mask).
    pub fn mask(&self) -> Option<&Array2<bool>> {
        self.data.mask()
    }

    /// Make sure both planes carry a mask.
    ///
    /// A plane without a mask receives a copy of the other plane's mask, or
    /// an all-good mask if neither has one. Existing masks are left as they
    /// are.
    pub fn ensure_mask(&mut self) {
        match (self.data.mask.is_some(), self.error.mask.is_some()) {
            (true, true) => {}
            (true, false) => self.error.mask = self.data.mask.clone(),
            (false, true) => self.data.mask = self.error.mask.clone(),
            (false, false) => {
                let dim = self.dim();
                self.data.mask = Some(Array2::from_elem(dim, false));
                self.error.mask = Some(Array2::from_elem(dim, false));
            }
        }
    }

    /// Whether the data-plane and error-plane masks reject the same pixels.
    /// An absent mask counts as all-good.
    pub fn masks_consistent(&self) -> bool {
        match (&self.data.mask, &self.error.mask) {
            (None, None) => true,
            (Some(m), None) | (None, Some(m)) => !m.iter().any(|&b| b),
            (Some(a), Some(b)) => a == b,
        }
    }

    /// Index of pixel `(x, y)` into the row-major planes.
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

    /// Value at `(x, y)` and whether the pixel is rejected.
    pub fn get_pixel(&self, x: usize, y: usize) -> Result<(PixelValue, bool)> {
        let idx = self.index(x, y)?;
        let value = PixelValue::new(self.data.values[idx], self.error.values[idx]);
        let rejected = self.data.mask.as_ref().is_some_and(|m| m[idx]);
        Ok((value, rejected))
    }

    /// Store a value at `(x, y)`. The pixel's rejection state is unchanged.
    pub fn set_pixel(&mut self, x: usize, y: usize, value: PixelValue) -> Result<()> {
        if value.error < 0.0 {
            return Err(HdrlError::IllegalInput(format!(
                "negative error {} at ({x}, {y})",
                value.error
            )));
        }
        let idx = self.index(x, y)?;
        self.data.values[idx] = value.data;
        self.error.values[idx] = value.error;
        Ok(())
    }

    pub fn reject(&mut self, x: usize, y: usize) -> Result<()> {
        self.set_rejected(x, y, true)
    }

    pub fn accept(&mut self, x: usize, y: usize) -> Result<()> {
        self.set_rejected(x, y, false)
    }

    fn set_rejected(&mut self, x: usize, y: usize, rejected: bool) -> Result<()> {
        let idx = self.index(x, y)?;
        if !rejected && self.data.mask.is_none() && self.error.mask.is_none() {
            return Ok(());
        }
        self.data.mask_mut()[idx] = rejected;
        self.error.mask_mut()[idx] = rejected;
        Ok(())
    }

    pub fn is_rejected(&self, x: usize, y: usize) -> Result<bool> {
        let idx = self.index(x, y)?;
        Ok(self.data.mask.as_ref().is_some_and(|m| m[idx]))
    }

    pub fn count_rejected(&self) -> usize {
        self.data
            .mask
            .as_ref()
            .map_or(0, |m| m.iter().filter(|&&b| b).count())
    }

    fn check_same_shape(&self, other: &Image) -> Result<()> {
        if self.dim() != other.dim() {
            return Err(HdrlError::IncompatibleInput(format!(
                "image shapes differ: {:?} vs {:?}",
                self.dim(),
                other.dim()
            )));
        }
        Ok(())
    }

    /// Merge `other`'s bad pixels into this image's masks.
    fn merge_mask(&mut self, other: &Image) {
        if let Some(om) = other.mask() {
            if !om.iter().any(|&b| b) {
                return;
            }
            self.ensure_mask();
            for plane in [&mut self.data, &mut self.error] {
                let m = plane.mask_mut();
                Zip::from(m).and(om).for_each(|a, &b| *a |= b);
            }
        }
    }

    /// Pixel-wise sum; errors add in quadrature, bad pixels are merged.
    pub fn add(&mut self, other: &Image) -> Result<()> {
        self.check_same_shape(other)?;
        self.data.values += &other.data.values;
        Zip::from(&mut self.error.values)
            .and(&other.error.values)
            .for_each(|e, &oe| *e = e.hypot(oe));
        self.merge_mask(other);
        Ok(())
    }

    /// Pixel-wise difference; errors add in quadrature, bad pixels are merged.
    pub fn sub(&mut self, other: &Image) -> Result<()> {
        self.check_same_shape(other)?;
        self.data.values -= &other.data.values;
        Zip::from(&mut self.error.values)
            .and(&other.error.values)
            .for_each(|e, &oe| *e = e.hypot(oe));
        self.merge_mask(other);
        Ok(())
    }

    /// Multiply by a scalar with uncertainty, propagating to first order.
    pub fn mul_scalar(&mut self, value: PixelValue) {
        Zip::from(&mut self.data.values)
            .and(&mut self.error.values)
            .for_each(|d, e| {
                let a = *d;
                *d = a * value.data;
                *e = (*e * value.data).hypot(a * value.error);
            });
    }
}
