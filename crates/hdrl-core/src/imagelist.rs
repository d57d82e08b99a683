use std::sync::Arc;

use tracing::debug;

use crate::error::{HdrlError, Result};
use crate::image::Image;

/// An ordered, 0-indexed collection of equally shaped images.
///
/// Slots hold shared handles, so the same image may sit in several slots.
/// Replacing or removing a slot only frees the image once no other slot (or
/// outside handle) still refers to it.
#[derive(Clone, Debug, Default)]
pub struct ImageList {
    images: Vec<Arc<Image>>,
}

impl ImageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            images: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.images.capacity()
    }

    /// Common `(ny, nx)` of the images, `None` for an empty list.
    pub fn dim(&self) -> Option<(usize, usize)> {
        self.images.first().map(|img| img.dim())
    }

    pub fn get(&self, pos: usize) -> Result<&Image> {
        self.images
            .get(pos)
            .map(|img| img.as_ref())
            .ok_or_else(|| self.out_of_range(pos))
    }

    /// Shared handle to the image at `pos`, for inserting it elsewhere.
    pub fn handle(&self, pos: usize) -> Result<Arc<Image>> {
        self.images
            .get(pos)
            .cloned()
            .ok_or_else(|| self.out_of_range(pos))
    }

    /// Mutable access to the image at `pos`.
    ///
    /// If the image is shared with another slot or an outside handle, this
    /// slot first receives its own copy so the other holders see no change.
    pub fn get_mut(&mut self, pos: usize) -> Result<&mut Image> {
        let err = self.out_of_range(pos);
        self.images
            .get_mut(pos)
            .map(Arc::make_mut)
            .ok_or(err)
    }

    /// Whether the image at `pos` also occupies another slot.
    pub fn is_aliased(&self, pos: usize) -> bool {
        let Some(target) = self.images.get(pos) else {
            return false;
        };
        self.images
            .iter()
            .enumerate()
            .any(|(i, img)| i != pos && Arc::ptr_eq(img, target))
    }

    /// Insert `image` at `pos`.
    ///
    /// `pos == len()` appends, doubling the capacity when full. `pos < len()`
    /// replaces the current occupant. The image must match the shape of the
    /// images already present.
    pub fn set(&mut self, image: impl Into<Arc<Image>>, pos: usize) -> Result<()> {
        let image = image.into();
        let size = self.images.len();
        if pos > size {
            return Err(HdrlError::AccessOutOfRange {
                what: "image list position",
                index: pos,
                lo: 0,
                hi: size,
            });
        }

        // Compare against any element that survives the insertion.
        if let Some(reference) = self
            .images
            .iter()
            .enumerate()
            .find(|(i, _)| *i != pos)
            .map(|(_, img)| img)
        {
            if reference.dim() != image.dim() {
                return Err(HdrlError::IncompatibleInput(format!(
                    "image shape {:?} does not match list shape {:?}",
                    image.dim(),
                    reference.dim()
                )));
            }
        }

        if pos == size {
            if size == self.images.capacity() {
                self.images.reserve_exact(size.max(1));
            }
            self.images.push(image);
        } else {
            if self.is_aliased(pos) {
                debug!(pos, "overwriting slot whose image is still referenced elsewhere");
            }
            self.images[pos] = image;
        }
        Ok(())
    }

    /// Append an image, see [`ImageList::set`].
    pub fn push(&mut self, image: impl Into<Arc<Image>>) -> Result<()> {
        let pos = self.images.len();
        self.set(image, pos)
    }

    /// Remove the image at `pos` and hand it back, shifting later images down.
    /// The capacity is halved once fewer than half the slots are in use.
    pub fn unset(&mut self, pos: usize) -> Result<Arc<Image>> {
        if pos >= self.images.len() {
            return Err(self.out_of_range(pos));
        }
        let image = self.images.remove(pos);
        let capacity = self.images.capacity();
        if self.images.len() < capacity / 2 {
            self.images.shrink_to(capacity / 2);
        }
        Ok(image)
    }

    /// Deep copy: every slot of the new list owns a fresh copy of its image.
    pub fn duplicate(&self) -> Self {
        Self {
            images: self
                .images
                .iter()
                .map(|img| Arc::new(img.as_ref().clone()))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Image> + '_ {
        self.images.iter().map(|img| img.as_ref())
    }

    pub(crate) fn handles_mut(&mut self) -> &mut [Arc<Image>] {
        &mut self.images
    }

    fn out_of_range(&self, pos: usize) -> HdrlError {
        HdrlError::AccessOutOfRange {
            what: "image list position",
            index: pos,
            lo: 0,
            hi: self.images.len().saturating_sub(1),
        }
    }
}

impl TryFrom<Vec<Image>> for ImageList {
    type Error = HdrlError;

    fn try_from(images: Vec<Image>) -> Result<Self> {
        let mut list = ImageList::with_capacity(images.len());
        for image in images {
            list.push(image)?;
        }
        Ok(list)
    }
}
