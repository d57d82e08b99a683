use std::path::Path;

use image::{GrayImage, ImageFormat, Luma};
use ndarray::{Array2, ArrayView2};

use crate::error::{HdrlError, Result};
use crate::image::Image;

/// Largest value representable in a 16-bit output file.
const U16_MAX: f64 = 65535.0;

/// How the error plane of a loaded image is derived from its counts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ErrorModel {
    /// The same 1-sigma error at every pixel.
    Constant(f64),
    /// Shot noise plus read noise: `sqrt(max(v, 0) / gain + read_noise^2)`.
    Poisson { gain: f64, read_noise: f64 },
}

impl Default for ErrorModel {
    fn default() -> Self {
        ErrorModel::Constant(0.0)
    }
}

impl ErrorModel {
    fn validate(&self) -> Result<()> {
        match *self {
            ErrorModel::Constant(e) if !(e >= 0.0) => Err(HdrlError::IllegalInput(format!(
                "constant error must be non-negative, got {e}"
            ))),
            ErrorModel::Poisson { gain, .. } if !(gain > 0.0) => Err(HdrlError::IllegalInput(
                format!("gain must be positive, got {gain}"),
            )),
            ErrorModel::Poisson { read_noise, .. } if !(read_noise >= 0.0) => {
                Err(HdrlError::IllegalInput(format!(
                    "read noise must be non-negative, got {read_noise}"
                )))
            }
            _ => Ok(()),
        }
    }

    fn error_for(&self, value: f64) -> f64 {
        match *self {
            ErrorModel::Constant(e) => e,
            ErrorModel::Poisson { gain, read_noise } => {
                (value.max(0.0) / gain + read_noise * read_noise).sqrt()
            }
        }
    }
}

/// Load a grayscale image file as 16-bit counts, deriving errors from `model`.
pub fn load_image(path: &Path, model: ErrorModel) -> Result<Image> {
    model.validate()?;
    let img = image::open(path)?;
    let gray = img.to_luma16();
    let (w, h) = gray.dimensions();
    let data = Array2::from_shape_fn((h as usize, w as usize), |(row, col)| {
        f64::from(gray.get_pixel(col as u32, row as u32).0[0])
    });
    let error = data.mapv(|v| model.error_for(v));
    Image::new(data, error)
}

fn raster_size(plane: ArrayView2<'_, f64>) -> Result<(u32, u32)> {
    let (ny, nx) = plane.dim();
    match (u32::try_from(nx), u32::try_from(ny)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(HdrlError::IllegalInput(format!(
            "image of shape {:?} too large to save",
            (ny, nx)
        ))),
    }
}

fn write_tiff(plane: ArrayView2<'_, f64>, path: &Path) -> Result<()> {
    let (w, h) = raster_size(plane)?;
    let pixels: Vec<u16> = plane
        .iter()
        .map(|&v| v.clamp(0.0, U16_MAX).round() as u16)
        .collect();

    let img = image::ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w, h, pixels)
        .ok_or_else(|| HdrlError::IllegalInput("pixel buffer does not match image size".into()))?;
    img.save_with_format(path, ImageFormat::Tiff)?;
    Ok(())
}

fn write_png(plane: ArrayView2<'_, f64>, path: &Path) -> Result<()> {
    let (w, h) = raster_size(plane)?;

    let mut img = GrayImage::new(w, h);
    for ((row, col), &v) in plane.indexed_iter() {
        let val = (v.clamp(0.0, U16_MAX) / 257.0).round() as u8;
        img.put_pixel(col as u32, row as u32, Luma([val]));
    }

    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

fn write_plane(plane: ArrayView2<'_, f64>, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => write_png(plane, path),
        _ => write_tiff(plane, path),
    }
}

/// Save the data plane as 16-bit grayscale TIFF, clamping to `0..=65535`.
pub fn save_tiff(image: &Image, path: &Path) -> Result<()> {
    write_tiff(image.data().view(), path)
}

/// Save the data plane as 8-bit grayscale PNG (16-bit counts scaled down).
pub fn save_png(image: &Image, path: &Path) -> Result<()> {
    write_png(image.data().view(), path)
}

/// Save an image, choosing the format from the file extension (TIFF by default).
pub fn save_image(image: &Image, path: &Path) -> Result<()> {
    write_plane(image.data().view(), path)
}

/// Save the error plane, with the same format rules as [`save_image`].
pub fn save_error_image(image: &Image, path: &Path) -> Result<()> {
    write_plane(image.error().view(), path)
}

/// Save the bad-pixel mask: rejected pixels full scale, good pixels 0.
pub fn save_mask_image(image: &Image, path: &Path) -> Result<()> {
    let mask = match image.mask() {
        Some(m) => m.mapv(|bad| if bad { U16_MAX } else { 0.0 }),
        None => Array2::zeros(image.dim()),
    };
    write_plane(mask.view(), path)
}
