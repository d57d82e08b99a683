#![allow(dead_code)]

use ndarray::Array2;

use hdrl_core::image::Image;
use hdrl_core::imagelist::ImageList;

/// Image filled with `value` and a constant error.
pub fn constant_image(ny: usize, nx: usize, value: f64, error: f64) -> Image {
    Image::new(
        Array2::from_elem((ny, nx), value),
        Array2::from_elem((ny, nx), error),
    )
    .expect("planes share a shape")
}

/// Image whose pixel at (row, col) is `f(row, col)`, with error `error`.
pub fn image_from_fn(ny: usize, nx: usize, error: f64, f: impl Fn(usize, usize) -> f64) -> Image {
    Image::new(
        Array2::from_shape_fn((ny, nx), |(r, c)| f(r, c)),
        Array2::from_elem((ny, nx), error),
    )
    .expect("planes share a shape")
}

/// List of `n` images built by `make(i)`.
pub fn list_of(n: usize, make: impl Fn(usize) -> Image) -> ImageList {
    ImageList::try_from((0..n).map(make).collect::<Vec<_>>()).expect("images share a shape")
}

/// Deterministic pseudo-random stack: `n` images of `ny` x `nx` with values
/// spread around 100 and errors between 1 and 2.
pub fn noisy_list(n: usize, ny: usize, nx: usize) -> ImageList {
    list_of(n, |i| {
        let mut img = Image::new(
            Array2::from_shape_fn((ny, nx), |(r, c)| {
                let h = (i * 7919 + r * 104_729 + c * 1_299_709) % 1000;
                100.0 + h as f64 / 50.0 - 10.0
            }),
            Array2::from_shape_fn((ny, nx), |(r, c)| 1.0 + ((i + r + c) % 5) as f64 / 4.0),
        )
        .expect("planes share a shape");
        // a few rejected pixels so masks take part
        if i % 3 == 0 {
            img.reject(1 + i % nx, 1 + (i * 2) % ny).expect("pixel in range");
        }
        img
    })
}

/// Ten constant 265x265 images of value 5, the last one with +900 at `(x, y)`.
pub fn outlier_stack(x: usize, y: usize) -> ImageList {
    let mut list = list_of(9, |_| constant_image(265, 265, 5.0, 1.0));
    let mut outlier = constant_image(265, 265, 5.0, 1.0);
    let (value, _) = outlier.get_pixel(x, y).expect("pixel in range");
    outlier
        .set_pixel(x, y, hdrl_core::image::PixelValue::new(value.data + 900.0, value.error))
        .expect("pixel in range");
    list.push(outlier).expect("same shape");
    list
}
