mod common;

use std::sync::Arc;

use hdrl_core::error::HdrlError;
use hdrl_core::image::{Image, PixelValue};
use hdrl_core::imagelist::ImageList;

use common::constant_image;

// ---------------------------------------------------------------------------
// Insertion and shape checks
// ---------------------------------------------------------------------------

#[test]
fn test_set_appends_and_replaces() {
    let mut list = ImageList::new();
    list.set(constant_image(3, 4, 1.0, 0.1), 0).unwrap();
    list.set(constant_image(3, 4, 2.0, 0.1), 1).unwrap();
    list.set(constant_image(3, 4, 9.0, 0.1), 0).unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list.dim(), Some((3, 4)));
    assert_eq!(list.get(0).unwrap().data()[[0, 0]], 9.0);
}

#[test]
fn test_set_past_end_rejected() {
    let mut list = ImageList::new();
    let err = list.set(constant_image(2, 2, 0.0, 0.0), 1).unwrap_err();
    assert!(matches!(err, HdrlError::AccessOutOfRange { .. }));
}

#[test]
fn test_shape_mismatch_rejected() {
    let mut list = ImageList::new();
    list.push(constant_image(3, 4, 1.0, 0.1)).unwrap();
    let err = list.push(constant_image(4, 3, 1.0, 0.1)).unwrap_err();
    assert!(matches!(err, HdrlError::IncompatibleInput(_)));
    assert_eq!(list.len(), 1);
}

#[test]
fn test_single_element_can_change_shape() {
    let mut list = ImageList::new();
    list.push(constant_image(3, 4, 1.0, 0.1)).unwrap();
    list.set(constant_image(5, 5, 1.0, 0.1), 0).unwrap();
    assert_eq!(list.dim(), Some((5, 5)));
}

#[test]
fn test_get_out_of_range() {
    let list = ImageList::new();
    assert!(matches!(
        list.get(0),
        Err(HdrlError::AccessOutOfRange { .. })
    ));
}

// ---------------------------------------------------------------------------
// Aliasing
// ---------------------------------------------------------------------------

#[test]
fn test_aliased_image_survives_unset_and_drop() {
    let shared = Arc::new(constant_image(4, 4, 3.0, 0.5));
    let mut list = ImageList::new();
    list.push(shared.clone()).unwrap();
    list.push(shared.clone()).unwrap();
    drop(shared);
    assert!(list.is_aliased(0));

    let removed = list.unset(0).unwrap();
    drop(removed);

    assert_eq!(list.len(), 1);
    assert!(!list.is_aliased(0));
    let img = list.get(0).unwrap();
    assert_eq!(img.data()[[3, 3]], 3.0);
    assert_eq!(img.error()[[0, 0]], 0.5);
}

#[test]
fn test_get_mut_splits_shared_slot() {
    let shared = Arc::new(constant_image(2, 2, 1.0, 0.0));
    let mut list = ImageList::new();
    list.push(shared.clone()).unwrap();
    list.push(shared).unwrap();

    list.get_mut(1)
        .unwrap()
        .set_pixel(1, 1, PixelValue::new(8.0, 0.0))
        .unwrap();

    assert_eq!(list.get(0).unwrap().data()[[0, 0]], 1.0);
    assert_eq!(list.get(1).unwrap().data()[[0, 0]], 8.0);
    assert!(!list.is_aliased(0));
}

#[test]
fn test_unset_returns_image_and_shifts() {
    let mut list = ImageList::new();
    for v in 0..3 {
        list.push(constant_image(2, 2, v as f64, 0.0)).unwrap();
    }
    let img = list.unset(1).unwrap();
    assert_eq!(img.data()[[0, 0]], 1.0);
    assert_eq!(list.len(), 2);
    assert_eq!(list.get(1).unwrap().data()[[0, 0]], 2.0);
}

#[test]
fn test_duplicate_is_deep() {
    let shared = Arc::new(constant_image(2, 2, 1.0, 0.0));
    let mut list = ImageList::new();
    list.push(shared.clone()).unwrap();
    list.push(shared.clone()).unwrap();

    let copy = list.duplicate();
    assert!(!copy.is_aliased(0));
    assert!(!Arc::ptr_eq(&copy.handle(0).unwrap(), &shared));
    assert_eq!(copy.get(1).unwrap().data(), shared.data());
}

#[test]
fn test_try_from_vec_checks_shapes() {
    let ok = ImageList::try_from(vec![Image::zeros(2, 3), Image::zeros(2, 3)]).unwrap();
    assert_eq!(ok.len(), 2);
    let err = ImageList::try_from(vec![Image::zeros(2, 3), Image::zeros(3, 2)]).unwrap_err();
    assert!(matches!(err, HdrlError::IncompatibleInput(_)));
}
