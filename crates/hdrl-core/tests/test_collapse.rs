mod common;

use approx::assert_abs_diff_eq;
use ndarray::Array2;

use hdrl_core::collapse::mean::Mean;
use hdrl_core::collapse::minmax::MinMaxParams;
use hdrl_core::collapse::sigma_clip::SigmaClipParams;
use hdrl_core::collapse::{
    collapse, collapse_blocked, collapse_with, method_for, reduce_pixels, BlockResult,
    CollapseMethod,
};
use hdrl_core::config::{CollapseConfig, CollapseParams};
use hdrl_core::error::{HdrlError, Result};
use hdrl_core::image::Image;
use hdrl_core::imagelist::ImageList;
use hdrl_core::view::ImageListView;

use common::{constant_image, image_from_fn, list_of, noisy_list, outlier_stack};

fn all_methods() -> Vec<CollapseParams> {
    vec![
        CollapseParams::Mean,
        CollapseParams::WeightedMean,
        CollapseParams::Median,
        CollapseParams::SigmaClip(SigmaClipParams {
            kappa_low: 1.5,
            kappa_high: 2.0,
            niter: 4,
        }),
        CollapseParams::MinMax(MinMaxParams { nlow: 1, nhigh: 2 }),
    ]
}

fn assert_images_identical(a: &Image, b: &Image) {
    assert_eq!(a.data(), b.data());
    assert_eq!(a.error(), b.error());
    assert_eq!(a.mask(), b.mask());
}

// ---------------------------------------------------------------------------
// Mean
// ---------------------------------------------------------------------------

#[test]
fn test_mean_error_propagation() {
    let list = ImageList::try_from(vec![
        constant_image(4, 5, 1.0, 1.0),
        constant_image(4, 5, 2.0, 2.0),
        constant_image(4, 5, 6.0, 2.0),
    ])
    .unwrap();
    let out = collapse(&list, &Mean).unwrap();
    for (&d, &e) in out.image.data().iter().zip(out.image.error().iter()) {
        assert_abs_diff_eq!(d, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e, 1.0, epsilon = 1e-12);
    }
    assert!(out.contrib.iter().all(|&c| c == 3));
    assert_eq!(out.image.count_rejected(), 0);
    assert!(out.extra.is_empty());
}

#[test]
fn test_mean_skips_rejected_inputs() {
    let mut list = list_of(4, |i| constant_image(3, 3, i as f64, 1.0));
    list.get_mut(3).unwrap().reject(2, 2).unwrap();
    let out = collapse(&list, &Mean).unwrap();
    assert_abs_diff_eq!(out.image.data()[[1, 1]], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(out.image.error()[[1, 1]], 3f64.sqrt() / 3.0, epsilon = 1e-12);
    assert_eq!(out.contrib[[1, 1]], 3);
    assert_eq!(out.contrib[[0, 0]], 4);
}

#[test]
fn test_pixel_rejected_everywhere_is_masked() {
    let mut list = list_of(3, |_| constant_image(3, 3, 4.0, 1.0));
    for i in 0..3 {
        list.get_mut(i).unwrap().reject(3, 1).unwrap();
    }
    let out = collapse(&list, &Mean).unwrap();
    let (value, bad) = out.image.get_pixel(3, 1).unwrap();
    assert!(bad);
    assert_eq!(value.data, 0.0);
    assert_eq!(value.error, 0.0);
    assert_eq!(out.contrib[[0, 2]], 0);
    assert_eq!(out.image.count_rejected(), 1);
    assert!(out.image.masks_consistent());
}

// ---------------------------------------------------------------------------
// Other built-in methods
// ---------------------------------------------------------------------------

#[test]
fn test_weighted_mean() {
    let list = ImageList::try_from(vec![
        constant_image(2, 2, 1.0, 1.0),
        constant_image(2, 2, 3.0, 2.0),
    ])
    .unwrap();
    let out = list.collapse(&CollapseParams::WeightedMean).unwrap();
    assert_abs_diff_eq!(out.image.data()[[0, 0]], 1.4, epsilon = 1e-12);
    assert_abs_diff_eq!(out.image.error()[[0, 0]], 1.0 / 1.25f64.sqrt(), epsilon = 1e-12);
    assert!(out.rejection.is_none());
}

#[test]
fn test_median_with_error_scaling() {
    let list = ImageList::try_from(vec![
        constant_image(2, 3, 1.0, 1.0),
        constant_image(2, 3, 10.0, 1.0),
        constant_image(2, 3, 2.0, 1.0),
    ])
    .unwrap();
    let out = list.collapse(&CollapseParams::Median).unwrap();
    let expected_err = 3f64.sqrt() / 3.0 * std::f64::consts::FRAC_PI_2.sqrt();
    assert_abs_diff_eq!(out.image.data()[[1, 2]], 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(out.image.error()[[1, 2]], expected_err, epsilon = 1e-12);
}

#[test]
fn test_minmax_dropping_everything_rejects() {
    let list = list_of(2, |_| constant_image(2, 2, 1.0, 1.0));
    let out = list
        .collapse(&CollapseParams::MinMax(MinMaxParams { nlow: 1, nhigh: 1 }))
        .unwrap();
    assert_eq!(out.image.count_rejected(), 4);
    assert!(out.contrib.iter().all(|&c| c == 0));
}

// ---------------------------------------------------------------------------
// Outlier scenario
// ---------------------------------------------------------------------------

#[test]
fn test_outlier_shifts_mean() {
    let list = outlier_stack(100, 120);
    let out = list.collapse(&CollapseParams::Mean).unwrap();
    assert_abs_diff_eq!(out.image.get_pixel(100, 120).unwrap().0.data, 95.0, epsilon = 1e-9);
    assert_abs_diff_eq!(out.image.get_pixel(101, 120).unwrap().0.data, 5.0, epsilon = 1e-12);
}

#[test]
fn test_sigma_clip_recovers_outlier_pixel() {
    let list = outlier_stack(100, 120);
    let params = CollapseParams::SigmaClip(SigmaClipParams {
        kappa_low: 3.0,
        kappa_high: 3.0,
        niter: 1,
    });
    let out = list.collapse(&params).unwrap();
    let (value, bad) = out.image.get_pixel(100, 120).unwrap();
    assert!(!bad);
    assert_abs_diff_eq!(value.data, 5.0, epsilon = 1e-12);
    assert_abs_diff_eq!(value.error, 1.0 / 3.0, epsilon = 1e-12);
    assert_eq!(out.contrib[[119, 99]], 9);
    assert_eq!(out.contrib[[0, 0]], 10);

    let maps = out.rejection.expect("sigma clip reports thresholds");
    assert_eq!(maps.low.dim(), (265, 265));
    assert_abs_diff_eq!(maps.high.data()[[119, 99]], 5.0, epsilon = 1e-12);
}

#[test]
fn test_minmax_recovers_outlier_pixel() {
    let list = outlier_stack(100, 120);
    let params = CollapseParams::MinMax(MinMaxParams { nlow: 0, nhigh: 1 });
    let out = list.collapse(&params).unwrap();
    assert_abs_diff_eq!(out.image.get_pixel(100, 120).unwrap().0.data, 5.0, epsilon = 1e-12);
    assert_eq!(out.contrib[[119, 99]], 9);

    let maps = out.rejection.expect("minmax reports retained range");
    assert_eq!(maps.high.data()[[119, 99]], 5.0);
    assert_eq!(maps.low.data()[[119, 99]], 5.0);
}

// ---------------------------------------------------------------------------
// Blocking
// ---------------------------------------------------------------------------

#[test]
fn test_block_size_does_not_change_results() {
    let list = noisy_list(7, 23, 5);
    for params in all_methods() {
        let method = method_for(&params).unwrap();
        let whole = collapse_blocked(&list, method.as_ref(), 23).unwrap();
        for block_rows in [1, 4, 7, 22, 100] {
            let blocked = collapse_blocked(&list, method.as_ref(), block_rows).unwrap();
            assert_images_identical(&whole.image, &blocked.image);
            assert_eq!(whole.contrib, blocked.contrib);
            assert_eq!(whole.extra.len(), blocked.extra.len());
            for (a, b) in whole.extra.iter().zip(&blocked.extra) {
                assert_images_identical(a, b);
            }
        }
    }
}

#[test]
fn test_oversized_block_is_one_block() {
    let list = noisy_list(3, 9, 4);
    let whole = collapse_blocked(&list, &Mean, 9).unwrap();
    let huge = collapse_blocked(&list, &Mean, usize::MAX).unwrap();
    assert_images_identical(&whole.image, &huge.image);
    assert_eq!(whole.contrib, huge.contrib);

    let config = CollapseConfig {
        block_rows: Some(usize::MAX),
        ..Default::default()
    };
    assert!(collapse_with(&list, &config).is_ok());
}

#[test]
fn test_budget_and_fixed_rows_agree() {
    let list = noisy_list(5, 40, 9);
    let fixed = collapse_with(
        &list,
        &CollapseConfig {
            block_rows: Some(3),
            ..Default::default()
        },
    )
    .unwrap();
    let budget = collapse_with(
        &list,
        &CollapseConfig {
            block_bytes: 1,
            ..Default::default()
        },
    )
    .unwrap();
    assert_images_identical(&fixed.image, &budget.image);
    assert_eq!(fixed.contrib, budget.contrib);
}

#[test]
fn test_thread_count_does_not_change_results() {
    let list = noisy_list(6, 31, 4);
    let config = CollapseConfig {
        method: CollapseParams::Median,
        block_rows: Some(2),
        ..Default::default()
    };
    let single = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .unwrap()
        .install(|| collapse_with(&list, &config))
        .unwrap();
    let multi = collapse_with(&list, &config).unwrap();
    assert_images_identical(&single.image, &multi.image);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Fails on any block containing a negative value.
struct FailOnNegative;

impl CollapseMethod for FailOnNegative {
    fn name(&self) -> &str {
        "fail on negative"
    }

    fn reduce(&self, block: &ImageListView<'_>) -> Result<BlockResult> {
        if block.iter().any(|v| v.data().iter().any(|&x| x < 0.0)) {
            return Err(HdrlError::IllegalInput("negative sample".into()));
        }
        reduce_pixels(block, 0, |px, _| Some((Default::default(), px.len())))
    }
}

#[test]
fn test_failing_block_fails_whole_collapse() {
    let list = list_of(3, |i| {
        image_from_fn(16, 2, 0.0, |r, _| if i == 1 && r == 9 { -1.0 } else { 1.0 })
    });
    let err = collapse_blocked(&list, &FailOnNegative, 4).unwrap_err();
    match err {
        HdrlError::CollapseFailed {
            failed,
            total,
            source,
        } => {
            assert_eq!(failed, 1);
            assert_eq!(total, 4);
            assert!(matches!(*source, HdrlError::IllegalInput(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(collapse_blocked(&list, &FailOnNegative, 20).is_err());
    let clean = list_of(3, |_| constant_image(16, 2, 1.0, 0.0));
    assert!(collapse_blocked(&clean, &FailOnNegative, 4).is_ok());
}

#[test]
fn test_empty_list_is_null_input() {
    let list = ImageList::new();
    assert!(matches!(
        collapse(&list, &Mean),
        Err(HdrlError::NullInput(_))
    ));
}

#[test]
fn test_zero_block_rows_rejected() {
    let list = list_of(2, |_| Image::from_data(Array2::zeros((3, 3))));
    assert!(matches!(
        collapse_blocked(&list, &Mean, 0),
        Err(HdrlError::IllegalInput(_))
    ));
}
