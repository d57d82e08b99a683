use crate::config::{CollapseConfig, CollapseParams};
use crate::error::{HdrlError, Result};
use crate::image::Image;
use crate::imagelist::ImageList;

use super::engine::{collapse_blocked, collapse_budgeted};
use super::mean::{Mean, WeightedMean};
use super::median::Median;
use super::minmax::MinMax;
use super::sigma_clip::SigmaClip;
use super::CollapseMethod;

/// Per-pixel rejection thresholds reported by the clipping methods.
#[derive(Clone, Debug)]
pub struct RejectionMaps {
    pub low: Image,
    pub high: Image,
}

#[derive(Clone, Debug)]
pub struct CollapseOutput {
    pub image: Image,
    pub contrib: ndarray::Array2<i32>,
    /// Present for sigma clip and min/max.
    pub rejection: Option<RejectionMaps>,
}

/// Build the reduction method described by `params`.
pub fn method_for(params: &CollapseParams) -> Result<Box<dyn CollapseMethod>> {
    Ok(match params {
        CollapseParams::Mean => Box::new(Mean),
        CollapseParams::WeightedMean => Box::new(WeightedMean),
        CollapseParams::Median => Box::new(Median),
        CollapseParams::SigmaClip(p) => Box::new(SigmaClip::new(p.clone())?),
        CollapseParams::MinMax(p) => Box::new(MinMax::new(p.clone())),
    })
}

/// Collapse `list` according to `config`.
pub fn collapse_with(list: &ImageList, config: &CollapseConfig) -> Result<CollapseOutput> {
    let method = method_for(&config.method)?;
    let result = match config.block_rows {
        Some(rows) => collapse_blocked(list, method.as_ref(), rows)?,
        None => collapse_budgeted(list, method.as_ref(), config.block_bytes)?,
    };

    let mut extra = result.extra.into_iter();
    let rejection = match (extra.next(), extra.next()) {
        (Some(low), Some(high)) => Some(RejectionMaps { low, high }),
        (None, None) => None,
        _ => {
            return Err(HdrlError::IncompatibleInput(format!(
                "{} produced an incomplete set of rejection maps",
                method.name()
            )))
        }
    };

    Ok(CollapseOutput {
        image: result.image,
        contrib: result.contrib,
        rejection,
    })
}

impl ImageList {
    /// Collapse the list with `params` and the default block budget.
    pub fn collapse(&self, params: &CollapseParams) -> Result<CollapseOutput> {
        let config = CollapseConfig {
            method: params.clone(),
            ..Default::default()
        };
        collapse_with(self, &config)
    }
}
