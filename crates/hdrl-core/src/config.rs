use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::collapse::minmax::MinMaxParams;
use crate::collapse::sigma_clip::SigmaClipParams;
use crate::consts::{DEFAULT_BLOCK_BYTES, DEFAULT_POOL_SIZE};
use crate::error::HdrlError;

/// Reduction applied along the image axis of a collapse.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum CollapseParams {
    #[default]
    Mean,
    WeightedMean,
    Median,
    SigmaClip(SigmaClipParams),
    MinMax(MinMaxParams),
}

impl std::fmt::Display for CollapseParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollapseParams::Mean => write!(f, "Mean"),
            CollapseParams::WeightedMean => write!(f, "Weighted Mean"),
            CollapseParams::Median => write!(f, "Median"),
            CollapseParams::SigmaClip(p) => write!(
                f,
                "Sigma Clip (kappa {}/{}, {} iter)",
                p.kappa_low, p.kappa_high, p.niter
            ),
            CollapseParams::MinMax(p) => {
                write!(f, "Min/Max (drop {} low, {} high)", p.nlow, p.nhigh)
            }
        }
    }
}

impl FromStr for CollapseParams {
    type Err = HdrlError;

    /// Parse a method tag, using default parameters for the clipping methods.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "MEAN" => Ok(CollapseParams::Mean),
            "WEIGHTED_MEAN" => Ok(CollapseParams::WeightedMean),
            "MEDIAN" => Ok(CollapseParams::Median),
            "SIGCLIP" | "SIGMA_CLIP" => Ok(CollapseParams::SigmaClip(SigmaClipParams::default())),
            "MINMAX" => Ok(CollapseParams::MinMax(MinMaxParams::default())),
            other => Err(HdrlError::UnsupportedMode(format!(
                "unknown collapse method '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollapseConfig {
    #[serde(default)]
    pub method: CollapseParams,
    /// Approximate bytes of input per row block.
    #[serde(default = "default_block_bytes")]
    pub block_bytes: usize,
    /// Fixed rows per block, overriding `block_bytes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_rows: Option<usize>,
}

fn default_block_bytes() -> usize {
    DEFAULT_BLOCK_BYTES
}

impl Default for CollapseConfig {
    fn default() -> Self {
        Self {
            method: CollapseParams::default(),
            block_bytes: DEFAULT_BLOCK_BYTES,
            block_rows: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Size of a regular pool in bytes.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Total bytes below which new pools are heap-backed.
    #[serde(default)]
    pub malloc_threshold: usize,
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            malloc_threshold: 0,
        }
    }
}
