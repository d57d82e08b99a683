use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use hdrl_core::io::{load_image, ErrorModel};

#[derive(Args)]
pub struct InfoArgs {
    /// Input image file
    pub file: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let image = load_image(&args.file, ErrorModel::default())
        .with_context(|| format!("Failed to load {}", args.file.display()))?;
    let data = image.data();

    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = data.mean().unwrap_or(0.0);
    let file_bytes = std::fs::metadata(&args.file)?.len();

    println!("File:        {}", args.file.display());
    println!("Dimensions:  {}x{}", image.nx(), image.ny());
    println!("Min / Max:   {} / {}", min, max);
    println!("Mean:        {:.2}", mean);
    println!("File size:   {:.1} KB", file_bytes as f64 / 1024.0);

    Ok(())
}
