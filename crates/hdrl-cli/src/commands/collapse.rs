use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use hdrl_core::collapse::collapse_with;
use hdrl_core::config::CollapseParams;
use hdrl_core::image::Image;
use hdrl_core::imagelist::ImageList;
use hdrl_core::io::{load_image, save_error_image, save_image, save_mask_image, ErrorModel};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use super::config::CliConfig;
use crate::summary::{print_collapse_summary, print_result_summary};

#[derive(Args)]
pub struct CollapseArgs {
    /// Input image files (all of the same size)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Collapse method: MEAN, WEIGHTED_MEAN, MEDIAN, SIGCLIP or MINMAX
    #[arg(long)]
    pub method: Option<String>,

    /// Low and high kappa for SIGCLIP
    #[arg(long)]
    pub kappa: Option<f64>,

    /// Clipping iterations for SIGCLIP
    #[arg(long)]
    pub niter: Option<usize>,

    /// Lowest values dropped per pixel for MINMAX
    #[arg(long)]
    pub nlow: Option<usize>,

    /// Highest values dropped per pixel for MINMAX
    #[arg(long)]
    pub nhigh: Option<usize>,

    /// TOML settings file (see `hdrl config`)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads (default: all cores)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Constant 1-sigma error of every input pixel
    #[arg(long)]
    pub error: Option<f64>,

    /// Detector gain in e-/ADU; derives shot-noise errors instead of --error
    #[arg(long)]
    pub gain: Option<f64>,

    /// Rows per reduction block (default: sized from the memory budget)
    #[arg(long)]
    pub block_rows: Option<usize>,

    /// Also save the contribution map to this file
    #[arg(long)]
    pub contrib: Option<PathBuf>,

    /// Also save the propagated error plane to this file
    #[arg(long)]
    pub error_output: Option<PathBuf>,

    /// Also save the bad-pixel mask to this file (rejected pixels full scale)
    #[arg(long)]
    pub mask_output: Option<PathBuf>,

    /// Output file path
    #[arg(short, long, default_value = "collapsed.tiff")]
    pub output: PathBuf,
}

fn resolve_config(args: &CollapseArgs) -> Result<CliConfig> {
    let mut config = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };

    if let Some(ref tag) = args.method {
        config.collapse.method = tag.parse()?;
    }
    match &mut config.collapse.method {
        CollapseParams::SigmaClip(p) => {
            if let Some(k) = args.kappa {
                p.kappa_low = k;
                p.kappa_high = k;
            }
            if let Some(n) = args.niter {
                p.niter = n;
            }
        }
        CollapseParams::MinMax(p) => {
            if let Some(n) = args.nlow {
                p.nlow = n;
            }
            if let Some(n) = args.nhigh {
                p.nhigh = n;
            }
        }
        _ => {}
    }

    if args.block_rows.is_some() {
        config.collapse.block_rows = args.block_rows;
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    if args.error.is_some() {
        config.error = args.error;
    }
    if args.gain.is_some() {
        config.gain = args.gain;
    }
    Ok(config)
}

fn error_model(config: &CliConfig) -> ErrorModel {
    match config.gain {
        Some(gain) => ErrorModel::Poisson {
            gain,
            read_noise: config.error.unwrap_or(0.0),
        },
        None => ErrorModel::Constant(config.error.unwrap_or(0.0)),
    }
}

fn load_stack(files: &[PathBuf], model: ErrorModel) -> Result<ImageList> {
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("Loading [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );

    let mut list = ImageList::with_capacity(files.len());
    for path in files {
        let image = load_image(path, model)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        list.push(image)
            .with_context(|| format!("{} does not match the stack size", path.display()))?;
        pb.inc(1);
    }
    pb.finish();
    Ok(list)
}

pub fn run(args: &CollapseArgs) -> Result<()> {
    let config = resolve_config(args)?;
    if config.threads == Some(0) {
        bail!("--threads must be at least 1");
    }

    let model = error_model(&config);
    debug!(files = args.files.len(), ?model, "Loading input stack");
    let list = load_stack(&args.files, model)?;
    print_collapse_summary(&list, &config, &args.output);

    let output = match config.threads {
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()?
            .install(|| collapse_with(&list, &config.collapse))?,
        None => collapse_with(&list, &config.collapse)?,
    };

    save_image(&output.image, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    if let Some(ref path) = args.contrib {
        let map = Image::from_data(output.contrib.mapv(f64::from));
        save_image(&map, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if let Some(ref path) = args.error_output {
        save_error_image(&output.image, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if let Some(ref path) = args.mask_output {
        save_mask_image(&output.image, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    print_result_summary(&output, list.len());
    println!("Saved to {}", args.output.display());
    Ok(())
}
