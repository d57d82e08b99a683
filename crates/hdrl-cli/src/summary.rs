use std::path::Path;

use console::Style;
use hdrl_core::collapse::CollapseOutput;
use hdrl_core::imagelist::ImageList;

use crate::commands::config::CliConfig;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    warn: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            warn: Style::new().yellow(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_collapse_summary(list: &ImageList, config: &CliConfig, output: &Path) {
    let s = Styles::new();
    let (ny, nx) = list.dim().unwrap_or((0, 0));

    println!();
    println!("  {}", s.title.apply_to("HDRL Collapse"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(13)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Images"),
        s.value.apply_to(list.len())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Size"),
        s.value.apply_to(format!("{nx}x{ny}"))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(output.display())
    );
    println!();

    println!("  {}", s.header.apply_to("Reduction"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(&config.collapse.method)
    );
    let blocks = match config.collapse.block_rows {
        Some(rows) => format!("{rows} rows"),
        None => format!("{} KiB budget", config.collapse.block_bytes / 1024),
    };
    println!(
        "    {:<12}{}",
        s.label.apply_to("Blocks"),
        s.value.apply_to(blocks)
    );
    let threads = config
        .threads
        .map_or_else(|| "all cores".to_string(), |n| n.to_string());
    println!(
        "    {:<12}{}",
        s.label.apply_to("Threads"),
        s.value.apply_to(threads)
    );
    println!();
}

pub fn print_result_summary(output: &CollapseOutput, n_images: usize) {
    let s = Styles::new();
    let rejected = output.image.count_rejected();
    let full = output
        .contrib
        .iter()
        .filter(|&&c| c as usize == n_images)
        .count();

    println!("  {}", s.header.apply_to("Result"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("All inputs"),
        s.value.apply_to(format!("{full} pixels"))
    );
    let rejected_style = if rejected > 0 { &s.warn } else { &s.value };
    println!(
        "    {:<12}{}",
        s.label.apply_to("Rejected"),
        rejected_style.apply_to(format!("{rejected} pixels"))
    );
    if let Some(ref maps) = output.rejection {
        let lo = maps.low.data().iter().copied().fold(f64::INFINITY, f64::min);
        let hi = maps.high.data().iter().copied().fold(f64::NEG_INFINITY, f64::max);
        println!(
            "    {:<12}{}",
            s.label.apply_to("Thresholds"),
            s.value.apply_to(format!("{lo:.2} .. {hi:.2}"))
        );
    }
    println!();
}
