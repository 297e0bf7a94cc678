//! Formatted terminal output.
//!
//! Formatting lives here so the pipeline code only deals with data and
//! output changes stay in one place.

use std::path::PathBuf;

use crate::domain::RunConfig;
use crate::fit::RunSummary;

/// Summary of a `fitmap map` run.
pub fn format_run_summary(summary: &RunSummary, config: &RunConfig) -> String {
    let mut out = String::new();

    out.push_str("=== fitmap - template mapping ===\n");
    out.push_str(&format!("Map: {}\n", config.map_path.display()));
    out.push_str(&format!("Template: {}\n", config.template_path.display()));
    out.push_str(&format!(
        "Matching: {} | preprocess: {}\n",
        config.metric,
        preprocess_label(config)
    ));
    out.push_str(&format!(
        "Spectra: {} | templates: {}\n",
        summary.spectra, summary.templates
    ));
    if config.fit {
        out.push_str(&format!(
            "Fits: {} run, {} kept unfitted\n",
            summary.fits_run, summary.fits_failed
        ));
    } else {
        out.push_str("Fits: disabled\n");
    }
    if summary.anomalies > 0 {
        out.push_str(&format!("Template anomalies: {} (see log)\n", summary.anomalies));
    }

    out.push_str("\nTemplate usage:\n");
    for (k, n) in summary.template_usage.iter().enumerate() {
        out.push_str(&format!("  @{k:<4} {n:>6}\n"));
    }

    if !summary.checkpoints.is_empty() {
        out.push_str(&format!("\nCheckpoints: {}\n", summary.checkpoints.len()));
        for p in &summary.checkpoints {
            out.push_str(&format!("  {}\n", p.display()));
        }
    }
    match &summary.output {
        Some(p) => out.push_str(&format!("\nSession written: {}\n", p.display())),
        None => out.push_str("\nNo output written.\n"),
    }
    out
}

fn preprocess_label(config: &RunConfig) -> String {
    let p = &config.preprocess;
    let stages: Vec<String> = [
        (p.baseline, "baseline".to_string()),
        (p.smooth, format!("smooth(window={}, order={})", p.window, p.order)),
        (p.normalize, "normalize".to_string()),
    ]
    .into_iter()
    .filter(|(on, _)| *on)
    .map(|(_, s)| s)
    .collect();
    if stages.is_empty() {
        "none".to_string()
    } else {
        stages.join(" -> ")
    }
}

/// List of written files, one per line.
pub fn format_written(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| format!("Wrote {}\n", p.display())).collect()
}
