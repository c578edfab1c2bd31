//! CLI commands

pub mod coverage;
pub mod template;
pub mod usage;

use console::style;
use miette::{Result, WrapErr};
use std::path::Path;

use chartcheck_core::Chart;

/// Load a chart, reporting the path on failure
pub(crate) fn load_chart(path: &Path, debug: bool) -> Result<Chart> {
    let chart = Chart::load(path)
        .map_err(miette::Report::new)
        .wrap_err_with(|| format!("Failed to load chart from {}", path.display()))?;

    if debug {
        eprintln!(
            "{} Loaded chart: {} v{} ({} subchart(s))",
            style("DEBUG").dim(),
            chart.name(),
            chart.version(),
            chart.subcharts.len()
        );
    }
    Ok(chart)
}
