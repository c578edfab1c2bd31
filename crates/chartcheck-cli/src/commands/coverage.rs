//! Coverage command - values coverage of one set of overrides

use console::style;
use miette::{Result, WrapErr};
use std::path::Path;

use chartcheck::FieldTracker;
use chartcheck_core::{TemplateOptions, Values};
use chartcheck_template::TemplateUsage;

pub fn run(
    chart_path: &Path,
    options: &TemplateOptions,
    include_subcharts: bool,
    debug: bool,
) -> Result<()> {
    let chart = super::load_chart(chart_path, debug)?;
    let usage = TemplateUsage::from_chart(&chart)
        .map_err(miette::Report::new)
        .wrap_err("Failed to parse chart templates")?;

    let resolved = options
        .resolve(&chart)
        .map_err(miette::Report::new)
        .wrap_err("Failed to apply values")?;

    let tracker = FieldTracker::new(&usage, include_subcharts);
    if debug {
        eprintln!(
            "{} Tracking {} field(s)",
            style("DEBUG").dim(),
            tracker.len()
        );
    }
    tracker.record_values(resolved.overrides.as_ref().map(Values::inner));

    let coverage = tracker.coverage();
    let percent = coverage.fraction * 100.0;
    let label = if coverage.fraction >= 1.0 {
        style(format!("{:.2}%", percent)).green().bold()
    } else {
        style(format!("{:.2}%", percent)).yellow().bold()
    };

    println!("{} {}", style("Coverage:").bold(), label);
    println!();
    println!("{}", coverage.report);

    Ok(())
}
