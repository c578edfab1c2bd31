//! Template command - render a chart and print its objects

use console::style;
use miette::{IntoDiagnostic, Result, WrapErr};
use std::path::Path;

use chartcheck_core::TemplateOptions;
use chartcheck_template::{GoTemplateRenderer, Renderer};

pub fn run(chart_path: &Path, options: &TemplateOptions, debug: bool) -> Result<()> {
    let chart = super::load_chart(chart_path, debug)?;

    let resolved = options
        .resolve(&chart)
        .map_err(miette::Report::new)
        .wrap_err("Failed to apply values")?;

    let output = GoTemplateRenderer::new()
        .render(&chart, &resolved)
        .map_err(miette::Report::new)?;

    let mut first = true;
    for file in output.objects.files() {
        let Some(objects) = output.objects.get(file) else {
            continue;
        };
        for object in objects.iter() {
            if !first {
                println!("---");
            }
            first = false;

            if debug {
                eprintln!("{} {}", style("DEBUG").dim(), object.describe());
            }
            println!("# Source: {}", file);
            let yaml = serde_yaml::to_string(object.as_map())
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to serialize {}", object.describe()))?;
            print!("{}", yaml);
        }
    }

    if let Some(notes) = &output.notes {
        eprintln!();
        eprintln!("{}", style("NOTES:").cyan().bold());
        eprintln!("{}", notes);
    }

    Ok(())
}
