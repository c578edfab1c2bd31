//! Usage command - fields and named templates per template file

use console::style;
use miette::{IntoDiagnostic, Result, WrapErr};
use std::path::Path;

use chartcheck_template::{ParseResult, TemplateUsage};

pub fn run(chart_path: &Path, json: bool, debug: bool) -> Result<()> {
    let chart = super::load_chart(chart_path, debug)?;
    let usage = TemplateUsage::from_chart(&chart)
        .map_err(miette::Report::new)
        .wrap_err("Failed to parse chart templates")?;

    if json {
        let out = serde_json::to_string_pretty(&usage)
            .into_diagnostic()
            .wrap_err("Failed to serialize usage")?;
        println!("{}", out);
        return Ok(());
    }

    println!("{}", style("Files").cyan().bold());
    for (file, result) in &usage.files {
        print_result(file, result);
    }

    if !usage.named_templates.is_empty() {
        println!();
        println!("{}", style("Named templates").cyan().bold());
        for (name, result) in &usage.named_templates {
            print_result(name, result);
        }
    }

    Ok(())
}

fn print_result(name: &str, result: &ParseResult) {
    println!("  {}", style(name).bold());
    for field in &result.fields {
        println!("    {} {}", style("field").dim(), field);
    }
    for call in &result.template_calls {
        println!("    {} {}", style("calls").dim(), call);
    }
    if result.emit_warning {
        println!(
            "    {} reads the root context directly",
            style("warning:").yellow()
        );
    }
}
