//! chartcheck CLI - inspect how a Helm chart uses its values

use clap::{Args, Parser, Subcommand};
use miette::Result;
use std::path::PathBuf;

use chartcheck_core::{TemplateOptions, ValuesOptions};

mod commands;

#[derive(Parser)]
#[command(name = "chartcheck")]
#[command(author = "chartcheck Contributors")]
#[command(version)]
#[command(about = "Template usage, rendering and values coverage for Helm charts", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fields and named templates each template uses
    Usage {
        /// Chart path
        #[arg(default_value = ".")]
        chart: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render the chart and print the objects of each template file
    Template {
        /// Chart path
        #[arg(default_value = ".")]
        chart: PathBuf,

        #[command(flatten)]
        release: ReleaseArgs,

        #[command(flatten)]
        values: ValuesArgs,
    },

    /// Report which values fields one set of overrides covers
    Coverage {
        /// Chart path
        #[arg(default_value = ".")]
        chart: PathBuf,

        #[command(flatten)]
        values: ValuesArgs,

        /// Track fields of subchart templates too
        #[arg(long)]
        include_subcharts: bool,
    },
}

/// Release the chart is rendered as
#[derive(Args, Debug, Clone)]
struct ReleaseArgs {
    /// Release name (defaults to the chart name)
    #[arg(long)]
    name: Option<String>,

    /// Target namespace
    #[arg(short, long, default_value = "default")]
    namespace: String,
}

/// Values overrides shared by the rendering commands
#[derive(Args, Debug, Clone, Default)]
struct ValuesArgs {
    /// Values file(s) to merge
    #[arg(short = 'f', long = "values")]
    values: Vec<PathBuf>,

    /// Set values on command line (key=value)
    #[arg(long = "set")]
    set: Vec<String>,

    /// Set string values on command line (key=value)
    #[arg(long = "set-string")]
    set_string: Vec<String>,

    /// Set JSON values on command line (key=<json>)
    #[arg(long = "set-json")]
    set_json: Vec<String>,
}

impl ValuesArgs {
    fn is_empty(&self) -> bool {
        self.values.is_empty()
            && self.set.is_empty()
            && self.set_string.is_empty()
            && self.set_json.is_empty()
    }

    /// Options carrying these overrides; no flags means no values bundle
    fn into_options(self) -> TemplateOptions {
        if self.is_empty() {
            return TemplateOptions::new();
        }
        let values = ValuesOptions {
            value_files: self
                .values
                .iter()
                .map(|p| {
                    std::path::absolute(p)
                        .unwrap_or_else(|_| p.clone())
                        .display()
                        .to_string()
                })
                .collect(),
            set: self.set,
            set_string: self.set_string,
            set_file: Vec::new(),
            set_json: self.set_json,
        };
        TemplateOptions::new().with_values(values)
    }
}

fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();

    match cli.command {
        Commands::Usage { chart, json } => commands::usage::run(&chart, json, cli.debug),

        Commands::Template {
            chart,
            release,
            values,
        } => {
            let mut options = values.into_options().with_namespace(release.namespace);
            if let Some(name) = release.name {
                options = options.with_name(name);
            }
            commands::template::run(&chart, &options, cli.debug)
        }

        Commands::Coverage {
            chart,
            values,
            include_subcharts,
        } => commands::coverage::run(&chart, &values.into_options(), include_subcharts, cli.debug),
    }
}
