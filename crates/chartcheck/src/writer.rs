//! Markdown diagnostics for failed tests
//!
//! When `TEST_OUTPUT_DIR` is set, every failure reported through a suite is
//! appended to `test-<unix-seconds>.md` in that directory. Call
//! [`begin_process`] once before writing; it empties the directory the first
//! time it runs in a process.

use once_cell::sync::Lazy;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::handle::Failure;

/// Environment variable naming the diagnostics directory
pub const OUTPUT_DIR_ENV: &str = "TEST_OUTPUT_DIR";

/// Writes failures as markdown into one file
#[derive(Debug, Clone)]
pub struct DiagnosticWriter {
    path: PathBuf,
}

impl DiagnosticWriter {
    /// Empty `dir` (creating it if needed) and pick the output file
    pub fn create(dir: &Path) -> io::Result<Self> {
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
            }
        } else {
            fs::create_dir_all(dir)?;
        }

        let seconds = chrono::Utc::now().timestamp();
        Ok(Self {
            path: dir.join(format!("test-{}.md", seconds)),
        })
    }

    /// File the diagnostics go to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one failure under a heading for `test_name`
    pub fn write_failure(&self, test_name: &str, failure: &Failure) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(render_failure(test_name, failure).as_bytes())
    }
}

/// Markdown for one failure
pub fn render_failure(test_name: &str, failure: &Failure) -> String {
    let mut out = format!("## {}\n\n{}\n\n", test_name, failure.message.trim_end());

    if let Some(raw) = &failure.raw {
        out.push_str("### Raw\n\n");
        out.push_str(&format!("Source: `{}`\n\n", raw.path));
        out.push_str(&format!("```{}\n{}\n```\n\n", raw.language(), raw.content.trim_end()));
    }

    if let Some(output) = &failure.output {
        out.push_str("### Output\n\n");
        out.push_str(&format!("Command: `{}`\n\n", output.command));
        out.push_str(&format!("```\n{}\n```\n\n", output.stdout.trim_end()));
    }

    out
}

#[derive(Debug, Default)]
struct ProcessState {
    begun: bool,
    writer: Option<DiagnosticWriter>,
}

static PROCESS: Lazy<Mutex<ProcessState>> = Lazy::new(|| Mutex::new(ProcessState::default()));

/// Prepare the process-wide writer from `TEST_OUTPUT_DIR`
///
/// Only the first call in a process has an effect. Without the variable,
/// diagnostics are not written.
pub fn begin_process() -> io::Result<()> {
    let mut state = PROCESS.lock().unwrap_or_else(PoisonError::into_inner);
    if state.begun {
        return Ok(());
    }
    state.begun = true;

    if let Some(dir) = std::env::var_os(OUTPUT_DIR_ENV).filter(|d| !d.is_empty()) {
        let writer = DiagnosticWriter::create(Path::new(&dir))?;
        tracing::debug!(path = %writer.path().display(), "writing test diagnostics");
        state.writer = Some(writer);
    }
    Ok(())
}

/// Append a failure through the process-wide writer, if one was set up
pub fn write_failure(test_name: &str, failure: &Failure) -> io::Result<()> {
    let state = PROCESS.lock().unwrap_or_else(PoisonError::into_inner);
    match &state.writer {
        Some(writer) => writer.write_failure(test_name, failure),
        None => Ok(()),
    }
}
