//! Test handles: where checks record failures

use std::fmt;

/// Template source attached to a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSource {
    /// Chart-relative path, e.g. `templates/configmap.yaml`
    pub path: String,
    pub content: String,
}

impl RawSource {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Fence language for the content
    pub fn language(&self) -> &'static str {
        if self.path.ends_with(".json") {
            "json"
        } else {
            "yaml"
        }
    }
}

/// An external command and what it printed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    pub raw: Option<RawSource>,
    pub output: Option<CommandOutput>,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw: None,
            output: None,
        }
    }

    pub fn with_raw(mut self, raw: RawSource) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_output(mut self, command: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.output = Some(CommandOutput {
            command: command.into(),
            stdout: stdout.into(),
        });
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// The handle a check reports through
///
/// Failing does not stop the calling closure; the chain decides whether later
/// steps still run.
#[derive(Debug, Clone, Default)]
pub struct TestHandle {
    name: String,
    failures: Vec<Failure>,
}

impl TestHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures: Vec::new(),
        }
    }

    /// Qualified test name, e.g. `suite/case/check`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle for a named sub-test
    pub fn child(&self, name: &str) -> Self {
        if self.name.is_empty() {
            Self::new(name)
        } else {
            Self::new(format!("{}/{}", self.name, name))
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.record(Failure::new(message));
    }

    pub fn record(&mut self, failure: Failure) {
        tracing::debug!(test = %self.name, message = %failure.message, "check failed");
        self.failures.push(failure);
    }

    /// Log a note against the test
    pub fn log(&self, message: impl fmt::Display) {
        tracing::info!(test = %self.name, "{}", message);
    }

    pub fn failed(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<Failure> {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_records() {
        let mut handle = TestHandle::new("suite");
        assert!(!handle.failed());
        handle.fail("boom");
        handle.record(Failure::new("lint").with_output("helm lint", "[ERROR] bad"));
        assert!(handle.failed());
        assert_eq!(handle.failures().len(), 2);
        assert_eq!(handle.failures()[0].to_string(), "boom");
        assert_eq!(
            handle.failures()[1].output.as_ref().unwrap().command,
            "helm lint"
        );
    }

    #[test]
    fn test_child_names() {
        let suite = TestHandle::new("suite");
        let case = suite.child("default");
        assert_eq!(case.child("configmap").name(), "suite/default/configmap");
        assert_eq!(TestHandle::default().child("x").name(), "x");
    }

    #[test]
    fn test_raw_language() {
        assert_eq!(RawSource::new("templates/a.yaml", "").language(), "yaml");
        assert_eq!(RawSource::new("files/a.json", "").language(), "json");
    }
}
