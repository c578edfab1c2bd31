//! Linters run over every rendered case
//!
//! - [`YamlLinter`] (`yaml-lint`): syntax and whitespace of the rendered manifests
//! - [`HelmLinter`] (`helm-lint`): chart metadata and object identity, like `helm lint`
//! - [`CommandLinter`]: any external tool, fed the manifests on stdin

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chartcheck_core::Chart;
use chartcheck_template::RenderOutput;

use crate::handle::{Failure, RawSource};

/// One problem reported by a linter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintFinding {
    pub linter: String,
    /// Chart-relative template path, when the problem is tied to one
    pub file: Option<String>,
    pub line: Option<usize>,
    pub message: String,
    /// Command and output, for external linters
    pub output: Option<(String, String)>,
}

impl LintFinding {
    pub fn new(linter: &str, message: impl Into<String>) -> Self {
        Self {
            linter: linter.to_string(),
            file: None,
            line: None,
            message: message.into(),
            output: None,
        }
    }

    pub fn in_file(mut self, file: &str) -> Self {
        self.file = Some(file.to_string());
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// Failure for a test handle, with the template source attached when known
    pub fn into_failure(self, chart: &Chart) -> Failure {
        let location = match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{}:{}: ", file, line),
            (Some(file), None) => format!("{}: ", file),
            _ => String::new(),
        };
        let mut failure = Failure::new(format!("[{}] {}{}", self.linter, location, self.message));

        if let Some(file) = &self.file
            && let Some(source) = chart.all_templates().get(file.as_str())
        {
            failure = failure.with_raw(RawSource::new(file.clone(), *source));
        }
        if let Some((command, stdout)) = self.output {
            failure = failure.with_output(command, stdout);
        }
        failure
    }
}

/// Checks a rendered chart
pub trait Linter: Send + Sync {
    fn name(&self) -> &str;

    fn lint(&self, chart: &Chart, output: &RenderOutput) -> Vec<LintFinding>;
}

/// The linters a suite runs unless told otherwise
pub fn default_linters() -> Vec<Box<dyn Linter>> {
    vec![Box::new(YamlLinter::default()), Box::new(HelmLinter)]
}

// ============================================================================
// yaml-lint
// ============================================================================

/// Syntax and whitespace checks on rendered manifests
#[derive(Debug, Clone)]
pub struct YamlLinter {
    trailing_spaces: bool,
    max_line_length: Option<usize>,
}

impl Default for YamlLinter {
    fn default() -> Self {
        Self {
            trailing_spaces: true,
            max_line_length: None,
        }
    }
}

impl YamlLinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_trailing_spaces(mut self) -> Self {
        self.trailing_spaces = false;
        self
    }

    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = Some(max);
        self
    }

    fn lint_manifest(&self, file: &str, manifest: &str, findings: &mut Vec<LintFinding>) {
        for (index, line) in manifest.lines().enumerate() {
            let number = index + 1;
            if self.trailing_spaces && line.ends_with([' ', '\t']) {
                findings.push(self.finding(file, number, "trailing spaces"));
            }
            let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
            if indent.contains('\t') {
                findings.push(self.finding(file, number, "tab character used for indentation"));
            }
            if let Some(max) = self.max_line_length
                && line.chars().count() > max
            {
                findings.push(self.finding(
                    file,
                    number,
                    format!("line too long ({} > {} characters)", line.chars().count(), max),
                ));
            }
        }

        for document in serde_yaml::Deserializer::from_str(manifest) {
            if let Err(e) = serde_yaml::Value::deserialize(document) {
                let mut finding = LintFinding::new(self.name(), e.to_string()).in_file(file);
                if let Some(location) = e.location() {
                    finding = finding.at_line(location.line());
                }
                findings.push(finding);
                break;
            }
        }
    }

    fn finding(&self, file: &str, line: usize, message: impl Into<String>) -> LintFinding {
        LintFinding::new(self.name(), message)
            .in_file(file)
            .at_line(line)
    }
}

impl Linter for YamlLinter {
    fn name(&self) -> &str {
        "yaml-lint"
    }

    fn lint(&self, _chart: &Chart, output: &RenderOutput) -> Vec<LintFinding> {
        let mut findings = Vec::new();
        for (file, manifest) in &output.manifests {
            self.lint_manifest(file, manifest, &mut findings);
        }
        findings
    }
}

// ============================================================================
// helm-lint
// ============================================================================

static DNS_SUBDOMAIN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").ok()
});

/// API versions Kubernetes no longer serves
const REMOVED_API_VERSIONS: &[(&str, &str)] = &[
    ("extensions/v1beta1", "1.22"),
    ("apps/v1beta1", "1.16"),
    ("apps/v1beta2", "1.16"),
    ("batch/v1beta1", "1.25"),
    ("policy/v1beta1", "1.25"),
    ("autoscaling/v2beta1", "1.25"),
    ("autoscaling/v2beta2", "1.26"),
    ("networking.k8s.io/v1beta1", "1.22"),
    ("rbac.authorization.k8s.io/v1beta1", "1.22"),
    ("apiextensions.k8s.io/v1beta1", "1.22"),
];

/// Chart and object checks modelled on `helm lint`
#[derive(Debug, Clone, Copy, Default)]
pub struct HelmLinter;

impl HelmLinter {
    fn lint_metadata(&self, chart: &Chart, findings: &mut Vec<LintFinding>) {
        let metadata = &chart.metadata;
        match metadata.api_version.as_str() {
            "v1" | "v2" => {}
            "" => findings.push(LintFinding::new(
                self.name(),
                "Chart.yaml: apiVersion is required",
            )),
            other => findings.push(LintFinding::new(
                self.name(),
                format!("Chart.yaml: apiVersion '{}' is not valid, expected v1 or v2", other),
            )),
        }

        if metadata.version.is_empty() {
            findings.push(LintFinding::new(self.name(), "Chart.yaml: version is required"));
        } else if semver::Version::parse(metadata.version.trim_start_matches('v')).is_err() {
            findings.push(LintFinding::new(
                self.name(),
                format!(
                    "Chart.yaml: version '{}' is not a valid SemVer 2 version",
                    metadata.version
                ),
            ));
        }

        if let Some(chart_type) = &metadata.chart_type
            && chart_type != "application"
            && chart_type != "library"
        {
            findings.push(LintFinding::new(
                self.name(),
                format!("Chart.yaml: type '{}' must be application or library", chart_type),
            ));
        }
    }
}

impl Linter for HelmLinter {
    fn name(&self) -> &str {
        "helm-lint"
    }

    fn lint(&self, chart: &Chart, output: &RenderOutput) -> Vec<LintFinding> {
        let mut findings = Vec::new();
        self.lint_metadata(chart, &mut findings);

        for file in output.objects.files() {
            let Some(objects) = output.objects.get(file) else {
                continue;
            };
            for object in objects.iter() {
                let finding = |message: String| LintFinding::new("helm-lint", message).in_file(file);

                if object.api_version().is_empty() {
                    findings.push(finding(format!("{}: apiVersion is required", object.describe())));
                }
                if object.kind().is_empty() {
                    findings.push(finding("object kind is required".to_string()));
                }
                if let Some((_, removed)) = REMOVED_API_VERSIONS
                    .iter()
                    .find(|(api_version, _)| *api_version == object.api_version())
                {
                    findings.push(finding(format!(
                        "{}: apiVersion {} is no longer served since Kubernetes {}",
                        object.describe(),
                        object.api_version(),
                        removed
                    )));
                }

                match object.name() {
                    None | Some("") => {
                        findings.push(finding(format!("{}: metadata.name is required", object.kind())))
                    }
                    Some(name) => {
                        let valid = name.len() <= 253
                            && DNS_SUBDOMAIN.as_ref().is_some_and(|re| re.is_match(name));
                        if !valid {
                            findings.push(finding(format!(
                                "object name \"{}\" does not conform to Kubernetes naming requirements",
                                name
                            )));
                        }
                    }
                }
            }
        }

        findings
    }
}

// ============================================================================
// External linters
// ============================================================================

/// Placeholder replaced with the chart directory in arguments
pub const CHART_PLACEHOLDER: &str = "{chart}";

/// How long an external linter may run before it is killed
pub const DEFAULT_LINT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs an external command; a non-zero exit or a timeout is a finding
///
/// ```ignore
/// CommandLinter::new("kubeconform", "kubeconform").args(["-strict", "-"]).stdin_manifests()
/// CommandLinter::new("helm-lint", "helm").args(["lint", "{chart}"])
/// ```
#[derive(Debug, Clone)]
pub struct CommandLinter {
    name: String,
    program: String,
    args: Vec<String>,
    stdin_manifests: bool,
    timeout: Duration,
}

impl CommandLinter {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            stdin_manifests: false,
            timeout: DEFAULT_LINT_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Write every rendered manifest to the command's stdin
    pub fn stdin_manifests(mut self) -> Self {
        self.stdin_manifests = true;
        self
    }

    /// Kill the command when it runs longer than `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion; `None` when the deadline passed and the command was killed
    fn run(&self, args: &[String], input: Option<String>) -> io::Result<Option<Output>> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let writer = match (input, child.stdin.take()) {
            (Some(input), Some(mut stdin)) => {
                Some(thread::spawn(move || stdin.write_all(input.as_bytes())))
            }
            _ => None,
        };
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let Some(status) = self.wait_until_deadline(&mut child)? else {
            // readers may still be blocked on pipes held by grandchildren
            return Ok(None);
        };

        if let Some(writer) = writer {
            // the tool may exit before reading everything; its status decides
            if let Ok(Err(e)) = writer.join() {
                tracing::debug!(linter = %self.name, error = %e, "stdin closed early");
            }
        }
        Ok(Some(Output {
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
        }))
    }

    fn wait_until_deadline(&self, child: &mut Child) -> io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                tracing::warn!(linter = %self.name, timeout = ?self.timeout, "killing linter");
                if let Err(e) = child.kill() {
                    tracing::debug!(linter = %self.name, error = %e, "kill failed");
                }
                let _ = child.wait();
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(reader: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .and_then(Result::ok)
        .unwrap_or_default()
}

impl Linter for CommandLinter {
    fn name(&self) -> &str {
        &self.name
    }

    fn lint(&self, chart: &Chart, output: &RenderOutput) -> Vec<LintFinding> {
        let chart_dir = chart.root.display().to_string();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(CHART_PLACEHOLDER, &chart_dir))
            .collect();
        let command = self.command_line(&args);

        let input = self.stdin_manifests.then(|| {
            output
                .manifests
                .iter()
                .map(|(file, manifest)| format!("---\n# Source: {}\n{}\n", file, manifest.trim()))
                .collect::<String>()
        });

        match self.run(&args, input) {
            Ok(Some(result)) if result.status.success() => Vec::new(),
            Ok(Some(result)) => {
                let mut text = String::from_utf8_lossy(&result.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&result.stderr));
                let mut finding = LintFinding::new(
                    &self.name,
                    format!("`{}` exited with {}", command, result.status),
                );
                finding.output = Some((command, text));
                vec![finding]
            }
            Ok(None) => vec![LintFinding::new(
                &self.name,
                format!("`{}` timed out after {:?} and was killed", command, self.timeout),
            )],
            Err(e) => vec![LintFinding::new(
                &self.name,
                format!("failed to run `{}`: {}", command, e),
            )],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartcheck_core::{ObjectSetMap, Unstructured};
    use serde_json::json;

    const EXAMPLE_CHART: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/example-chart");

    fn chart() -> Chart {
        Chart::load(EXAMPLE_CHART).unwrap()
    }

    fn output_with(file: &str, manifest: &str) -> RenderOutput {
        let mut output = RenderOutput::default();
        output.manifests.insert(file.to_string(), manifest.to_string());
        output
    }

    #[test]
    fn test_yaml_lint_clean() {
        let output = output_with("templates/a.yaml", "apiVersion: v1\nkind: ConfigMap\n");
        assert!(YamlLinter::default().lint(&chart(), &output).is_empty());
    }

    #[test]
    fn test_yaml_lint_whitespace() {
        let output = output_with("templates/a.yaml", "a: 1 \nb:\n\t- c\n");
        let findings = YamlLinter::default().lint(&chart(), &output);
        let messages: Vec<_> = findings
            .iter()
            .map(|f| (f.line, f.message.as_str()))
            .filter(|(line, _)| line.is_some())
            .collect();
        assert!(messages.contains(&(Some(1), "trailing spaces")));
        assert!(messages.contains(&(Some(3), "tab character used for indentation")));
    }

    #[test]
    fn test_yaml_lint_duplicate_keys() {
        let output = output_with("templates/a.yaml", "a: 1\na: 2\n");
        let findings = YamlLinter::default().allow_trailing_spaces().lint(&chart(), &output);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("duplicate"));
    }

    #[test]
    fn test_yaml_lint_line_length() {
        let output = output_with("templates/a.yaml", "key: 0123456789\n");
        let findings = YamlLinter::new().with_max_line_length(10).lint(&chart(), &output);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.starts_with("line too long"));
    }

    #[test]
    fn test_helm_lint_objects() {
        let mut output = RenderOutput {
            objects: ObjectSetMap::new(),
            ..Default::default()
        };
        for value in [
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "fine"}}),
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "Not_Valid"}}),
            json!({"apiVersion": "extensions/v1beta1", "kind": "Ingress", "metadata": {"name": "old"}}),
            json!({"apiVersion": "v1", "kind": "Secret", "metadata": {}}),
        ] {
            output
                .objects
                .insert("templates/a.yaml", Unstructured::from_value(value).unwrap());
        }

        let findings = HelmLinter.lint(&chart(), &output);
        let messages: Vec<&str> = findings.iter().map(|f| f.message.as_str()).collect();
        assert_eq!(messages.len(), 3, "{messages:?}");
        assert!(messages[0].contains("\"Not_Valid\""));
        assert!(messages[1].contains("no longer served since Kubernetes 1.22"));
        assert_eq!(messages[2], "Secret: metadata.name is required");
        assert!(findings.iter().all(|f| f.file.as_deref() == Some("templates/a.yaml")));
    }

    #[test]
    fn test_finding_into_failure_attaches_source() {
        let failure = LintFinding::new("yaml-lint", "trailing spaces")
            .in_file("templates/configmap.yaml")
            .at_line(3)
            .into_failure(&chart());
        assert_eq!(
            failure.message,
            "[yaml-lint] templates/configmap.yaml:3: trailing spaces"
        );
        let raw = failure.raw.unwrap();
        assert!(raw.content.contains("kind: ConfigMap"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_linter() {
        let output = output_with("templates/a.yaml", "a: 1\n");

        let passing = CommandLinter::new("cat", "cat").stdin_manifests();
        assert!(passing.lint(&chart(), &output).is_empty());

        let failing = CommandLinter::new("sh", "sh").args(["-c", "echo broken {chart}; exit 3"]);
        let findings = failing.lint(&chart(), &output);
        assert_eq!(findings.len(), 1);
        let (command, stdout) = findings[0].output.clone().unwrap();
        assert!(command.starts_with("sh -c echo broken"));
        assert!(stdout.starts_with("broken "));
        assert!(stdout.contains("example-chart"));

        let missing = CommandLinter::new("nope", "chartcheck-no-such-binary");
        assert!(missing.lint(&chart(), &output)[0].message.starts_with("failed to run"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_linter_timeout() {
        let output = output_with("templates/a.yaml", "a: 1\n");
        let slow = CommandLinter::new("slow", "sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));

        let started = Instant::now();
        let findings = slow.lint(&chart(), &output);
        assert!(started.elapsed() < Duration::from_secs(4));

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].message, "`sleep 5` timed out after 100ms and was killed");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_linter_large_output_within_deadline() {
        let output = output_with("templates/a.yaml", "a: 1\n");
        let noisy = CommandLinter::new("noisy", "sh")
            .args(["-c", "head -c 200000 /dev/zero | tr '\\0' x; exit 1"])
            .timeout(Duration::from_secs(30));

        let findings = noisy.lint(&chart(), &output);
        assert_eq!(findings.len(), 1);
        let (_, text) = findings[0].output.clone().unwrap();
        assert_eq!(text.len(), 200000);
    }
}
