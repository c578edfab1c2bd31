//! Test suites: cases rendered, linted and checked against one chart
//!
//! ```ignore
//! use chartcheck::{Case, Chain, Check, FailureCase, Suite};
//! use chartcheck_core::TemplateOptions;
//! use k8s_openapi::api::core::v1::ConfigMap;
//!
//! #[test]
//! fn chart() {
//!     Suite::new("charts/example")
//!         .unwrap()
//!         .case(
//!             Case::new("defaults")
//!                 .with_options(TemplateOptions::new().with_release("example", "default"))
//!                 .check(Check::new(
//!                     "config",
//!                     Chain::new().per_resource(|ctx, cm: &ConfigMap| {
//!                         if cm.data.is_none() {
//!                             ctx.fail("missing data");
//!                         }
//!                     }),
//!                 )),
//!         )
//!         .failure_case(
//!             FailureCase::new("guard", "shouldFail is set")
//!                 .with_options(TemplateOptions::new().set("shouldFail=true"))
//!                 .covers(["templates/configmap.yaml"]),
//!         )
//!         .run()
//!         .assert_passed();
//! }
//! ```

use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chartcheck_core::{Chart, ResolvedOptions, TemplateOptions, Values};
use chartcheck_kube::Scheme;
use chartcheck_template::{GoTemplateRenderer, Renderer, TemplateUsage};

use crate::check::{Check, compile_patterns};
use crate::coverage::{Coverage, FieldTracker, override_paths};
use crate::error::{Result, SchemaMismatchError, SuiteError};
use crate::handle::{Failure, TestHandle};
use crate::lint::{Linter, default_linters};
use crate::shape::{ShapeCoverage, ValuesShape, ensure_accepts_schema, shape_coverage_of};
use crate::writer;

/// One set of overrides and the checks its rendering must pass
#[derive(Debug)]
pub struct Case {
    pub name: String,
    pub options: TemplateOptions,
    pub checks: Vec<Check>,
}

impl Case {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: TemplateOptions::default(),
            checks: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: TemplateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }
}

/// A case whose rendering must fail
#[derive(Debug, Clone)]
pub struct FailureCase {
    pub name: String,
    pub options: TemplateOptions,
    /// Substring the rendering error must contain
    pub error_contains: String,
    /// Template globs whose fields the overrides count as covering
    pub covers: Vec<String>,
}

impl FailureCase {
    pub fn new(name: impl Into<String>, error_contains: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: TemplateOptions::default(),
            error_contains: error_contains.into(),
            covers: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: TemplateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn covers<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.covers.extend(globs.into_iter().map(Into::into));
        self
    }
}

/// A failure with the qualified name of the test that reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedFailure {
    pub test: String,
    pub failure: Failure,
}

impl fmt::Display for ReportedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.test, self.failure.message)
    }
}

/// Outcome of one case
#[derive(Debug, Clone, Default)]
pub struct CaseReport {
    pub name: String,
    pub failures: Vec<ReportedFailure>,
}

impl CaseReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, test: &str, failure: Failure) {
        self.failures.push(ReportedFailure {
            test: test.to_string(),
            failure,
        });
    }

    fn absorb(&mut self, handle: TestHandle) {
        let test = handle.name().to_string();
        for failure in handle.into_failures() {
            self.fail(&test, failure);
        }
    }

    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of a whole suite
#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub name: String,
    pub cases: Vec<CaseReport>,
    pub coverage: Coverage,
    /// Leaves of the suite's values type the cases set, when one was declared
    pub values_coverage: Option<ShapeCoverage>,
    /// Failures not tied to a case, such as missing the coverage minimum
    pub failures: Vec<ReportedFailure>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty() && self.cases.iter().all(CaseReport::passed)
    }

    pub fn all_failures(&self) -> impl Iterator<Item = &ReportedFailure> {
        self.cases
            .iter()
            .flat_map(|c| c.failures.iter())
            .chain(self.failures.iter())
    }

    /// Panic with every failure; for use inside `#[test]`
    #[track_caller]
    pub fn assert_passed(&self) {
        if !self.passed() {
            panic!("{}", self);
        }
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.cases.iter().filter(|c| !c.passed()).count();
        writeln!(
            f,
            "suite {}: {} case(s), {} failed, coverage {:.2}%",
            self.name,
            self.cases.len(),
            failed,
            self.coverage.fraction * 100.0
        )?;
        if let Some(values_coverage) = &self.values_coverage {
            writeln!(f, "  values coverage {:.2}%", values_coverage.fraction * 100.0)?;
        }
        for failure in self.all_failures() {
            writeln!(f, "  {}", failure)?;
        }
        Ok(())
    }
}

/// The declared values type of a suite, erased to its two operations
#[derive(Clone, Copy)]
struct ValuesType {
    name: &'static str,
    accepts: fn(&Chart) -> std::result::Result<(), SchemaMismatchError>,
    coverage: fn(&BTreeSet<String>) -> ShapeCoverage,
}

/// Cases, default checks and collaborators for one chart
pub struct Suite {
    name: String,
    chart: Chart,
    usage: TemplateUsage,
    tracker: FieldTracker,
    include_subcharts: bool,
    renderer: Box<dyn Renderer>,
    linters: Vec<Box<dyn Linter>>,
    scheme: Scheme,
    default_options: TemplateOptions,
    default_checks: Vec<Check>,
    cases: Vec<Case>,
    failure_cases: Vec<FailureCase>,
    min_coverage: Option<f64>,
    values_type: Option<ValuesType>,
    /// Override paths of every case that recorded coverage
    set_paths: Mutex<BTreeSet<String>>,
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("chart", &self.chart.name())
            .field("cases", &self.cases.len())
            .field("failure_cases", &self.failure_cases.len())
            .field("linters", &self.linters.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("min_coverage", &self.min_coverage)
            .field("values_type", &self.values_type.map(|v| v.name))
            .finish_non_exhaustive()
    }
}

impl Suite {
    /// Load the chart at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_chart(Chart::load(path)?)
    }

    pub fn from_chart(chart: Chart) -> Result<Self> {
        let usage = TemplateUsage::from_chart(&chart)?;
        let tracker = FieldTracker::new(&usage, false);
        Ok(Self {
            name: chart.name().to_string(),
            chart,
            usage,
            tracker,
            include_subcharts: false,
            renderer: Box::new(GoTemplateRenderer::new()),
            linters: default_linters(),
            scheme: Scheme::global().clone(),
            default_options: TemplateOptions::default(),
            default_checks: Vec::new(),
            cases: Vec::new(),
            failure_cases: Vec::new(),
            min_coverage: None,
            values_type: None,
            set_paths: Mutex::new(BTreeSet::new()),
        })
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn case(mut self, case: Case) -> Self {
        self.cases.push(case);
        self
    }

    pub fn failure_case(mut self, case: FailureCase) -> Self {
        self.failure_cases.push(case);
        self
    }

    /// A check every case runs before its own
    pub fn default_check(mut self, check: Check) -> Self {
        self.default_checks.push(check);
        self
    }

    /// Options every case's options are laid over
    pub fn default_options(mut self, options: TemplateOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    pub fn linter(mut self, linter: impl Linter + 'static) -> Self {
        self.linters.push(Box::new(linter));
        self
    }

    pub fn without_linters(mut self) -> Self {
        self.linters.clear();
        self
    }

    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Track fields of subchart templates too
    pub fn include_subcharts(mut self, include: bool) -> Self {
        self.include_subcharts = include;
        self.tracker = FieldTracker::new(&self.usage, include);
        self
    }

    /// Fail the suite when coverage ends below `fraction` (0.0 to 1.0)
    pub fn min_coverage(mut self, fraction: f64) -> Self {
        self.min_coverage = Some(fraction);
        self
    }

    /// Declare the record the chart's values deserialize into
    ///
    /// The suite fails when `T` cannot hold every key of `values.schema.json`,
    /// and its report carries how many leaves of `T` the cases set.
    pub fn values_type<T: ValuesShape>(mut self) -> Self {
        self.values_type = Some(ValuesType {
            name: std::any::type_name::<T>(),
            accepts: ensure_accepts_schema::<T>,
            coverage: shape_coverage_of::<T>,
        });
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    pub fn usage(&self) -> &TemplateUsage {
        &self.usage
    }

    pub fn tracker(&self) -> &FieldTracker {
        &self.tracker
    }

    pub fn coverage(&self) -> Coverage {
        self.tracker.coverage()
    }

    /// Check the declared values type against the chart's schema
    pub fn validate_values_type(&self) -> Result<()> {
        match &self.values_type {
            Some(values_type) => (values_type.accepts)(&self.chart).map_err(SuiteError::from),
            None => Ok(()),
        }
    }

    /// Coverage of the declared values type by the overrides recorded so far
    pub fn values_coverage(&self) -> Option<ShapeCoverage> {
        let values_type = self.values_type?;
        let paths = self.set_paths.lock().unwrap_or_else(PoisonError::into_inner);
        Some((values_type.coverage)(&paths))
    }

    fn record_overrides(&self, overrides: Option<&JsonValue>) {
        let paths = override_paths(overrides);
        self.set_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(paths);
    }

    // ========================================================================
    // Running
    // ========================================================================

    /// Run every case, then every failure case, then compute coverage
    pub fn run(&self) -> SuiteReport {
        begin_diagnostics();

        let mut failures = Vec::new();
        if let Err(e) = self.validate_values_type() {
            let failure = Failure::new(e.to_string());
            emit(&self.name, &failure);
            failures.push(ReportedFailure {
                test: self.name.clone(),
                failure,
            });
        }

        let mut cases = Vec::with_capacity(self.cases.len() + self.failure_cases.len());
        for case in &self.cases {
            cases.push(self.run_case(case));
        }
        for case in &self.failure_cases {
            cases.push(self.run_failure_case(case));
        }

        let coverage = self.tracker.coverage();
        tracing::info!(
            suite = %self.name,
            coverage = coverage.fraction,
            "{}",
            coverage.report
        );

        let values_coverage = self.values_coverage();
        if let Some(values_coverage) = &values_coverage {
            tracing::info!(
                suite = %self.name,
                coverage = values_coverage.fraction,
                "{}",
                values_coverage.report
            );
        }

        if let Some(min) = self.min_coverage
            && coverage.fraction < min
        {
            let failure = Failure::new(format!(
                "coverage {:.2}% is below the required {:.2}%\n{}",
                coverage.fraction * 100.0,
                min * 100.0,
                coverage.report
            ));
            emit(&self.name, &failure);
            failures.push(ReportedFailure {
                test: self.name.clone(),
                failure,
            });
        }

        SuiteReport {
            name: self.name.clone(),
            cases,
            coverage,
            values_coverage,
            failures,
        }
    }

    fn options_for(&self, options: &TemplateOptions) -> TemplateOptions {
        let mut merged = self.default_options.clone();
        merged.merge(options);
        merged
    }

    fn resolve(&self, options: &TemplateOptions) -> std::result::Result<ResolvedOptions, String> {
        self.options_for(options)
            .resolve(&self.chart)
            .map_err(|e| e.to_string())
    }

    /// Render, lint and check one case, recording its overrides
    pub fn run_case(&self, case: &Case) -> CaseReport {
        begin_diagnostics();
        let handle = TestHandle::new(&self.name).child(&case.name);
        let mut report = CaseReport::new(&case.name);

        let checks: Vec<&Check> = self.default_checks.iter().chain(&case.checks).collect();
        for check in &checks {
            if let Err(e) = check.validate() {
                report.fail(
                    handle.child(&check.name).name(),
                    Failure::new(e.to_string()),
                );
            }
        }

        if report.passed() {
            self.render_and_check(case, &checks, &handle, &mut report);
        }

        for failure in &report.failures {
            emit(&failure.test, &failure.failure);
        }
        report
    }

    fn render_and_check(
        &self,
        case: &Case,
        checks: &[&Check],
        handle: &TestHandle,
        report: &mut CaseReport,
    ) {
        let resolved = match self.resolve(&case.options) {
            Ok(resolved) => resolved,
            Err(message) => {
                report.fail(handle.name(), Failure::new(message));
                return;
            }
        };

        let output = match self.renderer.render(&self.chart, &resolved) {
            Ok(output) => output,
            Err(e) => {
                report.fail(handle.name(), Failure::new(e.to_string()));
                return;
            }
        };

        for linter in &self.linters {
            let lint_handle = handle.child(linter.name());
            for finding in linter.lint(&self.chart, &output) {
                tracing::warn!(test = %lint_handle.name(), "{}", finding.message);
                report.fail(lint_handle.name(), finding.into_failure(&self.chart));
            }
        }

        for check in checks {
            let check_handle = check.run(
                handle.child(&check.name),
                &output.objects,
                Some(&output.values),
                &self.scheme,
            );
            report.absorb(check_handle);
        }

        self.tracker.record_values(overrides(&resolved));
        self.record_overrides(overrides(&resolved));
    }

    /// Render a case that must fail; it passes when the error contains the expected text
    pub fn run_failure_case(&self, case: &FailureCase) -> CaseReport {
        begin_diagnostics();
        let handle = TestHandle::new(&self.name).child(&case.name);
        let mut report = CaseReport::new(&case.name);

        let covers = match compile_patterns(&case.covers) {
            Ok(covers) => covers,
            Err(e) => {
                report.fail(handle.name(), Failure::new(e.to_string()));
                emit(handle.name(), &report.failures[0].failure);
                return report;
            }
        };

        let (resolved, outcome) = match self.resolve(&case.options) {
            Ok(resolved) => {
                let outcome = self
                    .renderer
                    .render(&self.chart, &resolved)
                    .map(|_| ())
                    .map_err(|e| e.to_string());
                (Some(resolved), outcome)
            }
            Err(message) => (None, Err(message)),
        };

        match outcome {
            Ok(()) => report.fail(
                handle.name(),
                Failure::new(format!(
                    "expected rendering to fail with an error containing {:?}, but it succeeded",
                    case.error_contains
                )),
            ),
            Err(message) if message.contains(&case.error_contains) => {
                tracing::debug!(test = %handle.name(), "rendering failed as expected");
                if let Some(resolved) = &resolved {
                    self.tracker.record_values_for(overrides(resolved), &covers);
                    self.record_overrides(overrides(resolved));
                }
            }
            Err(message) => report.fail(
                handle.name(),
                Failure::new(format!(
                    "expected an error containing {:?}, got: {}",
                    case.error_contains, message
                )),
            ),
        }

        for failure in &report.failures {
            emit(&failure.test, &failure.failure);
        }
        report
    }
}

fn overrides(resolved: &ResolvedOptions) -> Option<&JsonValue> {
    resolved.overrides.as_ref().map(Values::inner)
}

fn begin_diagnostics() {
    if let Err(e) = writer::begin_process() {
        tracing::warn!(error = %e, "cannot prepare the diagnostics directory");
    }
}

fn emit(test: &str, failure: &Failure) {
    if let Err(e) = writer::write_failure(test, failure) {
        tracing::warn!(error = %e, test = %test, "cannot write diagnostics");
    }
}
