//! Values coverage
//!
//! The [`FieldTracker`] reconciles the `.Values` fields templates read with the
//! fields test cases override. Every field a rendered file reaches (directly or
//! through named templates) is an entry keyed by the field followed by the
//! named templates it was reached through, innermost first:
//!
//! ```text
//! .Values.image.tag : app.image : app.container
//! ```
//!
//! An entry is covered once a case overrides a path equal to any part of its
//! key. Coverage counts one unit per (entry, rendered file) pair.

use glob::Pattern;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chartcheck_core::{SUBCHART_PREFIX, set_keys};
use chartcheck_template::{ParseResult, TemplateUsage};

/// Separator between a field and the named templates leading to it
pub const CHAIN_SEPARATOR: &str = " : ";

/// Root of every tracked field
pub const VALUES_ROOT: &str = ".Values";

/// Report text when nothing is left uncovered
pub const FULLY_COVERED: &str = "All keys in chart are fully covered";

/// Files an entry is rendered through and whether a case covered it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateTracker {
    pub templates: BTreeSet<String>,
    pub covered: bool,
}

/// Coverage fraction with its human-readable report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coverage {
    pub fraction: f64,
    pub report: String,
}

/// Tracks which `.Values` fields test cases have overridden
///
/// Shared by every case of a suite; all mutation goes through one lock.
#[derive(Debug, Default)]
pub struct FieldTracker {
    entries: Mutex<BTreeMap<String, TemplateTracker>>,
}

impl FieldTracker {
    /// Build the entries for every rendered file of `usage`
    ///
    /// Files under `charts/` are skipped unless `include_subcharts` is set.
    pub fn new(usage: &TemplateUsage, include_subcharts: bool) -> Self {
        let mut entries = BTreeMap::new();

        for (file, result) in &usage.files {
            if !include_subcharts && file.starts_with(SUBCHART_PREFIX) {
                continue;
            }
            if result.emit_warning {
                tracing::warn!(
                    file = %file,
                    "template reads the root context directly, coverage cannot bound what it uses"
                );
            }
            let mut chain = Vec::new();
            expand(usage, file, result, &mut chain, &mut entries);
        }

        Self {
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, TemplateTracker>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the overrides of a case
    ///
    /// `None` means the case supplied no values at all; `Some` (even empty)
    /// also touches `.Values` itself.
    pub fn record_values(&self, overrides: Option<&JsonValue>) {
        let paths = override_paths(overrides);
        self.mark(&paths, |_| true);
    }

    /// Record overrides only against entries rendered through files matching `covers`
    pub fn record_values_for(&self, overrides: Option<&JsonValue>, covers: &[Pattern]) {
        let paths = override_paths(overrides);
        self.mark(&paths, |tracker| {
            tracker
                .templates
                .iter()
                .any(|file| covers.iter().any(|p| p.matches(file)))
        });
    }

    /// Mark entries touched by explicit field paths or named-template names
    pub fn record_keys<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths: BTreeSet<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        self.mark(&paths, |_| true);
    }

    fn mark(&self, paths: &BTreeSet<String>, filter: impl Fn(&TemplateTracker) -> bool) {
        if paths.is_empty() {
            return;
        }
        let mut entries = self.lock();
        for (key, tracker) in entries.iter_mut() {
            if tracker.covered || !filter(tracker) {
                continue;
            }
            if key.split(CHAIN_SEPARATOR).any(|part| paths.contains(part)) {
                tracker.covered = true;
            }
        }
    }

    /// Snapshot of the entries
    pub fn entries(&self) -> BTreeMap<String, TemplateTracker> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Covered (entry, file) pairs over all pairs, with the report
    pub fn coverage(&self) -> Coverage {
        let entries = self.lock();

        let mut total = 0usize;
        let mut hit = 0usize;
        let mut covered = Vec::new();
        let mut uncovered = Vec::new();

        for (key, tracker) in entries.iter() {
            total += tracker.templates.len();
            let lines = tracker.templates.iter().map(|file| report_line(key, file));
            if tracker.covered {
                hit += tracker.templates.len();
                covered.extend(lines);
            } else {
                uncovered.extend(lines);
            }
        }

        let fraction = if total == 0 {
            1.0
        } else {
            hit as f64 / total as f64
        };

        let report = if uncovered.is_empty() {
            FULLY_COVERED.to_string()
        } else {
            let mut sections = vec![section("The following keys are not covered:", &uncovered)];
            if !covered.is_empty() {
                sections.push(section("The following keys are covered:", &covered));
            }
            sections.join("\n\n")
        };

        Coverage { fraction, report }
    }
}

fn expand(
    usage: &TemplateUsage,
    file: &str,
    result: &ParseResult,
    chain: &mut Vec<String>,
    entries: &mut BTreeMap<String, TemplateTracker>,
) {
    for field in result.fields.iter().filter(|f| is_values_field(f)) {
        let key = if chain.is_empty() {
            field.clone()
        } else {
            format!("{}{}{}", field, CHAIN_SEPARATOR, chain.join(CHAIN_SEPARATOR))
        };
        entries
            .entry(key)
            .or_default()
            .templates
            .insert(file.to_string());
    }

    for call in &result.template_calls {
        // recursive templates are expanded once per chain
        if chain.contains(call) {
            continue;
        }
        let Some(named) = usage.named_templates.get(call) else {
            continue;
        };
        chain.insert(0, call.clone());
        expand(usage, file, named, chain, entries);
        chain.remove(0);
    }
}

fn is_values_field(field: &str) -> bool {
    field
        .strip_prefix(VALUES_ROOT)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('['))
}

/// Field paths a values override sets, rooted at `.Values`
pub fn override_paths(overrides: Option<&JsonValue>) -> BTreeSet<String> {
    let Some(values) = overrides else {
        return BTreeSet::new();
    };
    let mut paths: BTreeSet<String> = set_keys(values)
        .into_iter()
        .map(|key| format!("{}{}", VALUES_ROOT, key))
        .collect();
    paths.insert(VALUES_ROOT.to_string());
    paths
}

fn report_line(key: &str, file: &str) -> String {
    let mut parts = key.split(CHAIN_SEPARATOR);
    let field = parts.next().unwrap_or_default();
    let mut line = format!("{{{{ {} }}}}", field);
    for part in parts.chain(std::iter::once(file)) {
        line.push_str(CHAIN_SEPARATOR);
        line.push_str(part);
    }
    line
}

fn section(title: &str, lines: &[String]) -> String {
    let mut out = title.to_string();
    for line in lines {
        out.push_str("\n- ");
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn usage() -> TemplateUsage {
        TemplateUsage::from_sources(vec![
            (
                "templates/_helpers.tpl".to_string(),
                r#"{{- define "app.image" -}}{{ .Values.image.repository }}:{{ .Values.image.tag }}{{- end -}}
{{- define "app.container" -}}image: {{ include "app.image" . }}{{- end -}}
{{- define "app.loop" -}}{{ .Values.loop }}{{ include "app.loop" . }}{{- end -}}"#,
            ),
            (
                "templates/deployment.yaml".to_string(),
                r#"replicas: {{ .Values.replicas }}
{{ include "app.container" . }}
{{ include "app.loop" . }}
name: {{ .Release.Name }}"#,
            ),
            (
                "templates/configmap.yaml".to_string(),
                r#"{{- range .Values.env }}
{{ .name }}: {{ .value }}
{{- end }}
replicas: {{ .Values.replicas }}"#,
            ),
            (
                "charts/sub/templates/svc.yaml".to_string(),
                "port: {{ .Values.port }}",
            ),
        ])
        .unwrap()
    }

    fn keys(tracker: &FieldTracker) -> Vec<String> {
        tracker.entries().into_keys().collect()
    }

    #[test]
    fn test_entries() {
        let tracker = FieldTracker::new(&usage(), false);
        assert_eq!(
            keys(&tracker),
            vec![
                ".Values.env",
                ".Values.env[].name",
                ".Values.env[].value",
                ".Values.image.repository : app.image : app.container",
                ".Values.image.tag : app.image : app.container",
                ".Values.loop : app.loop",
                ".Values.replicas",
            ]
        );
        let replicas = &tracker.entries()[".Values.replicas"];
        assert_eq!(replicas.templates.len(), 2);
    }

    #[test]
    fn test_subcharts_included_on_request() {
        let tracker = FieldTracker::new(&usage(), true);
        let entries = tracker.entries();
        assert!(entries[".Values.port"]
            .templates
            .contains("charts/sub/templates/svc.yaml"));
    }

    #[test]
    fn test_record_values() {
        let tracker = FieldTracker::new(&usage(), false);
        assert_eq!(tracker.coverage().fraction, 0.0);

        tracker.record_values(Some(&json!({"replicas": 2})));
        // replicas is rendered through two of the eight (entry, file) pairs
        let coverage = tracker.coverage();
        assert!((coverage.fraction - 2.0 / 8.0).abs() < f64::EPSILON);

        tracker.record_values(Some(&json!({"env": [{"name": "A", "value": "1"}]})));
        let entries = tracker.entries();
        assert!(entries[".Values.env"].covered);
        assert!(entries[".Values.env[].name"].covered);
        assert!(entries[".Values.env[].value"].covered);
    }

    #[test]
    fn test_record_keys_by_template_name() {
        let tracker = FieldTracker::new(&usage(), false);
        tracker.record_keys(["app.image"]);
        let entries = tracker.entries();
        assert!(entries[".Values.image.tag : app.image : app.container"].covered);
        assert!(!entries[".Values.loop : app.loop"].covered);
    }

    #[test]
    fn test_no_values_touches_nothing() {
        let tracker = FieldTracker::new(
            &TemplateUsage::from_sources(vec![(
                "templates/a.yaml".to_string(),
                "{{ toYaml .Values }}",
            )])
            .unwrap(),
            false,
        );
        tracker.record_values(None);
        assert_eq!(tracker.coverage().fraction, 0.0);

        tracker.record_values(Some(&json!({})));
        assert_eq!(tracker.coverage().fraction, 1.0);
    }

    #[test]
    fn test_failure_case_scope() {
        let tracker = FieldTracker::new(&usage(), false);
        let covers = [Pattern::new("templates/configmap.yaml").unwrap()];
        tracker.record_values_for(Some(&json!({"replicas": 2, "loop": "x"})), &covers);
        let entries = tracker.entries();
        // replicas is also rendered by configmap.yaml
        assert!(entries[".Values.replicas"].covered);
        assert!(!entries[".Values.loop : app.loop"].covered);
    }

    #[test]
    fn test_coverage_is_monotone() {
        let tracker = FieldTracker::new(&usage(), false);
        let mut last = tracker.coverage().fraction;
        for values in [
            json!({"image": {"tag": "v1"}}),
            json!({"replicas": 1}),
            json!({"image": {"tag": "v2"}}),
            json!({"loop": true, "image": {"repository": "nginx"}}),
        ] {
            tracker.record_values(Some(&values));
            let next = tracker.coverage().fraction;
            assert!(next >= last);
            last = next;
        }
    }

    #[test]
    fn test_empty_usage_is_fully_covered() {
        let tracker = FieldTracker::new(&TemplateUsage::default(), false);
        let coverage = tracker.coverage();
        assert_eq!(coverage.fraction, 1.0);
        assert_eq!(coverage.report, FULLY_COVERED);
    }

    #[test]
    fn test_report() {
        let tracker = FieldTracker::new(&usage(), false);
        tracker.record_values(Some(&json!({"image": {"tag": "v1"}, "env": [], "loop": 1})));
        insta::assert_snapshot!(tracker.coverage().report, @r"
        The following keys are not covered:
        - {{ .Values.env[].name }} : templates/configmap.yaml
        - {{ .Values.env[].value }} : templates/configmap.yaml
        - {{ .Values.image.repository }} : app.image : app.container : templates/deployment.yaml
        - {{ .Values.replicas }} : templates/configmap.yaml
        - {{ .Values.replicas }} : templates/deployment.yaml

        The following keys are covered:
        - {{ .Values.env }} : templates/configmap.yaml
        - {{ .Values.image.tag }} : app.image : app.container : templates/deployment.yaml
        - {{ .Values.loop }} : app.loop : templates/deployment.yaml
        ");
    }

    #[test]
    fn test_override_paths() {
        assert!(override_paths(None).is_empty());
        let paths = override_paths(Some(&json!({"data": {"hello": "world"}})));
        assert!(paths.contains(".Values"));
        assert!(paths.contains(".Values.data"));
        assert!(paths.contains(".Values.data.hello"));
    }
}
