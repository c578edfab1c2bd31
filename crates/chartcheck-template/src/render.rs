//! Chart rendering
//!
//! [`GoTemplateRenderer`] evaluates a chart's templates in process, the way
//! `helm template` would: values are coalesced across subcharts and checked
//! against `values.schema.json`, each template file is executed with the
//! usual `.Values`/`.Release`/`.Chart`/`.Capabilities`/`.Template` context,
//! and the output is split into YAML documents keyed by template file.

use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;

use chartcheck_core::{
    Chart, ObjectSetMap, ResolvedOptions, SUBCHART_PREFIX, Unstructured, Values, lookup,
};

use crate::error::{RenderError, Result, TemplateError};
use crate::exec::{Exec, TemplateSet, validate_functions};
use crate::parser;
use crate::usage::is_partial;

/// Group/versions reported by `.Capabilities.APIVersions` unless overridden
pub const DEFAULT_API_VERSIONS: &[&str] = &[
    "v1",
    "admissionregistration.k8s.io/v1",
    "apiextensions.k8s.io/v1",
    "apps/v1",
    "authentication.k8s.io/v1",
    "authorization.k8s.io/v1",
    "autoscaling/v1",
    "autoscaling/v2",
    "batch/v1",
    "certificates.k8s.io/v1",
    "coordination.k8s.io/v1",
    "discovery.k8s.io/v1",
    "events.k8s.io/v1",
    "networking.k8s.io/v1",
    "node.k8s.io/v1",
    "policy/v1",
    "rbac.authorization.k8s.io/v1",
    "scheduling.k8s.io/v1",
    "storage.k8s.io/v1",
];

/// Helm release the renderer claims to be
const HELM_VERSION: &str = "v3.16.0";

/// Anything that can turn a chart plus options into rendered objects
pub trait Renderer: Send + Sync {
    fn render(&self, chart: &Chart, options: &ResolvedOptions) -> Result<RenderOutput>;
}

/// Result of rendering a chart
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    /// Parsed objects per template file, plus the flattened set
    pub objects: ObjectSetMap,

    /// Raw rendered text per template file
    pub manifests: BTreeMap<String, String>,

    /// Rendered NOTES.txt of the top-level chart
    pub notes: Option<String>,

    /// Fully coalesced values the top-level chart was rendered with
    pub values: JsonValue,
}

/// In-process Go template renderer
#[derive(Debug, Clone)]
pub struct GoTemplateRenderer {
    api_versions: Vec<String>,
}

impl Default for GoTemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// A chart selected for rendering with its final values
struct Scoped<'c> {
    /// Path prefix of the chart's files (`""` or `charts/<sub>/`)
    prefix: String,
    chart: &'c Chart,
    values: JsonValue,
}

impl GoTemplateRenderer {
    pub fn new() -> Self {
        Self {
            api_versions: DEFAULT_API_VERSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Report additional group/versions through `.Capabilities.APIVersions`
    pub fn with_api_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.api_versions.extend(versions.into_iter().map(Into::into));
        self
    }

    /// Coalesce values for `chart` and every enabled subchart, depth first
    fn scope<'c>(
        chart: &'c Chart,
        prefix: String,
        mut values: Values,
        out: &mut Vec<Scoped<'c>>,
    ) -> JsonValue {
        let index = out.len();
        out.push(Scoped {
            prefix: prefix.clone(),
            chart,
            values: JsonValue::Null,
        });

        for (dir_name, sub) in &chart.subcharts {
            let key = chart.values_key_for(dir_name);
            if !Self::is_enabled(chart, sub, values.inner()) {
                tracing::debug!(chart = chart.name(), subchart = %key, "subchart disabled by condition");
                continue;
            }

            let sub_values = Values::for_subchart(sub.values.clone(), values.inner(), &key);
            let sub_prefix = format!("{}{}{}/", prefix, SUBCHART_PREFIX, dir_name);
            let coalesced = Self::scope(sub, sub_prefix, sub_values, out);

            // The parent sees the subchart's final values under its key
            let mut section = coalesced;
            if let JsonValue::Object(map) = &mut section {
                map.remove("global");
            }
            if let JsonValue::Object(map) = &mut values.0 {
                map.insert(key, section);
            }
        }

        let values = values.into_inner();
        out[index].values = values.clone();
        values
    }

    /// Evaluate a dependency's `condition` against the parent's values
    fn is_enabled(parent: &Chart, sub: &Chart, parent_values: &JsonValue) -> bool {
        let Some(condition) = parent
            .dependency_for(sub.name())
            .and_then(|dep| dep.condition.as_deref())
        else {
            return true;
        };

        for path in condition.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Ok(Some(JsonValue::Bool(enabled))) = lookup(parent_values, path) {
                return *enabled;
            }
        }
        true
    }

    fn validate_schema(scoped: &Scoped<'_>) -> Result<()> {
        let Some(schema) = &scoped.chart.schema else {
            return Ok(());
        };

        let validator = jsonschema::validator_for(schema).map_err(|e| TemplateError::Schema {
            chart: scoped.chart.name().to_string(),
            errors: vec![format!("- invalid schema: {}", e)],
        })?;
        if validator.is_valid(&scoped.values) {
            return Ok(());
        }

        let errors = validator
            .iter_errors(&scoped.values)
            .map(|e| {
                let path = e.instance_path.to_string();
                let at = if path.is_empty() { "(root)".to_string() } else { path };
                format!("- at '{}': {}", at, e)
            })
            .collect();
        Err(TemplateError::Schema {
            chart: scoped.chart.name().to_string(),
            errors,
        })
    }

    fn context(&self, root: &Chart, scoped: &Scoped<'_>, options: &ResolvedOptions) -> JsonValue {
        let meta = &scoped.chart.metadata;
        let kube = &options.kube_version;
        let revision = if options.is_upgrade { 2 } else { 1 };
        let chart_type = meta.chart_type.as_deref().unwrap_or("application");
        let base_path = format!("{}/{}templates", root.name(), scoped.prefix);
        json!({
            "Values": scoped.values,
            "Release": {
                "Name": options.release_name,
                "Namespace": options.namespace,
                "IsInstall": options.is_install,
                "IsUpgrade": options.is_upgrade,
                "Revision": revision,
                "Service": "Helm",
            },
            "Chart": {
                "APIVersion": meta.api_version,
                "Name": meta.name,
                "Version": meta.version,
                "AppVersion": meta.app_version.clone().unwrap_or_default(),
                "Description": meta.description.clone().unwrap_or_default(),
                "Type": chart_type,
                "KubeVersion": meta.kube_version.clone().unwrap_or_default(),
                "Keywords": meta.keywords,
                "Home": meta.home.clone().unwrap_or_default(),
                "Sources": meta.sources,
                "Icon": meta.icon.clone().unwrap_or_default(),
                "Deprecated": meta.deprecated,
                "Annotations": meta.annotations,
            },
            "Capabilities": {
                "KubeVersion": {
                    "Version": kube.version,
                    "Major": kube.major,
                    "Minor": kube.minor,
                    "GitVersion": kube.version,
                },
                "APIVersions": self.api_versions,
                "HelmVersion": { "Version": HELM_VERSION },
            },
            "Template": {
                "Name": "",
                "BasePath": base_path,
            },
        })
    }

    /// Parse every template of the selected charts and collect named templates
    fn build_set(
        root: &Chart,
        scoped: &[Scoped<'_>],
    ) -> Result<(TemplateSet, BTreeMap<String, crate::ast::Template>)> {
        let mut set = TemplateSet::default();
        let mut parsed = BTreeMap::new();

        for entry in scoped {
            for (key, source) in &entry.chart.templates {
                let file = format!("{}{}", entry.prefix, key);
                let display = format!("{}/{}", root.name(), file);
                let template = parser::parse(&display, source).map_err(|e| TemplateError::Parse {
                    file: file.clone(),
                    message: e.to_string(),
                })?;
                validate_functions(&template).map_err(|message| TemplateError::Parse {
                    file: file.clone(),
                    message,
                })?;
                parsed.insert(file, template);
            }
        }

        // Registration follows path order, so the last definition of a name wins
        for (file, template) in &parsed {
            set.register(&format!("{}/{}", root.name(), file), template);
        }

        Ok((set, parsed))
    }
}

impl Renderer for GoTemplateRenderer {
    fn render(&self, chart: &Chart, options: &ResolvedOptions) -> Result<RenderOutput> {
        let mut values = chart.values.clone();
        if let Some(overrides) = &options.overrides {
            values.merge(overrides);
        }

        let mut scoped = Vec::new();
        let final_values = Self::scope(chart, String::new(), values, &mut scoped);
        for entry in &scoped {
            Self::validate_schema(entry)?;
        }

        let (set, parsed) = Self::build_set(chart, &scoped)?;
        let mut output = RenderOutput {
            values: final_values,
            ..RenderOutput::default()
        };

        for entry in &scoped {
            if entry.chart.is_library() {
                continue;
            }
            let mut context = self.context(chart, entry, options);

            for key in entry.chart.templates.keys() {
                let file = format!("{}{}", entry.prefix, key);
                let is_notes = key.rsplit('/').next() == Some("NOTES.txt");
                if is_partial(&file) || (is_notes && !entry.prefix.is_empty()) {
                    continue;
                }
                let Some(template) = parsed.get(&file) else {
                    continue;
                };

                let display = format!("{}/{}", chart.name(), file);
                context["Template"]["Name"] = JsonValue::String(display.clone());
                let rendered = Exec::new(&set, &display)
                    .render(&template.root, &context)
                    .map_err(|e| RenderError::new(e.message()))?;

                if is_notes {
                    output.notes = Some(rendered);
                    continue;
                }

                tracing::debug!(file = %file, bytes = rendered.len(), "rendered template");
                for document in split_documents(&rendered) {
                    if let Some(object) = parse_document(&file, document)? {
                        output.objects.insert(&file, object);
                    }
                }
                output.manifests.insert(file, rendered);
            }
        }

        Ok(output)
    }
}

/// Split rendered text on `---` separator lines
fn split_documents(rendered: &str) -> Vec<&str> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in rendered.split_inclusive('\n') {
        let content = line.trim_end();
        let is_separator = content == "---"
            || content
                .strip_prefix("---")
                .is_some_and(|rest| rest.starts_with([' ', '\t']));
        if is_separator {
            documents.push(&rendered[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    documents.push(&rendered[start..]);

    documents
        .into_iter()
        .filter(|doc| !doc.trim().is_empty())
        .collect()
}

fn parse_document(file: &str, document: &str) -> Result<Option<Unstructured>> {
    let value: JsonValue =
        serde_yaml::from_str(document).map_err(|e| TemplateError::Manifest {
            file: file.to_string(),
            message: e.to_string(),
        })?;

    match value {
        JsonValue::Null => Ok(None),
        JsonValue::Object(_) => Ok(Unstructured::from_value(value)),
        other => Err(TemplateError::Manifest {
            file: file.to_string(),
            message: format!("expected a mapping, got {}", other),
        }),
    }
}
