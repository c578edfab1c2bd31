//! Chart definition and loading

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::values::Values;

/// Path prefix of files that belong to a subchart
pub const SUBCHART_PREFIX: &str = "charts/";

/// Helm Chart.yaml structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// API version (v1 or v2)
    #[serde(default)]
    pub api_version: String,

    /// Chart name
    pub name: String,

    /// Chart version (SemVer)
    #[serde(default)]
    pub version: String,

    /// Kubernetes version constraint
    #[serde(default)]
    pub kube_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Chart type (application or library)
    #[serde(default, rename = "type")]
    pub chart_type: Option<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub home: Option<String>,

    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default)]
    pub dependencies: Vec<ChartDependency>,

    #[serde(default)]
    pub maintainers: Vec<Maintainer>,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub deprecated: bool,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Chart dependency entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDependency {
    pub name: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub repository: Option<String>,

    /// Values path that enables the dependency (e.g. `redis.enabled`)
    #[serde(default)]
    pub condition: Option<String>,

    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub url: Option<String>,
}

/// A chart loaded from an unpacked directory
#[derive(Debug, Clone)]
pub struct Chart {
    /// Chart.yaml content
    pub metadata: ChartMetadata,

    /// Directory the chart was loaded from
    pub root: PathBuf,

    /// Defaults from values.yaml
    pub values: Values,

    /// Parsed values.schema.json, if present
    pub schema: Option<JsonValue>,

    /// Template sources keyed by chart-relative path (`templates/x.yaml`)
    pub templates: BTreeMap<String, String>,

    /// Unpacked subcharts under `charts/`, keyed by directory name
    pub subcharts: BTreeMap<String, Chart>,
}

impl Chart {
    /// Load a chart from a directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(CoreError::ChartNotFound {
                path: root.display().to_string(),
            });
        }

        let chart_file = root.join("Chart.yaml");
        if !chart_file.exists() {
            return Err(CoreError::InvalidChart {
                message: format!("Chart.yaml not found in {}", root.display()),
            });
        }

        let metadata: ChartMetadata = serde_yaml::from_str(&std::fs::read_to_string(&chart_file)?)?;
        if metadata.name.trim().is_empty() {
            return Err(CoreError::InvalidChart {
                message: format!("{}: name must not be empty", chart_file.display()),
            });
        }

        let values_path = root.join("values.yaml");
        let values = if values_path.exists() {
            Values::from_file(&values_path)?
        } else {
            Values::new()
        };

        let schema_path = root.join("values.schema.json");
        let schema = if schema_path.exists() {
            Some(serde_json::from_str(&std::fs::read_to_string(&schema_path)?)?)
        } else {
            None
        };

        let templates = Self::load_templates(&root)?;
        let subcharts = Self::load_subcharts(&root)?;

        tracing::debug!(
            chart = %metadata.name,
            templates = templates.len(),
            subcharts = subcharts.len(),
            "loaded chart"
        );

        Ok(Self {
            metadata,
            root,
            values,
            schema,
            templates,
            subcharts,
        })
    }

    fn load_templates(root: &Path) -> Result<BTreeMap<String, String>> {
        let mut templates = BTreeMap::new();
        let templates_dir = root.join("templates");

        if !templates_dir.exists() {
            return Ok(templates);
        }

        for entry in walkdir::WalkDir::new(&templates_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(ext) = path.extension() else {
                continue;
            };
            let ext = ext.to_string_lossy().to_lowercase();
            if !matches!(ext.as_str(), "yaml" | "yml" | "tpl" | "txt" | "json") {
                continue;
            }

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            templates.insert(key, std::fs::read_to_string(path)?);
        }

        Ok(templates)
    }

    fn load_subcharts(root: &Path) -> Result<BTreeMap<String, Chart>> {
        let mut subcharts = BTreeMap::new();
        let charts_dir = root.join("charts");

        if !charts_dir.is_dir() {
            return Ok(subcharts);
        }

        let mut entries: Vec<_> = std::fs::read_dir(&charts_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();

        for path in entries {
            let Some(dir_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };

            if path.is_dir() {
                if path.join("Chart.yaml").exists() {
                    subcharts.insert(dir_name, Chart::load(&path)?);
                }
            } else if dir_name.ends_with(".tgz") || dir_name.ends_with(".tar.gz") {
                tracing::warn!(
                    archive = %path.display(),
                    "skipping packed subchart; unpack it under charts/ to include it"
                );
            }
        }

        Ok(subcharts)
    }

    /// Chart name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Chart version as written in Chart.yaml
    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// Whether this is a library chart (renders no manifests)
    pub fn is_library(&self) -> bool {
        self.metadata.chart_type.as_deref() == Some("library")
    }

    /// Key under which the parent scopes values for the subchart in `dir_name`
    ///
    /// Uses the dependency alias when Chart.yaml declares one.
    pub fn values_key_for(&self, dir_name: &str) -> String {
        let Some(sub) = self.subcharts.get(dir_name) else {
            return dir_name.to_string();
        };
        self.dependency_for(sub.name())
            .and_then(|dep| dep.alias.clone())
            .unwrap_or_else(|| sub.name().to_string())
    }

    /// Dependency entry declared for a subchart name
    pub fn dependency_for(&self, name: &str) -> Option<&ChartDependency> {
        self.metadata.dependencies.iter().find(|d| d.name == name)
    }

    /// This chart and every nested subchart, paired with the path prefix of
    /// their files (`""` for this chart, `charts/<sub>/` for subcharts)
    pub fn with_subcharts(&self) -> Vec<(String, &Chart)> {
        let mut charts = vec![(String::new(), self)];
        for (dir_name, sub) in &self.subcharts {
            let prefix = format!("{}{}/", SUBCHART_PREFIX, dir_name);
            for (nested_prefix, nested) in sub.with_subcharts() {
                charts.push((format!("{}{}", prefix, nested_prefix), nested));
            }
        }
        charts
    }

    /// Template sources of this chart and its subcharts keyed by path
    pub fn all_templates(&self) -> BTreeMap<String, &str> {
        self.with_subcharts()
            .into_iter()
            .flat_map(|(prefix, chart)| {
                chart
                    .templates
                    .iter()
                    .map(move |(key, source)| (format!("{}{}", prefix, key), source.as_str()))
            })
            .collect()
    }
}
