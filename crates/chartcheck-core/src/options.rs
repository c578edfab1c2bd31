//! Render options: release identity, cluster capabilities and value overrides

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::chart::Chart;
use crate::error::{CoreError, Result};
use crate::values::Values;

/// Release identity as seen by templates through `.Release`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Release name; defaults to the chart name
    #[serde(default)]
    pub name: Option<String>,

    /// Target namespace; defaults to `default`
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub is_install: bool,

    #[serde(default)]
    pub is_upgrade: bool,
}

/// Cluster capabilities overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Kubernetes version, e.g. `v1.31.0`
    #[serde(default)]
    pub kube_version: Option<String>,
}

/// Value overrides, applied in Helm's order on top of the chart defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesOptions {
    /// Value files (`-f`)
    #[serde(default)]
    pub value_files: Vec<String>,

    /// `key=value` overrides with typed values (`--set`)
    #[serde(default)]
    pub set: Vec<String>,

    /// `key=value` overrides kept as strings (`--set-string`)
    #[serde(default)]
    pub set_string: Vec<String>,

    /// `key=path` overrides read from files (`--set-file`)
    #[serde(default)]
    pub set_file: Vec<String>,

    /// `key=<json>` overrides (`--set-json`)
    #[serde(default, rename = "setJSON")]
    pub set_json: Vec<String>,
}

impl ValuesOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value_file(mut self, path: impl Into<String>) -> Self {
        self.value_files.push(path.into());
        self
    }

    pub fn set(mut self, assignment: impl Into<String>) -> Self {
        self.set.push(assignment.into());
        self
    }

    pub fn set_string(mut self, assignment: impl Into<String>) -> Self {
        self.set_string.push(assignment.into());
        self
    }

    pub fn set_file(mut self, assignment: impl Into<String>) -> Self {
        self.set_file.push(assignment.into());
        self
    }

    pub fn set_json(mut self, assignment: impl Into<String>) -> Self {
        self.set_json.push(assignment.into());
        self
    }

    /// Append every list of `other` after the corresponding list of `self`
    pub fn merge(&mut self, other: &ValuesOptions) {
        self.value_files.extend(other.value_files.iter().cloned());
        self.set.extend(other.set.iter().cloned());
        self.set_string.extend(other.set_string.iter().cloned());
        self.set_file.extend(other.set_file.iter().cloned());
        self.set_json.extend(other.set_json.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.value_files.is_empty()
            && self.set.is_empty()
            && self.set_string.is_empty()
            && self.set_file.is_empty()
            && self.set_json.is_empty()
    }

    /// Build the user-supplied values map (without chart defaults)
    ///
    /// Order: value files, JSON overrides, `set`, `set-string`, `set-file`.
    /// Relative paths resolve against `base_dir`.
    pub fn merge_values(&self, base_dir: &Path) -> Result<Values> {
        let mut values = Values::new();

        for file in &self.value_files {
            let path = base_dir.join(file);
            let overlay = Values::from_file(&path).map_err(|e| CoreError::InvalidChart {
                message: format!("cannot load value file {}: {}", path.display(), e),
            })?;
            values.merge(&overlay);
        }
        for assignment in &self.set_json {
            values.apply_set_json(assignment)?;
        }
        for assignment in &self.set {
            values.apply_set(assignment)?;
        }
        for assignment in &self.set_string {
            values.apply_set_string(assignment)?;
        }
        for assignment in &self.set_file {
            values.apply_set_file(assignment, base_dir)?;
        }

        Ok(values)
    }
}

/// Everything a single render of a chart can be configured with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateOptions {
    #[serde(default)]
    pub release: Release,

    #[serde(default)]
    pub capabilities: Capabilities,

    /// `None` means no values bundle was supplied at all
    #[serde(default)]
    pub values: Option<ValuesOptions>,
}

impl TemplateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_release(mut self, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.release.name = Some(name.into());
        self.release.namespace = Some(namespace.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.release.name = Some(name.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.release.namespace = Some(namespace.into());
        self
    }

    pub fn install(mut self) -> Self {
        self.release.is_install = true;
        self
    }

    pub fn upgrade(mut self) -> Self {
        self.release.is_upgrade = true;
        self
    }

    pub fn with_kube_version(mut self, version: impl Into<String>) -> Self {
        self.capabilities.kube_version = Some(version.into());
        self
    }

    /// Attach a values bundle, merging with any bundle already present
    pub fn with_values(mut self, values: ValuesOptions) -> Self {
        match &mut self.values {
            Some(existing) => existing.merge(&values),
            None => self.values = Some(values),
        }
        self
    }

    pub fn set(self, assignment: impl Into<String>) -> Self {
        self.with_values(ValuesOptions::new().set(assignment))
    }

    pub fn set_string(self, assignment: impl Into<String>) -> Self {
        self.with_values(ValuesOptions::new().set_string(assignment))
    }

    pub fn set_file(self, assignment: impl Into<String>) -> Self {
        self.with_values(ValuesOptions::new().set_file(assignment))
    }

    pub fn set_json(self, assignment: impl Into<String>) -> Self {
        self.with_values(ValuesOptions::new().set_json(assignment))
    }

    pub fn value_file(self, path: impl Into<String>) -> Self {
        self.with_values(ValuesOptions::new().value_file(path))
    }

    /// Overlay `other`: scalar settings it carries win, value lists concatenate
    pub fn merge(&mut self, other: &TemplateOptions) {
        if other.release.name.is_some() {
            self.release.name = other.release.name.clone();
        }
        if other.release.namespace.is_some() {
            self.release.namespace = other.release.namespace.clone();
        }
        self.release.is_install |= other.release.is_install;
        self.release.is_upgrade |= other.release.is_upgrade;
        if other.capabilities.kube_version.is_some() {
            self.capabilities.kube_version = other.capabilities.kube_version.clone();
        }
        if let Some(values) = &other.values {
            match &mut self.values {
                Some(existing) => existing.merge(values),
                None => self.values = Some(values.clone()),
            }
        }
    }

    /// Apply defaults and parse everything against a loaded chart
    pub fn resolve(&self, chart: &Chart) -> Result<ResolvedOptions> {
        let kube_version = match &self.capabilities.kube_version {
            Some(raw) => KubeVersion::parse(raw)?,
            None => KubeVersion::default(),
        };

        let overrides = match &self.values {
            Some(bundle) => Some(bundle.merge_values(&chart.root)?),
            None => None,
        };

        let is_install = self.release.is_install || !self.release.is_upgrade;

        Ok(ResolvedOptions {
            release_name: self
                .release
                .name
                .clone()
                .unwrap_or_else(|| chart.name().to_string()),
            namespace: self
                .release
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            is_install,
            is_upgrade: self.release.is_upgrade,
            kube_version,
            overrides,
        })
    }
}

/// Options after defaults are applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub release_name: String,
    pub namespace: String,
    pub is_install: bool,
    pub is_upgrade: bool,
    pub kube_version: KubeVersion,

    /// User-supplied values, `None` when no bundle was given
    pub overrides: Option<Values>,
}

/// Kubernetes version info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeVersion {
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl Default for KubeVersion {
    fn default() -> Self {
        Self {
            version: "v1.31.0".to_string(),
            major: "1".to_string(),
            minor: "31".to_string(),
        }
    }
}

impl KubeVersion {
    /// Parse `v1.31.0`, `1.31` or `v1.29.3-gke.100`
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidKubeVersion {
            value: raw.to_string(),
        };

        let trimmed = raw.trim().trim_start_matches('v');
        let (core, suffix) = match trimmed.find(['-', '+']) {
            Some(idx) => trimmed.split_at(idx),
            None => (trimmed, ""),
        };

        let normalized = match core.split('.').count() {
            2 => format!("{}.0{}", core, suffix),
            3 => format!("{}{}", core, suffix),
            _ => return Err(invalid()),
        };
        let parsed = semver::Version::parse(&normalized).map_err(|_| invalid())?;

        Ok(Self {
            version: format!("v{}", parsed),
            major: parsed.major.to_string(),
            minor: parsed.minor.to_string(),
        })
    }
}
