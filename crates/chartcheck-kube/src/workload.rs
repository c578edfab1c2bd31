//! Pod-running resources reduced to their pod template

use k8s_openapi::api::apps::v1 as apps_v1;
use k8s_openapi::api::batch::v1 as batch_v1;
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use std::collections::BTreeMap;
use std::fmt;

use chartcheck_core::Unstructured;

use crate::error::{DispatchError, Result};
use crate::scheme::Routable;

/// Kinds that run pods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    StatefulSet,
    ReplicaSet,
    Job,
    CronJob,
}

impl WorkloadKind {
    /// Kind of a rendered object, if it is a workload
    pub fn of(object: &Unstructured) -> Option<Self> {
        let gvk = object.gvk();
        match (gvk.group.as_str(), gvk.version.as_str(), gvk.kind.as_str()) {
            ("apps", "v1", "Deployment") => Some(Self::Deployment),
            ("apps", "v1", "DaemonSet") => Some(Self::DaemonSet),
            ("apps", "v1", "StatefulSet") => Some(Self::StatefulSet),
            ("apps", "v1", "ReplicaSet") => Some(Self::ReplicaSet),
            ("batch", "v1", "Job") => Some(Self::Job),
            ("batch", "v1", "CronJob") => Some(Self::CronJob),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::StatefulSet => "StatefulSet",
            Self::ReplicaSet => "ReplicaSet",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workload with its pod template
#[derive(Debug, Clone)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub template: PodTemplateSpec,
    /// The object as rendered
    pub object: Unstructured,
}

impl Workload {
    /// Reduce a rendered object; `Ok(None)` when it is not a workload
    pub fn from_object(object: &Unstructured) -> Result<Option<Self>> {
        let Some(kind) = WorkloadKind::of(object) else {
            return Ok(None);
        };

        let template = match kind {
            WorkloadKind::Deployment => {
                convert::<apps_v1::Deployment>(object)?.spec.map(|s| s.template)
            }
            WorkloadKind::DaemonSet => {
                convert::<apps_v1::DaemonSet>(object)?.spec.map(|s| s.template)
            }
            WorkloadKind::StatefulSet => {
                convert::<apps_v1::StatefulSet>(object)?.spec.map(|s| s.template)
            }
            WorkloadKind::ReplicaSet => convert::<apps_v1::ReplicaSet>(object)?
                .spec
                .and_then(|s| s.template),
            WorkloadKind::Job => convert::<batch_v1::Job>(object)?.spec.map(|s| s.template),
            WorkloadKind::CronJob => convert::<batch_v1::CronJob>(object)?
                .spec
                .and_then(|s| s.job_template.spec)
                .map(|s| s.template),
        };

        Ok(Some(Self {
            kind,
            name: object.name().unwrap_or_default().to_string(),
            namespace: object.namespace().map(str::to_string),
            labels: object.labels(),
            template: template.unwrap_or_default(),
            object: object.clone(),
        }))
    }

    pub fn pod_spec(&self) -> Option<&PodSpec> {
        self.template.spec.as_ref()
    }

    /// Init containers followed by containers
    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.pod_spec().into_iter().flat_map(|spec| {
            spec.init_containers
                .iter()
                .flatten()
                .chain(spec.containers.iter())
        })
    }

    /// Labels of the pod template
    pub fn pod_labels(&self) -> BTreeMap<String, String> {
        self.template
            .metadata
            .as_ref()
            .and_then(|m| m.labels.clone())
            .unwrap_or_default()
    }
}

fn convert<T: Routable>(object: &Unstructured) -> Result<T> {
    T::from_object(object).map_err(|source| DispatchError::Conversion {
        object: object.describe(),
        type_name: std::any::type_name::<T>(),
        source,
    })
}

/// Every workload in `objects`, in order
pub fn workloads<'a, I>(objects: I) -> Result<Vec<Workload>>
where
    I: IntoIterator<Item = &'a Unstructured>,
{
    let mut out = Vec::new();
    for object in objects {
        if let Some(workload) = Workload::from_object(object)? {
            out.push(workload);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(yaml: &str) -> Unstructured {
        let value: serde_json::Value = serde_yaml::from_str(yaml).unwrap();
        Unstructured::from_value(value).unwrap()
    }

    #[test]
    fn test_workloads_keep_order() {
        let objects = vec![
            parse(
                r#"
apiVersion: batch/v1
kind: CronJob
metadata:
  name: nightly
spec:
  schedule: "0 0 * * *"
  jobTemplate:
    spec:
      template:
        spec:
          restartPolicy: Never
          containers:
            - name: job
              image: busybox
"#,
            ),
            parse(
                r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: config
"#,
            ),
            parse(
                r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: apps
  labels:
    app: web
spec:
  selector:
    matchLabels:
      app: web
  template:
    metadata:
      labels:
        app: web
    spec:
      initContainers:
        - name: init
          image: busybox
      containers:
        - name: web
          image: nginx
"#,
            ),
        ];

        let found = workloads(&objects).unwrap();
        assert_eq!(found.len(), 2);

        assert_eq!(found[0].kind, WorkloadKind::CronJob);
        assert_eq!(found[0].name, "nightly");
        let images: Vec<_> = found[0].containers().map(|c| c.image.clone().unwrap()).collect();
        assert_eq!(images, vec!["busybox"]);

        let web = &found[1];
        assert_eq!(web.kind, WorkloadKind::Deployment);
        assert_eq!(web.namespace.as_deref(), Some("apps"));
        assert_eq!(web.labels["app"], "web");
        assert_eq!(web.pod_labels()["app"], "web");
        let names: Vec<_> = web.containers().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["init", "web"]);
    }

    #[test]
    fn test_missing_spec_yields_empty_template() {
        let object = Unstructured::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "metadata": {"name": "bare"},
        }))
        .unwrap();
        let workload = Workload::from_object(&object).unwrap().unwrap();
        assert_eq!(workload.kind.to_string(), "ReplicaSet");
        assert!(workload.pod_spec().is_none());
        assert_eq!(workload.containers().count(), 0);
    }

    #[test]
    fn test_not_a_workload() {
        let object = Unstructured::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "svc"},
        }))
        .unwrap();
        assert!(Workload::from_object(&object).unwrap().is_none());
    }
}
