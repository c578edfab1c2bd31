//! Check chains: ordered steps sharing a [`TestContext`]
//!
//! Steps run in order against the same objects. After each step the chain
//! stops when the test has failed, unless the step called
//! [`TestContext::continue_execution`]; the flag only covers the next step.
//!
//! ```ignore
//! use k8s_openapi::api::core::v1::ConfigMap;
//!
//! let chain = Chain::new()
//!     .per_resource(|ctx, cm: &ConfigMap| {
//!         if cm.data.is_none() {
//!             ctx.fail("config map has no data");
//!         }
//!     })
//!     .on_workloads(|ctx, workloads| ctx.store("workloads", workloads.len()));
//! ```

use std::fmt;

use chartcheck_core::ObjectSet;
use chartcheck_kube::{
    DispatchError, DispatchTarget, Only, Routable, Scheme, SignatureError, Workload, dispatch,
    layout, workloads,
};

use crate::context::TestContext;

type StepFn = Box<dyn Fn(&mut TestContext, &ObjectSet, &Scheme) -> StepResult + Send + Sync>;
type StepResult = std::result::Result<(), DispatchError>;

struct Step {
    kind: &'static str,
    run: StepFn,
    validate: Option<fn() -> std::result::Result<(), SignatureError>>,
}

fn validate_target<S: DispatchTarget>() -> std::result::Result<(), SignatureError> {
    layout::<S>().map(|_| ())
}

/// An ordered list of check steps
#[derive(Default)]
pub struct Chain {
    steps: Vec<Step>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|s| s.kind))
            .finish()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push(
        mut self,
        kind: &'static str,
        validate: Option<fn() -> std::result::Result<(), SignatureError>>,
        run: StepFn,
    ) -> Self {
        self.steps.push(Step {
            kind,
            run,
            validate,
        });
        self
    }

    /// Run `f` once with the context
    pub fn once<F>(self, f: F) -> Self
    where
        F: Fn(&mut TestContext) + Send + Sync + 'static,
    {
        self.push(
            "once",
            None,
            Box::new(move |ctx, _, _| {
                f(ctx);
                Ok(())
            }),
        )
    }

    /// Run `f` once with every object of type `T`
    pub fn on_resources<T, F>(self, f: F) -> Self
    where
        T: Routable,
        F: Fn(&mut TestContext, &[T]) + Send + Sync + 'static,
    {
        self.push(
            "on_resources",
            Some(validate_target::<Only<T>>),
            Box::new(move |ctx, objects, scheme| {
                let only: Only<T> = dispatch(objects.iter(), scheme, false)?;
                f(ctx, &only.0);
                Ok(())
            }),
        )
    }

    /// Run `f` for each object of type `T`
    pub fn per_resource<T, F>(self, f: F) -> Self
    where
        T: Routable,
        F: Fn(&mut TestContext, &T) + Send + Sync + 'static,
    {
        self.push(
            "per_resource",
            Some(validate_target::<Only<T>>),
            Box::new(move |ctx, objects, scheme| {
                let only: Only<T> = dispatch(objects.iter(), scheme, false)?;
                for resource in &only.0 {
                    tracing::trace!(
                        name = resource.name().unwrap_or_default(),
                        namespace = resource.namespace().unwrap_or_default(),
                        "per_resource"
                    );
                    f(ctx, resource);
                }
                Ok(())
            }),
        )
    }

    /// Run `f` once with every workload
    pub fn on_workloads<F>(self, f: F) -> Self
    where
        F: Fn(&mut TestContext, &[Workload]) + Send + Sync + 'static,
    {
        self.push(
            "on_workloads",
            None,
            Box::new(move |ctx, objects, _| {
                let found = workloads(objects.iter())?;
                f(ctx, &found);
                Ok(())
            }),
        )
    }

    /// Run `f` for each workload
    pub fn per_workload<F>(self, f: F) -> Self
    where
        F: Fn(&mut TestContext, &Workload) + Send + Sync + 'static,
    {
        self.push(
            "per_workload",
            None,
            Box::new(move |ctx, objects, _| {
                for workload in &workloads(objects.iter())? {
                    f(ctx, workload);
                }
                Ok(())
            }),
        )
    }

    /// Run `f` with the objects dispatched into `S`; unmatched objects are dropped
    pub fn chained_check<S, F>(self, f: F) -> Self
    where
        S: DispatchTarget,
        F: Fn(&mut TestContext, &S) + Send + Sync + 'static,
    {
        self.dispatched(false, f)
    }

    /// Like [`chained_check`](Self::chained_check), failing on objects `S` has no field for
    pub fn strict_check<S, F>(self, f: F) -> Self
    where
        S: DispatchTarget,
        F: Fn(&mut TestContext, &S) + Send + Sync + 'static,
    {
        self.dispatched(true, f)
    }

    fn dispatched<S, F>(self, strict: bool, f: F) -> Self
    where
        S: DispatchTarget,
        F: Fn(&mut TestContext, &S) + Send + Sync + 'static,
    {
        self.push(
            "chained_check",
            Some(validate_target::<S>),
            Box::new(move |ctx, objects, scheme| {
                let target: S = dispatch(objects.iter(), scheme, strict)?;
                f(ctx, &target);
                Ok(())
            }),
        )
    }

    /// Append the steps of `other`
    pub fn then(mut self, other: Chain) -> Self {
        self.steps.extend(other.steps);
        self
    }

    /// Check every dispatch target used by the chain
    pub fn validate(&self) -> std::result::Result<(), SignatureError> {
        for step in &self.steps {
            if let Some(validate) = step.validate {
                validate()?;
            }
        }
        Ok(())
    }

    /// Run the steps against `objects`, returning how many ran
    pub fn run(&self, ctx: &mut TestContext, objects: &ObjectSet, scheme: &Scheme) -> usize {
        let mut ran = 0;
        for step in &self.steps {
            ran += 1;
            if let Err(e) = (step.run)(ctx, objects, scheme) {
                ctx.fail(e.to_string());
            }
            let proceed = ctx.take_continue();
            if ctx.failed() && !proceed {
                tracing::debug!(
                    test = %ctx.handle().name(),
                    step = step.kind,
                    "chain stopped after failure"
                );
                break;
            }
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TestHandle;
    use chartcheck_core::Unstructured;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::ConfigMap;
    use serde_json::json;

    fn object(api_version: &str, kind: &str, name: &str) -> Unstructured {
        Unstructured::from_value(json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {"name": name},
        }))
        .unwrap()
    }

    fn run(chain: &Chain, objects: &ObjectSet) -> (TestContext, usize) {
        let mut ctx = TestContext::new(TestHandle::new("chain"));
        let ran = chain.run(&mut ctx, objects, Scheme::global());
        (ctx, ran)
    }

    #[test]
    fn test_failure_stops_chain() {
        let chain = Chain::new()
            .once(|ctx| ctx.fail("first step failed"))
            .once(|ctx| ctx.store("reached", true));

        let (ctx, ran) = run(&chain, &ObjectSet::new());
        assert_eq!(ran, 1);
        assert!(ctx.failed());
        assert_eq!(ctx.get::<bool>("reached"), None);
    }

    #[test]
    fn test_continue_runs_next_step() {
        let chain = Chain::new()
            .once(|ctx| {
                ctx.fail("first step failed");
                ctx.continue_execution();
            })
            .once(|ctx| ctx.store("reached", true))
            .once(|ctx| ctx.store("third", true));

        let (ctx, ran) = run(&chain, &ObjectSet::new());
        assert_eq!(ran, 2);
        assert!(ctx.failed());
        assert_eq!(ctx.get::<bool>("reached"), Some(&true));
        assert_eq!(ctx.get::<bool>("third"), None);
    }

    #[test]
    fn test_continue_without_failure_is_consumed() {
        let chain = Chain::new()
            .once(|ctx| ctx.continue_execution())
            .once(|ctx| ctx.fail("second"))
            .once(|ctx| ctx.store("reached", true));

        let (ctx, ran) = run(&chain, &ObjectSet::new());
        assert_eq!(ran, 2);
        assert_eq!(ctx.get::<bool>("reached"), None);
    }

    #[test]
    fn test_resource_steps() {
        let objects: ObjectSet = vec![
            object("v1", "ConfigMap", "a"),
            object("apps/v1", "Deployment", "web"),
            object("v1", "ConfigMap", "b"),
        ]
        .into_iter()
        .collect();

        let chain = Chain::new()
            .on_resources(|ctx, maps: &[ConfigMap]| ctx.store("maps", maps.len()))
            .per_resource(|ctx, deployment: &Deployment| {
                ctx.store("deployment", deployment.metadata.name.clone().unwrap_or_default())
            })
            .per_workload(|ctx, workload| {
                ctx.map_set("workloads", workload.name.clone(), workload.kind)
            });

        let (ctx, ran) = run(&chain, &objects);
        assert_eq!(ran, 3);
        assert!(!ctx.failed());
        assert_eq!(ctx.get::<usize>("maps"), Some(&2));
        assert_eq!(ctx.get::<String>("deployment").map(String::as_str), Some("web"));
        assert!(ctx
            .map_get::<String, chartcheck_kube::WorkloadKind>("workloads", &"web".to_string())
            .is_some());
    }

    chartcheck_kube::dispatch_target! {
        struct OnlyConfigMaps {
            config_maps: Vec<ConfigMap>,
        }

        struct Duplicated {
            first: Vec<ConfigMap>,
            second: Vec<ConfigMap>,
        }
    }

    #[test]
    fn test_strict_dispatch_error_is_a_failure() {
        let objects: ObjectSet = vec![object("apps/v1", "Deployment", "web")]
            .into_iter()
            .collect();
        let chain = Chain::new()
            .strict_check(|ctx, _: &OnlyConfigMaps| ctx.store("reached", true))
            .once(|ctx| ctx.store("after", true));

        let (ctx, ran) = run(&chain, &objects);
        assert_eq!(ran, 1);
        assert!(ctx.failed());
        assert!(ctx.handle().failures()[0].message.contains("Deployment web"));
        assert_eq!(ctx.get::<bool>("reached"), None);
    }

    #[test]
    fn test_validate_reports_ambiguous_targets() {
        let good = Chain::new().chained_check(|_, _: &OnlyConfigMaps| {});
        assert!(good.validate().is_ok());

        let bad = good.then(Chain::new().chained_check(|_, _: &Duplicated| {}));
        assert_eq!(bad.len(), 2);
        assert!(matches!(
            bad.validate(),
            Err(SignatureError::AmbiguousRoute { .. })
        ));
    }
}
