//! Named checks: a chain plus the template files it looks at

use glob::Pattern;

use chartcheck_core::{ObjectSet, ObjectSetMap};
use chartcheck_kube::Scheme;

use crate::chain::Chain;
use crate::context::TestContext;
use crate::error::{Result, SuiteError};
use crate::handle::TestHandle;

/// Which rendered objects a check sees
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOptions {
    /// Globs over chart-relative template paths; empty means every file
    pub templates: Vec<String>,
}

impl CheckOptions {
    /// Compiled template globs
    pub fn patterns(&self) -> Result<Vec<Pattern>> {
        compile_patterns(&self.templates)
    }
}

pub(crate) fn compile_patterns(globs: &[String]) -> Result<Vec<Pattern>> {
    globs
        .iter()
        .map(|glob| {
            Pattern::new(glob).map_err(|source| SuiteError::Pattern {
                pattern: glob.clone(),
                source,
            })
        })
        .collect()
}

/// A chain run against the objects of one rendered case
#[derive(Debug)]
pub struct Check {
    pub name: String,
    pub options: CheckOptions,
    pub chain: Chain,
}

impl Check {
    pub fn new(name: impl Into<String>, chain: Chain) -> Self {
        Self {
            name: name.into(),
            options: CheckOptions::default(),
            chain,
        }
    }

    /// Only look at objects rendered from files matching `globs`
    pub fn with_templates<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.templates.extend(globs.into_iter().map(Into::into));
        self
    }

    /// Reject bad dispatch targets and template globs before anything runs
    pub fn validate(&self) -> Result<()> {
        self.chain.validate()?;
        self.options.patterns()?;
        Ok(())
    }

    /// The objects this check sees
    pub fn objects(&self, objects: &ObjectSetMap) -> Result<ObjectSet> {
        let patterns = self.options.patterns()?;
        if patterns.is_empty() {
            return Ok(objects.all().clone());
        }
        Ok(objects.select(|file| patterns.iter().any(|p| p.matches(file))))
    }

    /// Run the chain with a fresh context; returns the handle it reported to
    pub fn run(
        &self,
        handle: TestHandle,
        objects: &ObjectSetMap,
        values: Option<&serde_json::Value>,
        scheme: &Scheme,
    ) -> TestHandle {
        let mut ctx = TestContext::new(handle);
        if let Some(values) = values {
            ctx = ctx.with_values(values.clone());
        }
        match self.objects(objects) {
            Ok(selected) => {
                self.chain.run(&mut ctx, &selected, scheme);
            }
            Err(e) => ctx.fail(e.to_string()),
        }
        ctx.into_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartcheck_core::Unstructured;
    use serde_json::json;

    fn objects() -> ObjectSetMap {
        let mut map = ObjectSetMap::new();
        for (file, name) in [
            ("templates/a.yaml", "a"),
            ("templates/b.yaml", "b"),
            ("charts/sub/templates/c.yaml", "c"),
        ] {
            let object = Unstructured::from_value(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": name},
            }))
            .unwrap();
            map.insert(file, object);
        }
        map
    }

    fn names(set: &ObjectSet) -> Vec<&str> {
        set.iter().filter_map(|o| o.name()).collect()
    }

    #[test]
    fn test_all_objects_by_default() {
        let check = Check::new("all", Chain::new());
        assert_eq!(names(&check.objects(&objects()).unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_template_globs() {
        let map = objects();
        let check = Check::new("narrow", Chain::new()).with_templates(["templates/*.yaml"]);
        assert_eq!(names(&check.objects(&map).unwrap()), vec!["a", "b"]);

        let check = Check::new("sub", Chain::new()).with_templates(["charts/**/*.yaml"]);
        assert_eq!(names(&check.objects(&map).unwrap()), vec!["c"]);
    }

    #[test]
    fn test_invalid_glob() {
        let check = Check::new("bad", Chain::new()).with_templates(["templates/[.yaml"]);
        assert!(matches!(check.validate(), Err(SuiteError::Pattern { .. })));

        let handle = check.run(TestHandle::new("bad"), &objects(), None, Scheme::global());
        assert!(handle.failed());
    }

    #[test]
    fn test_run_passes_values() {
        let check = Check::new(
            "values",
            Chain::new().once(|ctx| {
                if ctx.extract::<String>("image.tag").ok().flatten().as_deref() != Some("v1") {
                    ctx.fail("unexpected tag");
                }
            }),
        );
        let values = json!({"image": {"tag": "v1"}});
        let handle = check.run(TestHandle::new("v"), &objects(), Some(&values), Scheme::global());
        assert!(!handle.failed());
    }
}
