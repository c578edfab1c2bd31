//! Suites run against the example chart

use chartcheck::k8s_openapi::api::core::v1::ConfigMap;
use chartcheck::{
    Case, Chain, Check, FULLY_COVERED, FailureCase, Suite, TemplateOptions, ensure_accepts_schema,
    values_shape,
};

const CHART: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/example-chart");

fn release() -> TemplateOptions {
    TemplateOptions::new().with_release("example-chart", "default")
}

fn config_is(expected: &'static str) -> Check {
    Check::new(
        "config",
        Chain::new()
            .on_resources(|ctx, maps: &[ConfigMap]| {
                if maps.len() != 1 {
                    ctx.fail(format!("expected one ConfigMap, got {}", maps.len()));
                }
            })
            .per_resource(move |ctx, cm: &ConfigMap| {
                let config = cm.data.as_ref().and_then(|d| d.get("config"));
                if config.map(String::as_str) != Some(expected) {
                    ctx.fail(format!("unexpected config {:?}", config));
                }
            }),
    )
}

fn should_fail() -> FailureCase {
    FailureCase::new("should-fail", ".Values.shouldFail is set to true")
        .with_options(release().set("shouldFail=true"))
        .covers(["templates/configmap.yaml"])
}

#[test]
fn test_default_render_is_uncovered() {
    let suite = Suite::new(CHART)
        .unwrap()
        .case(Case::new("defaults").with_options(release()).check(config_is("hello: rancher")));

    let report = suite.run();
    report.assert_passed();

    assert_eq!(report.coverage.fraction, 0.0);
    assert!(
        report
            .coverage
            .report
            .starts_with("The following keys are not covered:")
    );
    assert!(
        report
            .coverage
            .report
            .contains("- {{ .Values.data.hello }} : templates/configmap.yaml")
    );
}

#[test]
fn test_override_and_failure_case_cover_everything() {
    let suite = Suite::new(CHART)
        .unwrap()
        .case(
            Case::new("world")
                .with_options(release().set("data.hello=world"))
                .check(config_is("hello: world")),
        )
        .failure_case(should_fail());

    let report = suite.run();
    report.assert_passed();

    assert_eq!(report.cases.len(), 2);
    assert_eq!(report.coverage.fraction, 1.0);
    assert_eq!(report.coverage.report, FULLY_COVERED);
}

#[test]
fn test_override_alone_covers_half() {
    let suite = Suite::new(CHART).unwrap().case(
        Case::new("world")
            .with_options(release().set("data.hello=world"))
            .check(config_is("hello: world")),
    );

    let report = suite.run();
    report.assert_passed();
    assert_eq!(report.coverage.fraction, 0.5);

    insta::assert_snapshot!(report.coverage.report, @r"
    The following keys are not covered:
    - {{ .Values.shouldFail }} : templates/configmap.yaml

    The following keys are covered:
    - {{ .Values.data.hello }} : templates/configmap.yaml
    ");
}

#[test]
fn test_check_failure_is_reported() {
    let suite = Suite::new(CHART)
        .unwrap()
        .case(Case::new("defaults").with_options(release()).check(config_is("hello: world")));

    let report = suite.run();
    assert!(!report.passed());

    let failures: Vec<_> = report.all_failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].test, "example-chart/defaults/config");
    assert!(failures[0].failure.message.contains("hello: rancher"));
}

#[test]
fn test_failure_case_wrong_message() {
    let suite = Suite::new(CHART).unwrap().failure_case(
        FailureCase::new("wrong", "some other error")
            .with_options(release().set("shouldFail=true")),
    );

    let report = suite.run();
    assert!(!report.passed());
    let message = &report.cases[0].failures[0].failure.message;
    assert!(message.starts_with("expected an error containing \"some other error\", got:"));
    assert!(message.contains(".Values.shouldFail is set to true"));
    assert_eq!(report.coverage.fraction, 0.0);
}

#[test]
fn test_failure_case_that_renders() {
    let suite = Suite::new(CHART)
        .unwrap()
        .failure_case(FailureCase::new("renders", "shouldFail").with_options(release()));

    let report = suite.run();
    assert!(!report.passed());
    assert!(
        report.cases[0].failures[0]
            .failure
            .message
            .contains("but it succeeded")
    );
}

#[test]
fn test_failure_case_covers_only_matching_templates() {
    let suite = Suite::new(CHART).unwrap().failure_case(
        FailureCase::new("should-fail", "shouldFail")
            .with_options(release().set("shouldFail=true"))
            .covers(["templates/other.yaml"]),
    );

    let report = suite.run();
    report.assert_passed();
    assert_eq!(report.coverage.fraction, 0.0);
}

#[test]
fn test_min_coverage() {
    let suite = Suite::new(CHART)
        .unwrap()
        .case(Case::new("defaults").with_options(release()))
        .min_coverage(0.5);

    let report = suite.run();
    assert!(report.cases.iter().all(|c| c.passed()));
    assert!(!report.passed());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].failure.message.contains("below the required 50.00%"));
}

#[test]
fn test_default_checks_run_for_every_case() {
    let suite = Suite::new(CHART)
        .unwrap()
        .default_options(release())
        .default_check(Check::new(
            "named",
            Chain::new().per_resource(|ctx, cm: &ConfigMap| {
                if cm.metadata.name.as_deref() != Some("example-chart") {
                    ctx.fail("ConfigMap is not named after the release");
                }
            }),
        ))
        .case(Case::new("defaults"))
        .case(Case::new("world").with_options(TemplateOptions::new().set("data.hello=world")));

    let report = suite.run();
    report.assert_passed();
    assert_eq!(report.coverage.fraction, 0.5);
}

#[test]
fn test_check_narrowed_to_missing_template_sees_nothing() {
    let suite = Suite::new(CHART).unwrap().case(
        Case::new("narrow").with_options(release()).check(
            Check::new(
                "none",
                Chain::new().on_resources(|ctx, maps: &[ConfigMap]| {
                    if !maps.is_empty() {
                        ctx.fail("expected no objects");
                    }
                }),
            )
            .with_templates(["templates/missing-*.yaml"]),
        ),
    );

    suite.run().assert_passed();
}

#[test]
fn test_lint_findings_fail_the_case() {
    let suite = Suite::new(CHART)
        .unwrap()
        .linter(chartcheck::YamlLinter::new().with_max_line_length(10))
        .case(Case::new("defaults").with_options(release()));

    let report = suite.run();
    assert!(!report.passed());
    assert!(
        report
            .all_failures()
            .all(|f| f.test == "example-chart/defaults/yaml-lint")
    );
}

values_shape! {
    #[derive(Debug, Default)]
    pub struct Data {
        pub hello: Option<String>,
    }
}

values_shape! {
    #[derive(Debug, Default)]
    pub struct ExampleValues {
        pub data: Data,
        pub should_fail: bool => "shouldFail",
    }
}

values_shape! {
    #[derive(Debug, Default)]
    pub struct PartialValues {
        pub data: Data,
    }
}

#[test]
fn test_values_type_accepts_schema() {
    let suite = Suite::new(CHART).unwrap();
    ensure_accepts_schema::<ExampleValues>(suite.chart()).unwrap();

    let err = ensure_accepts_schema::<PartialValues>(suite.chart()).unwrap_err();
    assert_eq!(err.missing, vec![".Values.shouldFail".to_string()]);
}

#[test]
fn test_suite_values_type_coverage() {
    let suite = Suite::new(CHART)
        .unwrap()
        .values_type::<ExampleValues>()
        .case(
            Case::new("world")
                .with_options(release().set("data.hello=world"))
                .check(config_is("hello: world")),
        );

    let report = suite.run();
    report.assert_passed();

    let values = report.values_coverage.expect("values type declared");
    assert_eq!(values.fraction, 0.5);
    assert_eq!(values.set, vec![".Values.data.hello".to_string()]);
    assert_eq!(values.unset, vec![".Values.shouldFail".to_string()]);
}

#[test]
fn test_suite_values_type_counts_failure_cases() {
    let suite = Suite::new(CHART)
        .unwrap()
        .values_type::<ExampleValues>()
        .case(Case::new("world").with_options(release().set("data.hello=world")))
        .failure_case(should_fail());

    let report = suite.run();
    report.assert_passed();
    assert_eq!(report.values_coverage.map(|v| v.fraction), Some(1.0));
}

#[test]
fn test_suite_values_type_schema_mismatch() {
    let suite = Suite::new(CHART)
        .unwrap()
        .values_type::<PartialValues>()
        .case(Case::new("defaults").with_options(release()));

    assert!(matches!(
        suite.validate_values_type(),
        Err(chartcheck::SuiteError::SchemaMismatch(_))
    ));

    let report = suite.run();
    assert!(report.cases.iter().all(|c| c.passed()));
    assert!(!report.passed());
    assert_eq!(report.failures.len(), 1);
    let message = &report.failures[0].failure.message;
    assert!(message.contains("PartialValues"));
    assert!(message.contains("- .Values.shouldFail"));
}

#[test]
fn test_suite_without_values_type() {
    let report = Suite::new(CHART)
        .unwrap()
        .case(Case::new("defaults").with_options(release()))
        .run();
    assert!(report.values_coverage.is_none());
}

#[test]
fn test_values_document_reads_into_values_type() {
    let values: ExampleValues =
        serde_json::from_value(serde_json::json!({"data": {"hello": "world"}, "shouldFail": true}))
            .unwrap();
    assert_eq!(values.data.hello.as_deref(), Some("world"));
    assert!(values.should_fail);
}

