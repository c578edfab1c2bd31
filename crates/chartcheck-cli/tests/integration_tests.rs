//! Integration tests for CLI commands

use std::process::Command;

fn chartcheck(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_chartcheck"))
        .args(args)
        .output()
        .expect("Failed to execute chartcheck")
}

fn chart_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/example-chart")
}

mod usage_command {
    use super::*;

    #[test]
    fn test_usage_json() {
        let output = chartcheck(&["usage", chart_path(), "--json"]);
        assert!(output.status.success());

        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("Output should be valid JSON");
        let fields = &json["files"]["templates/configmap.yaml"]["fields"];
        let fields: Vec<&str> = fields
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f.as_str())
            .collect();
        assert!(fields.contains(&".Values.data.hello"));
        assert!(fields.contains(&".Values.shouldFail"));
    }

    #[test]
    fn test_usage_missing_chart() {
        let output = chartcheck(&["usage", "/nonexistent/chart"]);
        assert!(!output.status.success());
    }
}

mod template_command {
    use super::*;

    #[test]
    fn test_template_defaults() {
        let output = chartcheck(&["template", chart_path(), "--name", "example-chart"]);
        assert!(output.status.success());

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("# Source: templates/configmap.yaml"));
        assert!(stdout.contains("hello: rancher"));
        assert!(stdout.contains("name: example-chart"));
    }

    #[test]
    fn test_template_set() {
        let output = chartcheck(&["template", chart_path(), "--set", "data.hello=world"]);
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("hello: world"));
    }

    #[test]
    fn test_template_fail() {
        let output = chartcheck(&["template", chart_path(), "--set", "shouldFail=true"]);
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains(".Values.shouldFail is set to true"));
    }
}

mod coverage_command {
    use super::*;

    #[test]
    fn test_coverage_without_overrides() {
        let output = chartcheck(&["coverage", chart_path()]);
        assert!(output.status.success());

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("0.00%"));
        assert!(stdout.contains("The following keys are not covered:"));
    }

    #[test]
    fn test_coverage_with_overrides() {
        let output = chartcheck(&[
            "coverage",
            chart_path(),
            "--set",
            "data.hello=world",
            "--set",
            "shouldFail=false",
        ]);
        assert!(output.status.success());

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("100.00%"));
        assert!(stdout.contains("All keys in chart are fully covered"));
    }
}
