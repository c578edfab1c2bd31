//! Field-usage extraction
//!
//! Walks parsed templates without executing them and records, per file and
//! per named template, every absolute field reference a user could override
//! and every named template it invokes.
//!
//! Each node is visited with a field context:
//! - `"."` is the root object (nothing entered yet),
//! - `""` is ambiguous (the enclosing `with`/`range` subject is not a static
//!   path), which suppresses relative field references,
//! - anything else is the static path the dot currently stands for.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chartcheck_core::Chart;

use crate::ast::{Node, Operand, Pipe, Template};
use crate::error::{Result, TemplateError};
use crate::parser;

const ROOT: &str = ".";
const AMBIGUOUS: &str = "";

/// Fields and named-template calls reachable from one template body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    /// Absolute field references, each starting with a dot
    pub fields: BTreeSet<String>,
    /// Names of invoked named templates
    pub template_calls: BTreeSet<String>,
    /// The body reads the root object as a whole (`.` or `$` at the root),
    /// so coverage cannot bound what it touches
    pub emit_warning: bool,
}

/// Usage of a whole chart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateUsage {
    /// Rendered files keyed by chart-relative path
    pub files: BTreeMap<String, ParseResult>,
    /// Named templates keyed by name
    pub named_templates: BTreeMap<String, ParseResult>,
}

impl TemplateUsage {
    /// Parse every template of a chart (subcharts included) and walk it
    pub fn from_chart(chart: &Chart) -> Result<Self> {
        Self::from_sources(chart.all_templates())
    }

    /// Walk templates given as `(path, source)` pairs
    ///
    /// Files whose name starts with `_` only contribute named templates.
    pub fn from_sources<'a, I>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, &'a str)>,
    {
        let mut parsed = Vec::new();
        for (path, source) in sources {
            let template = parser::parse(&path, source).map_err(|e| TemplateError::Parse {
                file: path.clone(),
                message: e.to_string(),
            })?;
            parsed.push(template);
        }
        parsed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self::from_templates(&parsed))
    }

    /// Walk already parsed templates; later definitions of a name win
    pub fn from_templates(templates: &[Template]) -> Self {
        let mut usage = TemplateUsage::default();

        for template in templates {
            for (name, body) in &template.defines {
                usage
                    .named_templates
                    .insert(name.clone(), Walker::walk(body));
            }
            if !is_partial(&template.name) {
                usage
                    .files
                    .insert(template.name.clone(), Walker::walk(&template.root));
            }
        }

        usage
    }
}

/// Partials (`_helpers.tpl`) only hold named templates
pub fn is_partial(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|file| file.starts_with('_'))
}

struct Walker {
    result: ParseResult,
    /// Variable name → static context it was declared with
    aliases: HashMap<String, String>,
}

impl Walker {
    fn walk(nodes: &[Node]) -> ParseResult {
        let mut walker = Walker {
            result: ParseResult::default(),
            aliases: HashMap::new(),
        };
        walker.visit_list(nodes, ROOT);

        let mut result = walker.result;
        result.fields.remove("");
        result.template_calls.remove("");
        result
    }

    fn visit_list(&mut self, nodes: &[Node], ctx: &str) {
        for node in nodes {
            self.visit_node(node, ctx);
        }
    }

    fn visit_node(&mut self, node: &Node, ctx: &str) {
        match node {
            Node::Text(_) | Node::Break | Node::Continue => {}
            Node::Action(pipe) => self.visit_pipe(pipe, ctx),
            Node::If(branch) => {
                self.visit_pipe(&branch.pipe, ctx);
                self.visit_list(&branch.list, ctx);
                if let Some(else_list) = &branch.else_list {
                    self.visit_list(else_list, ctx);
                }
            }
            Node::With(branch) | Node::Range(branch) => {
                let is_range = matches!(node, Node::Range(_));
                self.visit_pipe(&branch.pipe, ctx);

                let subject = self.static_context(&branch.pipe, ctx);
                let body_ctx = match subject {
                    Some(path) if is_range => list_context(&path),
                    Some(path) => path,
                    None => AMBIGUOUS.to_string(),
                };
                if is_range && let Some(value_var) = branch.pipe.decl.last() {
                    self.aliases.insert(value_var.clone(), body_ctx.clone());
                }

                self.visit_list(&branch.list, &body_ctx);
                if let Some(else_list) = &branch.else_list {
                    self.visit_list(else_list, ctx);
                }
            }
            Node::Template { name, pipe } => {
                self.result.template_calls.insert(name.clone());
                if let Some(pipe) = pipe
                    && pipe.single_operand() != Some(&Operand::Dot)
                {
                    self.visit_pipe(pipe, ctx);
                }
            }
        }
    }

    fn visit_pipe(&mut self, pipe: &Pipe, ctx: &str) {
        if let [var] = pipe.decl.as_slice()
            && let Some(path) = self.static_context(pipe, ctx)
        {
            self.aliases.insert(var.clone(), path);
        }

        for cmd in &pipe.cmds {
            self.visit_command(&cmd.args, ctx);
        }
    }

    fn visit_command(&mut self, args: &[Operand], ctx: &str) {
        match args {
            [Operand::Identifier(func), rest @ ..] if func == "include" => {
                if let Some(name) = rest.first() {
                    match name {
                        Operand::String(name) => {
                            self.result.template_calls.insert(name.clone());
                        }
                        other => self.visit_operand(other, ctx),
                    }
                }
                for arg in rest.iter().skip(1) {
                    if *arg != Operand::Dot {
                        self.visit_operand(arg, ctx);
                    }
                }
            }
            _ => {
                for arg in args {
                    self.visit_operand(arg, ctx);
                }
            }
        }
    }

    fn visit_operand(&mut self, operand: &Operand, ctx: &str) {
        match operand {
            Operand::Field(fields) => self.add_relative(ctx, &Operand::field_repr(fields)),
            Operand::Variable { name, fields } => {
                if name != "$" {
                    return;
                }
                if fields.is_empty() {
                    self.result.emit_warning = true;
                } else {
                    self.add_field(Operand::field_repr(fields));
                }
            }
            Operand::Dot => {
                if ctx == ROOT {
                    self.result.emit_warning = true;
                } else {
                    self.add_field(ctx.to_string());
                }
            }
            Operand::Chain { node, fields } => {
                self.visit_operand(node, ctx);
                if let Some(inner) = self.operand_context(node, ctx) {
                    self.add_relative(&inner, &Operand::field_repr(fields));
                }
            }
            Operand::Pipe(pipe) => self.visit_pipe(pipe, ctx),
            Operand::Identifier(_)
            | Operand::String(_)
            | Operand::Number(_)
            | Operand::Bool(_)
            | Operand::Nil => {}
        }
    }

    /// Record `repr` relative to `ctx`; nothing under an ambiguous context
    fn add_relative(&mut self, ctx: &str, repr: &str) {
        match ctx {
            AMBIGUOUS => {}
            ROOT => self.add_field(repr.to_string()),
            _ => self.add_field(format!("{}{}", ctx, repr)),
        }
    }

    fn add_field(&mut self, field: String) {
        if !field.is_empty() && field != ROOT {
            self.result.fields.insert(field);
        }
    }

    /// Static path a pipeline evaluates to, if it is a plain reference
    fn static_context(&self, pipe: &Pipe, ctx: &str) -> Option<String> {
        self.operand_context(pipe.single_operand()?, ctx)
    }

    fn operand_context(&self, operand: &Operand, ctx: &str) -> Option<String> {
        let path = match operand {
            Operand::Dot => ctx.to_string(),
            Operand::Field(fields) => join(ctx, &Operand::field_repr(fields))?,
            Operand::Variable { name, fields } if name == "$" => {
                join(ROOT, &Operand::field_repr(fields))?
            }
            Operand::Variable { name, fields } => {
                let alias = self.aliases.get(name)?;
                join(alias, &Operand::field_repr(fields))?
            }
            Operand::Chain { node, fields } => {
                let inner = self.operand_context(node, ctx)?;
                join(&inner, &Operand::field_repr(fields))?
            }
            Operand::Pipe(pipe) => self.static_context(pipe, ctx)?,
            _ => return None,
        };
        (!path.is_empty()).then_some(path)
    }
}

fn join(ctx: &str, repr: &str) -> Option<String> {
    match (ctx, repr) {
        (AMBIGUOUS, _) => None,
        (ROOT, "") => Some(ROOT.to_string()),
        (ROOT, repr) => Some(repr.to_string()),
        (ctx, repr) => Some(format!("{}{}", ctx, repr)),
    }
}

/// Context of a range body over `path`
fn list_context(path: &str) -> String {
    if path == ROOT {
        // `range $` iterates the root's values; nothing static is left
        AMBIGUOUS.to_string()
    } else {
        format!("{}[]", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage_of(source: &str) -> ParseResult {
        let usage =
            TemplateUsage::from_sources(vec![("templates/test.yaml".to_string(), source)]).unwrap();
        usage.files["templates/test.yaml"].clone()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plain_fields() {
        let result = usage_of(
            r#"data:
  config: "hello: {{ .Values.data.hello | default "rancher" }}"
  ns: {{ .Release.Namespace }}"#,
        );
        assert_eq!(result.fields, set(&[".Release.Namespace", ".Values.data.hello"]));
        assert!(result.template_calls.is_empty());
        assert!(!result.emit_warning);
    }

    #[test]
    fn test_with_and_range_contexts() {
        let result = usage_of(
            r#"{{- with .Values.image }}{{ .repository }}:{{ .tag }}{{ end }}
{{- range .Values.hosts }}{{ .name }}{{ end }}
{{- range $i, $h := .Values.extra }}{{ $h.port }}{{ end }}"#,
        );
        assert_eq!(
            result.fields,
            set(&[
                ".Values.extra",
                ".Values.hosts",
                ".Values.hosts[].name",
                ".Values.image",
                ".Values.image.repository",
                ".Values.image.tag",
            ])
        );
        assert!(!result.emit_warning);
    }

    #[test]
    fn test_dot_in_static_context_emits_context() {
        let result = usage_of("{{ range .Values.args }}- {{ . | quote }}\n{{ end }}");
        assert!(result.fields.contains(".Values.args[]"));
        assert!(!result.emit_warning);
    }

    #[test]
    fn test_ambiguous_context_suppresses_fields() {
        let result = usage_of(
            r#"{{ with (index .Values.map "key") }}{{ .nested }}{{ end }}{{ with .Values.a | default dict }}{{ .b }}{{ end }}"#,
        );
        assert_eq!(result.fields, set(&[".Values.a", ".Values.map"]));
    }

    #[test]
    fn test_root_variable_and_override() {
        let result = usage_of(
            r#"{{ with .Values.inner }}{{ $.Values.outer }}{{ .x }}{{ with $ }}{{ .Values.y }}{{ end }}{{ end }}"#,
        );
        assert!(result.fields.contains(".Values.outer"));
        assert!(result.fields.contains(".Values.inner.x"));
        assert!(result.fields.contains(".Values.y"));
        assert!(!result.fields.contains(".Values.inner.Values.y"));
    }

    #[test]
    fn test_dot_at_root_sets_warning() {
        assert!(usage_of("{{ toYaml . }}").emit_warning);
        assert!(usage_of("{{ $ | toJson }}").emit_warning);
        assert!(!usage_of(r#"{{ include "x" . }}"#).emit_warning);
    }

    #[test]
    fn test_include_and_template_calls() {
        let result = usage_of(
            r#"{{ include "app.labels" . }}{{ template "app.name" . }}{{ include (printf "%s.x" .Values.prefix) $ }}{{ include "app.ctx" .Values.sub }}"#,
        );
        assert_eq!(
            result.template_calls,
            set(&["app.ctx", "app.labels", "app.name"])
        );
        assert!(result.fields.contains(".Values.prefix"));
        assert!(result.fields.contains(".Values.sub"));
        // `$` passed explicitly is still the whole root
        assert!(result.emit_warning);
    }

    #[test]
    fn test_variable_declarations_alias_context() {
        let result = usage_of(
            r#"{{ $img := .Values.image }}{{ with $img.pull }}{{ .policy }}{{ end }}{{ $other.x }}"#,
        );
        assert!(result.fields.contains(".Values.image"));
        assert!(result.fields.contains(".Values.image.pull.policy"));
        assert!(!result.fields.iter().any(|f| f.contains(".x")));
    }

    #[test]
    fn test_chain_with_static_inner() {
        let result = usage_of(r#"{{ (.Values.a).b }}{{ (include "x" .).c }}"#);
        assert!(result.fields.contains(".Values.a"));
        assert!(result.fields.contains(".Values.a.b"));
        assert!(!result.fields.iter().any(|f| f.ends_with(".c")));
        assert!(result.template_calls.contains("x"));
    }

    #[test]
    fn test_named_templates_and_partials() {
        let usage = TemplateUsage::from_sources(vec![
            (
                "templates/_helpers.tpl".to_string(),
                r#"{{- define "app.name" -}}{{ .Values.nameOverride | default .Chart.Name }}{{- end }}"#,
            ),
            (
                "templates/svc.yaml".to_string(),
                r#"name: {{ include "app.name" . }}"#,
            ),
        ])
        .unwrap();

        assert_eq!(usage.files.len(), 1);
        assert_eq!(
            usage.named_templates["app.name"].fields,
            set(&[".Chart.Name", ".Values.nameOverride"])
        );
        assert_eq!(usage.files["templates/svc.yaml"].template_calls, set(&["app.name"]));
    }

    #[test]
    fn test_later_definition_wins() {
        let usage = TemplateUsage::from_sources(vec![
            (
                "templates/_a.tpl".to_string(),
                r#"{{ define "n" }}{{ .Values.first }}{{ end }}"#,
            ),
            (
                "templates/_b.tpl".to_string(),
                r#"{{ define "n" }}{{ .Values.second }}{{ end }}"#,
            ),
        ])
        .unwrap();
        assert_eq!(usage.named_templates["n"].fields, set(&[".Values.second"]));
    }

    #[test]
    fn test_fully_scoped_template_has_no_warning() {
        let result = usage_of(
            r#"{{- range .Values.items }}{{ .name }}{{ . }}{{ end }}{{ with .Values.cfg }}{{ toYaml . }}{{ end }}"#,
        );
        assert!(!result.emit_warning);
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = TemplateUsage::from_sources(vec![("templates/bad.yaml".to_string(), "{{ if }")])
            .unwrap_err();
        match err {
            TemplateError::Parse { file, .. } => assert_eq!(file, "templates/bad.yaml"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
