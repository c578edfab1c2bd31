//! Template execution
//!
//! Evaluates the parsed tree against JSON data with Go `text/template`
//! semantics: truthiness, `with`/`range` rebinding of the dot, variable
//! scoping, pipelines feeding the previous result as the last argument, and
//! Helm's `include`/`tpl` helpers.

use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::ast::{Command, Node, Number, Operand, Pipe, Position, Template};
use crate::functions::{self, FUNCTIONS};
use crate::parser;

/// Functions that modify their first argument in place
const MUTATING_FUNCTIONS: &[&str] = &["set", "unset", "merge", "mergeOverwrite"];

/// Limit on nested `include`/`template` calls
const MAX_INCLUDE_DEPTH: usize = 64;

/// Error raised while executing a template
#[derive(Debug, Clone, PartialEq)]
pub enum ExecError {
    /// `fail`/`required`: reported as an execution error at the call site
    Abort(String),
    /// Any other failure of a command, not yet tied to a location
    Message(String),
    /// Fully formatted message, passed through unchanged
    Located(String),
}

impl ExecError {
    pub fn msg(message: impl Into<String>) -> Self {
        ExecError::Message(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            ExecError::Abort(m) | ExecError::Message(m) | ExecError::Located(m) => m,
        }
    }
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// Named templates available to `include` and `template`
#[derive(Debug, Default)]
pub struct TemplateSet {
    defines: HashMap<String, NamedTemplate>,
}

#[derive(Debug)]
struct NamedTemplate {
    /// Display name of the file that defined it
    file: String,
    body: Vec<Node>,
}

impl TemplateSet {
    /// Register the named templates of `template`; later registrations win
    pub fn register(&mut self, display_name: &str, template: &Template) {
        for (name, body) in &template.defines {
            self.defines.insert(
                name.clone(),
                NamedTemplate {
                    file: display_name.to_string(),
                    body: body.clone(),
                },
            );
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }
}

/// Control flow out of a list of nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

/// Executes one template file (and whatever it includes)
pub struct Exec<'a> {
    set: &'a TemplateSet,
    /// Display name used in error messages
    name: String,
    vars: Vec<(String, JsonValue)>,
    depth: usize,
}

impl<'a> Exec<'a> {
    pub fn new(set: &'a TemplateSet, name: &str) -> Self {
        Self {
            set,
            name: name.to_string(),
            vars: Vec::new(),
            depth: 0,
        }
    }

    /// Render `nodes` with `data` as both `.` and `$`
    pub fn render(&mut self, nodes: &[Node], data: &JsonValue) -> ExecResult<String> {
        let saved = std::mem::replace(&mut self.vars, vec![("$".to_string(), data.clone())]);
        let mut out = String::new();
        let result = self.execute(nodes, data, &mut out);
        self.vars = saved;
        result.map(|_| out)
    }

    /// Execute a named template, as `include` does
    pub fn include(&mut self, name: &str, data: &JsonValue) -> ExecResult<String> {
        let Some(named) = self.set.defines.get(name) else {
            return Err(ExecError::msg(format!(
                "template: no template {:?} associated with template {:?}",
                name, self.name
            )));
        };
        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(ExecError::msg(format!(
                "rendering template has a nested reference name: {}",
                name
            )));
        }

        let outer_name = std::mem::replace(&mut self.name, named.file.clone());
        self.depth += 1;
        let result = self.render(&named.body, data);
        self.depth -= 1;
        self.name = outer_name;
        result
    }

    /// Parse and render a template string, as `tpl` does
    pub fn render_string(&mut self, source: &str, data: &JsonValue) -> ExecResult<String> {
        let template = parser::parse(&self.name, source)
            .map_err(|e| ExecError::msg(format!("cannot parse template {:?}: {}", source, e)))?;
        if let Err(e) = validate_functions(&template) {
            return Err(ExecError::msg(e));
        }
        self.render(&template.root, data)
    }

    fn execute(&mut self, nodes: &[Node], dot: &JsonValue, out: &mut String) -> ExecResult<Flow> {
        for node in nodes {
            let flow = self.execute_node(node, dot, out)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn execute_scoped(
        &mut self,
        nodes: &[Node],
        dot: &JsonValue,
        out: &mut String,
    ) -> ExecResult<Flow> {
        let mark = self.vars.len();
        let result = self.execute(nodes, dot, out);
        self.vars.truncate(mark);
        result
    }

    fn execute_node(&mut self, node: &Node, dot: &JsonValue, out: &mut String) -> ExecResult<Flow> {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Action(pipe) => {
                let value = self.eval_pipe(pipe, dot)?;
                if pipe.decl.is_empty() {
                    out.push_str(&functions::print_value(&value));
                }
            }
            Node::If(branch) => {
                let mark = self.vars.len();
                let value = self.eval_pipe(&branch.pipe, dot)?;
                let flow = if functions::truthy(&value) {
                    self.execute_scoped(&branch.list, dot, out)
                } else if let Some(else_list) = &branch.else_list {
                    self.execute_scoped(else_list, dot, out)
                } else {
                    Ok(Flow::Normal)
                };
                self.vars.truncate(mark);
                return flow;
            }
            Node::With(branch) => {
                let mark = self.vars.len();
                let value = self.eval_pipe(&branch.pipe, dot)?;
                let flow = if functions::truthy(&value) {
                    self.execute_scoped(&branch.list, &value, out)
                } else if let Some(else_list) = &branch.else_list {
                    self.execute_scoped(else_list, dot, out)
                } else {
                    Ok(Flow::Normal)
                };
                self.vars.truncate(mark);
                return flow;
            }
            Node::Range(branch) => return self.execute_range(branch, dot, out),
            Node::Template { name, pipe } => {
                let data = match pipe {
                    Some(pipe) => self.eval_pipe(pipe, dot)?,
                    None => JsonValue::Null,
                };
                let rendered = self.include(name, &data).map_err(|e| match e {
                    ExecError::Message(m) => ExecError::Located(format!(
                        "template: {}: executing {:?} at <{{{{template {:?}}}}}>: {}",
                        self.name, self.name, name, m
                    )),
                    other => other,
                })?;
                out.push_str(&rendered);
            }
            Node::Break => return Ok(Flow::Break),
            Node::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn execute_range(
        &mut self,
        branch: &crate::ast::Branch,
        dot: &JsonValue,
        out: &mut String,
    ) -> ExecResult<Flow> {
        let subject = Pipe {
            decl: Vec::new(),
            is_assign: false,
            cmds: branch.pipe.cmds.clone(),
        };
        let value = self.eval_pipe(&subject, dot)?;

        let items: Vec<(JsonValue, JsonValue)> = match &value {
            JsonValue::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (JsonValue::from(i), v.clone()))
                .collect(),
            JsonValue::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                keys.into_iter()
                    .map(|k| (JsonValue::String(k.clone()), map[k].clone()))
                    .collect()
            }
            JsonValue::Number(n) => {
                let count = n.as_i64().ok_or_else(|| {
                    ExecError::msg(format!("range can't iterate over {}", n))
                })?;
                (0..count.max(0))
                    .map(|i| (JsonValue::from(i), JsonValue::from(i)))
                    .collect()
            }
            JsonValue::Null => Vec::new(),
            other => {
                return Err(ExecError::msg(format!(
                    "range can't iterate over {}",
                    functions::print_value(other)
                )));
            }
        };

        if items.is_empty() {
            return match &branch.else_list {
                Some(else_list) => self.execute_scoped(else_list, dot, out),
                None => Ok(Flow::Normal),
            };
        }

        for (key, item) in items {
            let mark = self.vars.len();
            match branch.pipe.decl.as_slice() {
                [value_var] => self.vars.push((value_var.clone(), item.clone())),
                [key_var, value_var, ..] => {
                    self.vars.push((key_var.clone(), key));
                    self.vars.push((value_var.clone(), item.clone()));
                }
                [] => {}
            }
            let flow = self.execute(&branch.list, &item, out);
            self.vars.truncate(mark);
            match flow? {
                Flow::Break => break,
                Flow::Continue | Flow::Normal => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_pipe(&mut self, pipe: &Pipe, dot: &JsonValue) -> ExecResult<JsonValue> {
        let mut value = None;
        for cmd in &pipe.cmds {
            value = Some(self.eval_command(cmd, dot, value)?);
        }
        let value = value.unwrap_or(JsonValue::Null);

        if let Some(var) = pipe.decl.first() {
            if pipe.is_assign {
                let slot = self
                    .vars
                    .iter_mut()
                    .rev()
                    .find(|(name, _)| name == var)
                    .ok_or_else(|| ExecError::msg(format!("undefined variable: {}", var)))?;
                slot.1 = value.clone();
            } else {
                self.vars.push((var.clone(), value.clone()));
            }
        }

        Ok(value)
    }

    fn eval_command(
        &mut self,
        cmd: &Command,
        dot: &JsonValue,
        piped: Option<JsonValue>,
    ) -> ExecResult<JsonValue> {
        self.eval_command_inner(cmd, dot, piped)
            .map_err(|e| self.locate(e, cmd.pos, cmd))
    }

    fn locate(&self, error: ExecError, pos: Position, cmd: &Command) -> ExecError {
        // Go reports byte columns from zero
        let pos = format!("{}:{}", pos.line, pos.column.saturating_sub(1));
        match error {
            ExecError::Abort(message) => ExecError::Located(format!(
                "execution error at ({}:{}): {}",
                self.name, pos, message
            )),
            ExecError::Message(message) => {
                let repr = cmd
                    .args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                ExecError::Located(format!(
                    "template: {}:{}: executing {:?} at <{}>: {}",
                    self.name, pos, self.name, repr, message
                ))
            }
            located => located,
        }
    }

    fn eval_command_inner(
        &mut self,
        cmd: &Command,
        dot: &JsonValue,
        piped: Option<JsonValue>,
    ) -> ExecResult<JsonValue> {
        let Some((first, rest)) = cmd.args.split_first() else {
            return Err(ExecError::msg("empty command"));
        };

        match first {
            Operand::Identifier(name) => self.call(name, rest, dot, piped),
            _ if rest.is_empty() && piped.is_none() => self.eval_operand(first, dot),
            Operand::Field(fields) | Operand::Variable { fields, .. }
                if fields.last().is_some_and(|f| f == "Has") =>
            {
                self.call_has(first, rest, dot, piped)
            }
            _ => Err(ExecError::msg(format!(
                "can't give argument to non-function {}",
                first
            ))),
        }
    }

    /// `.Capabilities.APIVersions.Has "apps/v1"`
    fn call_has(
        &mut self,
        receiver: &Operand,
        args: &[Operand],
        dot: &JsonValue,
        piped: Option<JsonValue>,
    ) -> ExecResult<JsonValue> {
        let list = match receiver {
            Operand::Field(fields) => {
                self.field_chain(dot.clone(), &fields[..fields.len() - 1])?
            }
            Operand::Variable { name, fields } => {
                let base = self.variable(name)?;
                self.field_chain(base, &fields[..fields.len() - 1])?
            }
            _ => return Err(ExecError::msg("Has needs a list receiver")),
        };
        let mut values = self.eval_args(args, dot)?;
        values.extend(piped);
        let [needle] = values.as_slice() else {
            return Err(ExecError::msg("wrong number of args for Has: want 1"));
        };
        match list {
            JsonValue::Array(items) => Ok(JsonValue::Bool(items.contains(needle))),
            other => Err(ExecError::msg(format!(
                "can't evaluate field Has in type {}",
                functions::type_name(&other)
            ))),
        }
    }

    fn call(
        &mut self,
        name: &str,
        args: &[Operand],
        dot: &JsonValue,
        piped: Option<JsonValue>,
    ) -> ExecResult<JsonValue> {
        // Short-circuit forms
        match name {
            "and" | "or" => return self.call_logical(name == "and", args, dot, piped),
            _ => {}
        }

        let func = FUNCTIONS
            .get(name)
            .ok_or_else(|| ExecError::msg(format!("function {:?} not defined", name)))?;

        let mut values = self.eval_args(args, dot)?;
        values.extend(piped);

        let result = func(self, values).map_err(|e| match e {
            ExecError::Message(m) => ExecError::Message(format!("error calling {}: {}", name, m)),
            other => other,
        })?;

        // Go maps are references: `set $d "k" v` is visible through `$d`
        if MUTATING_FUNCTIONS.contains(&name)
            && let Some(Operand::Variable { name: var, fields }) = args.first()
            && fields.is_empty()
            && let Some(slot) = self.vars.iter_mut().rev().find(|(n, _)| n == var)
        {
            slot.1 = result.clone();
        }
        Ok(result)
    }

    fn call_logical(
        &mut self,
        is_and: bool,
        args: &[Operand],
        dot: &JsonValue,
        piped: Option<JsonValue>,
    ) -> ExecResult<JsonValue> {
        if args.is_empty() && piped.is_none() {
            return Err(ExecError::msg(format!(
                "wrong number of args for {}: want at least 1 got 0",
                if is_and { "and" } else { "or" }
            )));
        }

        let mut last = JsonValue::Null;
        for arg in args {
            last = self.eval_operand(arg, dot)?;
            if functions::truthy(&last) != is_and {
                return Ok(last);
            }
        }
        if let Some(value) = piped {
            last = value;
        }
        Ok(last)
    }

    fn eval_args(&mut self, args: &[Operand], dot: &JsonValue) -> ExecResult<Vec<JsonValue>> {
        args.iter().map(|arg| self.eval_operand(arg, dot)).collect()
    }

    fn eval_operand(&mut self, operand: &Operand, dot: &JsonValue) -> ExecResult<JsonValue> {
        match operand {
            Operand::Field(fields) => self.field_chain(dot.clone(), fields),
            Operand::Variable { name, fields } => {
                let base = self.variable(name)?;
                self.field_chain(base, fields)
            }
            Operand::Dot => Ok(dot.clone()),
            Operand::Identifier(name) => self.call(name, &[], dot, None),
            Operand::Chain { node, fields } => {
                let base = self.eval_operand(node, dot)?;
                self.field_chain(base, fields)
            }
            Operand::Pipe(pipe) => self.eval_pipe(pipe, dot),
            Operand::String(s) => Ok(JsonValue::String(s.clone())),
            Operand::Number(Number::Int(n)) => Ok(JsonValue::from(*n)),
            Operand::Number(Number::Float(f)) => Ok(serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null)),
            Operand::Bool(b) => Ok(JsonValue::Bool(*b)),
            Operand::Nil => Ok(JsonValue::Null),
        }
    }

    fn variable(&self, name: &str) -> ExecResult<JsonValue> {
        self.vars
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| ExecError::msg(format!("undefined variable: {}", name)))
    }

    fn field_chain(&self, mut current: JsonValue, fields: &[String]) -> ExecResult<JsonValue> {
        for field in fields {
            current = match current {
                JsonValue::Object(mut map) => map.remove(field).unwrap_or(JsonValue::Null),
                JsonValue::Null => {
                    return Err(ExecError::msg(format!(
                        "nil pointer evaluating interface {{}}.{}",
                        field
                    )));
                }
                other => {
                    return Err(ExecError::msg(format!(
                        "can't evaluate field {} in type {}",
                        field,
                        functions::type_name(&other)
                    )));
                }
            };
        }
        Ok(current)
    }
}

/// Check that every function a template calls exists
pub fn validate_functions(template: &Template) -> std::result::Result<(), String> {
    let mut unknown = None;
    let mut check = |name: &str| {
        if unknown.is_none() && !is_known_function(name) {
            unknown = Some(name.to_string());
        }
    };

    for nodes in std::iter::once(&template.root).chain(template.defines.values()) {
        visit_identifiers(nodes, &mut check);
    }

    match unknown {
        None => Ok(()),
        Some(name) => {
            let hint = functions::suggest_function(&name)
                .map(|s| format!(" (did you mean {:?}?)", s))
                .unwrap_or_default();
            Err(format!("function {:?} not defined{}", name, hint))
        }
    }
}

fn is_known_function(name: &str) -> bool {
    matches!(name, "and" | "or") || FUNCTIONS.contains_key(name)
}

fn visit_identifiers(nodes: &[Node], check: &mut impl FnMut(&str)) {
    for node in nodes {
        match node {
            Node::Action(pipe) => visit_pipe_identifiers(pipe, check),
            Node::If(b) | Node::With(b) | Node::Range(b) => {
                visit_pipe_identifiers(&b.pipe, check);
                visit_identifiers(&b.list, check);
                if let Some(else_list) = &b.else_list {
                    visit_identifiers(else_list, check);
                }
            }
            Node::Template { pipe: Some(pipe), .. } => visit_pipe_identifiers(pipe, check),
            Node::Template { pipe: None, .. } | Node::Text(_) | Node::Break | Node::Continue => {}
        }
    }
}

fn visit_pipe_identifiers(pipe: &Pipe, check: &mut impl FnMut(&str)) {
    for cmd in &pipe.cmds {
        for arg in &cmd.args {
            visit_operand_identifiers(arg, check);
        }
    }
}

fn visit_operand_identifiers(operand: &Operand, check: &mut impl FnMut(&str)) {
    match operand {
        Operand::Identifier(name) => check(name),
        Operand::Pipe(pipe) => visit_pipe_identifiers(pipe, check),
        Operand::Chain { node, .. } => visit_operand_identifiers(node, check),
        _ => {}
    }
}
