//! Go template parser
//!
//! Parses Go/Helm template syntax with pest into a flat token stream, applies
//! `{{-`/`-}}` trimming, then folds the stream into the [`Template`] tree.

use indexmap::IndexMap;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use thiserror::Error;

use crate::ast::*;

#[derive(Parser)]
#[grammar = "go_template.pest"]
struct GoTemplateParser;

/// Parser error
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0}")]
    Pest(Box<pest::error::Error<Rule>>),

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("invalid string: {0}")]
    InvalidString(String),

    #[error("unexpected rule: {0:?}")]
    UnexpectedRule(Rule),

    #[error("line {line}: {message}")]
    Structure { line: usize, message: String },
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        ParseError::Pest(Box::new(e))
    }
}

impl ParseError {
    fn structure(line: usize, message: impl Into<String>) -> Self {
        ParseError::Structure {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Parse a Go template string into a tree
pub fn parse(name: &str, input: &str) -> Result<Template> {
    let mut items = tokenize(input)?;
    apply_trim_markers(&mut items);
    build_tree(name, items)
}

// =============================================================================
// Flat token stream
// =============================================================================

#[derive(Debug)]
enum Item {
    Text(String),
    Comment {
        trim_left: bool,
        trim_right: bool,
    },
    Action {
        trim_left: bool,
        trim_right: bool,
        body: Body,
        line: usize,
    },
}

impl Item {
    fn trim_markers(&self) -> (bool, bool) {
        match self {
            Item::Text(_) => (false, false),
            Item::Comment {
                trim_left,
                trim_right,
            }
            | Item::Action {
                trim_left,
                trim_right,
                ..
            } => (*trim_left, *trim_right),
        }
    }
}

#[derive(Debug)]
enum Body {
    Empty,
    Pipe(Pipe),
    If(Pipe),
    ElseIf(Pipe),
    ElseWith(Pipe),
    Else,
    End,
    Range(Pipe),
    With(Pipe),
    Define(String),
    Template { name: String, pipe: Option<Pipe> },
    Block { name: String, pipe: Pipe },
    Break,
    Continue,
}

fn tokenize(input: &str) -> Result<Vec<Item>> {
    let pairs = GoTemplateParser::parse(Rule::template, input)?;
    let mut items = Vec::new();

    for pair in pairs {
        if pair.as_rule() != Rule::template {
            continue;
        }
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::raw_text => items.push(Item::Text(inner.as_str().to_string())),
                Rule::comment => {
                    let (trim_left, trim_right) = delimiters(&inner);
                    items.push(Item::Comment {
                        trim_left,
                        trim_right,
                    });
                }
                Rule::action => items.push(parse_action(inner)?),
                _ => {}
            }
        }
    }

    Ok(items)
}

fn delimiters(pair: &Pair<Rule>) -> (bool, bool) {
    let mut trim_left = false;
    let mut trim_right = false;
    for inner in pair.clone().into_inner() {
        match inner.as_rule() {
            Rule::action_start => trim_left = inner.as_str().ends_with('-'),
            Rule::action_end => trim_right = inner.as_str().starts_with('-'),
            _ => {}
        }
    }
    (trim_left, trim_right)
}

fn parse_action(pair: Pair<Rule>) -> Result<Item> {
    let (line, _) = pair.as_span().start_pos().line_col();
    let (trim_left, trim_right) = delimiters(&pair);
    let mut body = Body::Empty;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::action_start | Rule::action_end => {}
            _ => body = parse_action_body(inner)?,
        }
    }

    Ok(Item::Action {
        trim_left,
        trim_right,
        body,
        line,
    })
}

fn parse_action_body(pair: Pair<Rule>) -> Result<Body> {
    match pair.as_rule() {
        Rule::if_action => Ok(Body::If(inner_pipeline(pair)?)),
        Rule::else_if_action => Ok(Body::ElseIf(inner_pipeline(pair)?)),
        Rule::else_with_action => Ok(Body::ElseWith(inner_pipeline(pair)?)),
        Rule::else_action => Ok(Body::Else),
        Rule::end_action => Ok(Body::End),
        Rule::range_action => Ok(Body::Range(inner_pipeline(pair)?)),
        Rule::with_action => Ok(Body::With(inner_pipeline(pair)?)),
        Rule::break_action => Ok(Body::Break),
        Rule::continue_action => Ok(Body::Continue),
        Rule::define_action => {
            let (name, _) = name_and_pipeline(pair)?;
            Ok(Body::Define(name))
        }
        Rule::template_action => {
            let (name, pipe) = name_and_pipeline(pair)?;
            Ok(Body::Template { name, pipe })
        }
        Rule::block_action => {
            let (line, _) = pair.as_span().start_pos().line_col();
            let (name, pipe) = name_and_pipeline(pair)?;
            let pipe = pipe.ok_or_else(|| {
                ParseError::structure(line, format!("missing pipeline in block {:?}", name))
            })?;
            Ok(Body::Block { name, pipe })
        }
        Rule::pipeline => Ok(Body::Pipe(parse_pipeline(pair)?)),
        other => Err(ParseError::UnexpectedRule(other)),
    }
}

fn inner_pipeline(pair: Pair<Rule>) -> Result<Pipe> {
    let (line, _) = pair.as_span().start_pos().line_col();
    pair.into_inner()
        .find(|inner| inner.as_rule() == Rule::pipeline)
        .map(parse_pipeline)
        .unwrap_or_else(|| Err(ParseError::structure(line, "missing pipeline")))
}

fn name_and_pipeline(pair: Pair<Rule>) -> Result<(String, Option<Pipe>)> {
    let mut name = None;
    let mut pipe = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::string_literal | Rule::raw_string => {
                name = Some(parse_string_literal(inner.as_str())?)
            }
            Rule::pipeline => pipe = Some(parse_pipeline(inner)?),
            _ => {}
        }
    }

    let name = name.ok_or_else(|| ParseError::InvalidString("missing template name".into()))?;
    Ok((name, pipe))
}

fn parse_pipeline(pair: Pair<Rule>) -> Result<Pipe> {
    let (line, _) = pair.as_span().start_pos().line_col();
    let mut pipe = Pipe::default();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::declaration => {
                for var in inner.into_inner() {
                    let text = var.as_str();
                    if text.contains('.') || text == "$" {
                        return Err(ParseError::structure(
                            line,
                            format!("cannot declare {}", text),
                        ));
                    }
                    pipe.decl.push(text.to_string());
                }
            }
            Rule::assign_op => pipe.is_assign = inner.as_str() == "=",
            Rule::command => pipe.cmds.push(parse_command(inner)?),
            other => return Err(ParseError::UnexpectedRule(other)),
        }
    }

    Ok(pipe)
}

fn parse_command(pair: Pair<Rule>) -> Result<Command> {
    let (line, column) = pair.as_span().start_pos().line_col();
    let args = pair
        .into_inner()
        .map(parse_operand)
        .collect::<Result<Vec<_>>>()?;

    Ok(Command {
        args,
        pos: Position { line, column },
    })
}

fn parse_operand(pair: Pair<Rule>) -> Result<Operand> {
    match pair.as_rule() {
        Rule::field => Ok(Operand::Field(split_fields(pair.as_str()))),
        Rule::variable => {
            let mut parts = pair.as_str().split('.');
            let name = parts.next().unwrap_or("$").to_string();
            let fields = parts.map(str::to_string).collect();
            Ok(Operand::Variable { name, fields })
        }
        Rule::dot => Ok(Operand::Dot),
        Rule::identifier => Ok(Operand::Identifier(pair.as_str().to_string())),
        Rule::chain => {
            let mut inner = pair.into_inner();
            let node = match inner.next() {
                Some(p) => parse_operand(p)?,
                None => return Err(ParseError::UnexpectedRule(Rule::chain)),
            };
            let fields = inner
                .next()
                .map(|p| split_fields(p.as_str()))
                .unwrap_or_default();
            Ok(Operand::Chain {
                node: Box::new(node),
                fields,
            })
        }
        Rule::parenthesized => {
            let pipeline = pair
                .into_inner()
                .find(|p| p.as_rule() == Rule::pipeline)
                .ok_or(ParseError::UnexpectedRule(Rule::parenthesized))?;
            Ok(Operand::Pipe(parse_pipeline(pipeline)?))
        }
        Rule::string_literal | Rule::raw_string => {
            Ok(Operand::String(parse_string_literal(pair.as_str())?))
        }
        Rule::char_literal => {
            let text = pair.as_str();
            let inner = &text[1..text.len() - 1];
            let decoded = unescape(inner)?;
            let mut chars = decoded.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Operand::Number(Number::Int(c as i64))),
                _ => Err(ParseError::InvalidString(text.to_string())),
            }
        }
        Rule::number => parse_number(pair.as_str()).map(Operand::Number),
        Rule::boolean => Ok(Operand::Bool(pair.as_str() == "true")),
        Rule::nil => Ok(Operand::Nil),
        other => Err(ParseError::UnexpectedRule(other)),
    }
}

fn split_fields(text: &str) -> Vec<String> {
    text.split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number(text: &str) -> Result<Number> {
    let invalid = || ParseError::InvalidNumber(text.to_string());
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        let n = i64::from_str_radix(hex, 16).map_err(|_| invalid())?;
        return Ok(Number::Int(if negative { -n } else { n }));
    }

    if digits.contains(['.', 'e', 'E']) {
        let n: f64 = digits.parse().map_err(|_| invalid())?;
        Ok(Number::Float(if negative { -n } else { n }))
    } else {
        let n: i64 = digits.parse().map_err(|_| invalid())?;
        Ok(Number::Int(if negative { -n } else { n }))
    }
}

/// Decode a quoted (`"..."`) or raw (`` `...` ``) Go string literal
pub fn parse_string_literal(text: &str) -> Result<String> {
    if let Some(raw) = text.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        return Ok(raw.to_string());
    }

    let inner = text
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| ParseError::InvalidString(text.to_string()))?;
    unescape(inner)
}

fn unescape(inner: &str) -> Result<String> {
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('a') => result.push('\u{07}'),
            Some('b') => result.push('\u{08}'),
            Some('f') => result.push('\u{0C}'),
            Some('v') => result.push('\u{0B}'),
            Some('0') => result.push('\0'),
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some('\'') => result.push('\''),
            Some(kind @ ('x' | 'u' | 'U')) => {
                let len = match kind {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = chars.by_ref().take(len).collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == len)
                    .and_then(char::from_u32)
                    .ok_or_else(|| ParseError::InvalidString(format!("\\{}{}", kind, hex)))?;
                result.push(decoded);
            }
            Some(other) => {
                return Err(ParseError::InvalidString(format!(
                    "unknown escape sequence \\{}",
                    other
                )));
            }
            None => return Err(ParseError::InvalidString("trailing backslash".into())),
        }
    }

    Ok(result)
}

// =============================================================================
// Trimming and tree building
// =============================================================================

fn is_go_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn apply_trim_markers(items: &mut [Item]) {
    for i in 0..items.len() {
        let (trim_left, trim_right) = items[i].trim_markers();

        if trim_left
            && i > 0
            && let Item::Text(text) = &mut items[i - 1]
        {
            *text = text.trim_end_matches(is_go_space).to_string();
        }
        if trim_right
            && let Some(Item::Text(text)) = items.get_mut(i + 1)
        {
            *text = text.trim_start_matches(is_go_space).to_string();
        }
    }
}

enum FrameKind {
    Root,
    If(Pipe),
    With(Pipe),
    Range(Pipe),
    Define(String),
    Block(String, Pipe),
}

struct Frame {
    kind: FrameKind,
    list: Vec<Node>,
    else_list: Option<Vec<Node>>,
    /// Opened by `else if` / `else with`; closes together with its parent
    chained: bool,
}

impl Frame {
    fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            list: Vec::new(),
            else_list: None,
            chained: false,
        }
    }

    fn chained(kind: FrameKind) -> Self {
        Self {
            chained: true,
            ..Self::new(kind)
        }
    }

    fn push(&mut self, node: Node) {
        match &mut self.else_list {
            Some(list) => list.push(node),
            None => self.list.push(node),
        }
    }
}

fn top(stack: &mut [Frame], line: usize) -> Result<&mut Frame> {
    stack
        .last_mut()
        .ok_or_else(|| ParseError::structure(line, "template stack underflow"))
}

fn build_tree(name: &str, items: Vec<Item>) -> Result<Template> {
    let mut defines = IndexMap::new();
    let mut stack = vec![Frame::new(FrameKind::Root)];

    for item in items {
        let (body, line) = match item {
            Item::Text(text) => {
                if !text.is_empty() {
                    top(&mut stack, 0)?.push(Node::Text(text));
                }
                continue;
            }
            Item::Comment { .. } => continue,
            Item::Action { body, line, .. } => (body, line),
        };

        match body {
            Body::Empty => return Err(ParseError::structure(line, "missing value for command")),
            Body::Pipe(pipe) => top(&mut stack, line)?.push(Node::Action(pipe)),
            Body::Template { name, pipe } => {
                top(&mut stack, line)?.push(Node::Template { name, pipe })
            }
            Body::If(pipe) => stack.push(Frame::new(FrameKind::If(pipe))),
            Body::With(pipe) => stack.push(Frame::new(FrameKind::With(pipe))),
            Body::Range(pipe) => stack.push(Frame::new(FrameKind::Range(pipe))),
            Body::Define(define) => {
                if stack.len() != 1 {
                    return Err(ParseError::structure(
                        line,
                        format!("define {:?} must be at the top level", define),
                    ));
                }
                stack.push(Frame::new(FrameKind::Define(define)));
            }
            Body::Block { name, pipe } => stack.push(Frame::new(FrameKind::Block(name, pipe))),
            Body::Break => push_loop_control(&mut stack, line, Node::Break, "break")?,
            Body::Continue => push_loop_control(&mut stack, line, Node::Continue, "continue")?,
            Body::Else => open_else(&mut stack, line)?,
            Body::ElseIf(pipe) => {
                open_else(&mut stack, line)?;
                stack.push(Frame::chained(FrameKind::If(pipe)));
            }
            Body::ElseWith(pipe) => {
                open_else(&mut stack, line)?;
                stack.push(Frame::chained(FrameKind::With(pipe)));
            }
            Body::End => close_frame(&mut stack, &mut defines, line)?,
        }
    }

    if stack.len() != 1 {
        return Err(ParseError::structure(0, "unexpected EOF: missing {{end}}"));
    }
    let root = stack.pop().map(|frame| frame.list).unwrap_or_default();

    Ok(Template {
        name: name.to_string(),
        root,
        defines,
    })
}

fn push_loop_control(stack: &mut [Frame], line: usize, node: Node, keyword: &str) -> Result<()> {
    if !inside_range(stack) {
        return Err(ParseError::structure(
            line,
            format!("{{{{{}}}}} outside {{{{range}}}}", keyword),
        ));
    }
    top(stack, line)?.push(node);
    Ok(())
}

fn inside_range(stack: &[Frame]) -> bool {
    for frame in stack.iter().rev() {
        match frame.kind {
            FrameKind::Range(_) => return true,
            FrameKind::Define(_) | FrameKind::Block(..) | FrameKind::Root => return false,
            _ => {}
        }
    }
    false
}

fn open_else(stack: &mut [Frame], line: usize) -> Result<()> {
    let frame = top(stack, line)?;
    let is_branch = matches!(
        frame.kind,
        FrameKind::If(_) | FrameKind::With(_) | FrameKind::Range(_)
    );
    if !is_branch || frame.else_list.is_some() {
        return Err(ParseError::structure(line, "unexpected {{else}}"));
    }
    frame.else_list = Some(Vec::new());
    Ok(())
}

fn close_frame(
    stack: &mut Vec<Frame>,
    defines: &mut IndexMap<String, Vec<Node>>,
    line: usize,
) -> Result<()> {
    loop {
        if stack.len() <= 1 {
            return Err(ParseError::structure(line, "unexpected {{end}}"));
        }
        let Some(Frame {
            kind,
            list,
            else_list,
            chained,
        }) = stack.pop()
        else {
            return Err(ParseError::structure(line, "unexpected {{end}}"));
        };

        match kind {
            FrameKind::If(pipe) => top(stack, line)?.push(Node::If(Branch {
                pipe,
                list,
                else_list,
            })),
            FrameKind::With(pipe) => top(stack, line)?.push(Node::With(Branch {
                pipe,
                list,
                else_list,
            })),
            FrameKind::Range(pipe) => top(stack, line)?.push(Node::Range(Branch {
                pipe,
                list,
                else_list,
            })),
            FrameKind::Define(name) => {
                defines.insert(name, list);
            }
            FrameKind::Block(name, pipe) => {
                defines.insert(name.clone(), list);
                top(stack, line)?.push(Node::Template {
                    name,
                    pipe: Some(pipe),
                });
            }
            FrameKind::Root => return Err(ParseError::structure(line, "unexpected {{end}}")),
        }

        if !chained {
            return Ok(());
        }
    }
}
