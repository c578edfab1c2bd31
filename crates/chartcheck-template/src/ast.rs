//! AST for Go templates
//!
//! Mirrors the node taxonomy of Go's `text/template/parse`: text, actions,
//! `if`/`with`/`range` branches, template invocations and loop control.
//! `define` and `block` bodies are lifted out of the tree into
//! [`Template::defines`].

use indexmap::IndexMap;
use std::fmt;

/// A parsed template file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    /// Name the template was parsed under (usually its chart-relative path)
    pub name: String,
    /// Top-level nodes, with `define` bodies removed
    pub root: Vec<Node>,
    /// Named templates declared with `define` or `block`, in source order
    pub defines: IndexMap<String, Vec<Node>>,
}

/// A node in the template tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Raw text, after trim markers have been applied
    Text(String),
    /// `{{ pipeline }}`
    Action(Pipe),
    /// `{{ if }}...{{ else }}...{{ end }}`
    If(Branch),
    /// `{{ with }}...{{ else }}...{{ end }}`
    With(Branch),
    /// `{{ range }}...{{ else }}...{{ end }}`
    Range(Branch),
    /// `{{ template "name" pipeline }}`
    Template { name: String, pipe: Option<Pipe> },
    Break,
    Continue,
}

/// Shared shape of `if`, `with` and `range`
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub pipe: Pipe,
    pub list: Vec<Node>,
    pub else_list: Option<Vec<Node>>,
}

/// A pipeline: optional declaration followed by `|`-separated commands
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipe {
    /// Declared variables including the `$` (`["$i", "$v"]`)
    pub decl: Vec<String>,
    /// `=` rather than `:=`
    pub is_assign: bool,
    pub cmds: Vec<Command>,
}

impl Pipe {
    /// Pipeline with a single command
    pub fn simple(args: Vec<Operand>) -> Self {
        Self {
            decl: Vec::new(),
            is_assign: false,
            cmds: vec![Command {
                args,
                pos: Position::default(),
            }],
        }
    }

    /// The single operand of a one-command, one-argument pipeline
    pub fn single_operand(&self) -> Option<&Operand> {
        match self.cmds.as_slice() {
            [cmd] if cmd.args.len() == 1 => cmd.args.first(),
            _ => None,
        }
    }
}

/// One command of a pipeline: a function call or a single value
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub args: Vec<Operand>,
    pub pos: Position,
}

/// Line and column of a command, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// An argument of a command
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `.Values.image.tag` as `["Values", "image", "tag"]`
    Field(Vec<String>),
    /// `$`, `$x` or `$x.a.b`
    Variable { name: String, fields: Vec<String> },
    /// `.`
    Dot,
    /// A function name
    Identifier(String),
    /// `(pipeline).a.b`
    Chain { node: Box<Operand>, fields: Vec<String> },
    /// `(pipeline)`
    Pipe(Pipe),
    String(String),
    Number(Number),
    Bool(bool),
    Nil,
}

/// A numeric literal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Operand {
    /// Field chain as written in the source (`.a.b`), for field-like operands
    pub fn field_repr(fields: &[String]) -> String {
        fields.iter().map(|f| format!(".{}", f)).collect()
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Field(fields) => write!(f, "{}", Operand::field_repr(fields)),
            Operand::Variable { name, fields } => {
                write!(f, "{}{}", name, Operand::field_repr(fields))
            }
            Operand::Dot => write!(f, "."),
            Operand::Identifier(name) => write!(f, "{}", name),
            Operand::Chain { node, fields } => {
                write!(f, "{}{}", node, Operand::field_repr(fields))
            }
            Operand::Pipe(pipe) => write!(f, "({})", pipe),
            Operand::String(s) => write!(f, "{:?}", s),
            Operand::Number(Number::Int(n)) => write!(f, "{}", n),
            Operand::Number(Number::Float(n)) => write!(f, "{}", n),
            Operand::Bool(b) => write!(f, "{}", b),
            Operand::Nil => write!(f, "nil"),
        }
    }
}

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.decl.is_empty() {
            let op = if self.is_assign { "=" } else { ":=" };
            write!(f, "{} {} ", self.decl.join(", "), op)?;
        }
        let cmds: Vec<String> = self
            .cmds
            .iter()
            .map(|cmd| {
                cmd.args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        write!(f, "{}", cmds.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_repr() {
        let fields = vec!["Values".to_string(), "image".to_string()];
        assert_eq!(Operand::field_repr(&fields), ".Values.image");
        assert_eq!(Operand::Field(fields).to_string(), ".Values.image");
    }

    #[test]
    fn test_pipe_display() {
        let pipe = Pipe {
            decl: vec!["$x".to_string()],
            is_assign: false,
            cmds: vec![
                Command {
                    args: vec![Operand::Field(vec!["a".into()])],
                    pos: Position::default(),
                },
                Command {
                    args: vec![
                        Operand::Identifier("default".into()),
                        Operand::String("b".into()),
                    ],
                    pos: Position::default(),
                },
            ],
        };
        assert_eq!(pipe.to_string(), r#"$x := .a | default "b""#);
    }

    #[test]
    fn test_single_operand() {
        let pipe = Pipe::simple(vec![Operand::Dot]);
        assert_eq!(pipe.single_operand(), Some(&Operand::Dot));

        let call = Pipe::simple(vec![Operand::Identifier("list".into()), Operand::Dot]);
        assert!(call.single_operand().is_none());
    }
}
