use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The three tag flavours recognised by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Variable,
    Statement,
    Comment,
}

impl TagKind {
    pub fn open(self) -> &'static str {
        match self {
            TagKind::Variable => "{{",
            TagKind::Statement => "{%",
            TagKind::Comment => "{#",
        }
    }

    pub fn close(self) -> &'static str {
        match self {
            TagKind::Variable => "}}",
            TagKind::Statement => "%}",
            TagKind::Comment => "#}",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TagKind::Variable => "variable",
            TagKind::Statement => "statement",
            TagKind::Comment => "comment",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unclosed {kind} tag opened at offset {offset} (expected `{}`)", .kind.close())]
    Unclosed { kind: TagKind, offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown statement `{keyword}` at offset {offset}")]
    UnknownStatement { keyword: String, offset: usize },

    #[error("malformed `{keyword}` statement at offset {offset}: {message}")]
    MalformedStatement {
        keyword: &'static str,
        message: String,
        offset: usize,
    },

    #[error("unexpected `{keyword}` at offset {offset}")]
    UnexpectedStatement { keyword: &'static str, offset: usize },

    #[error("missing `{expected}` for block opened at offset {offset}")]
    MissingEnd {
        expected: &'static str,
        offset: usize,
    },

    #[error("blocks nested too deeply at offset {offset}")]
    TooDeep { offset: usize },
}

/// Failures raised while rendering a parsed template against a context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("syntax error in expression `{expr}` at column {column}: {message}")]
    Syntax {
        expr: String,
        message: String,
        column: usize,
    },

    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),

    #[error("cannot iterate over a value of type {0}")]
    NotIterable(&'static str),

    #[error("unsupported operand types for `{op}`: {left} and {right}")]
    UnsupportedOperand {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("unsupported operand type for unary `{op}`: {operand}")]
    UnsupportedUnary {
        op: &'static str,
        operand: &'static str,
    },

    #[error("cannot order {left} and {right}")]
    NotComparable {
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in `{0}`")]
    Overflow(&'static str),

    #[error("value of type {target} cannot be indexed by {index}")]
    NotIndexable {
        target: &'static str,
        index: &'static str,
    },

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("membership test needs an array, string or map, got {0}")]
    NotContainer(&'static str),

    #[error("{target} has no field `{field}`")]
    NoField { target: &'static str, field: String },
}

/// Top-level error for building (and optionally rendering) a template.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("failed to read template {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
