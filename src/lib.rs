//! shelljinja: minimal Jinja-like engine for shell-helper system prompts.
//!
//! This crate exists to do one job well: turn a small template (inline text
//! or a packaged prompt file) plus a handful of named values into the string
//! the shell helper sends to its language model as a system prompt.
//!
//! Supported subset:
//! - Literals, passed through untouched.
//! - `{{ expr }}` interpolation.
//! - `{% for x in expr %} ... {% endfor %}`, nestable, with the loop variable
//!   shadowing any outer binding only for the duration of the loop.
//! - `{% if %}` / `{% elif %}` / `{% else %}` / `{% endif %}`.
//! - `{# comments #}`, discarded.
//! - `{{{` as an escape for a literal `{{`.
//!
//! Expressions are a small, closed grammar: literals, names, `+ - * / %`,
//! comparisons, `and`/`or`/`not`, `in`/`not in`, indexing and `.field` on map
//! values (e.g., `{{ active_pane.cwd }}`). There are no function calls, so a
//! template can never touch files, processes, or the environment.
//!
//! Values print the way Python's `str()` would: `True`/`False`, `1e+20`,
//! `['a', 'b']`. `and`/`or` yield whichever operand decided the result, so
//! `{{ name or 'anon' }}` works as a fallback.
//!
//! Block nesting is capped at [`MAX_NESTING`] and expression nesting at
//! [`MAX_DEPTH`]; deeper input is an error rather than a stack overflow.
//!
//! Not supported:
//! - Filters (e.g., `| upper`), macros, includes, inheritance.
//! - Whitespace control (`{%-`), autoescaping.
//!
//! Whitespace semantics: the engine never injects or trims characters; every
//! byte outside a tag reaches the output verbatim.

use std::fs;
use std::path::Path;
use std::str::FromStr;

mod ast;
mod error;
mod eval;
mod expr;
mod lexer;
mod parser;
mod value;

pub use crate::error::{Error, LexError, ParseError, RenderError, TagKind};
pub use crate::expr::MAX_DEPTH;
pub use crate::parser::MAX_NESTING;
pub use crate::value::{Context, Value};

use crate::ast::Node;
use crate::eval::Evaluator;

/// Inputs longer than this are never treated as a file path.
pub const MAX_PATH_LEN: usize = 1024;

/// A parsed template, ready to be rendered any number of times.
///
/// The node tree is immutable after construction, so a `Template` can be
/// shared across threads and rendered concurrently.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Builds a template from `input`, which is either template text or a
    /// path to a file holding it.
    ///
    /// The input is read as a path only when it is at most [`MAX_PATH_LEN`]
    /// bytes, has no line breaks, and names an existing file.
    pub fn new(input: &str) -> Result<Self, Error> {
        if looks_like_path(input) {
            let path = Path::new(input);
            if path.is_file() {
                return Self::from_path(path);
            }
        }
        Self::from_source(input)
    }

    /// Builds a template from the contents of the file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let template = Self::compile(&source)?;
        tracing::debug!(
            path = %path.display(),
            nodes = template.nodes.len(),
            "loaded template from file"
        );
        Ok(template)
    }

    /// Builds a template from inline text, never consulting the filesystem.
    pub fn from_source(source: &str) -> Result<Self, Error> {
        let template = Self::compile(source)?;
        tracing::debug!(
            bytes = source.len(),
            nodes = template.nodes.len(),
            "parsed inline template"
        );
        Ok(template)
    }

    fn compile(source: &str) -> Result<Self, Error> {
        Ok(Self {
            nodes: parser::parse(source)?,
        })
    }

    /// Renders the template against `context`.
    ///
    /// The context is only read; loop variables are bound in scopes private
    /// to this call. On error no partial output is returned.
    pub fn render(&self, context: &Context) -> Result<String, RenderError> {
        let mut output = String::new();
        Evaluator::new(context).render(&self.nodes, &mut output)?;
        Ok(output)
    }
}

impl FromStr for Template {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_source(s)
    }
}

fn looks_like_path(input: &str) -> bool {
    !input.is_empty() && input.len() <= MAX_PATH_LEN && !input.contains(['\n', '\r', '\0'])
}
