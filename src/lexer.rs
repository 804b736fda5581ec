use crate::error::{LexError, TagKind};

const ESCAPE: &str = "{{{";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    Var,
    Stmt,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset of the token in the source.
    pub offset: usize,
}

impl<'a> Token<'a> {
    fn new(kind: TokenKind, text: &'a str, offset: usize) -> Self {
        Self { kind, text, offset }
    }
}

/// Single-pass scanner over template source.
///
/// At each position the match priority is: `{{{` escape, `{{` variable,
/// `{%` statement, `{#` comment, then plain text up to the next `{`.
#[derive(Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
    finished: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            cursor: 0,
            finished: false,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        self.cursor += n;
    }

    /// Returns the next token, or `None` once the `Eof` token has been handed out.
    pub fn next_token(&mut self) -> Result<Option<Token<'a>>, LexError> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let start = self.cursor;
            let rest = self.remaining();
            if rest.is_empty() {
                self.finished = true;
                return Ok(Some(Token::new(TokenKind::Eof, "", start)));
            }

            if rest.starts_with(ESCAPE) {
                self.advance(ESCAPE.len());
                return Ok(Some(Token::new(TokenKind::Text, "{{", start)));
            }

            let tag = [TagKind::Variable, TagKind::Statement, TagKind::Comment]
                .into_iter()
                .find(|kind| rest.starts_with(kind.open()));

            let Some(kind) = tag else {
                // Plain text. The first char is never a tag opener here, so a
                // lone `{` is swallowed into the run instead of stalling.
                let first = rest.chars().next().map_or(1, char::len_utf8);
                let len = rest[first..].find('{').map_or(rest.len(), |i| i + first);
                self.advance(len);
                return Ok(Some(Token::new(TokenKind::Text, &rest[..len], start)));
            };

            let body = &rest[kind.open().len()..];
            let end = body
                .find(kind.close())
                .ok_or(LexError::Unclosed { kind, offset: start })?;
            let content = &body[..end];
            self.advance(kind.open().len() + end + kind.close().len());

            match kind {
                TagKind::Variable => return Ok(Some(Token::new(TokenKind::Var, content, start))),
                TagKind::Statement => {
                    return Ok(Some(Token::new(TokenKind::Stmt, content.trim(), start)))
                }
                // Comments produce nothing; keep scanning.
                TagKind::Comment => continue,
            }
        }
    }
}

/// Scans `input` into a token stream terminated by exactly one `Eof` token.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, LexError> {
    let mut lexer = Tokenizer::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}
