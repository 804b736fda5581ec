use crate::ast::{Branch, Node};
use crate::error::{Error, ParseError};
use crate::lexer::{tokenize, Token, TokenKind};

/// Statement tags, classified by their first word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Statement<'a> {
    For { var: &'a str, source: &'a str },
    If(&'a str),
    Elif(&'a str),
    Else,
    EndIf,
    EndFor,
}

impl Statement<'_> {
    fn keyword(&self) -> &'static str {
        match self {
            Statement::For { .. } => "for",
            Statement::If(_) => "if",
            Statement::Elif(_) => "elif",
            Statement::Else => "else",
            Statement::EndIf => "endif",
            Statement::EndFor => "endfor",
        }
    }

    /// Terminators close the body that is currently being parsed.
    fn is_terminator(&self) -> bool {
        matches!(
            self,
            Statement::Elif(_) | Statement::Else | Statement::EndIf | Statement::EndFor
        )
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn classify(text: &str, offset: usize) -> Result<Statement<'_>, ParseError> {
    let (keyword, rest) = match text.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (text, ""),
    };

    let malformed = |keyword: &'static str, message: &str| ParseError::MalformedStatement {
        keyword,
        message: message.to_string(),
        offset,
    };
    let bare = |stmt: Statement<'static>| {
        if rest.is_empty() {
            Ok(stmt)
        } else {
            Err(malformed(stmt.keyword(), "takes no arguments"))
        }
    };
    let guarded = |keyword: &'static str| {
        if rest.is_empty() {
            Err(malformed(keyword, "missing condition"))
        } else {
            Ok(rest)
        }
    };

    match keyword {
        "for" => {
            let Some((var, tail)) = rest.split_once(char::is_whitespace) else {
                return Err(malformed("for", "expected `for <name> in <expr>`"));
            };
            if !is_identifier(var) {
                return Err(malformed("for", "loop variable must be an identifier"));
            }
            let source = match tail.trim_start().split_once(char::is_whitespace) {
                Some(("in", source)) if !source.trim().is_empty() => source.trim(),
                _ => return Err(malformed("for", "expected `for <name> in <expr>`")),
            };
            Ok(Statement::For { var, source })
        }
        "if" => guarded("if").map(Statement::If),
        "elif" => guarded("elif").map(Statement::Elif),
        "else" => bare(Statement::Else),
        "endif" => bare(Statement::EndIf),
        "endfor" => bare(Statement::EndFor),
        other => Err(ParseError::UnknownStatement {
            keyword: other.to_string(),
            offset,
        }),
    }
}

/// Deepest `for`/`if` nesting accepted before parsing gives up.
pub const MAX_NESTING: usize = 256;

/// Recursive-descent parser over a lexed token stream.
pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Result<Self, Error> {
        Ok(Self {
            tokens: tokenize(input)?,
            pos: 0,
            depth: 0,
        })
    }

    fn peek(&self) -> Token<'a> {
        // The stream always ends in `Eof`, which is never consumed.
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn consume(&mut self) -> Token<'a> {
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    /// Parses the whole document.
    pub fn parse(mut self) -> Result<Vec<Node>, ParseError> {
        let nodes = self.parse_body()?;
        match self.peek_terminator()? {
            None => Ok(nodes),
            Some((stmt, offset)) => Err(ParseError::UnexpectedStatement {
                keyword: stmt.keyword(),
                offset,
            }),
        }
    }

    /// Classifies the upcoming token if it is a block terminator, without
    /// consuming it.
    fn peek_terminator(&self) -> Result<Option<(Statement<'a>, usize)>, ParseError> {
        let token = self.peek();
        if token.kind != TokenKind::Stmt {
            return Ok(None);
        }
        let stmt = classify(token.text, token.offset)?;
        Ok(stmt.is_terminator().then_some((stmt, token.offset)))
    }

    /// Parses nodes until end of input or a terminator statement, which is
    /// left in place for the enclosing block to inspect.
    fn parse_body(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::Text => {
                    self.consume();
                    // Adjacent text runs (escapes, comments) fold together.
                    if let Some(Node::Literal(prev)) = nodes.last_mut() {
                        prev.push_str(token.text);
                    } else {
                        nodes.push(Node::Literal(token.text.to_string()));
                    }
                }
                TokenKind::Var => {
                    self.consume();
                    nodes.push(Node::Interpolation(token.text.trim().to_string()));
                }
                TokenKind::Stmt => {
                    let stmt = classify(token.text, token.offset)?;
                    let block = match stmt {
                        Statement::Elif(_)
                        | Statement::Else
                        | Statement::EndIf
                        | Statement::EndFor => break,
                        Statement::For { var, source } => {
                            self.enter(token.offset)?;
                            self.parse_for(var, source, token.offset)
                        }
                        Statement::If(guard) => {
                            self.enter(token.offset)?;
                            self.parse_if(guard, token.offset)
                        }
                    };
                    self.depth -= 1;
                    nodes.push(block?);
                }
            }
        }
        Ok(nodes)
    }

    /// Consumes a block opener, refusing to nest past [`MAX_NESTING`].
    fn enter(&mut self, offset: usize) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::TooDeep { offset });
        }
        self.depth += 1;
        self.consume();
        Ok(())
    }

    fn parse_for(&mut self, var: &str, source: &str, offset: usize) -> Result<Node, ParseError> {
        let body = self.parse_body()?; // Recursively parse body

        match self.peek_terminator()? {
            Some((Statement::EndFor, _)) => {
                self.consume();
                Ok(Node::Loop {
                    var: var.to_string(),
                    source: source.to_string(),
                    body,
                })
            }
            Some((stmt, at)) => Err(ParseError::UnexpectedStatement {
                keyword: stmt.keyword(),
                offset: at,
            }),
            None => Err(ParseError::MissingEnd {
                expected: "endfor",
                offset,
            }),
        }
    }

    fn parse_if(&mut self, guard: &str, offset: usize) -> Result<Node, ParseError> {
        let mut branches = vec![Branch {
            guard: Some(guard.to_string()),
            body: self.parse_body()?,
        }];
        let mut seen_else = false;

        loop {
            match self.peek_terminator()? {
                Some((Statement::Elif(guard), _)) if !seen_else => {
                    self.consume();
                    branches.push(Branch {
                        guard: Some(guard.to_string()),
                        body: self.parse_body()?,
                    });
                }
                Some((Statement::Else, _)) if !seen_else => {
                    self.consume();
                    seen_else = true;
                    branches.push(Branch {
                        guard: None,
                        body: self.parse_body()?,
                    });
                }
                Some((Statement::EndIf, _)) => {
                    self.consume();
                    return Ok(Node::Conditional { branches });
                }
                // `endfor` here means this `if` was never closed inside a loop;
                // `elif`/`else` after `else` break the branch ordering.
                Some((stmt, at)) => {
                    return Err(ParseError::UnexpectedStatement {
                        keyword: stmt.keyword(),
                        offset: at,
                    })
                }
                None => {
                    return Err(ParseError::MissingEnd {
                        expected: "endif",
                        offset,
                    })
                }
            }
        }
    }
}

/// Lexes and parses `input` into a node tree.
pub fn parse(input: &str) -> Result<Vec<Node>, Error> {
    Ok(Parser::new(input)?.parse()?)
}
