use crate::value::Value;

/// A renderable template node.
///
/// Expression text is kept verbatim; it is only parsed and evaluated when the
/// node is rendered.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(String),
    Interpolation(String),
    Loop {
        var: String,    // e.g., "pane"
        source: String, // e.g., "panes"
        body: Vec<Node>,
    },
    Conditional {
        branches: Vec<Branch>, // `if`, then each `elif`, then an optional `else`.
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// `None` for the trailing `else` branch.
    pub guard: Option<String>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Index(Box<Expr>, Box<Expr>), // seq[0], pane['cwd']
    Attr(Box<Expr>, String),     // pane.cwd
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    /// `a < b <= c` is `a < b and b <= c`, with `b` evaluated once.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}
