use std::cmp::Ordering;
use std::collections::HashMap;

use crate::ast::*;
use crate::error::RenderError;
use crate::expr;
use crate::value::{Context, Value};

/// Renders nodes against a caller-owned [`Context`].
///
/// Loop variables live in a stack of scopes layered over the context, so the
/// caller's values are never modified and an inner binding disappears as soon
/// as its loop finishes.
pub struct Evaluator<'c> {
    globals: &'c Context,
    scopes: Vec<HashMap<String, Value>>,
}

impl<'c> Evaluator<'c> {
    pub fn new(context: &'c Context) -> Self {
        Self {
            globals: context,
            scopes: Vec::new(),
        }
    }

    fn get_var(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn set_local(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    pub fn render(&mut self, nodes: &[Node], output: &mut String) -> Result<(), RenderError> {
        for node in nodes {
            match node {
                Node::Literal(s) => output.push_str(s),
                Node::Interpolation(src) => {
                    let val = self.eval_str(src)?;
                    match val {
                        Value::String(s) => output.push_str(&s),
                        other => output.push_str(&other.to_string()),
                    }
                }
                Node::Loop { var, source, body } => {
                    let items = match self.eval_str(source)? {
                        Value::Array(items) => items,
                        Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                        Value::Map(entries) => entries.into_keys().map(Value::String).collect(),
                        other => return Err(RenderError::NotIterable(other.type_name())),
                    };
                    tracing::trace!(var = %var, iterations = items.len(), "rendering loop");

                    self.push_scope();
                    let result = items.into_iter().try_for_each(|item| {
                        self.set_local(var, item);
                        self.render(body, output)
                    });
                    self.pop_scope();
                    result?;
                }
                Node::Conditional { branches } => {
                    for branch in branches {
                        let taken = match &branch.guard {
                            Some(guard) => self.eval_str(guard)?.is_truthy(),
                            None => true,
                        };
                        if taken {
                            self.render(&branch.body, output)?;
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn eval_str(&self, src: &str) -> Result<Value, RenderError> {
        let expr = expr::parse(src)?;
        self.eval_expr(&expr)
    }

    pub fn eval_expr(&self, expr: &Expr) -> Result<Value, RenderError> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => self
                .get_var(name)
                .cloned()
                .ok_or_else(|| RenderError::UndefinedVariable(name.clone())),
            Expr::List(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.eval_expr(item))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Index(target, index) => {
                let target = self.eval_expr(target)?;
                let index = self.eval_expr(index)?;
                index_value(target, &index)
            }
            Expr::Attr(target, field) => {
                let target = self.eval_expr(target)?;
                field_value(target, field)
            }
            Expr::Unary(op, operand) => {
                let v = self.eval_expr(operand)?;
                unary(*op, v)
            }
            Expr::Binary(lhs, op, rhs) => {
                let l = self.eval_expr(lhs)?;
                let r = self.eval_expr(rhs)?;
                binary(*op, l, r)
            }
            Expr::Compare(first, rest) => {
                let mut lhs = self.eval_expr(first)?;
                for (op, rhs) in rest {
                    let rhs = self.eval_expr(rhs)?;
                    if !compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            // Both yield the operand that decided the outcome, not a bool.
            Expr::And(lhs, rhs) => {
                let l = self.eval_expr(lhs)?;
                if l.is_truthy() {
                    self.eval_expr(rhs)
                } else {
                    Ok(l)
                }
            }
            Expr::Or(lhs, rhs) => {
                let l = self.eval_expr(lhs)?;
                if l.is_truthy() {
                    Ok(l)
                } else {
                    self.eval_expr(rhs)
                }
            }
        }
    }
}

fn unary(op: UnaryOp, v: Value) -> Result<Value, RenderError> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or(RenderError::Overflow("-")),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Pos, v @ (Value::Int(_) | Value::Float(_))) => Ok(v),
        (op, v) => Err(RenderError::UnsupportedUnary {
            op: if op == UnaryOp::Neg { "-" } else { "+" },
            operand: v.type_name(),
        }),
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

/// Floored modulo: the result takes the sign of the divisor.
fn floored_rem_int(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    Some(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
}

fn floored_rem_float(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, RenderError> {
    let overflow = || RenderError::Overflow(op.symbol());
    match (op, l, r) {
        (BinOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (BinOp::Add, Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (BinOp::Div | BinOp::Rem, l, r) if as_float(&r) == Some(0.0) && as_float(&l).is_some() => {
            Err(RenderError::DivisionByZero)
        }
        (op, Value::Int(a), Value::Int(b)) => match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div => Ok(Value::Float(a as f64 / b as f64)),
            BinOp::Rem => floored_rem_int(a, b).map(Value::Int).ok_or_else(overflow),
        },
        (op, l, r) => match (as_float(&l), as_float(&r)) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Rem => floored_rem_float(a, b),
            })),
            _ => Err(RenderError::UnsupportedOperand {
                op: op.symbol(),
                left: l.type_name(),
                right: r.type_name(),
            }),
        },
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        }
        (Value::Int(a), Value::Int(b)) => a == b,
        _ => match (as_float(l), as_float(r)) {
            (Some(a), Some(b)) => a == b,
            _ => l == r,
        },
    }
}

fn order(l: &Value, r: &Value) -> Result<Ordering, RenderError> {
    let not_comparable = || RenderError::NotComparable {
        left: l.type_name(),
        right: r.type_name(),
    };
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (as_float(l), as_float(r)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(not_comparable),
            _ => Err(not_comparable()),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, RenderError> {
    match (container, item) {
        (Value::Array(items), item) => Ok(items.iter().any(|x| values_equal(x, item))),
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::String(_), other) => Err(RenderError::UnsupportedOperand {
            op: "in",
            left: other.type_name(),
            right: "string",
        }),
        (Value::Map(entries), Value::String(key)) => Ok(entries.contains_key(key)),
        (Value::Map(_), _) => Ok(false),
        (other, _) => Err(RenderError::NotContainer(other.type_name())),
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, RenderError> {
    Ok(match op {
        CmpOp::Eq => values_equal(l, r),
        CmpOp::Ne => !values_equal(l, r),
        CmpOp::Lt => order(l, r)? == Ordering::Less,
        CmpOp::Gt => order(l, r)? == Ordering::Greater,
        CmpOp::Le => order(l, r)? != Ordering::Greater,
        CmpOp::Ge => order(l, r)? != Ordering::Less,
        CmpOp::In => contains(r, l)?,
        CmpOp::NotIn => !contains(r, l)?,
    })
}

/// Resolves a possibly negative index against a length.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 {
        i64::try_from(len).ok()?.checked_add(index)?
    } else {
        index
    };
    usize::try_from(resolved).ok().filter(|i| *i < len)
}

fn index_value(target: Value, index: &Value) -> Result<Value, RenderError> {
    let not_indexable = |target: &Value| RenderError::NotIndexable {
        target: target.type_name(),
        index: index.type_name(),
    };
    match (target, index) {
        (Value::Map(entries), Value::String(key)) => field_value(Value::Map(entries), key),
        (Value::Array(mut items), Value::Int(i)) => {
            let len = items.len();
            let at = resolve_index(*i, len).ok_or(RenderError::IndexOutOfRange { index: *i, len })?;
            Ok(items.swap_remove(at))
        }
        (Value::String(s), Value::Int(i)) => {
            let len = s.chars().count();
            resolve_index(*i, len)
                .and_then(|at| s.chars().nth(at))
                .map(|c| Value::String(c.to_string()))
                .ok_or(RenderError::IndexOutOfRange { index: *i, len })
        }
        (target, _) => Err(not_indexable(&target)),
    }
}

/// `target.field`; only maps have fields.
fn field_value(target: Value, field: &str) -> Result<Value, RenderError> {
    let missing = |target: &'static str| RenderError::NoField {
        target,
        field: field.to_string(),
    };
    match target {
        Value::Map(mut entries) => entries.remove(field).ok_or_else(|| missing("map")),
        other => Err(missing(other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn eval(src: &str, ctx: &Context) -> Result<Value, RenderError> {
        Evaluator::new(ctx).eval_str(src)
    }

    fn eval_ok(src: &str) -> Value {
        let ctx = Context::new()
            .with("n", 7)
            .with("x", 2.5)
            .with("name", "bob")
            .with("seq", vec![1, 2, 3])
            .with("empty", Vec::<i64>::new());
        eval(src, &ctx).unwrap_or_else(|e| panic!("{src}: {e}"))
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval_ok("1 + 1"), Value::Int(2));
        assert_eq!(eval_ok("n * 2 - 4"), Value::Int(10));
        assert_eq!(eval_ok("(n + 1) * 2"), Value::Int(16));
        assert_eq!(eval_ok("7 / 2"), Value::Float(3.5));
        assert_eq!(eval_ok("6 / 3"), Value::Float(2.0));
        assert_eq!(eval_ok("n + x"), Value::Float(9.5));
        assert_eq!(eval_ok("-7 % 3"), Value::Int(2));
        assert_eq!(eval_ok("7 % -3"), Value::Int(-2));
        assert_eq!(eval_ok("-n"), Value::Int(-7));
    }

    #[test]
    fn concatenation() {
        assert_eq!(eval_ok("'hi ' + name"), Value::from("hi bob"));
        assert_eq!(eval_ok("seq + [4]"), Value::from(vec![1, 2, 3, 4]));
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval_ok("n == 7"), Value::Bool(true));
        assert_eq!(eval_ok("n != 7"), Value::Bool(false));
        assert_eq!(eval_ok("2 == 2.0"), Value::Bool(true));
        assert_eq!(eval_ok("x < n"), Value::Bool(true));
        assert_eq!(eval_ok("n >= 8"), Value::Bool(false));
        assert_eq!(eval_ok("'abc' < 'abd'"), Value::Bool(true));
        assert_eq!(eval_ok("0 <= n < 10"), Value::Bool(true));
        assert_eq!(eval_ok("0 <= n < 5"), Value::Bool(false));
        assert_eq!(eval_ok("name == 'bob'"), Value::Bool(true));
        assert_eq!(eval_ok("'1' == 1"), Value::Bool(false));
        assert_eq!(eval_ok("seq == [1, 2.0, 3]"), Value::Bool(true));
    }

    #[test]
    fn large_integers_compare_exactly() {
        let ctx = Context::new().with("a", i64::MAX).with("b", i64::MAX - 1);
        assert_eq!(eval("a == b", &ctx).unwrap(), Value::Bool(false));
        assert_eq!(eval("a > b", &ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn boolean_logic() {
        assert_eq!(eval_ok("n > 0 and name"), Value::from("bob"));
        assert_eq!(eval_ok("empty or 0"), Value::Int(0));
        assert_eq!(eval_ok("0 and name"), Value::Int(0));
        assert_eq!(eval_ok("name or 'anon'"), Value::from("bob"));
        assert_eq!(eval_ok("not empty"), Value::Bool(true));
        assert_eq!(eval_ok("not not n"), Value::Bool(true));
    }

    #[test]
    fn boolean_operators_short_circuit() {
        let ctx = Context::new().with("flag", false);
        assert_eq!(eval("flag and missing", &ctx).unwrap(), Value::Bool(false));
        assert_eq!(eval("not flag or missing", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(
            eval("flag or missing", &ctx),
            Err(RenderError::UndefinedVariable("missing".into()))
        );
    }

    #[test]
    fn membership() {
        assert_eq!(eval_ok("2 in seq"), Value::Bool(true));
        assert_eq!(eval_ok("5 not in seq"), Value::Bool(true));
        assert_eq!(eval_ok("'ob' in name"), Value::Bool(true));
        assert_eq!(
            eval("1 in n", &Context::new().with("n", 1)),
            Err(RenderError::NotContainer("int"))
        );
    }

    #[test]
    fn indexing() {
        assert_eq!(eval_ok("seq[0]"), Value::Int(1));
        assert_eq!(eval_ok("seq[-1]"), Value::Int(3));
        assert_eq!(eval_ok("name[1]"), Value::from("o"));
        assert_eq!(eval_ok("[[1, 2], [3]][0][1]"), Value::Int(2));
        assert_eq!(
            eval("xs[3]", &Context::new().with("xs", vec![1, 2, 3])),
            Err(RenderError::IndexOutOfRange { index: 3, len: 3 })
        );
        assert_eq!(
            eval("xs['a']", &Context::new().with("xs", vec![1])),
            Err(RenderError::NotIndexable {
                target: "array",
                index: "string"
            })
        );
    }

    fn pane(id: &str, cwd: &str, active: bool) -> Value {
        [
            ("id", Value::from(id)),
            ("cwd", Value::from(cwd)),
            ("active", Value::from(active)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn map_fields_and_keys() {
        let ctx = Context::new()
            .with("pane", pane("%1", "/srv", true))
            .with("panes", vec![pane("%0", "/", false), pane("%1", "/srv", true)]);
        assert_eq!(eval("pane.cwd", &ctx).unwrap(), Value::from("/srv"));
        assert_eq!(eval("pane['id']", &ctx).unwrap(), Value::from("%1"));
        assert_eq!(eval("panes[-1].active", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval("'cwd' in pane", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval("1 in pane", &ctx).unwrap(), Value::Bool(false));
        assert_eq!(eval("pane == panes[1]", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval("pane != panes[0]", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(
            eval("pane.history", &ctx),
            Err(RenderError::NoField {
                target: "map",
                field: "history".into()
            })
        );
        assert_eq!(
            eval("panes.cwd", &ctx),
            Err(RenderError::NoField {
                target: "array",
                field: "cwd".into()
            })
        );
        assert_eq!(
            eval("pane[0]", &ctx),
            Err(RenderError::NotIndexable {
                target: "map",
                index: "int"
            })
        );
    }

    #[test]
    fn maps_iterate_by_sorted_key() {
        let ctx = Context::new().with("pane", pane("%1", "/srv", true));
        let nodes = crate::parser::parse("{% for k in pane %}{{ k }}={{ pane[k] }};{% endfor %}").unwrap();
        let mut out = String::new();
        Evaluator::new(&ctx).render(&nodes, &mut out).unwrap();
        assert_eq!(out, "active=True;cwd=/srv;id=%1;");
    }

    #[test]
    fn or_supplies_a_default() {
        let ctx = Context::new().with("user", "").with("shell", "zsh");
        assert_eq!(eval("user or 'anon'", &ctx).unwrap(), Value::from("anon"));
        assert_eq!(eval("shell or 'sh'", &ctx).unwrap(), Value::from("zsh"));
        assert_eq!(eval("shell and user", &ctx).unwrap(), Value::from(""));
        assert_eq!(eval("not (shell and user)", &ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn type_errors() {
        let ctx = Context::new().with("s", "a").with("n", 1).with("b", true);
        assert_eq!(
            eval("s - n", &ctx),
            Err(RenderError::UnsupportedOperand {
                op: "-",
                left: "string",
                right: "int"
            })
        );
        assert_eq!(
            eval("s < n", &ctx),
            Err(RenderError::NotComparable {
                left: "string",
                right: "int"
            })
        );
        assert_eq!(
            eval("-s", &ctx),
            Err(RenderError::UnsupportedUnary {
                op: "-",
                operand: "string"
            })
        );
        assert!(matches!(eval("b + n", &ctx), Err(RenderError::UnsupportedOperand { .. })));
    }

    #[test]
    fn division_by_zero_and_overflow() {
        let ctx = Context::new().with("big", i64::MAX);
        assert_eq!(eval("1 / 0", &ctx), Err(RenderError::DivisionByZero));
        assert_eq!(eval("1.5 % 0.0", &ctx), Err(RenderError::DivisionByZero));
        assert_eq!(eval("big + 1", &ctx), Err(RenderError::Overflow("+")));
    }

    #[test]
    fn undefined_variable() {
        assert_eq!(
            eval("missing + 1", &Context::new()),
            Err(RenderError::UndefinedVariable("missing".into()))
        );
    }

    #[test]
    fn loop_scope_shadows_and_restores() {
        let ctx = Context::new().with("x", "outer").with("xs", vec!["a", "b"]);
        let nodes = crate::parser::parse("{% for x in xs %}{{ x }}{% endfor %}={{ x }}").unwrap();
        let mut out = String::new();
        Evaluator::new(&ctx).render(&nodes, &mut out).unwrap();
        assert_eq!(out, "ab=outer");
        assert_eq!(ctx.get("x"), Some(&Value::from("outer")));
    }

    #[test]
    fn string_iterates_by_char() {
        let ctx = Context::new().with("word", "héy");
        let nodes = crate::parser::parse("{% for c in word %}<{{ c }}>{% endfor %}").unwrap();
        let mut out = String::new();
        Evaluator::new(&ctx).render(&nodes, &mut out).unwrap();
        assert_eq!(out, "<h><é><y>");
    }

    #[test]
    fn iterating_a_number_fails() {
        let ctx = Context::new().with("n", 3);
        let nodes = crate::parser::parse("{% for i in n %}{% endfor %}").unwrap();
        let mut out = String::new();
        assert_eq!(
            Evaluator::new(&ctx).render(&nodes, &mut out),
            Err(RenderError::NotIterable("int"))
        );
    }
}
