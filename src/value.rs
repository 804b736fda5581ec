use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<Value>),
    /// Record-like values such as a tmux pane; keys are kept sorted.
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Nested form used inside arrays and maps: strings are quoted.
    fn fmt_item(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => fmt_quoted(s, f),
            other => write!(f, "{other}"),
        }
    }
}

fn fmt_quoted(s: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    write!(f, "{quote}")?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => write!(f, "\\{c}")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "{quote}")
}

/// Shortest round-trip digits, switching to exponent form outside
/// `[1e-4, 1e16)` with a signed two-digit exponent (`1e+20`, `1.5e-05`).
fn fmt_float(x: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if x.is_nan() {
        return f.write_str("nan");
    }
    if x.is_infinite() {
        return f.write_str(if x > 0.0 { "inf" } else { "-inf" });
    }
    let magnitude = x.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let sci = format!("{x:e}");
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return write!(f, "{mantissa}e{sign}{digits:0>2}");
    }
    if x.fract() == 0.0 {
        write!(f, "{x:.1}")
    } else {
        write!(f, "{x}")
    }
}

/// Canonical string form used by `{{ ... }}`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => fmt_float(*x, f),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_item(f)?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt_quoted(key, f)?;
                    f.write_str(": ")?;
                    value.fmt_item(f)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

macro_rules! int_into_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(i: $ty) -> Self {
                Value::Int(i64::from(i))
            }
        })*
    };
}

int_into_value!(i8, i16, i32, i64, u8, u16, u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(items: &[T]) -> Self {
        Value::Array(items.iter().cloned().map(Into::into).collect())
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
    fn from(entries: BTreeMap<String, V>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<V: Into<Value>> From<HashMap<String, V>> for Value {
    fn from(entries: HashMap<String, V>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Collects `(key, value)` pairs into a [`Value::Map`].
impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Named values supplied to a single render call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Context {
    vars: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.vars.insert(name.into(), value.into())
    }

    /// Builder-style [`Context::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn canonical_strings() {
        assert_eq!(Value::from("bob").to_string(), "bob");
        assert_eq!(Value::from(-42).to_string(), "-42");
        assert_eq!(Value::from(2.0).to_string(), "2.0");
        assert_eq!(Value::from(3.5).to_string(), "3.5");
        assert_eq!(Value::from(true).to_string(), "True");
        assert_eq!(Value::from(false).to_string(), "False");
        assert_eq!(
            Value::Array(vec![1.into(), "a".into(), vec![false].into()]).to_string(),
            "[1, 'a', [False]]"
        );
        assert_eq!(Value::Array(vec![]).to_string(), "[]");
    }

    #[test]
    fn floats_switch_to_exponent_form_at_the_edges() {
        assert_eq!(Value::from(1e20).to_string(), "1e+20");
        assert_eq!(Value::from(1e16).to_string(), "1e+16");
        assert_eq!(Value::from(9999999999999998.0).to_string(), "9999999999999998.0");
        assert_eq!(Value::from(-2.5e-7).to_string(), "-2.5e-07");
        assert_eq!(Value::from(0.0001).to_string(), "0.0001");
        assert_eq!(Value::from(0.00001).to_string(), "1e-05");
        assert_eq!(Value::from(1.5e300).to_string(), "1.5e+300");
        assert_eq!(Value::from(0.0).to_string(), "0.0");
        assert_eq!(Value::from(f64::NAN).to_string(), "nan");
        assert_eq!(Value::from(f64::NEG_INFINITY).to_string(), "-inf");
    }

    #[test]
    fn nested_strings_pick_a_quote_and_escape() {
        assert_eq!(
            Value::from(vec!["it's", "say \"hi\"", "both ' \"", "tab\t"]).to_string(),
            r#"["it's", 'say "hi"', 'both \' "', 'tab\t']"#
        );
    }

    #[test]
    fn maps_render_sorted_by_key() {
        let pane: Value = [("id", Value::from("%1")), ("active", Value::from(true))]
            .into_iter()
            .collect();
        assert_eq!(pane.to_string(), "{'active': True, 'id': '%1'}");
        assert_eq!(pane.type_name(), "map");
        assert!(pane.is_truthy());
        assert!(!Value::Map(BTreeMap::new()).is_truthy());
    }

    #[test]
    fn borrowed_conversions() {
        let shell = String::from("zsh");
        assert_eq!(Value::from(&shell), Value::from("zsh"));

        let aliases = vec![String::from("ll"), String::from("gs")];
        assert_eq!(Value::from(aliases.as_slice()), Value::from(vec!["ll", "gs"]));

        let counts: &[u8] = &[1, 2];
        assert_eq!(Value::from(counts), Value::from(vec![1, 2]));

        let mut env = HashMap::new();
        env.insert("HOME".to_string(), "/root");
        let mut expected = BTreeMap::new();
        expected.insert("HOME".to_string(), Value::from("/root"));
        assert_eq!(Value::from(env), Value::Map(expected));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from(0.0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Array(vec![]).is_truthy());
        assert!(!Value::from(false).is_truthy());
        assert!(Value::from(-1).is_truthy());
        assert!(Value::from(" ").is_truthy());
        assert!(Value::from(vec![0]).is_truthy());
    }

    #[test]
    fn context_builders_agree() {
        let built = Context::new().with("shell", "zsh").with("lines", 200);
        let collected: Context = [("shell", Value::from("zsh")), ("lines", Value::from(200))]
            .into_iter()
            .collect();
        assert_eq!(built, collected);
        assert_eq!(built.len(), 2);
        assert_eq!(built.get("shell"), Some(&Value::from("zsh")));
        assert_eq!(built.get("missing"), None);
    }

    #[test]
    fn insert_returns_previous_value() {
        let mut ctx = Context::new();
        assert_eq!(ctx.insert("x", 1), None);
        assert_eq!(ctx.insert("x", 2), Some(Value::Int(1)));
    }
}
