//! The dynamically tagged value carried by every param.
//!
//! A [`Value`] is what setters receive, what getters return and what the command interpreter
//! reads and writes. Params never store a value of the "wrong" variant: every write goes through
//! the coercion of the param's [`ParamKind`](crate::param::ParamKind).

use std::fmt;

use ndarray::Array1;

/// A single param value.
///
/// # Display
///
/// Values render the way a user would type them back into a script:
///
/// ```
/// use puzzle_backend::value::Value;
/// use ndarray::array;
///
/// assert_eq!(Value::Int(5).to_string(), "5");
/// assert_eq!(Value::Float(5.0).to_string(), "5.0");
/// assert_eq!(Value::Float(0.25).to_string(), "0.25");
/// assert_eq!(Value::Bool(true).to_string(), "true");
/// assert_eq!(Value::Array(array![1., 2.5]).to_string(), "[1.0, 2.5]");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Array(Array1<f64>),
}

impl Value {
    /// Short variant name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bool(_) => "bool",
            Value::Array(_) => "array",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Numeric view of the value. Ints and bools widen to `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(b) => Some(if *b { 1. } else { 0. }),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array1<f64>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Truthiness used by "break" params and checkboxes: non-zero numbers, non-empty text and arrays.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.,
            Value::Text(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::Array(a) => !a.is_empty(),
        }
    }
}

/// Formats a float the way it reads back: shortest round-trip digits, with `.0` kept for integral values.
/// Exponents carry a sign and at least two digits (`1e+16`, `1e-07`).
pub(crate) fn fmt_float(v: f64) -> String {
    let s = format!("{:?}", v);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => s,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", fmt_float(*v)),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Array(a) => {
                let items = a
                    .iter()
                    .map(|x| fmt_float(*x))
                    .collect::<Vec<String>>()
                    .join(", ");
                write!(f, "[{}]", items)
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
impl From<Array1<f64>> for Value {
    fn from(v: Array1<f64>) -> Self {
        Value::Array(v)
    }
}
impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Array(Array1::from(v))
    }
}
