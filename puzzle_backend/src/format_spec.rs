//! The standard format-spec mini-language, applied to [`Value`]s.
//!
//! Used in two places:
//! 1. Interpolation in scripts: `{piece:param;:.2f}` formats the param's value with `.2f`
//!    (see [`crate::parse::format`]).
//! 2. The display format of a param's input representation (see [`crate::param::ParamConfig::format`]).
//!
//! Grammar: `[[fill]align][sign][#][0][width][grouping][.precision][type]` where
//! - `align` is one of `<`, `>`, `^`, `=`
//! - `sign` is one of `+`, `-`, ` `
//! - `grouping` is `,` or `_`
//! - `type` is one of `b d o x X e E f F g G % s n`
//!
//! Numbers are right-aligned and text left-aligned by default. Arrays are formatted element-wise.
//!
//! ```
//! use puzzle_backend::format_spec::FormatSpec;
//! use puzzle_backend::value::Value;
//!
//! let spec = FormatSpec::parse(".2f").unwrap();
//! assert_eq!(spec.apply(&Value::Float(5.0)).unwrap(), "5.00");
//! assert_eq!(FormatSpec::parse(">6").unwrap().apply(&Value::Int(42)).unwrap(), "    42");
//! assert_eq!(FormatSpec::parse(".3e").unwrap().apply(&Value::Float(12345.678)).unwrap(), "1.235e+04");
//! ```

use crate::error::{Error, Result};
use crate::value::{fmt_float, Value};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Align {
    Left,
    Right,
    Center,
    /// Padding goes between the sign and the digits.
    AfterSign,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sign {
    /// Only negative numbers carry a sign (default)
    Minus,
    Plus,
    Space,
}

/// A parsed format specifier.
#[derive(Clone, Debug, PartialEq)]
pub struct FormatSpec {
    pub fill: char,
    pub align: Option<Align>,
    pub sign: Sign,
    pub alternate: bool,
    pub zero: bool,
    pub width: usize,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub ty: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: Sign::Minus,
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            ty: None,
        }
    }
}

fn align_of(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    }
}

const TYPES: &str = "bdoxXeEfFgGsn%";

impl FormatSpec {
    /// Parses a specifier such as `.2f`, `>8`, `+,d` or `*^12.3e`.
    ///
    /// An empty string is valid and formats values with their default representation.
    pub fn parse(spec: &str) -> Result<Self> {
        let err = || Error::Format {
            spec: spec.to_string(),
        };
        let chars: Vec<char> = spec.chars().collect();
        let len = chars.len();
        let mut out = FormatSpec::default();
        let mut i = 0;

        if len >= 2 && align_of(chars[1]).is_some() {
            out.fill = chars[0];
            out.align = align_of(chars[1]);
            i = 2;
        } else if len >= 1 && align_of(chars[0]).is_some() {
            out.align = align_of(chars[0]);
            i = 1;
        }
        if i < len && matches!(chars[i], '+' | ' ' | '-') {
            out.sign = match chars[i] {
                '+' => Sign::Plus,
                ' ' => Sign::Space,
                _ => Sign::Minus,
            };
            i += 1;
        }
        if i < len && chars[i] == '#' {
            out.alternate = true;
            i += 1;
        }
        if i < len && chars[i] == '0' {
            out.zero = true;
            i += 1;
        }
        let width_start = i;
        while i < len && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i > width_start {
            let digits: String = chars[width_start..i].iter().collect();
            out.width = digits.parse().map_err(|_| err())?;
        }
        if i < len && (chars[i] == ',' || chars[i] == '_') {
            out.grouping = Some(chars[i]);
            i += 1;
        }
        if i < len && chars[i] == '.' {
            i += 1;
            let prec_start = i;
            while i < len && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i == prec_start {
                return Err(err());
            }
            let digits: String = chars[prec_start..i].iter().collect();
            out.precision = Some(digits.parse().map_err(|_| err())?);
        }
        if i < len {
            if !TYPES.contains(chars[i]) {
                return Err(err());
            }
            out.ty = Some(chars[i]);
            i += 1;
        }
        if i != len {
            return Err(err());
        }
        Ok(out)
    }

    fn spec_error(&self) -> Error {
        Error::Format {
            spec: self.to_string(),
        }
    }

    /// Formats a value according to this specifier.
    pub fn apply(&self, value: &Value) -> Result<String> {
        if self.ty == Some('s') {
            return self.format_text(&value.to_string());
        }
        match value {
            Value::Text(s) => self.format_text(s),
            Value::Int(v) => self.format_int(*v),
            Value::Bool(b) => match self.ty {
                None => self.format_text(&b.to_string()),
                Some(_) => self.format_int(*b as i64),
            },
            Value::Float(v) => self.format_float(*v),
            Value::Array(a) => {
                let inner = FormatSpec {
                    width: 0,
                    fill: ' ',
                    align: None,
                    zero: false,
                    ..self.clone()
                };
                let items = a
                    .iter()
                    .map(|x| inner.format_float(*x))
                    .collect::<Result<Vec<String>>>()?;
                Ok(self.pad(&format!("[{}]", items.join(", ")), Align::Left))
            }
        }
    }

    fn format_text(&self, s: &str) -> Result<String> {
        if !matches!(self.ty, None | Some('s')) {
            return Err(self.spec_error());
        }
        let truncated: String = match self.precision {
            Some(p) => s.chars().take(p).collect(),
            None => s.to_string(),
        };
        Ok(self.pad(&truncated, Align::Left))
    }

    fn format_int(&self, v: i64) -> Result<String> {
        let (prefix, digits) = match self.ty {
            None | Some('d') | Some('n') => {
                if self.precision.is_some() {
                    return Err(self.spec_error());
                }
                ("", group(&v.unsigned_abs().to_string(), self.grouping))
            }
            Some('b') => ("0b", format!("{:b}", v.unsigned_abs())),
            Some('o') => ("0o", format!("{:o}", v.unsigned_abs())),
            Some('x') => ("0x", format!("{:x}", v.unsigned_abs())),
            Some('X') => ("0X", format!("{:X}", v.unsigned_abs())),
            Some(_) => return self.format_float(v as f64),
        };
        let prefix = if self.alternate { prefix } else { "" };
        Ok(self.pad_numeric(self.sign_str(v < 0), prefix, &digits))
    }

    fn format_float(&self, v: f64) -> Result<String> {
        let upper = matches!(self.ty, Some('E') | Some('F') | Some('G'));
        let body = if v.is_nan() {
            "nan".to_string()
        } else if v.is_infinite() {
            "inf".to_string()
        } else {
            let a = v.abs();
            match self.ty {
                None => match self.precision {
                    None => fmt_float(a),
                    Some(p) => general(a, Some(p), self.alternate, false),
                },
                Some('f') | Some('F') => {
                    let s = format!("{:.*}", self.precision.unwrap_or(6), a);
                    group_fixed(&s, self.grouping)
                }
                Some('e') | Some('E') => scientific(a, self.precision.unwrap_or(6)),
                Some('g') | Some('G') | Some('n') => {
                    general(a, self.precision, self.alternate, false)
                }
                Some('%') => format!("{:.*}%", self.precision.unwrap_or(6), a * 100.),
                Some(_) => return Err(self.spec_error()),
            }
        };
        let body = if upper { body.to_uppercase() } else { body };
        let negative = v.is_sign_negative() && !v.is_nan() && v != 0.;
        Ok(self.pad_numeric(self.sign_str(negative), "", &body))
    }

    fn sign_str(&self, negative: bool) -> &'static str {
        if negative {
            return "-";
        }
        match self.sign {
            Sign::Plus => "+",
            Sign::Space => " ",
            Sign::Minus => "",
        }
    }

    fn pad_numeric(&self, sign: &str, prefix: &str, body: &str) -> String {
        let (fill, align) = match (self.align, self.zero) {
            (None, true) => ('0', Align::AfterSign),
            (Some(a), _) => (self.fill, a),
            (None, false) => (self.fill, Align::Right),
        };
        let len = sign.chars().count() + prefix.chars().count() + body.chars().count();
        if self.width <= len {
            return format!("{}{}{}", sign, prefix, body);
        }
        let n = self.width - len;
        let fills = |k: usize| std::iter::repeat(fill).take(k).collect::<String>();
        match align {
            Align::AfterSign => format!("{}{}{}{}", sign, prefix, fills(n), body),
            Align::Left => format!("{}{}{}{}", sign, prefix, body, fills(n)),
            Align::Right => format!("{}{}{}{}", fills(n), sign, prefix, body),
            Align::Center => format!(
                "{}{}{}{}{}",
                fills(n / 2),
                sign,
                prefix,
                body,
                fills(n - n / 2)
            ),
        }
    }

    fn pad(&self, s: &str, default: Align) -> String {
        let len = s.chars().count();
        if self.width <= len {
            return s.to_string();
        }
        let n = self.width - len;
        let fill = if self.zero && self.align.is_none() { '0' } else { self.fill };
        let fills = |k: usize| std::iter::repeat(fill).take(k).collect::<String>();
        match self.align.unwrap_or(default) {
            Align::Left => format!("{}{}", s, fills(n)),
            Align::Right | Align::AfterSign => format!("{}{}", fills(n), s),
            Align::Center => format!("{}{}{}", fills(n / 2), s, fills(n - n / 2)),
        }
    }
}

impl std::fmt::Display for FormatSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(align) = self.align {
            let a = match align {
                Align::Left => '<',
                Align::Right => '>',
                Align::Center => '^',
                Align::AfterSign => '=',
            };
            if self.fill != ' ' {
                write!(f, "{}", self.fill)?;
            }
            write!(f, "{}", a)?;
        }
        match self.sign {
            Sign::Plus => write!(f, "+")?,
            Sign::Space => write!(f, " ")?,
            Sign::Minus => {}
        }
        if self.alternate {
            write!(f, "#")?;
        }
        if self.zero {
            write!(f, "0")?;
        }
        if self.width > 0 {
            write!(f, "{}", self.width)?;
        }
        if let Some(g) = self.grouping {
            write!(f, "{}", g)?;
        }
        if let Some(p) = self.precision {
            write!(f, ".{}", p)?;
        }
        if let Some(t) = self.ty {
            write!(f, "{}", t)?;
        }
        Ok(())
    }
}

/// Formats `value` with a specifier string. Shortcut for `FormatSpec::parse(spec)?.apply(value)`.
pub fn format_value(value: &Value, spec: &str) -> Result<String> {
    FormatSpec::parse(spec)?.apply(value)
}

// Inserts a separator every three digits of a plain digit string
fn group(digits: &str, sep: Option<char>) -> String {
    let Some(sep) = sep else {
        return digits.to_string();
    };
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::new();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn group_fixed(s: &str, sep: Option<char>) -> String {
    match s.split_once('.') {
        Some((int_part, frac)) => format!("{}.{}", group(int_part, sep), frac),
        None => group(s, sep),
    }
}

// Exponent always carries a sign and at least two digits: 1.5e+03
fn scientific(a: f64, precision: usize) -> String {
    let s = format!("{:.*e}", precision, a);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => s,
    }
}

fn strip_zeros(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

fn general(a: f64, precision: Option<usize>, alternate: bool, _upper: bool) -> String {
    let p = match precision {
        None => 6,
        Some(0) => 1,
        Some(p) => p,
    };
    let exp = if a == 0. {
        0
    } else {
        let s = format!("{:.*e}", p - 1, a);
        s.split_once('e')
            .and_then(|(_, e)| e.parse::<i32>().ok())
            .unwrap_or(0)
    };
    if -4 <= exp && exp < p as i32 {
        let s = format!("{:.*}", (p as i32 - 1 - exp) as usize, a);
        if alternate {
            s
        } else {
            strip_zeros(&s)
        }
    } else {
        let s = scientific(a, p - 1);
        if alternate {
            return s;
        }
        match s.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{}", strip_zeros(mantissa), exp),
            None => s,
        }
    }
}
