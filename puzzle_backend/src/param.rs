//! # Params: typed value cells
//!
//! A [`Param`] holds one authoritative, type-coerced value and reconciles three ways of writing it:
//!
//! - **user edits** of its input representation ([`Param::input_edit`]),
//! - **explicit sets** ([`Param::set_value`]), which run the registered setter if there is one,
//! - **getter refreshes** ([`Param::get_value`]), which run the registered getter if there is one.
//!
//! ## Value flow of `set_value`
//!
//! 1. The supplied value (or, if none, the current input) is coerced to the param's [`ParamKind`] and
//!    silently written to the input representation.
//! 2. With a setter: the param is highlighted as busy and the setter runs. The new value is the
//!    setter's return value if it returned one, otherwise the getter's result if there is a getter,
//!    otherwise the value that was set. The highlight is released on every exit path, including errors.
//! 3. The new value is coerced, stored, written to the input representation, and `changed` fires
//!    exactly once.
//!
//! `get_value` with a getter runs it and goes through step 3. Without a getter it is a pure read.
//!
//! ## Threads
//!
//! Params live on the thread that owns the [`EventLoop`](crate::event_loop::EventLoop). The threaded
//! variants [`Param::set_value_threaded`] and [`Param::get_value_threaded`] run the setter/getter on
//! a [`WorkerPool`] thread and post the resulting state change back to the owner thread.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use puzzle_backend::param::{Param, ParamConfig};
//! use puzzle_backend::value::Value;
//!
//! let power = Param::new("power", ParamConfig::float(0.));
//! power.attach_setter(|v| Ok(Some(Value::Float(v.as_float().unwrap_or(0.) * 0.5))));
//! assert!(power.is_highlighted());
//!
//! assert_eq!(power.set(4).unwrap(), Value::Float(2.0));
//! assert_eq!(power.value(), Some(Value::Float(2.0)));
//! assert_eq!(power.input_text(), "2.0");
//! assert!(!power.is_highlighted());
//! ```

use std::sync::{Arc, Weak};

use ndarray::Array1;
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::event_loop::EventLoopHandle;
use crate::format_spec::FormatSpec;
use crate::signal::Signal;
use crate::threads::{Worker, WorkerHandle, WorkerPool};
use crate::value::Value;

/// Default spin box range for numeric params.
pub const DEFAULT_MIN: f64 = -1e9;
pub const DEFAULT_MAX: f64 = 1e9;

/// The closed set of param types. Each variant has a fixed coercion, see [`ParamKind::coerce`].
#[derive(Clone, Debug, PartialEq)]
pub enum ParamKind {
    Int { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Text,
    Bool,
    Array,
    Enum { choices: Vec<String> },
}

impl ParamKind {
    pub fn int() -> Self {
        ParamKind::Int {
            min: DEFAULT_MIN as i64,
            max: DEFAULT_MAX as i64,
        }
    }

    pub fn float() -> Self {
        ParamKind::Float {
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParamKind::Int { .. } => "int",
            ParamKind::Float { .. } => "float",
            ParamKind::Text => "text",
            ParamKind::Bool => "bool",
            ParamKind::Array => "array",
            ParamKind::Enum { .. } => "enum",
        }
    }

    /// The value an empty input representation stands for.
    pub fn default_value(&self) -> Value {
        match self {
            ParamKind::Int { min, max } => Value::Int(0.clamp(*min, *max)),
            ParamKind::Float { min, max } => Value::Float(0f64.clamp(*min, *max)),
            ParamKind::Text => Value::Text(String::new()),
            ParamKind::Bool => Value::Bool(false),
            ParamKind::Array => Value::Array(Array1::zeros(0)),
            ParamKind::Enum { choices } => {
                Value::Text(choices.first().cloned().unwrap_or_default())
            }
        }
    }

    /// Converts `value` to this kind.
    ///
    /// # Rules
    ///
    /// - `Int`: ints are clamped; finite floats are truncated toward zero; bools are 0/1; text is
    ///   trimmed and parsed as an integer, or as a float that is then truncated.
    /// - `Float`: any number or numeric text, clamped.
    /// - `Text`: the display form of any value.
    /// - `Bool`: bools, numbers (non-zero is true), and `true/false/1/0/yes/no/on/off` in any case.
    /// - `Array`: arrays, a single number, or text such as `[1, 2.5]` or `1, 2.5`.
    /// - `Enum`: one of the choices, or an integer index into them.
    pub fn coerce(&self, value: &Value) -> Result<Value> {
        let fail = || Error::coercion(value, self.name());
        match self {
            ParamKind::Int { min, max } => {
                let v = match value {
                    Value::Int(v) => *v,
                    Value::Bool(b) => *b as i64,
                    Value::Float(f) if f.is_finite() => f.trunc() as i64,
                    Value::Text(s) => {
                        let s = s.trim();
                        match s.parse::<i64>() {
                            Ok(v) => v,
                            Err(_) => match s.parse::<f64>() {
                                Ok(f) if f.is_finite() => f.trunc() as i64,
                                _ => return Err(fail()),
                            },
                        }
                    }
                    _ => return Err(fail()),
                };
                Ok(Value::Int(v.clamp(*min, *max)))
            }
            ParamKind::Float { min, max } => {
                let v = match value {
                    Value::Text(s) => s.trim().parse::<f64>().map_err(|_| fail())?,
                    other => other.as_float().ok_or_else(fail)?,
                };
                if v.is_nan() {
                    return Ok(Value::Float(v));
                }
                Ok(Value::Float(v.clamp(*min, *max)))
            }
            ParamKind::Text => Ok(Value::Text(value.to_string())),
            ParamKind::Bool => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::Int(v) => Ok(Value::Bool(*v != 0)),
                Value::Float(f) => Ok(Value::Bool(*f != 0.)),
                Value::Text(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                    "false" | "0" | "no" | "off" | "" => Ok(Value::Bool(false)),
                    _ => Err(fail()),
                },
                Value::Array(_) => Err(fail()),
            },
            ParamKind::Array => match value {
                Value::Array(a) => Ok(Value::Array(a.clone())),
                Value::Text(s) => {
                    let inner = s.trim().trim_start_matches('[').trim_end_matches(']').trim();
                    if inner.is_empty() {
                        return Ok(Value::Array(Array1::zeros(0)));
                    }
                    let items = inner
                        .split(',')
                        .map(|item| item.trim().parse::<f64>().map_err(|_| fail()))
                        .collect::<Result<Vec<f64>>>()?;
                    Ok(Value::Array(Array1::from(items)))
                }
                other => {
                    let v = other.as_float().ok_or_else(fail)?;
                    Ok(Value::Array(Array1::from(vec![v])))
                }
            },
            ParamKind::Enum { choices } => match value {
                Value::Text(s) if choices.iter().any(|c| c == s) => Ok(Value::Text(s.clone())),
                Value::Int(i) if *i >= 0 && (*i as usize) < choices.len() => {
                    Ok(Value::Text(choices[*i as usize].clone()))
                }
                _ => Err(fail()),
            },
        }
    }
}

/// Everything needed to define a param, see [`crate::piece::HasParams::define_param`].
///
/// ```
/// use puzzle_backend::param::{ParamConfig, ParamKind};
///
/// let config = ParamConfig::float(1.5).range(0., 10.).format(".2f").unwrap().visible(false);
/// assert_eq!(config.kind(), &ParamKind::Float { min: 0., max: 10. });
/// ```
#[derive(Clone, Debug)]
pub struct ParamConfig {
    kind: ParamKind,
    default: Option<Value>,
    visible: bool,
    format: Option<FormatSpec>,
}

impl ParamConfig {
    pub fn new(kind: ParamKind, default: Option<Value>) -> Self {
        Self {
            kind,
            default,
            visible: true,
            format: None,
        }
    }

    pub fn int(default: i64) -> Self {
        Self::new(ParamKind::int(), Some(Value::Int(default)))
    }

    pub fn float(default: f64) -> Self {
        Self::new(ParamKind::float(), Some(Value::Float(default)))
    }

    pub fn text(default: &str) -> Self {
        Self::new(ParamKind::Text, Some(Value::Text(default.to_string())))
    }

    pub fn checkbox(default: bool) -> Self {
        Self::new(ParamKind::Bool, Some(Value::Bool(default)))
    }

    pub fn array(default: Array1<f64>) -> Self {
        Self::new(ParamKind::Array, Some(Value::Array(default)))
    }

    /// A choice among `choices`, starting at `default`.
    pub fn dropdown(default: &str, choices: &[&str]) -> Self {
        let choices = choices.iter().map(|c| c.to_string()).collect();
        Self::new(
            ParamKind::Enum { choices },
            Some(Value::Text(default.to_string())),
        )
    }

    /// A param without a default value. Usually paired with a getter.
    pub fn readout(kind: ParamKind) -> Self {
        Self::new(kind, None)
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Format specifier for the input representation, e.g. `.3f`.
    pub fn format(mut self, spec: &str) -> Result<Self> {
        self.format = Some(FormatSpec::parse(spec)?);
        Ok(self)
    }

    /// Limits of a numeric param. Ignored for other kinds.
    pub fn range(mut self, min: f64, max: f64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        self.kind = match self.kind {
            ParamKind::Int { .. } => ParamKind::Int {
                min: min.ceil() as i64,
                max: max.floor() as i64,
            },
            ParamKind::Float { .. } => ParamKind::Float { min, max },
            other => other,
        };
        self
    }

    pub fn kind(&self) -> &ParamKind {
        &self.kind
    }
}

pub type Setter = Arc<dyn Fn(Value) -> anyhow::Result<Option<Value>> + Send + Sync>;
pub type Getter = Arc<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;

#[derive(Default)]
struct ParamState {
    value: Option<Value>,
    input: Option<Value>,
    highlighted: bool,
}

/// A named, typed value cell with optional setter and getter callbacks.
///
/// Always handled as `Arc<Param>`; Pieces, scripts and observers share the same cell.
pub struct Param {
    name: String,
    kind: ParamKind,
    visible: bool,
    format: Option<FormatSpec>,
    state: Mutex<ParamState>,
    setter: RwLock<Option<Setter>>,
    getter: RwLock<Option<Getter>>,
    changed: Signal<Value>,
    parent: Option<Arc<Param>>,
}

// Highlights a param for the duration of a setter call.
struct BusyGuard<'a> {
    param: &'a Param,
}

impl<'a> BusyGuard<'a> {
    fn new(param: &'a Param) -> Self {
        param.set_highlighted(true);
        Self { param }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.param.set_highlighted(false);
    }
}

// Same as `BusyGuard`, but released from a worker thread by posting to the owner thread.
struct RemoteBusyGuard {
    param: Arc<Param>,
    event_loop: EventLoopHandle,
}

impl Drop for RemoteBusyGuard {
    fn drop(&mut self) {
        let param = self.param.clone();
        if self
            .event_loop
            .post(move || param.set_highlighted(false))
            .is_err()
        {
            log::debug!("event loop closed before '{}' was released", self.param.name);
        }
    }
}

impl Param {
    pub fn new(name: &str, config: ParamConfig) -> Arc<Self> {
        let ParamConfig {
            kind,
            default,
            visible,
            format,
        } = config;
        let value = default.and_then(|v| match kind.coerce(&v) {
            Ok(v) => Some(v),
            Err(err) => {
                log::warn!("default for '{}' dropped: {}", name, err);
                None
            }
        });
        Arc::new(Self {
            name: name.to_string(),
            kind,
            visible,
            format,
            state: Mutex::new(ParamState {
                highlighted: value.is_none(),
                input: value.clone(),
                value,
            }),
            setter: RwLock::new(None),
            getter: RwLock::new(None),
            changed: Signal::new(),
            parent: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ParamKind {
        &self.kind
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn format_spec(&self) -> Option<&FormatSpec> {
        self.format.as_ref()
    }

    /// Fires with the new value after every `set_value`, getter refresh, or adopted user edit.
    pub fn changed(&self) -> &Signal<Value> {
        &self.changed
    }

    /// Registers the setter. The cached value is cleared until the setter has run once.
    pub fn attach_setter<F>(&self, setter: F)
    where
        F: Fn(Value) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        if let Some(parent) = &self.parent {
            return parent.attach_setter(setter);
        }
        *self.setter.write() = Some(Arc::new(setter));
        let mut state = self.state.lock();
        state.value = None;
        state.highlighted = true;
    }

    pub fn attach_getter<F>(&self, getter: F)
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        if let Some(parent) = &self.parent {
            return parent.attach_getter(getter);
        }
        *self.getter.write() = Some(Arc::new(getter));
    }

    pub fn has_setter(&self) -> bool {
        match &self.parent {
            Some(parent) => parent.has_setter(),
            None => self.setter.read().is_some(),
        }
    }

    pub fn has_getter(&self) -> bool {
        match &self.parent {
            Some(parent) => parent.has_getter(),
            None => self.getter.read().is_some(),
        }
    }

    /// The cached value. Never calls the getter.
    pub fn value(&self) -> Option<Value> {
        match &self.parent {
            Some(parent) => parent.value(),
            None => self.state.lock().value.clone(),
        }
    }

    /// Whether the input is marked as busy, or as not yet applied.
    pub fn is_highlighted(&self) -> bool {
        match &self.parent {
            Some(parent) => parent.is_highlighted(),
            None => self.state.lock().highlighted,
        }
    }

    fn set_highlighted(&self, highlighted: bool) {
        self.state.lock().highlighted = highlighted;
    }

    /// Sets the param to `value`, or to the current input if `None`, and returns the new value.
    ///
    /// Errors from the setter or getter are returned unchanged in [`Error::Callback`]; the busy
    /// highlight is cleared either way.
    pub fn set_value(&self, value: Option<Value>) -> Result<Value> {
        if let Some(parent) = &self.parent {
            return parent.set_value(value);
        }
        let value = self.take_input(value)?;
        log::debug!("set {} = {}", self.name, value);
        let setter = self.setter.read().clone();
        let resolved = match setter {
            Some(setter) => {
                let _busy = BusyGuard::new(self);
                self.resolve(Some(setter), value)?
            }
            None => value,
        };
        Ok(self.apply(resolved))
    }

    /// Shortcut for `set_value(Some(value.into()))`.
    pub fn set(&self, value: impl Into<Value>) -> Result<Value> {
        self.set_value(Some(value.into()))
    }

    /// Refreshes the value from the getter if there is one, otherwise returns the cached value.
    pub fn get_value(&self) -> Result<Option<Value>> {
        if let Some(parent) = &self.parent {
            return parent.get_value();
        }
        let getter = self.getter.read().clone();
        match getter {
            Some(getter) => {
                let value = self.kind.coerce(&getter()?)?;
                log::debug!("got {} = {}", self.name, value);
                Ok(Some(self.apply(value)))
            }
            None => Ok(self.value()),
        }
    }

    /// Runs the getter without touching the param: nothing is stored and `changed` does not fire.
    /// Without a getter this is the cached value.
    ///
    /// This is the half of [`Param::get_value`] that may run on a worker thread. Hand the result to
    /// [`Param::store_value`] on the owner thread.
    pub fn read_value(&self) -> Result<Option<Value>> {
        if let Some(parent) = &self.parent {
            return parent.read_value();
        }
        let getter = self.getter.read().clone();
        match getter {
            Some(getter) => Ok(Some(self.kind.coerce(&getter()?)?)),
            None => Ok(self.value()),
        }
    }

    /// Stores a value obtained by [`Param::read_value`] as if a getter refresh produced it.
    pub fn store_value(&self, value: Value) -> Result<Value> {
        if let Some(parent) = &self.parent {
            return parent.store_value(value);
        }
        let value = self.kind.coerce(&value)?;
        Ok(self.apply(value))
    }

    // Coerces an explicit value and writes it to the input, or reads the input.
    fn take_input(&self, value: Option<Value>) -> Result<Value> {
        match value {
            Some(v) => {
                let v = self.kind.coerce(&v)?;
                self.state.lock().input = Some(v.clone());
                Ok(v)
            }
            None => {
                let input = self.state.lock().input.clone();
                self.kind
                    .coerce(&input.unwrap_or_else(|| self.kind.default_value()))
            }
        }
    }

    // Runs the setter and resolves the value it leaves behind.
    fn resolve(&self, setter: Option<Setter>, value: Value) -> Result<Value> {
        let Some(setter) = setter else {
            return Ok(value);
        };
        let resolved = match setter(value.clone())? {
            Some(returned) => returned,
            None => {
                let getter = self.getter.read().clone();
                match getter {
                    Some(getter) => getter()?,
                    None => value,
                }
            }
        };
        self.kind.coerce(&resolved)
    }

    // Stores, syncs the input, clears the highlight and notifies once.
    fn apply(&self, value: Value) -> Value {
        {
            let mut state = self.state.lock();
            state.value = Some(value.clone());
            state.input = Some(value.clone());
            state.highlighted = false;
        }
        self.changed.emit(&value);
        value
    }

    /// The value shown in the input representation, if any.
    pub fn input_value(&self) -> Option<Value> {
        self.state.lock().input.clone()
    }

    /// The input representation as text, using the param's format specifier.
    pub fn input_text(&self) -> String {
        match self.input_value() {
            None => String::new(),
            Some(v) => match &self.format {
                Some(spec) => spec.apply(&v).unwrap_or_else(|_| v.to_string()),
                None => v.to_string(),
            },
        }
    }

    /// Writes the input representation without any side effect.
    pub fn input_write(&self, value: Value) -> Result<()> {
        let value = self.kind.coerce(&value)?;
        self.state.lock().input = Some(value);
        Ok(())
    }

    /// A user edit of the input representation.
    ///
    /// Without a setter the edit becomes the value and `changed` fires. With a setter the param is
    /// highlighted until it is applied with `set_value(None)`. Checkboxes apply right away.
    pub fn input_edit(&self, value: Value) -> Result<()> {
        if let Some(parent) = &self.parent {
            self.input_write(value.clone())?;
            return parent.input_edit(value);
        }
        self.input_write(value)?;
        if self.has_setter() {
            if self.kind == ParamKind::Bool {
                self.set_value(None)?;
            } else {
                self.set_highlighted(true);
            }
        } else {
            let value = self.take_input(None)?;
            self.state.lock().value = Some(value.clone());
            self.changed.emit(&value);
        }
        Ok(())
    }

    /// Creates a param that mirrors this one: it has no state of its own, sets and gets go through
    /// this param, and it re-emits this param's `changed`.
    pub fn make_child(self: &Arc<Self>) -> Arc<Param> {
        let child = Arc::new(Param {
            name: self.name.clone(),
            kind: self.kind.clone(),
            visible: self.visible,
            format: self.format.clone(),
            state: Mutex::new(ParamState {
                input: self.input_value(),
                ..Default::default()
            }),
            setter: RwLock::new(None),
            getter: RwLock::new(None),
            changed: Signal::new(),
            parent: Some(self.clone()),
        });
        let weak: Weak<Param> = Arc::downgrade(&child);
        self.changed.connect(move |value| {
            if let Some(child) = weak.upgrade() {
                child.state.lock().input = Some(value.clone());
                child.changed.emit(value);
            }
        });
        child
    }

    pub fn parent(&self) -> Option<&Arc<Param>> {
        self.parent.as_ref()
    }

    /// [`Param::set_value`] with the setter running on a pool thread.
    ///
    /// Must be called on the event loop's owner thread. The input is read and the param highlighted
    /// right away; the result is applied (and `changed` fired) when the event loop processes it.
    /// Errors go to the error reporter.
    pub fn set_value_threaded(
        self: &Arc<Self>,
        value: Option<Value>,
        pool: &WorkerPool,
    ) -> Result<WorkerHandle> {
        if let Some(parent) = &self.parent {
            return parent.set_value_threaded(value, pool);
        }
        let value = self.take_input(value)?;
        let setter = self.setter.read().clone();
        let guard = setter.as_ref().map(|_| {
            self.set_highlighted(true);
            RemoteBusyGuard {
                param: self.clone(),
                event_loop: pool.event_loop().clone(),
            }
        });
        let param = self.clone();
        let worker = Worker::new(move || {
            let _busy = guard;
            param.resolve(setter, value).map_err(Error::into_anyhow)
        });
        let param = self.clone();
        worker.returned().connect(move |value: &Value| {
            param.apply(value.clone());
        });
        Ok(pool.run_worker(worker))
    }

    /// [`Param::get_value`] with the getter running on a pool thread.
    pub fn get_value_threaded(self: &Arc<Self>, pool: &WorkerPool) -> WorkerHandle {
        if let Some(parent) = &self.parent {
            return parent.get_value_threaded(pool);
        }
        let getter = self.getter.read().clone();
        let kind = self.kind.clone();
        let worker = Worker::new(move || match getter {
            Some(getter) => Ok(Some(kind.coerce(&getter()?).map_err(Error::into_anyhow)?)),
            None => Ok(None),
        });
        let param = self.clone();
        worker.returned().connect(move |value: &Option<Value>| {
            if let Some(value) = value {
                param.apply(value.clone());
            }
        });
        pool.run_worker(worker)
    }
}

impl std::fmt::Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &self.value())
            .field("setter", &self.has_setter())
            .field("getter", &self.has_getter())
            .finish()
    }
}
