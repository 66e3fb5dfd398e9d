use std::sync::Arc;

use crate::error::Result;
use crate::signal::Signal;
use crate::value::Value;

pub type ActionFn = Arc<dyn Fn(&[Value]) -> anyhow::Result<Option<Value>> + Send + Sync>;

/// Brings the owner of an action into view, e.g. by switching to its tab in a folder.
pub trait Elevate: Send + Sync {
    fn elevate(&self);
}

/// Owner that never needs elevating, used by data grid rows and detached actions.
pub struct NoElevate;

impl Elevate for NoElevate {
    fn elevate(&self) {}
}

/// A named operation a Piece exposes to buttons, shortcuts, scripts and other Pieces.
///
/// Calling an action elevates its owner, forwards the arguments to the wrapped function, emits
/// [`Action::called`] and returns the function's result. If the function fails the error is
/// returned and `called` is not emitted.
///
/// ```
/// use std::sync::Arc;
/// use puzzle_backend::action::{Action, NoElevate};
/// use puzzle_backend::value::Value;
///
/// let double = Action::new("double", Arc::new(NoElevate), |args: &[Value]| {
///     Ok(args.first().and_then(|v| v.as_float()).map(|v| Value::Float(2. * v)))
/// });
/// assert_eq!(double.call(&[Value::Int(2)]).unwrap(), Some(Value::Float(4.)));
/// ```
pub struct Action {
    name: String,
    function: ActionFn,
    owner: Arc<dyn Elevate>,
    shortcut: Option<String>,
    visible: bool,
    called: Signal<()>,
}

impl Action {
    pub fn new<F>(name: &str, owner: Arc<dyn Elevate>, function: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            function: Arc::new(function),
            owner,
            shortcut: None,
            visible: true,
            called: Signal::new(),
        }
    }

    /// Keyboard shortcut, e.g. `"F1"` or `"Ctrl+R"`, active while the owner is visible.
    pub fn with_shortcut(mut self, shortcut: &str) -> Self {
        self.shortcut = Some(shortcut.to_string());
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shortcut(&self) -> Option<&str> {
        self.shortcut.as_deref()
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn called(&self) -> &Signal<()> {
        &self.called
    }

    pub fn call(&self, args: &[Value]) -> Result<Option<Value>> {
        self.owner.elevate();
        log::debug!("action {}", self.name);
        let function = self.function.clone();
        let result = function(args)?;
        self.called.emit(&());
        Ok(result)
    }

    /// Calls the action without arguments.
    pub fn trigger(&self) -> Result<Option<Value>> {
        self.call(&[])
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("shortcut", &self.shortcut)
            .field("visible", &self.visible)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountElevate(AtomicUsize);

    impl Elevate for CountElevate {
        fn elevate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn call_elevates_forwards_and_notifies() {
        let owner = Arc::new(CountElevate(AtomicUsize::new(0)));
        let action = Action::new("sum", owner.clone(), |args| {
            Ok(Some(Value::Float(args.iter().filter_map(|v| v.as_float()).sum())))
        })
        .with_shortcut("F1");
        let called = Arc::new(AtomicUsize::new(0));
        let c = called.clone();
        action.called().connect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let result = action.call(&[Value::Int(1), Value::Float(2.5)]).unwrap();
        assert_eq!(result, Some(Value::Float(3.5)));
        assert_eq!(owner.0.load(Ordering::SeqCst), 1);
        assert_eq!(called.load(Ordering::SeqCst), 1);
        assert_eq!(action.shortcut(), Some("F1"));
    }

    #[test]
    fn failure_skips_notification() {
        let action = Action::new("fail", Arc::new(NoElevate), |_| Err(anyhow!("nope")));
        let called = Arc::new(AtomicUsize::new(0));
        let c = called.clone();
        action.called().connect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(action.trigger().unwrap_err().to_string(), "nope");
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }
}
