//! # Pieces
//!
//! A [`Piece`] is a unit of automation: one instrument, or one function such as a scan. It owns two
//! namespaces, its params and its actions, filled once while the Piece is assembled and read
//! afterwards.
//!
//! Concrete Pieces implement [`PieceDefinition`]. The [`Puzzle`](crate::puzzle::Puzzle) calls its
//! phases in order (`setup` only outside debug mode, then `define_params`, `define_readouts` and
//! `define_actions`) and keeps the definition alive for `call_stop` and `handle_close`.
//!
//! ```
//! use puzzle_backend::piece::{HasActions, HasParams, Piece, PieceDefinition};
//! use puzzle_backend::param::ParamConfig;
//! use puzzle_backend::puzzle::Puzzle;
//! use puzzle_backend::Result;
//!
//! struct Laser;
//!
//! impl PieceDefinition for Laser {
//!     fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
//!         let power = piece.define_param("power", ParamConfig::float(0.))?;
//!         power.attach_setter(|v| Ok(Some(v)));
//!         Ok(())
//!     }
//! }
//!
//! let puzzle = Puzzle::builder().name("lab").build().unwrap();
//! let laser = puzzle.add_piece("laser", Laser).unwrap();
//! laser.param("power").unwrap().set(2.5).unwrap();
//! assert!(laser.params()["power"].has_setter());
//! ```

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::action::{Action, Elevate};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::param::{Param, ParamConfig, ParamKind};
use crate::puzzle::{FolderState, PuzzleHandle};
use crate::value::Value;

/// Anything that owns a namespace of params: [`Piece`]s and data grid rows.
pub trait HasParams {
    /// Name used in lookup errors.
    fn owner_name(&self) -> &str;
    fn params(&self) -> &IndexMap<String, Arc<Param>>;
    fn params_(&mut self) -> &mut IndexMap<String, Arc<Param>>;

    fn param(&self, name: &str) -> Result<&Arc<Param>> {
        self.params().get(name).ok_or_else(|| Error::MissingParam {
            piece: self.owner_name().to_string(),
            param: name.to_string(),
        })
    }

    /// Creates and registers a param. Names are unique per owner.
    fn define_param(&mut self, name: &str, config: ParamConfig) -> Result<Arc<Param>> {
        if self.params().contains_key(name) {
            return Err(Error::DuplicateParam {
                owner: self.owner_name().to_string(),
                name: name.to_string(),
            });
        }
        let param = Param::new(name, config);
        self.params_().insert(name.to_string(), param.clone());
        Ok(param)
    }

    /// Defines a param without a default whose value comes from `getter`.
    fn define_readout<F>(&mut self, name: &str, kind: ParamKind, getter: F) -> Result<Arc<Param>>
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
        Self: Sized,
    {
        let param = self.define_param(name, ParamConfig::readout(kind))?;
        param.attach_getter(getter);
        Ok(param)
    }
}

/// Anything that owns a namespace of actions.
pub trait HasActions: HasParams {
    fn actions(&self) -> &IndexMap<String, Arc<Action>>;
    fn actions_(&mut self) -> &mut IndexMap<String, Arc<Action>>;
    /// What actions elevate when called.
    fn elevator(&self) -> Arc<dyn Elevate>;

    fn action(&self, name: &str) -> Result<&Arc<Action>> {
        self.actions().get(name).ok_or_else(|| Error::MissingAction {
            piece: self.owner_name().to_string(),
            action: name.to_string(),
        })
    }

    /// Registers a prepared action, e.g. one built with a shortcut.
    fn add_action(&mut self, action: Action) -> Result<Arc<Action>> {
        if self.actions().contains_key(action.name()) {
            return Err(Error::DuplicateAction {
                owner: self.owner_name().to_string(),
                name: action.name().to_string(),
            });
        }
        let action = Arc::new(action);
        self.actions_()
            .insert(action.name().to_string(), action.clone());
        Ok(action)
    }

    fn define_action<F>(&mut self, name: &str, function: F) -> Result<Arc<Action>>
    where
        F: Fn(&[Value]) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
        Self: Sized,
    {
        let action = Action::new(name, self.elevator(), function);
        self.add_action(action)
    }
}

/// The lifecycle hooks of a concrete Piece.
///
/// Every phase has an empty default. Setters, getters and actions registered during the define
/// phases capture whatever state they need (`Arc`s, the Piece's [`PuzzleHandle`]).
pub trait PieceDefinition: Send + 'static {
    /// Only called when the Puzzle is not in debug mode. Connect to hardware here.
    fn setup(&mut self, _piece: &mut Piece) -> Result<()> {
        Ok(())
    }

    fn define_params(&mut self, _piece: &mut Piece) -> Result<()> {
        Ok(())
    }

    /// Same as `define_params`, a separate phase for params that have getters.
    fn define_readouts(&mut self, _piece: &mut Piece) -> Result<()> {
        Ok(())
    }

    fn define_actions(&mut self, _piece: &mut Piece) -> Result<()> {
        Ok(())
    }

    /// Only called when the Puzzle is not in debug mode. Disconnect hardware here.
    fn handle_close(&mut self, _piece: &Piece) -> Result<()> {
        Ok(())
    }

    /// Called on a global stop. By default cancels the Piece's stop token.
    fn call_stop(&mut self, piece: &Piece) {
        piece.stop_token().cancel();
    }
}

/// A Piece able to drive a script body once per step, e.g. a scan over a param.
pub trait StepIterator: Send + Sync {
    /// Runs `body` once per step, after preparing the step (setting params). Stops at the first
    /// error, or when `body` returns `false`.
    fn iterate(&self, body: &mut dyn FnMut(usize) -> Result<bool>) -> Result<()>;
}

/// Wraps a setter, getter or action body so that `check` runs first and aborts it on failure.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use anyhow::bail;
/// use puzzle_backend::piece::ensure;
/// use puzzle_backend::value::Value;
///
/// let connected = Arc::new(AtomicBool::new(false));
/// let c = connected.clone();
/// let check = move || {
///     if !c.load(Ordering::SeqCst) {
///         bail!("Laser not connected")
///     }
///     Ok(())
/// };
/// let setter = ensure(check, |v: Value| Ok(Some(v)));
/// assert!(setter(Value::Int(1)).is_err());
/// connected.store(true, Ordering::SeqCst);
/// assert_eq!(setter(Value::Int(1)).unwrap(), Some(Value::Int(1)));
/// ```
pub fn ensure<C, F, A, R>(check: C, function: F) -> impl Fn(A) -> anyhow::Result<R> + Send + Sync
where
    C: Fn() -> anyhow::Result<()> + Send + Sync,
    F: Fn(A) -> anyhow::Result<R> + Send + Sync,
{
    move |arg| {
        check()?;
        function(arg)
    }
}

// Switches the owning folder's tab to the Piece when one of its actions is called.
pub(crate) struct PieceView {
    name: String,
    folder: RwLock<Option<Weak<FolderState>>>,
}

impl PieceView {
    pub(crate) fn attach(&self, folder: &Arc<FolderState>) {
        *self.folder.write() = Some(Arc::downgrade(folder));
    }

    pub(crate) fn folder(&self) -> Option<Weak<FolderState>> {
        self.folder.read().clone()
    }
}

impl Elevate for PieceView {
    fn elevate(&self) {
        let folder = self.folder.read().as_ref().and_then(Weak::upgrade);
        if let Some(folder) = folder {
            folder.set_current(&self.name);
        }
    }
}

/// A named unit of automation owning params and actions.
pub struct Piece {
    name: String,
    puzzle: PuzzleHandle,
    params: IndexMap<String, Arc<Param>>,
    actions: IndexMap<String, Arc<Action>>,
    view: Arc<PieceView>,
    stop: CancellationToken,
    iterator: Option<Arc<dyn StepIterator>>,
    definition: Mutex<Option<Box<dyn PieceDefinition>>>,
}

impl Piece {
    pub(crate) fn new(name: &str, puzzle: PuzzleHandle) -> Self {
        Self {
            name: name.to_string(),
            puzzle,
            params: IndexMap::new(),
            actions: IndexMap::new(),
            view: Arc::new(PieceView {
                name: name.to_string(),
                folder: RwLock::new(None),
            }),
            stop: CancellationToken::new(),
            iterator: None,
            definition: Mutex::new(None),
        }
    }

    pub(crate) fn view(&self) -> &Arc<PieceView> {
        &self.view
    }

    pub(crate) fn set_definition(&mut self, definition: Box<dyn PieceDefinition>) {
        *self.definition.get_mut() = Some(definition);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Back-reference to the owning Puzzle, for reaching other Pieces and the worker pool.
    pub fn puzzle(&self) -> &PuzzleHandle {
        &self.puzzle
    }

    /// Set by [`Piece::call_stop`]; long-running code checks it and resets it when starting.
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// If this Piece sits in a folder, makes it the current tab.
    pub fn elevate(&self) {
        self.view.elevate();
    }

    pub fn set_iterator(&mut self, iterator: Arc<dyn StepIterator>) {
        self.iterator = Some(iterator);
    }

    pub fn iterator(&self) -> Option<&Arc<dyn StepIterator>> {
        self.iterator.as_ref()
    }

    /// Runs the action bound to `key`, if any. Returns whether one was found.
    pub fn handle_shortcut(&self, key: &str) -> Result<bool> {
        match self.actions.values().find(|a| a.shortcut() == Some(key)) {
            Some(action) => {
                action.call(&[])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn call_stop(&self) {
        match self.definition.lock().as_mut() {
            Some(definition) => definition.call_stop(self),
            None => self.stop.cancel(),
        }
    }

    pub fn handle_close(&self) -> Result<()> {
        log::debug!("closing piece {}", self.name);
        match self.definition.lock().as_mut() {
            Some(definition) => definition.handle_close(self),
            None => Ok(()),
        }
    }
}

impl HasParams for Piece {
    fn owner_name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &IndexMap<String, Arc<Param>> {
        &self.params
    }

    fn params_(&mut self) -> &mut IndexMap<String, Arc<Param>> {
        &mut self.params
    }
}

impl HasActions for Piece {
    fn actions(&self) -> &IndexMap<String, Arc<Action>> {
        &self.actions
    }

    fn actions_(&mut self) -> &mut IndexMap<String, Arc<Action>> {
        &mut self.actions
    }

    fn elevator(&self) -> Arc<dyn Elevate> {
        self.view.clone()
    }
}

impl std::fmt::Debug for Piece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Piece")
            .field("name", &self.name)
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::puzzle::Puzzle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        setup: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl PieceDefinition for Counters {
        fn setup(&mut self, _piece: &mut Piece) -> Result<()> {
            self.setup.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
            piece.define_param("x", ParamConfig::int(0))?;
            Ok(())
        }

        fn define_readouts(&mut self, piece: &mut Piece) -> Result<()> {
            piece.define_readout("y", ParamKind::float(), || Ok(Value::Float(1.5)))?;
            Ok(())
        }

        fn define_actions(&mut self, piece: &mut Piece) -> Result<()> {
            piece.add_action(
                Action::new("go", piece.elevator(), |_| Ok(Some(Value::from("went"))))
                    .with_shortcut("F5"),
            )?;
            Ok(())
        }

        fn handle_close(&mut self, _piece: &Piece) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn namespaces_and_lookup_errors() {
        let puzzle = Puzzle::builder().build().unwrap();
        let piece = puzzle.add_piece("p", Counters::default()).unwrap();
        assert_eq!(piece.params().keys().collect::<Vec<_>>(), vec!["x", "y"]);
        assert!(piece.param("y").unwrap().has_getter());
        assert_eq!(
            piece.param("z").unwrap_err().to_string(),
            "Piece 'p' has no param 'z'"
        );
        assert!(matches!(
            piece.action("nope").unwrap_err(),
            Error::MissingAction { .. }
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let puzzle = Puzzle::builder().build().unwrap();
        let mut piece = Piece::new("p", puzzle.handle());
        piece.define_param("x", ParamConfig::int(0)).unwrap();
        assert!(matches!(
            piece.define_param("x", ParamConfig::int(1)),
            Err(Error::DuplicateParam { .. })
        ));
        piece.define_action("a", |_| Ok(None)).unwrap();
        assert!(matches!(
            piece.define_action("a", |_| Ok(None)),
            Err(Error::DuplicateAction { .. })
        ));
    }

    #[test]
    fn setup_and_close_skipped_in_debug_mode() {
        let counters = Counters::default();
        let (setup, closed) = (counters.setup.clone(), counters.closed.clone());
        let puzzle = Puzzle::builder().debug(true).build().unwrap();
        puzzle.add_piece("p", counters).unwrap();
        puzzle.close().unwrap();
        assert_eq!(setup.load(Ordering::SeqCst), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        let counters = Counters::default();
        let (setup, closed) = (counters.setup.clone(), counters.closed.clone());
        let puzzle = Puzzle::builder().debug(false).build().unwrap();
        puzzle.add_piece("p", counters).unwrap();
        puzzle.close().unwrap();
        assert_eq!(setup.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shortcuts_and_stop() {
        let puzzle = Puzzle::builder().build().unwrap();
        let piece = puzzle.add_piece("p", Counters::default()).unwrap();
        assert!(piece.handle_shortcut("F5").unwrap());
        assert!(!piece.handle_shortcut("F6").unwrap());

        assert!(!piece.stop_token().is_cancelled());
        piece.call_stop();
        assert!(piece.stop_token().is_cancelled());
    }
}
