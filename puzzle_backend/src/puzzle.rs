//! # The Puzzle
//!
//! The top-level container. A [`Puzzle`] owns
//!
//! - the [`PieceRegistry`], a flat `name -> Piece` namespace with `piece:item` addressing,
//! - the [`Globals`] store for handles shared by several Pieces (an SDK, a serial port),
//! - the [`EventLoop`] all user-visible state lives on, and the [`WorkerPool`] feeding it,
//! - the error boundary ([`Puzzle::set_error_reporter`], [`Puzzle::guarded`]),
//! - the print and prompt handlers used by scripts.
//!
//! `Puzzle` is a cheap handle (`Clone`). Pieces receive a [`PuzzleHandle`], a weak reference, so
//! that setters and actions can reach other Pieces without keeping the Puzzle alive.
//!
//! The thread calling [`PuzzleBuilder::build`] owns the event loop and should be the one driving
//! scripts and [`Puzzle::process_events`].

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::action::Action;
use crate::error::{Error, Result};
use crate::event_loop::{ErrorReporter, EventLoop};
use crate::param::Param;
use crate::parse;
use crate::piece::{HasActions, HasParams, Piece, PieceDefinition};
use crate::threads::{LiveWorker, Worker, WorkerHandle, WorkerPool};
use crate::value::Value;

/// Key reserved for the global stop.
pub const STOP_SHORTCUT: &str = "F3";
/// Key printing the [`Puzzle::tree`].
pub const TREE_SHORTCUT: &str = "F1";
/// Key printing the [`Puzzle::export_setup`] script.
pub const EXPORT_SHORTCUT: &str = "F2";

pub type PrintHandler = Arc<dyn Fn(&str) + Send + Sync>;
/// Shows `text` and blocks until it is acknowledged.
pub type PromptHandler = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Name-unique map of Pieces.
#[derive(Default)]
pub struct PieceRegistry {
    pieces: RwLock<IndexMap<String, Arc<Piece>>>,
}

impl PieceRegistry {
    pub fn insert(&self, name: &str, piece: Arc<Piece>) -> Result<()> {
        let mut pieces = self.pieces.write();
        if pieces.contains_key(name) {
            return Err(Error::DuplicatePiece {
                name: name.to_string(),
            });
        }
        pieces.insert(name.to_string(), piece);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<Piece>> {
        self.pieces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingPiece {
                name: name.to_string(),
            })
    }

    /// Swaps the Piece registered under `name` and returns the old one.
    pub fn replace(&self, name: &str, piece: Arc<Piece>) -> Result<Arc<Piece>> {
        let mut pieces = self.pieces.write();
        match pieces.get_mut(name) {
            Some(slot) => Ok(std::mem::replace(slot, piece)),
            None => Err(Error::MissingPiece {
                name: name.to_string(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pieces.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.pieces.read().keys().cloned().collect()
    }

    /// Snapshot of the registered Pieces, in registration order.
    pub fn pieces(&self) -> Vec<Arc<Piece>> {
        self.pieces.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pieces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.read().is_empty()
    }
}

#[derive(Default)]
struct GlobalsState {
    values: IndexMap<String, Option<Arc<dyn Any + Send + Sync>>>,
    counts: IndexMap<String, usize>,
}

/// Shared handles used by several Pieces, with `require`/`release` reference counting.
///
/// ```
/// use puzzle_backend::puzzle::Globals;
///
/// let globals = Globals::default();
/// // the first Piece needing the SDK loads it
/// if !globals.require("sdk") {
///     globals.set("sdk", String::from("loaded"));
/// }
/// assert!(globals.require("sdk"));
/// assert_eq!(*globals.get::<String>("sdk").unwrap(), "loaded");
/// assert!(!globals.release("sdk").unwrap());
/// // the last one to release it shuts it down
/// assert!(globals.release("sdk").unwrap());
/// ```
#[derive(Default)]
pub struct Globals {
    state: Mutex<GlobalsState>,
}

impl Globals {
    /// Registers a user of `name`. Returns `false` the first time, when the value still has to be set.
    pub fn require(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        if !state.values.contains_key(name) {
            state.values.insert(name.to_string(), None);
            state.counts.insert(name.to_string(), 1);
            return false;
        }
        *state.counts.entry(name.to_string()).or_insert(0) += 1;
        true
    }

    /// Drops a user of `name`. Returns `true` once nobody uses it any more.
    pub fn release(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.values.contains_key(name) {
            return Err(Error::MissingGlobal {
                name: name.to_string(),
            });
        }
        let count = state
            .counts
            .get_mut(name)
            .ok_or_else(|| Error::UnregisteredGlobal {
                name: name.to_string(),
            })?;
        *count = count.saturating_sub(1);
        Ok(*count < 1)
    }

    pub fn set<T: Any + Send + Sync>(&self, name: &str, value: T) {
        self.state
            .lock()
            .values
            .insert(name.to_string(), Some(Arc::new(value)));
    }

    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let value = self.state.lock().values.get(name).cloned().flatten();
        let value = value.ok_or_else(|| Error::MissingGlobal {
            name: name.to_string(),
        })?;
        value.downcast::<T>().map_err(|_| Error::GlobalType {
            name: name.to_string(),
        })
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        state.counts.shift_remove(name);
        state.values.shift_remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().values.contains_key(name)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().values.keys().cloned().collect()
    }
}

/// Tab state of a [`Folder`], shared with the views of its Pieces.
#[derive(Default)]
pub(crate) struct FolderState {
    tabs: RwLock<Vec<String>>,
    current: RwLock<Option<String>>,
}

impl FolderState {
    pub(crate) fn set_current(&self, name: &str) {
        if self.tabs.read().iter().any(|t| t == name) {
            *self.current.write() = Some(name.to_string());
        }
    }
}

/// A tabbed group of Pieces. Only the current tab receives keyboard shortcuts.
#[derive(Clone)]
pub struct Folder {
    state: Arc<FolderState>,
    puzzle: PuzzleHandle,
}

impl Folder {
    pub fn add_piece<D: PieceDefinition>(&self, name: &str, definition: D) -> Result<Arc<Piece>> {
        self.add_boxed_piece(name, Box::new(definition))
    }

    pub fn add_boxed_piece(
        &self,
        name: &str,
        definition: Box<dyn PieceDefinition>,
    ) -> Result<Arc<Piece>> {
        let puzzle = self.puzzle.upgrade()?;
        let piece = puzzle.assemble(name, definition, Some(&self.state))?;
        self.state.tabs.write().push(name.to_string());
        let mut current = self.state.current.write();
        if current.is_none() {
            *current = Some(name.to_string());
        }
        Ok(piece)
    }

    pub fn tabs(&self) -> Vec<String> {
        self.state.tabs.read().clone()
    }

    pub fn current(&self) -> Option<String> {
        self.state.current.read().clone()
    }

    pub fn set_current(&self, name: &str) {
        self.state.set_current(name)
    }
}

enum TopLevel {
    Piece(String),
    Folder(Folder),
}

struct PuzzleInner {
    name: String,
    debug: bool,
    pieces: PieceRegistry,
    globals: Globals,
    toplevel: RwLock<Vec<TopLevel>>,
    event_loop: EventLoop,
    pool: Arc<WorkerPool>,
    print: RwLock<PrintHandler>,
    prompt: RwLock<PromptHandler>,
}

impl Drop for PuzzleInner {
    fn drop(&mut self) {
        let stopped = self.pool.stop_all();
        if stopped > 0 {
            log::debug!("stopped {} live worker(s) on drop", stopped);
        }
    }
}

/// Weak reference to a [`Puzzle`], held by Pieces.
#[derive(Clone)]
pub struct PuzzleHandle {
    inner: Weak<PuzzleInner>,
}

impl PuzzleHandle {
    pub fn upgrade(&self) -> Result<Puzzle> {
        self.inner
            .upgrade()
            .map(|inner| Puzzle { inner })
            .ok_or(Error::PuzzleClosed)
    }
}

/// Configures and creates a [`Puzzle`].
pub struct PuzzleBuilder {
    name: String,
    debug: bool,
    worker_threads: Option<usize>,
}

impl Default for PuzzleBuilder {
    fn default() -> Self {
        Self {
            name: "Puzzle".to_string(),
            debug: true,
            worker_threads: None,
        }
    }
}

impl PuzzleBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// In debug mode Pieces skip `setup` and `handle_close` and shouldn't talk to hardware.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Creates the Puzzle. The calling thread becomes the event loop's owner.
    pub fn build(self) -> Result<Puzzle> {
        let event_loop = EventLoop::new();
        let pool = Arc::new(WorkerPool::new(self.worker_threads, event_loop.handle())?);
        log::debug!(
            "puzzle '{}' created (debug: {}, {} worker threads)",
            self.name,
            self.debug,
            pool.threads()
        );
        let print: PrintHandler = Arc::new(|text: &str| println!("{}", text));
        let prompt: PromptHandler = Arc::new(|text: &str| {
            log::info!("prompt: {}", text);
            Ok(())
        });
        Ok(Puzzle {
            inner: Arc::new(PuzzleInner {
                name: self.name,
                debug: self.debug,
                pieces: PieceRegistry::default(),
                globals: Globals::default(),
                toplevel: RwLock::new(Vec::new()),
                event_loop,
                pool,
                print: RwLock::new(print),
                prompt: RwLock::new(prompt),
            }),
        })
    }
}

/// Registry of Pieces plus the services they share.
#[derive(Clone)]
pub struct Puzzle {
    inner: Arc<PuzzleInner>,
}

impl Puzzle {
    pub fn builder() -> PuzzleBuilder {
        PuzzleBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn debug(&self) -> bool {
        self.inner.debug
    }

    pub fn handle(&self) -> PuzzleHandle {
        PuzzleHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn pieces(&self) -> &PieceRegistry {
        &self.inner.pieces
    }

    pub fn globals(&self) -> &Globals {
        &self.inner.globals
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.inner.pool
    }

    /// Assembles a Piece from its definition and registers it at the top level.
    pub fn add_piece<D: PieceDefinition>(&self, name: &str, definition: D) -> Result<Arc<Piece>> {
        self.add_boxed_piece(name, Box::new(definition))
    }

    pub fn add_boxed_piece(
        &self,
        name: &str,
        definition: Box<dyn PieceDefinition>,
    ) -> Result<Arc<Piece>> {
        let piece = self.assemble(name, definition, None)?;
        self.inner
            .toplevel
            .write()
            .push(TopLevel::Piece(name.to_string()));
        Ok(piece)
    }

    pub fn add_folder(&self) -> Folder {
        let folder = Folder {
            state: Arc::new(FolderState::default()),
            puzzle: self.handle(),
        };
        self.inner
            .toplevel
            .write()
            .push(TopLevel::Folder(folder.clone()));
        folder
    }

    pub fn folders(&self) -> Vec<Folder> {
        self.inner
            .toplevel
            .read()
            .iter()
            .filter_map(|t| match t {
                TopLevel::Folder(f) => Some(f.clone()),
                TopLevel::Piece(_) => None,
            })
            .collect()
    }

    fn build_piece(
        &self,
        name: &str,
        mut definition: Box<dyn PieceDefinition>,
        folder: Option<&Arc<FolderState>>,
    ) -> Result<Piece> {
        let mut piece = Piece::new(name, self.handle());
        if let Some(folder) = folder {
            piece.view().attach(folder);
        }
        if !self.debug() {
            definition.setup(&mut piece)?;
        }
        definition.define_params(&mut piece)?;
        definition.define_readouts(&mut piece)?;
        definition.define_actions(&mut piece)?;
        piece.set_definition(definition);
        Ok(piece)
    }

    fn assemble(
        &self,
        name: &str,
        definition: Box<dyn PieceDefinition>,
        folder: Option<&Arc<FolderState>>,
    ) -> Result<Arc<Piece>> {
        if self.inner.pieces.contains(name) {
            return Err(Error::DuplicatePiece {
                name: name.to_string(),
            });
        }
        let piece = Arc::new(self.build_piece(name, definition, folder)?);
        self.inner.pieces.insert(name, piece.clone())?;
        log::debug!("added piece '{}'", name);
        Ok(piece)
    }

    /// Replaces a Piece in place, keeping its position. Outside debug mode the old Piece's
    /// `handle_close` runs, as in [`Puzzle::close`].
    pub fn replace_piece<D: PieceDefinition>(&self, name: &str, definition: D) -> Result<Arc<Piece>> {
        let old = self.piece(name)?;
        let folder = old
            .view()
            .folder()
            .and_then(|weak| weak.upgrade());
        let piece = Arc::new(self.build_piece(name, Box::new(definition), folder.as_ref())?);
        let old = self.inner.pieces.replace(name, piece.clone())?;
        if !self.debug() {
            old.handle_close()?;
        }
        log::debug!("replaced piece '{}'", name);
        Ok(piece)
    }

    pub fn piece(&self, name: &str) -> Result<Arc<Piece>> {
        self.inner.pieces.get(name)
    }

    /// Resolves a `piece:param` reference.
    pub fn param(&self, reference: &str) -> Result<Arc<Param>> {
        let (piece, param) = split_reference(reference)?;
        Ok(self.piece(piece)?.param(param)?.clone())
    }

    /// Resolves a `piece:action` reference. Action names may contain `:`.
    pub fn action(&self, reference: &str) -> Result<Arc<Action>> {
        let (piece, action) = split_reference(reference)?;
        Ok(self.piece(piece)?.action(action)?.clone())
    }

    /// Values of a comma+space separated list of `piece:param` references. Getters are called.
    pub fn get_values(&self, text: &str) -> Result<Vec<Option<Value>>> {
        parse::parse_params(text, self)?
            .iter()
            .map(|param| param.get_value())
            .collect()
    }

    /// Records the values of `text`'s params keyed by their reference, e.g. as measurement metadata.
    pub fn record_values(
        &self,
        text: &str,
        record: Option<IndexMap<String, Option<Value>>>,
    ) -> Result<IndexMap<String, Option<Value>>> {
        let params = parse::parse_params(text, self)?;
        let mut record = record.unwrap_or_default();
        for (name, param) in text.split(", ").zip(params) {
            record.insert(name.to_string(), param.get_value()?);
        }
        Ok(record)
    }

    /// Runs a script, see [`parse::run`].
    pub fn run(&self, script: &str) -> Result<()> {
        parse::run(script, self)
    }

    /// Interpolates `{piece:param}` references, see [`parse::format`].
    pub fn format(&self, text: &str) -> Result<String> {
        parse::format(text, self)
    }

    /// Lists every Piece with its params (`⟳` marks a getter, `✓` a setter) and actions.
    pub fn tree(&self) -> String {
        let mut out = String::new();
        for piece in self.inner.pieces.pieces() {
            out.push_str(piece.name());
            out.push_str("\n  params\n");
            for (name, param) in piece.params() {
                let get = if param.has_getter() { " ⟳" } else { "" };
                let set = if param.has_setter() { " ✓" } else { "" };
                out.push_str(&format!("    {}{}{}\n", name, get, set));
            }
            out.push_str("  actions\n");
            for name in piece.actions().keys() {
                out.push_str(&format!("    {}\n", name));
            }
        }
        out
    }

    /// A script restoring every visible param without setter or getter to its current value.
    pub fn export_setup(&self) -> Result<String> {
        let mut out = String::new();
        for piece in self.inner.pieces.pieces() {
            for (name, param) in piece.params() {
                if !param.visible() || param.has_setter() || param.has_getter() {
                    continue;
                }
                if let Some(value) = param.get_value()? {
                    out.push_str(&format!("set:{}:{}:{}\n", piece.name(), name, value));
                }
            }
        }
        Ok(out)
    }

    /// Delivers a key press. `F3` stops everything, `F1` and `F2` print the tree and the setup
    /// export. The key then goes to top-level Pieces and the current tab of each folder.
    /// Returns whether anything handled it.
    pub fn handle_shortcut(&self, key: &str) -> Result<bool> {
        let mut handled = true;
        match key {
            STOP_SHORTCUT => self.call_stop(),
            TREE_SHORTCUT => self.print(&self.tree()),
            EXPORT_SHORTCUT => {
                let export = self.export_setup()?;
                self.print(&export)
            }
            _ => handled = false,
        }
        let targets: Vec<String> = self
            .inner
            .toplevel
            .read()
            .iter()
            .filter_map(|t| match t {
                TopLevel::Piece(name) => Some(name.clone()),
                TopLevel::Folder(folder) => folder.current(),
            })
            .collect();
        for name in targets {
            handled |= self.piece(&name)?.handle_shortcut(key)?;
        }
        Ok(handled)
    }

    /// Global stop: every Piece's `call_stop`, and a stop request to every live worker.
    pub fn call_stop(&self) {
        log::debug!("stop requested");
        for piece in self.inner.pieces.pieces() {
            piece.call_stop();
        }
        self.inner.pool.stop_all();
    }

    /// Shuts down: stops live workers, then (outside debug mode) runs every Piece's `handle_close`.
    ///
    /// All Pieces are closed even if one fails; the first error is returned.
    pub fn close(&self) -> Result<()> {
        let stopped = self.inner.pool.stop_all();
        log::debug!("closing puzzle '{}', {} live worker(s) stopped", self.name(), stopped);
        if self.debug() {
            return Ok(());
        }
        let mut first_error = None;
        for piece in self.inner.pieces.pieces() {
            if let Err(err) = piece.handle_close() {
                log::warn!("closing '{}' failed: {}", piece.name(), err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs pending event-loop tasks, see [`EventLoop::process_events`].
    pub fn process_events(&self) -> usize {
        self.inner.event_loop.process_events()
    }

    pub fn process_events_until<F: Fn() -> bool>(&self, timeout: Duration, condition: F) -> bool {
        self.inner.event_loop.process_events_until(timeout, condition)
    }

    pub fn run_worker<T: Send + 'static>(&self, worker: Worker<T>) -> WorkerHandle {
        self.inner.pool.run_worker(worker)
    }

    /// Submits a live worker; it is stopped by [`Puzzle::call_stop`], [`Puzzle::close`] and error reports.
    pub fn run_live_worker<T: Send + 'static>(&self, worker: LiveWorker<T>) -> WorkerHandle {
        self.inner.pool.run_live_worker(worker)
    }

    /// Replaces the error reporter. It always runs on the event loop's owner thread.
    pub fn set_error_reporter<F>(&self, reporter: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        let reporter: ErrorReporter = Arc::new(reporter);
        self.inner.event_loop.set_error_reporter(reporter);
    }

    /// The error boundary: live workers are asked to stop, then the reporter sees `err`.
    pub fn report_error(&self, err: Error) {
        self.inner.pool.stop_all();
        let handle = self.inner.event_loop.handle();
        if handle.is_owner_thread() {
            handle.report_error_now(&err);
        } else {
            handle.report_error(err);
        }
    }

    /// Runs `f` inside the error boundary, e.g. a button click. Returns `None` if it failed.
    pub fn guarded<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Result<T>,
    {
        match f() {
            Ok(value) => Some(value),
            Err(err) => {
                self.report_error(err);
                None
            }
        }
    }

    pub fn set_print_handler<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.inner.print.write() = Arc::new(handler);
    }

    pub fn set_prompt_handler<F>(&self, handler: F)
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        *self.inner.prompt.write() = Arc::new(handler);
    }

    /// Writes a line through the print handler (standard output by default).
    pub fn print(&self, text: &str) {
        let print = self.inner.print.read().clone();
        print(text)
    }

    /// Shows `text` through the prompt handler and waits for it to return.
    pub fn prompt(&self, text: &str) -> Result<()> {
        let prompt = self.inner.prompt.read().clone();
        Ok(prompt(text)?)
    }
}

impl std::fmt::Debug for Puzzle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Puzzle")
            .field("name", &self.inner.name)
            .field("debug", &self.inner.debug)
            .field("pieces", &self.inner.pieces.names())
            .finish()
    }
}

fn split_reference(reference: &str) -> Result<(&str, &str)> {
    reference
        .split_once(':')
        .ok_or_else(|| Error::ParamParse {
            token: reference.to_string(),
        })
}
