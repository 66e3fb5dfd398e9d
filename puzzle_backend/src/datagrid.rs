//! # Data grids
//!
//! A [`DataGrid`] is a table of [`Row`]s, each owning params and actions like a small Piece. All rows
//! are built by the same factory, so they share one set of param names (the grid's columns).
//!
//! ```
//! use maplit::hashmap;
//! use puzzle_backend::datagrid::DataGrid;
//! use puzzle_backend::param::ParamConfig;
//! use puzzle_backend::piece::HasParams;
//! use puzzle_backend::value::Value;
//!
//! let grid = DataGrid::new(|row| {
//!     row.define_param("wavelength", ParamConfig::float(800.))?;
//!     row.define_param("label", ParamConfig::text(""))?;
//!     Ok(())
//! })
//! .unwrap();
//! grid.add_row(hashmap! {"label" => Value::from("pump")}).unwrap();
//! grid.add_row(hashmap! {"wavelength" => Value::Float(400.)}).unwrap();
//! assert_eq!(grid.len(), 2);
//! assert_eq!(grid.values()[0]["label"], Some(Value::from("pump")));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::action::{Action, Elevate, NoElevate};
use crate::error::{Error, Result};
use crate::param::Param;
use crate::piece::{HasActions, HasParams};
use crate::puzzle::PuzzleHandle;
use crate::signal::Signal;
use crate::value::Value;

type RowFactory = Box<dyn Fn(&mut Row) -> Result<()> + Send + Sync>;
type ChangedSlot = Arc<dyn Fn(&Value) + Send + Sync>;

/// One entry of a [`DataGrid`]. Calling its actions elevates nothing.
pub struct Row {
    puzzle: Option<PuzzleHandle>,
    params: IndexMap<String, Arc<Param>>,
    actions: IndexMap<String, Arc<Action>>,
}

impl Row {
    fn new(puzzle: Option<PuzzleHandle>) -> Self {
        Self {
            puzzle,
            params: IndexMap::new(),
            actions: IndexMap::new(),
        }
    }

    pub fn puzzle(&self) -> Option<&PuzzleHandle> {
        self.puzzle.as_ref()
    }
}

impl HasParams for Row {
    fn owner_name(&self) -> &str {
        "row"
    }

    fn params(&self) -> &IndexMap<String, Arc<Param>> {
        &self.params
    }

    fn params_(&mut self) -> &mut IndexMap<String, Arc<Param>> {
        &mut self.params
    }
}

impl HasActions for Row {
    fn actions(&self) -> &IndexMap<String, Arc<Action>> {
        &self.actions
    }

    fn actions_(&mut self) -> &mut IndexMap<String, Arc<Action>> {
        &mut self.actions
    }

    fn elevator(&self) -> Arc<dyn Elevate> {
        Arc::new(NoElevate)
    }
}

/// A table of [`Row`]s.
///
/// `rows_changed` fires when rows are added or removed. `data_changed` fires on that, and on
/// any param change in any row.
pub struct DataGrid {
    factory: RowFactory,
    puzzle: Option<PuzzleHandle>,
    param_names: Vec<String>,
    rows: RwLock<Vec<Arc<Row>>>,
    slots: Mutex<IndexMap<String, Vec<ChangedSlot>>>,
    rows_changed: Signal<()>,
    data_changed: Arc<Signal<()>>,
}

impl DataGrid {
    /// Creates an empty grid. `factory` defines the params and actions of every row.
    pub fn new<F>(factory: F) -> Result<Self>
    where
        F: Fn(&mut Row) -> Result<()> + Send + Sync + 'static,
    {
        Self::build(Box::new(factory), None)
    }

    /// Like [`DataGrid::new`], with rows able to reach `puzzle`.
    pub fn with_puzzle<F>(factory: F, puzzle: PuzzleHandle) -> Result<Self>
    where
        F: Fn(&mut Row) -> Result<()> + Send + Sync + 'static,
    {
        Self::build(Box::new(factory), Some(puzzle))
    }

    fn build(factory: RowFactory, puzzle: Option<PuzzleHandle>) -> Result<Self> {
        let mut example = Row::new(puzzle.clone());
        factory(&mut example)?;
        let data_changed = Arc::new(Signal::new());
        let rows_changed = Signal::new();
        let d = data_changed.clone();
        rows_changed.connect(move |_| d.emit(&()));
        Ok(Self {
            factory,
            puzzle,
            param_names: example.params.keys().cloned().collect(),
            rows: RwLock::new(Vec::new()),
            slots: Mutex::new(IndexMap::new()),
            rows_changed,
            data_changed,
        })
    }

    /// The columns.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn rows_changed(&self) -> &Signal<()> {
        &self.rows_changed
    }

    pub fn data_changed(&self) -> &Signal<()> {
        &self.data_changed
    }

    pub fn rows(&self) -> Vec<Arc<Row>> {
        self.rows.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Cached values of every row. Getters are not called.
    pub fn values(&self) -> Vec<IndexMap<String, Option<Value>>> {
        self.rows
            .read()
            .iter()
            .map(|row| {
                row.params
                    .iter()
                    .map(|(name, param)| (name.clone(), param.value()))
                    .collect()
            })
            .collect()
    }

    /// Appends a row with default values, then sets the given ones.
    pub fn add_row<K: AsRef<str>>(&self, values: HashMap<K, Value>) -> Result<Arc<Row>> {
        let mut row = Row::new(self.puzzle.clone());
        (self.factory)(&mut row)?;
        for (name, value) in values {
            row.param(name.as_ref())?.set_value(Some(value))?;
        }
        let slots = self.slots.lock().clone();
        for (name, param) in &row.params {
            for slot in slots.get(name).into_iter().flatten() {
                let slot = slot.clone();
                param.changed().connect(move |v| slot(v));
            }
            let data_changed = self.data_changed.clone();
            param.changed().connect(move |_| data_changed.emit(&()));
        }
        let row = Arc::new(row);
        self.rows.write().push(row.clone());
        self.rows_changed.emit(&());
        Ok(row)
    }

    /// Removes the row at `index`; later rows move up.
    pub fn remove_row(&self, index: usize) -> Result<Arc<Row>> {
        let removed = {
            let mut rows = self.rows.write();
            if index >= rows.len() {
                return Err(Error::RowIndex {
                    index,
                    len: rows.len(),
                });
            }
            rows.remove(index)
        };
        self.rows_changed.emit(&());
        Ok(removed)
    }

    pub fn clear(&self) {
        self.rows.write().clear();
        self.rows_changed.emit(&());
    }

    /// Current position of `row`, if it is still in the grid.
    pub fn get_index(&self, row: &Arc<Row>) -> Option<usize> {
        self.rows.read().iter().position(|r| Arc::ptr_eq(r, row))
    }

    /// Connects `slot` to the `changed` signal of the `param` column, in current and future rows.
    pub fn add_changed_slot<F>(&self, param: &str, slot: F) -> Result<()>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if !self.param_names.iter().any(|name| name == param) {
            return Err(Error::MissingParam {
                piece: "row".to_string(),
                param: param.to_string(),
            });
        }
        let slot: ChangedSlot = Arc::new(slot);
        self.slots
            .lock()
            .entry(param.to_string())
            .or_default()
            .push(slot.clone());
        for row in self.rows() {
            let slot = slot.clone();
            row.param(param)?.changed().connect(move |v| slot(v));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DataGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataGrid")
            .field("columns", &self.param_names)
            .field("rows", &self.len())
            .finish()
    }
}
