//! Notification channels (`changed`, `called`, `rows_changed`, ...).
//!
//! A [`Signal`] holds a list of slots. [`Signal::emit`] calls every connected slot in connection order
//! on the emitting thread. The slot list is cloned before the slots run, so a slot may connect or
//! disconnect other slots (or itself) without deadlocking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifies a connected slot, used to disconnect it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A multi-slot notification channel carrying values of type `T`.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use puzzle_backend::signal::Signal;
///
/// let signal = Signal::<i64>::new();
/// let total = Arc::new(AtomicUsize::new(0));
/// let t = total.clone();
/// let id = signal.connect(move |v| { t.fetch_add(*v as usize, Ordering::SeqCst); });
/// signal.emit(&3);
/// signal.disconnect(id);
/// signal.emit(&4);
/// assert_eq!(total.load(Ordering::SeqCst), 3);
/// ```
pub struct Signal<T> {
    slots: Mutex<Vec<(SlotId, Slot<T>)>>,
    next_id: AtomicUsize,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn connect<F>(&self, slot: F) -> SlotId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SlotId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots.lock().push((id, Arc::new(slot)));
        id
    }

    /// Returns `false` if the slot was not connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.lock();
        let len = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        slots.len() != len
    }

    pub fn disconnect_all(&self) {
        self.slots.lock().clear();
    }

    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn emit(&self, value: &T) {
        let slots: Vec<Slot<T>> = self.slots.lock().iter().map(|(_, s)| s.clone()).collect();
        for slot in slots {
            slot(value);
        }
    }
}
