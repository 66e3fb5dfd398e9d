//! # The single consumer loop
//!
//! Everything user-visible (param input representations, highlight state, `changed` notifications
//! raised by threaded sets, live-worker results) is mutated on exactly one thread: the thread that
//! created the [`EventLoop`]. Other threads never touch that state directly. They [`post`](EventLoopHandle::post)
//! a task through an [`EventLoopHandle`], and the owner thread runs it on its next call to
//! [`EventLoop::process_events`].
//!
//! The hand-off is an unbounded `crossbeam` channel of boxed closures, so posting never blocks a
//! worker thread.
//!
//! Errors raised off the owner thread are marshaled the same way: [`EventLoopHandle::report_error`]
//! posts a task that hands the error to the registered reporter on the owner thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;

use crate::error::{Error, Result};

type Task = Box<dyn FnOnce() + Send>;

/// Callback invoked on the owner thread for every error that reaches the error boundary.
pub type ErrorReporter = Arc<dyn Fn(&Error) + Send + Sync>;

fn default_reporter() -> ErrorReporter {
    Arc::new(|err: &Error| log::error!("{}", err))
}

pub struct EventLoop {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    owner: ThreadId,
    reporter: Arc<RwLock<ErrorReporter>>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Creates a loop owned by the calling thread.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            owner: thread::current().id(),
            reporter: Arc::new(RwLock::new(default_reporter())),
        }
    }

    pub fn handle(&self) -> EventLoopHandle {
        EventLoopHandle {
            sender: self.sender.clone(),
            owner: self.owner,
            reporter: self.reporter.clone(),
        }
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn set_error_reporter(&self, reporter: ErrorReporter) {
        *self.reporter.write() = reporter;
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Runs every task that was pending when the call started and returns how many ran.
    ///
    /// Tasks posted while processing wait for the next call. Called from any thread other than the
    /// owner this does nothing.
    pub fn process_events(&self) -> usize {
        if !self.is_owner_thread() {
            log::warn!("process_events called off the owner thread, ignoring");
            return 0;
        }
        let pending = self.receiver.len();
        let mut ran = 0;
        for _ in 0..pending {
            match self.receiver.try_recv() {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        if ran > 0 {
            log::trace!("processed {} event(s)", ran);
        }
        ran
    }

    /// Keeps processing events until `condition` holds or `timeout` elapses.
    ///
    /// Returns whether the condition was met. Blocks between events instead of spinning.
    pub fn process_events_until<F>(&self, timeout: Duration, condition: F) -> bool
    where
        F: Fn() -> bool,
    {
        if !self.is_owner_thread() {
            log::warn!("process_events_until called off the owner thread, ignoring");
            return condition();
        }
        let deadline = Instant::now() + timeout;
        loop {
            self.process_events();
            if condition() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = (deadline - now).min(Duration::from_millis(10));
            match self.receiver.recv_timeout(wait) {
                Ok(task) => task(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return condition(),
            }
        }
    }
}

/// Cloneable, `Send` access to an [`EventLoop`] from any thread.
#[derive(Clone)]
pub struct EventLoopHandle {
    sender: Sender<Task>,
    owner: ThreadId,
    reporter: Arc<RwLock<ErrorReporter>>,
}

impl EventLoopHandle {
    /// Queues `task` to run on the owner thread.
    pub fn post<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(Box::new(task))
            .map_err(|_| Error::EventLoopClosed)
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Runs `task` right away on the owner thread, otherwise posts it.
    pub fn run_or_post<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_owner_thread() {
            task();
            Ok(())
        } else {
            self.post(task)
        }
    }

    /// Hands `err` to the error reporter on the owner thread.
    pub fn report_error(&self, err: Error) {
        let reporter = self.reporter.clone();
        if let Err(Error::EventLoopClosed) = self.post(move || {
            let report = reporter.read().clone();
            report(&err)
        }) {
            log::error!("event loop closed, error could not be reported");
        }
    }

    /// Invokes the reporter immediately on the calling thread.
    pub fn report_error_now(&self, err: &Error) {
        let report = self.reporter.read().clone();
        report(err)
    }
}

/// Schedules a function to run once on the next event-loop pass, no matter how many times it was
/// triggered since the last pass.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use puzzle_backend::event_loop::{CallLater, EventLoop};
///
/// let event_loop = EventLoop::new();
/// let count = Arc::new(AtomicUsize::new(0));
/// let c = count.clone();
/// let refresh = CallLater::new(event_loop.handle(), move || { c.fetch_add(1, Ordering::SeqCst); });
/// refresh.trigger();
/// refresh.trigger();
/// event_loop.process_events();
/// assert_eq!(count.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct CallLater {
    handle: EventLoopHandle,
    pending: Arc<AtomicBool>,
    function: Arc<dyn Fn() + Send + Sync>,
}

impl CallLater {
    pub fn new<F>(handle: EventLoopHandle, function: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            handle,
            pending: Arc::new(AtomicBool::new(false)),
            function: Arc::new(function),
        }
    }

    pub fn trigger(&self) {
        if self.pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = self.pending.clone();
        let function = self.function.clone();
        let posted = self.handle.post(move || {
            pending.store(false, Ordering::SeqCst);
            function()
        });
        if posted.is_err() {
            self.pending.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}
