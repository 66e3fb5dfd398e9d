//! # Background work
//!
//! - [`Worker`]: runs a function once on a pool thread and publishes its return value.
//! - [`LiveWorker`]: runs a function repeatedly, sleeping in between, until asked to stop.
//! - [`WorkerPool`]: the `rayon` thread pool the workers run on, plus the [`EventLoopHandle`] their
//!   results are delivered through.
//! - [`PuzzleTimer`]: an on/off toggle that owns at most one active `LiveWorker`.
//!
//! Worker bodies run on pool threads. Their return values are never handed to observers from
//! there: the `returned` and `done` signals are emitted on the event loop's owner thread.
//! A failing body is reported through the event loop's error reporter; its `done` flag is set
//! either way.
//!
//! Stopping is cooperative. [`LiveWorker::stop`] takes effect between iterations, the
//! in-flight call always completes and its value is still published.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::event_loop::EventLoopHandle;
use crate::signal::Signal;

// Sets the done flag (and emits `done` on the owner thread) on every exit path of a run.
struct DoneGuard {
    done: Arc<AtomicBool>,
    signal: Option<(Arc<Signal<()>>, EventLoopHandle)>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.done.store(true, Ordering::SeqCst);
        if let Some((signal, event_loop)) = self.signal.take() {
            if event_loop.post(move || signal.emit(&())).is_err() {
                log::debug!("event loop closed before worker completion was delivered");
            }
        }
    }
}

fn publish<T: Send + 'static>(
    returned: &Arc<Signal<T>>,
    value: T,
    event_loop: &EventLoopHandle,
) -> anyhow::Result<()> {
    let returned = returned.clone();
    event_loop
        .post(move || returned.emit(&value))
        .map_err(Error::into_anyhow)
}

/// A function to run once off the owner thread.
pub struct Worker<T> {
    function: Box<dyn FnOnce() -> anyhow::Result<T> + Send>,
    returned: Arc<Signal<T>>,
    done: Arc<AtomicBool>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn new<F>(function: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            function: Box::new(function),
            returned: Arc::new(Signal::new()),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emitted on the owner thread with the function's return value.
    pub fn returned(&self) -> &Signal<T> {
        &self.returned
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            done: self.done.clone(),
            live: None,
        }
    }

    /// Runs the function on the calling thread and posts its value to `event_loop`.
    ///
    /// Usually called through [`WorkerPool::run_worker`]. The error of a failing function is
    /// returned; `done` is set in both cases.
    pub fn run(self, event_loop: &EventLoopHandle) -> anyhow::Result<()> {
        let _done = DoneGuard {
            done: self.done.clone(),
            signal: None,
        };
        let value = (self.function)()?;
        publish(&self.returned, value, event_loop)
    }
}

/// A function called repeatedly off the owner thread, `sleep` apart, until stopped.
///
/// ```
/// use std::time::Duration;
/// use puzzle_backend::event_loop::EventLoop;
/// use puzzle_backend::threads::LiveWorker;
///
/// let event_loop = EventLoop::new();
/// let mut n = 0;
/// let worker = LiveWorker::new(move || { n += 1; Ok(n) }, Duration::ZERO);
/// let handle = worker.handle();
/// worker.stop();
/// worker.run(&event_loop.handle()).unwrap();
/// // stop is only checked between iterations, a stop before the first one skips it entirely
/// assert!(handle.is_done());
/// ```
pub struct LiveWorker<T> {
    function: Box<dyn FnMut() -> anyhow::Result<T> + Send>,
    sleep: Arc<Mutex<Duration>>,
    stop: CancellationToken,
    returned: Arc<Signal<T>>,
    done_signal: Arc<Signal<()>>,
    done: Arc<AtomicBool>,
}

impl<T: Send + 'static> LiveWorker<T> {
    pub fn new<F>(function: F, sleep: Duration) -> Self
    where
        F: FnMut() -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            function: Box::new(function),
            sleep: Arc::new(Mutex::new(sleep)),
            stop: CancellationToken::new(),
            returned: Arc::new(Signal::new()),
            done_signal: Arc::new(Signal::new()),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emitted on the owner thread after every iteration.
    pub fn returned(&self) -> &Signal<T> {
        &self.returned
    }

    /// Emitted on the owner thread once the worker has stopped, for any reason.
    pub fn done_signal(&self) -> &Signal<()> {
        &self.done_signal
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Requests a stop after the current iteration.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn set_sleep(&self, sleep: Duration) {
        *self.sleep.lock() = sleep;
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            done: self.done.clone(),
            live: Some(LiveControl {
                stop: self.stop.clone(),
                sleep: self.sleep.clone(),
            }),
        }
    }

    /// Loops on the calling thread until stopped or until the function fails.
    pub fn run(mut self, event_loop: &EventLoopHandle) -> anyhow::Result<()> {
        let _done = DoneGuard {
            done: self.done.clone(),
            signal: Some((self.done_signal.clone(), event_loop.clone())),
        };
        while !self.stop.is_cancelled() {
            let value = (self.function)()?;
            publish(&self.returned, value, event_loop)?;
            if !self.stop.is_cancelled() {
                let sleep = *self.sleep.lock();
                if !sleep.is_zero() {
                    thread::sleep(sleep);
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
struct LiveControl {
    stop: CancellationToken,
    sleep: Arc<Mutex<Duration>>,
}

/// Observes and controls a submitted worker.
#[derive(Clone)]
pub struct WorkerHandle {
    done: Arc<AtomicBool>,
    live: Option<LiveControl>,
}

impl WorkerHandle {
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Asks a live worker to stop after its current iteration.
    pub fn stop(&self) {
        match &self.live {
            Some(live) if !self.is_done() => live.stop.cancel(),
            Some(_) => log::debug!("stop requested on a finished worker"),
            None => log::warn!("one-shot workers cannot be stopped"),
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.live
            .as_ref()
            .map_or(false, |live| live.stop.is_cancelled())
    }

    /// Changes the interval of a live worker, read fresh at its next iteration.
    pub fn set_sleep(&self, sleep: Duration) {
        if let Some(live) = &self.live {
            *live.sleep.lock() = sleep;
        }
    }
}

/// The thread pool workers run on.
///
/// Every live worker occupies one pool thread until it stops, size the pool accordingly.
pub struct WorkerPool {
    pool: ThreadPool,
    event_loop: EventLoopHandle,
    live: Mutex<Vec<WorkerHandle>>,
}

impl WorkerPool {
    /// `threads: None` lets `rayon` pick one thread per core.
    pub fn new(threads: Option<usize>, event_loop: EventLoopHandle) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("puzzle-worker-{}", i));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        Ok(Self {
            pool: builder.build()?,
            event_loop,
            live: Mutex::new(Vec::new()),
        })
    }

    pub fn event_loop(&self) -> &EventLoopHandle {
        &self.event_loop
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn run_worker<T: Send + 'static>(&self, worker: Worker<T>) -> WorkerHandle {
        let handle = worker.handle();
        let event_loop = self.event_loop.clone();
        self.pool.spawn(move || {
            log::debug!("worker started");
            if let Err(err) = worker.run(&event_loop) {
                event_loop.report_error(Error::Callback(err));
            }
            log::debug!("worker finished");
        });
        handle
    }

    /// Submits a live worker. It will receive a stop request from [`WorkerPool::stop_all`].
    pub fn run_live_worker<T: Send + 'static>(&self, worker: LiveWorker<T>) -> WorkerHandle {
        let handle = worker.handle();
        {
            let mut live = self.live.lock();
            live.retain(|h| !h.is_done());
            live.push(handle.clone());
        }
        let event_loop = self.event_loop.clone();
        self.pool.spawn(move || {
            log::debug!("live worker started");
            if let Err(err) = worker.run(&event_loop) {
                event_loop.report_error(Error::Callback(err));
            }
            log::debug!("live worker finished");
        });
        handle
    }

    /// Asks every running live worker to stop. Returns how many were asked.
    pub fn stop_all(&self) -> usize {
        let mut live = self.live.lock();
        live.retain(|h| !h.is_done());
        for handle in live.iter() {
            handle.stop();
        }
        live.len()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().iter().filter(|h| !h.is_done()).count()
    }
}

/// An on/off toggle running a function repeatedly while it is on.
///
/// Turning it on starts a fresh [`LiveWorker`] unless one is still running; turning it off asks
/// that worker to stop. When the worker finishes, for whatever reason, the toggle turns itself off.
/// Values returned by the function are re-emitted through [`PuzzleTimer::returned`].
pub struct PuzzleTimer<T> {
    name: String,
    pool: Arc<WorkerPool>,
    function: Arc<dyn Fn() -> anyhow::Result<T> + Send + Sync>,
    sleep: Mutex<Duration>,
    checked: AtomicBool,
    worker: Mutex<Option<WorkerHandle>>,
    returned: Arc<Signal<T>>,
}

impl<T: Send + 'static> PuzzleTimer<T> {
    pub fn new<F>(name: &str, pool: Arc<WorkerPool>, function: F, sleep: Duration) -> Arc<Self>
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            pool,
            function: Arc::new(function),
            sleep: Mutex::new(sleep),
            checked: AtomicBool::new(false),
            worker: Mutex::new(None),
            returned: Arc::new(Signal::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn returned(&self) -> &Signal<T> {
        &self.returned
    }

    pub fn is_checked(&self) -> bool {
        self.checked.load(Ordering::SeqCst)
    }

    /// Whether a worker is currently running (possibly stopping).
    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().map_or(false, |w| !w.is_done())
    }

    /// Flips the toggle. Setting the state it already has does nothing.
    pub fn set_checked(self: &Arc<Self>, checked: bool) {
        if self.checked.swap(checked, Ordering::SeqCst) == checked {
            return;
        }
        let mut worker = self.worker.lock();
        match worker.as_ref() {
            Some(running) if !running.is_done() => {
                if checked {
                    log::warn!("'{}' is still stopping, not restarting", self.name);
                }
                running.stop();
            }
            _ if checked => {
                *worker = Some(self.start());
            }
            _ => {}
        }
    }

    fn start(self: &Arc<Self>) -> WorkerHandle {
        let function = self.function.clone();
        let live = LiveWorker::new(move || function(), *self.sleep.lock());
        let returned = self.returned.clone();
        live.returned().connect(move |value| returned.emit(value));
        let timer: Weak<Self> = Arc::downgrade(self);
        let done = live.done.clone();
        live.done_signal().connect(move |_| {
            let Some(timer) = timer.upgrade() else {
                return;
            };
            // a late notification from a previous worker must not turn off its successor
            let current = timer
                .worker
                .lock()
                .as_ref()
                .map_or(false, |w| Arc::ptr_eq(&w.done, &done));
            if current {
                timer.stop();
            }
        });
        log::debug!("timer '{}' started", self.name);
        self.pool.run_live_worker(live)
    }

    /// Turns the toggle off. The worker stops after its current iteration.
    pub fn stop(self: &Arc<Self>) {
        self.set_checked(false);
    }

    pub fn sleep(&self) -> Duration {
        *self.sleep.lock()
    }

    /// Changes the interval, including for a worker that is already running.
    pub fn set_sleep(&self, sleep: Duration) {
        *self.sleep.lock() = sleep;
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.set_sleep(sleep);
        }
    }
}
