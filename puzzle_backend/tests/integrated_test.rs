use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use parking_lot::Mutex;

use puzzle_backend::param::ParamConfig;
use puzzle_backend::piece::{HasActions, HasParams, Piece, PieceDefinition};
use puzzle_backend::threads::{LiveWorker, Worker};
use puzzle_backend::{Error, Puzzle, Result, Value};

const TIMEOUT: Duration = Duration::from_secs(10);

// A stage with a slow, hardware-like setter and a position readout.
struct Stage {
    position: Arc<Mutex<f64>>,
    moves: Arc<AtomicUsize>,
}

impl Stage {
    fn new() -> Self {
        Self {
            position: Arc::new(Mutex::new(0.)),
            moves: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl PieceDefinition for Stage {
    fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
        let target = piece.define_param("target", ParamConfig::float(0.).range(-10., 10.))?;
        let (position, moves) = (self.position.clone(), self.moves.clone());
        target.attach_setter(move |v| {
            thread::sleep(Duration::from_millis(5));
            *position.lock() = v.as_float().unwrap_or_default();
            moves.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });
        let position = self.position.clone();
        target.attach_getter(move || Ok(Value::Float(*position.lock())));
        piece.define_param("label", ParamConfig::text("stage"))?;
        Ok(())
    }

    fn define_readouts(&mut self, piece: &mut Piece) -> Result<()> {
        let position = self.position.clone();
        piece.define_readout("position", puzzle_backend::ParamKind::float(), move || {
            Ok(Value::Float(*position.lock()))
        })?;
        Ok(())
    }
}

// Moves the stage through the puzzle, the way one Piece drives another.
struct Mover;

impl PieceDefinition for Mover {
    fn define_actions(&mut self, piece: &mut Piece) -> Result<()> {
        let puzzle = piece.puzzle().clone();
        piece.define_action("home", move |_| {
            let puzzle = puzzle.upgrade()?;
            puzzle.param("stage:target")?.set(0.)?;
            Ok(Some(Value::from("homed")))
        })?;
        Ok(())
    }
}

fn lab() -> Puzzle {
    let _ = env_logger::builder().is_test(true).try_init();
    let puzzle = Puzzle::builder()
        .name("lab")
        .worker_threads(2)
        .build()
        .unwrap();
    puzzle.add_piece("stage", Stage::new()).unwrap();
    puzzle.add_piece("mover", Mover).unwrap();
    puzzle
}

#[test]
fn script_drives_pieces() {
    let puzzle = lab();
    let printed = Arc::new(Mutex::new(Vec::new()));
    let p = printed.clone();
    puzzle.set_print_handler(move |text| p.lock().push(text.to_string()));

    puzzle
        .run(
            "set:stage:target:12\n\
             get:stage:position\n\
             print:at {stage:position;:.1f} ({stage:label})\n\
             run:mover:home; print:back at {stage:position}",
        )
        .unwrap();

    // the range clamps 12 to 10
    assert_eq!(*printed.lock(), vec!["at 10.0 (stage)", "back at 0.0"]);
    assert_eq!(
        puzzle.param("stage:target").unwrap().value(),
        Some(Value::Float(0.))
    );
}

#[test]
fn setter_then_getter_resolution() {
    let puzzle = lab();
    let target = puzzle.param("stage:target").unwrap();
    assert!(target.is_highlighted());
    assert_eq!(target.value(), None);

    let changes = Arc::new(AtomicUsize::new(0));
    let c = changes.clone();
    target.changed().connect(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(target.set(2.5).unwrap(), Value::Float(2.5));
    assert!(!target.is_highlighted());
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert_eq!(
        puzzle.get_values("stage:position, stage:label").unwrap(),
        vec![Some(Value::Float(2.5)), Some(Value::from("stage"))]
    );
}

#[test]
fn threaded_set_applies_on_owner_thread() {
    let puzzle = lab();
    let target = puzzle.param("stage:target").unwrap();
    let owner = thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    target.changed().connect(move |v| s.lock().push((v.clone(), thread::current().id())));

    let handle = target
        .set_value_threaded(Some(Value::Float(3.)), puzzle.pool())
        .unwrap();
    assert!(target.is_highlighted());
    assert!(puzzle.process_events_until(TIMEOUT, || {
        handle.is_done() && !seen.lock().is_empty() && !target.is_highlighted()
    }));
    assert_eq!(*seen.lock(), vec![(Value::Float(3.), owner)]);
    assert_eq!(target.value(), Some(Value::Float(3.)));

    let readout = puzzle.param("stage:position").unwrap();
    readout.get_value_threaded(puzzle.pool());
    assert!(puzzle.process_events_until(TIMEOUT, || readout.value() == Some(Value::Float(3.))));
}

#[test]
fn worker_errors_reach_the_reporter() {
    let puzzle = lab();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let r = reported.clone();
    puzzle.set_error_reporter(move |e| r.lock().push(e.to_string()));

    let handle = puzzle.run_worker(Worker::<()>::new(|| Err(anyhow!("stage jammed"))));
    assert!(puzzle.process_events_until(TIMEOUT, || !reported.lock().is_empty()));
    assert!(handle.is_done());
    assert_eq!(*reported.lock(), vec!["stage jammed".to_string()]);
}

#[test]
fn global_stop_reaches_live_workers() {
    let puzzle = lab();
    let polls = Arc::new(AtomicUsize::new(0));
    let p = polls.clone();
    let position = puzzle.param("stage:position").unwrap();
    let worker = LiveWorker::new(
        move || {
            p.fetch_add(1, Ordering::SeqCst);
            Ok(position.get_value().map_err(Error::into_anyhow)?)
        },
        Duration::from_millis(1),
    );
    let handle = puzzle.run_live_worker(worker);
    assert!(puzzle.process_events_until(TIMEOUT, || polls.load(Ordering::SeqCst) >= 3));

    assert!(puzzle.handle_shortcut("F3").unwrap());
    assert!(handle.is_stopping());
    assert!(puzzle.process_events_until(TIMEOUT, || handle.is_done()));
    assert!(puzzle.piece("stage").unwrap().stop_token().is_cancelled());
}

#[test]
fn dropping_the_puzzle_stops_live_workers() {
    let puzzle = lab();
    let handle = puzzle.run_live_worker(LiveWorker::new(|| Ok(()), Duration::from_millis(1)));
    drop(puzzle);
    assert!(handle.is_stopping());
    let start = Instant::now();
    while !handle.is_done() && start.elapsed() < TIMEOUT {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(handle.is_done());
}

#[test]
fn lookup_errors_abort_scripts() {
    let puzzle = lab();
    let err = puzzle
        .run("set:stage:label:moved\nrun:mover:park\nset:stage:label:never")
        .unwrap_err();
    assert_eq!(err.to_string(), "Piece 'mover' has no action 'park'");
    assert_eq!(
        puzzle.param("stage:label").unwrap().value(),
        Some(Value::from("moved"))
    );
    assert!(puzzle.piece("mover").unwrap().action("home").is_ok());
}
