//! # Scripts
//!
//! A small line-oriented command language for driving a [`Puzzle`] from text, e.g. a script Piece or
//! a setup file.
//!
//! Instructions are separated by newlines or by `"; "`. A literal `"; "` inside an argument is
//! written as `\;` followed by a space. Lines starting with `#` are comments.
//!
//! | Instruction                   | Effect                                                     |
//! |-------------------------------|------------------------------------------------------------|
//! | `set:piece:param:value`       | `set_value(value)`; the value may contain `:`               |
//! | `run:piece:action`            | calls the action; the action name may contain `:`           |
//! | `get:piece:param`             | `get_value()`, e.g. to refresh a readout                    |
//! | `sleep:seconds`               | blocks the calling thread                                   |
//! | `prompt:text`                 | interpolates `text` and hands it to the prompt handler      |
//! | `print:text`                  | interpolates `text` and hands it to the print handler       |
//!
//! Execution is sequential on the calling thread. Pending event-loop tasks are processed after every
//! instruction. The first failing instruction aborts the rest of the script.
//!
//! ```
//! use puzzle_backend::param::ParamConfig;
//! use puzzle_backend::piece::{HasParams, Piece, PieceDefinition};
//! use puzzle_backend::puzzle::Puzzle;
//! use puzzle_backend::value::Value;
//! use puzzle_backend::{parse, Result};
//!
//! struct Stage;
//!
//! impl PieceDefinition for Stage {
//!     fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
//!         piece.define_param("x", ParamConfig::float(0.))?;
//!         Ok(())
//!     }
//! }
//!
//! let puzzle = Puzzle::builder().build().unwrap();
//! puzzle.add_piece("stage", Stage).unwrap();
//! parse::run("set:stage:x:2.5; # comment lines are skipped", &puzzle).unwrap();
//! assert_eq!(puzzle.param("stage:x").unwrap().value(), Some(Value::Float(2.5)));
//! assert_eq!(parse::format("x = {stage:x;:.1f} mm", &puzzle).unwrap(), "x = 2.5 mm");
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;

use crate::error::{Error, Result};
use crate::format_spec::format_value;
use crate::param::Param;
use crate::piece::{HasActions, HasParams};
use crate::puzzle::Puzzle;

const SEMICOLON: &str = "<!--semicolon-->";

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{[a-zA-Z0-9:; _\-\.]+\}").expect("constant pattern"))
}

/// Resolves a comma+space separated list of `piece:param` references.
pub fn parse_params(text: &str, puzzle: &Puzzle) -> Result<Vec<Arc<Param>>> {
    text.split(", ")
        .map(|token| {
            let parse_error = || Error::ParamParse {
                token: token.to_string(),
            };
            let mut parts = token.split(':');
            let (piece, name) = match (parts.next(), parts.next(), parts.next()) {
                (Some(piece), Some(name), None) => (piece, name),
                _ => return Err(parse_error()),
            };
            let piece = puzzle.piece(piece).map_err(|_| parse_error())?;
            let param = piece.param(name).map_err(|_| parse_error())?;
            Ok(param.clone())
        })
        .collect()
}

/// Executes a script against `puzzle`.
pub fn run(text: &str, puzzle: &Puzzle) -> Result<()> {
    let text = text.replace("\\;", SEMICOLON).replace("; ", "\n");
    for instruction in text.split('\n') {
        if instruction.is_empty() || instruction.starts_with('#') {
            continue;
        }
        log::debug!("script: {}", instruction);
        execute(instruction, puzzle)?;
        puzzle.process_events();
    }
    Ok(())
}

fn execute(instruction: &str, puzzle: &Puzzle) -> Result<()> {
    let (task, rest) = instruction.split_once(':').unwrap_or((instruction, ""));
    match task {
        "set" => {
            let mut parts = rest.splitn(3, ':');
            let (piece, param, value) = match (parts.next(), parts.next(), parts.next()) {
                (Some(piece), Some(param), Some(value)) => (piece, param, value),
                _ => return Err(Error::syntax(instruction)),
            };
            let value = value.replace(SEMICOLON, ";");
            puzzle.piece(piece)?.param(param)?.set_value(Some(value.into()))?;
        }
        "run" => {
            let (piece, action) = rest
                .split_once(':')
                .ok_or_else(|| Error::syntax(instruction))?;
            puzzle.piece(piece)?.action(action)?.trigger()?;
        }
        "get" => {
            let (piece, param) = rest
                .split_once(':')
                .ok_or_else(|| Error::syntax(instruction))?;
            puzzle.piece(piece)?.param(param)?.get_value()?;
        }
        "sleep" => {
            let seconds: f64 = rest
                .split(':')
                .next()
                .and_then(|s| s.trim().parse().ok())
                .filter(|s: &f64| s.is_finite() && *s >= 0.)
                .ok_or_else(|| Error::syntax(instruction))?;
            std::thread::sleep(Duration::from_secs_f64(seconds));
        }
        "prompt" => {
            let text = format(rest, puzzle)?;
            puzzle.prompt(&text)?;
        }
        "print" => {
            let text = format(rest, puzzle)?;
            puzzle.print(&text);
        }
        _ => return Err(Error::syntax(instruction)),
    }
    Ok(())
}

/// Replaces `{piece:param}` with the param's value and `{piece:param;:spec}` with the value
/// formatted by a format spec (`{laser:power;:.1f}`). Getters are called.
///
/// Only braces enclosing letters, digits, space and `: ; _ - .` are considered. Anything else is left
/// untouched. Params without a value yet render as an empty string.
pub fn format(text: &str, puzzle: &Puzzle) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for found in reference_pattern().find_iter(text) {
        out.push_str(&text[last..found.start()]);
        last = found.end();
        let inner = &found.as_str()[1..found.as_str().len() - 1];
        let elements: Vec<&str> = inner.split(';').collect();
        let param = parse_params(elements[0], puzzle)?
            .pop()
            .ok_or_else(|| Error::ParamParse {
                token: elements[0].to_string(),
            })?;
        let value = param.get_value()?;
        match (elements.as_slice(), value) {
            ([_], Some(value)) => out.push_str(&value.to_string()),
            ([_, spec], Some(value)) => {
                let spec = spec.strip_prefix(':').unwrap_or(*spec);
                out.push_str(&format_value(&value, spec)?);
            }
            ([_] | [_, _], None) => {}
            _ => {
                return Err(Error::Format {
                    spec: inner.to_string(),
                })
            }
        }
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::param::ParamConfig;
    use crate::piece::{Piece, PieceDefinition};
    use crate::value::Value;
    use parking_lot::Mutex;

    struct A;

    impl PieceDefinition for A {
        fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
            piece.define_param("x", ParamConfig::int(0))?;
            piece.define_param("f", ParamConfig::float(5.))?;
            piece.define_param("t", ParamConfig::text(""))?;
            let s = piece.define_param("s", ParamConfig::int(0))?;
            s.attach_setter(|v| Ok(Some(v)));
            Ok(())
        }
    }

    struct B;

    impl PieceDefinition for B {
        fn define_actions(&mut self, piece: &mut Piece) -> Result<()> {
            let puzzle = piece.puzzle().clone();
            piece.define_action("go", move |_| {
                puzzle.upgrade()?.param("a:x")?.set(5)?;
                Ok(None)
            })?;
            piece.define_action("go:far", |_| Ok(None))?;
            Ok(())
        }
    }

    fn puzzle() -> Puzzle {
        let puzzle = Puzzle::builder().build().unwrap();
        puzzle.add_piece("a", A).unwrap();
        puzzle.add_piece("b", B).unwrap();
        puzzle
    }

    mod run {
        use super::*;

        #[test]
        fn action_then_get() {
            let puzzle = puzzle();
            run("run:b:go\nget:a:x", &puzzle).unwrap();
            assert_eq!(puzzle.param("a:x").unwrap().value(), Some(Value::Int(5)));
        }

        #[test]
        fn escaped_semicolon_is_kept() {
            let puzzle = puzzle();
            run("set:a:t:foo\\; bar", &puzzle).unwrap();
            assert_eq!(
                puzzle.param("a:t").unwrap().value(),
                Some(Value::from("foo; bar"))
            );
        }

        #[test]
        fn set_value_keeps_colons() {
            let puzzle = puzzle();
            run("set:a:t:12:30:00; set:a:x:3", &puzzle).unwrap();
            assert_eq!(
                puzzle.param("a:t").unwrap().value(),
                Some(Value::from("12:30:00"))
            );
            assert_eq!(puzzle.param("a:x").unwrap().value(), Some(Value::Int(3)));
        }

        #[test]
        fn action_names_may_contain_colons() {
            run("run:b:go:far", &puzzle()).unwrap();
        }

        #[test]
        fn comments_and_blank_lines() {
            let puzzle = puzzle();
            run("# set:a:x:1\n\nset:a:x:2\n", &puzzle).unwrap();
            assert_eq!(puzzle.param("a:x").unwrap().value(), Some(Value::Int(2)));
        }

        #[test]
        fn unknown_task() {
            let err = run("jump:a:x", &puzzle()).unwrap_err();
            assert_eq!(err.to_string(), "Unknown task in jump:a:x");
        }

        #[test]
        fn failure_aborts_remaining_lines() {
            let puzzle = puzzle();
            let err = run("set:a:x:1\nrun:nope:go\nset:a:x:2", &puzzle).unwrap_err();
            assert!(matches!(err, Error::MissingPiece { .. }));
            assert_eq!(puzzle.param("a:x").unwrap().value(), Some(Value::Int(1)));
        }

        #[test]
        fn malformed_arguments() {
            let puzzle = puzzle();
            assert!(matches!(run("set:a:x", &puzzle), Err(Error::Syntax { .. })));
            assert!(matches!(run("sleep:soon", &puzzle), Err(Error::Syntax { .. })));
            assert!(matches!(run("run:b", &puzzle), Err(Error::Syntax { .. })));
            assert!(matches!(run("set:a:x:abc", &puzzle), Err(Error::Coercion { .. })));
        }

        #[test]
        fn print_and_prompt_use_handlers() {
            let puzzle = puzzle();
            let lines = Arc::new(Mutex::new(Vec::new()));
            let (l1, l2) = (lines.clone(), lines.clone());
            puzzle.set_print_handler(move |text| l1.lock().push(format!("print {}", text)));
            puzzle.set_prompt_handler(move |text| {
                l2.lock().push(format!("prompt {}", text));
                Ok(())
            });
            run("set:a:x:7; print:x is {a:x}: ok; prompt:done; sleep:0", &puzzle).unwrap();
            assert_eq!(
                *lines.lock(),
                vec!["print x is 7: ok".to_string(), "prompt done".to_string()]
            );
        }
    }

    mod interpolation {
        use super::*;

        #[test]
        fn plain_and_formatted() {
            let puzzle = puzzle();
            puzzle.param("a:x").unwrap().set(5).unwrap();
            assert_eq!(format("Value is {a:x}", &puzzle).unwrap(), "Value is 5");
            assert_eq!(format("Value is {a:f;:.2f}", &puzzle).unwrap(), "Value is 5.00");
            assert_eq!(format("Value is {a:f}", &puzzle).unwrap(), "Value is 5.0");
        }

        #[test]
        fn malformed_braces_left_verbatim() {
            let puzzle = puzzle();
            assert_eq!(format("{a:x!}", &puzzle).unwrap(), "{a:x!}");
            assert_eq!(format("{}", &puzzle).unwrap(), "{}");
            assert_eq!(format("{a:x", &puzzle).unwrap(), "{a:x");
        }

        #[test]
        fn unset_value_is_empty() {
            assert_eq!(format("[{a:s}]", &puzzle()).unwrap(), "[]");
        }

        #[test]
        fn unknown_reference_is_an_error() {
            let err = format("{a:nope}", &puzzle()).unwrap_err();
            assert_eq!(err.to_string(), "Parameter parse error for a:nope");
            let err = format("{zz:x}", &puzzle()).unwrap_err();
            assert_eq!(err.to_string(), "Parameter parse error for zz:x");
        }
    }

    #[test]
    fn params_list() {
        let puzzle = puzzle();
        let params = parse_params("a:x, a:f", &puzzle).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[1].name(), "f");
        assert!(matches!(
            parse_params("a:x,a:f", &puzzle),
            Err(Error::ParamParse { .. })
        ));
        // an unknown piece is reported like any other unresolvable token
        let err = parse_params("a:x, c:x", &puzzle).unwrap_err();
        assert!(matches!(&err, Error::ParamParse { token } if token == "c:x"));
        assert_eq!(err.to_string(), "Parameter parse error for c:x");
    }
}
