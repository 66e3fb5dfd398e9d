use std::fmt::Write as _;
use std::fs;

use anyhow::{anyhow, bail, Context};

use puzzle_backend::{HasActions, HasParams, Param, ParamConfig, Piece, PieceDefinition, Result};

/// Runs the script in `text`. With an `iterator` Piece (a scan) the script runs once per step.
///
/// `pre` runs first. `post` always runs last, even if `pre` or the body failed. A stop request
/// ends the iteration after the current step. `Save` and `Open` store the three scripts in one
/// file, `pre` and `post` as `#pre ` and `#post ` header lines.
pub struct Script;

fn text(param: &Param) -> String {
    param.value().map(|v| v.to_string()).unwrap_or_default()
}

impl PieceDefinition for Script {
    fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
        piece.define_param("iterator", ParamConfig::text(""))?;
        piece.define_param("pre", ParamConfig::text(""))?;
        piece.define_param("post", ParamConfig::text(""))?;
        piece.define_param("text", ParamConfig::text(""))?;
        piece.define_param("filename", ParamConfig::text(""))?;
        piece.define_param("counter", ParamConfig::int(0).visible(false))?;
        Ok(())
    }

    fn define_actions(&mut self, piece: &mut Piece) -> Result<()> {
        let iterator = piece.param("iterator")?.clone();
        let pre = piece.param("pre")?.clone();
        let post = piece.param("post")?.clone();
        let body = piece.param("text")?.clone();
        let counter = piece.param("counter")?.clone();
        let stop = piece.stop_token().clone();
        let puzzle = piece.puzzle().clone();
        piece.define_action("Run", move |_| {
            let puzzle = puzzle.upgrade()?;
            stop.reset();
            let script = text(&body);
            let main = || -> anyhow::Result<()> {
                puzzle.run(&text(&pre))?;
                let name = text(&iterator);
                if name.is_empty() {
                    puzzle.run(&script)?;
                    return Ok(());
                }
                let steps = puzzle
                    .piece(&name)?
                    .iterator()
                    .cloned()
                    .ok_or_else(|| anyhow!("Piece '{}' cannot be used as an iterator", name))?;
                steps.iterate(&mut |i| {
                    counter.set(i)?;
                    puzzle.run(&script)?;
                    Ok(!stop.is_cancelled())
                })?;
                Ok(())
            };
            let result = main();
            let finally = puzzle.run(&text(&post)).context("post script failed");
            result?;
            finally?;
            Ok(None)
        })?;

        let (pre, post, body) = (
            piece.param("pre")?.clone(),
            piece.param("post")?.clone(),
            piece.param("text")?.clone(),
        );
        let filename = piece.param("filename")?.clone();
        piece.define_action("Save", move |_| {
            let path = text(&filename);
            if path.is_empty() {
                bail!("No filename to save to");
            }
            let mut out = String::new();
            writeln!(out, "#pre {}", text(&pre))?;
            writeln!(out, "#post {}", text(&post))?;
            out.push_str(&text(&body));
            fs::write(&path, out).with_context(|| format!("Cannot write {}", path))?;
            Ok(None)
        })?;

        let (pre, post, body) = (
            piece.param("pre")?.clone(),
            piece.param("post")?.clone(),
            piece.param("text")?.clone(),
        );
        let filename = piece.param("filename")?.clone();
        piece.define_action("Open", move |_| {
            let path = text(&filename);
            let contents =
                fs::read_to_string(&path).with_context(|| format!("Cannot read {}", path))?;
            let mut script = String::new();
            for line in contents.split_inclusive('\n') {
                if let Some(rest) = line.strip_prefix("#pre ") {
                    pre.set(rest.trim_end_matches(['\r', '\n']))?;
                } else if let Some(rest) = line.strip_prefix("#post ") {
                    post.set(rest.trim_end_matches(['\r', '\n']))?;
                } else {
                    script.push_str(line);
                }
            }
            body.set(script)?;
            Ok(None)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pieces::Scan;
    use parking_lot::Mutex;
    use puzzle_backend::{Puzzle, Value};
    use std::sync::Arc;

    fn lab() -> (Puzzle, Arc<Mutex<Vec<String>>>) {
        let puzzle = Puzzle::builder().build().unwrap();
        puzzle.add_piece("scan", Scan).unwrap();
        puzzle.add_piece("script", Script).unwrap();
        let printed = Arc::new(Mutex::new(Vec::new()));
        let p = printed.clone();
        puzzle.set_print_handler(move |text| p.lock().push(text.to_string()));
        (puzzle, printed)
    }

    #[test]
    fn runs_once_per_step_between_pre_and_post() {
        let (puzzle, printed) = lab();
        puzzle
            .run("set:scan:settle:0; set:scan:start:0; set:scan:end:3; set:scan:step:1")
            .unwrap();
        let script = puzzle.piece("script").unwrap();
        script.param("iterator").unwrap().set("scan").unwrap();
        script.param("pre").unwrap().set("print:pre").unwrap();
        script.param("post").unwrap().set("print:post").unwrap();
        script
            .param("text")
            .unwrap()
            .set("print:step {script:counter} at {scan:progress}")
            .unwrap();
        script.action("Run").unwrap().trigger().unwrap();
        assert_eq!(
            *printed.lock(),
            vec![
                "pre",
                "step 0 at 0",
                "step 1 at 1",
                "step 2 at 2",
                "post"
            ]
        );
    }

    #[test]
    fn post_runs_after_a_failure() {
        let (puzzle, printed) = lab();
        puzzle
            .run("set:script:text:run:scan:explode; set:script:post:print:cleanup")
            .unwrap();
        let err = puzzle.action("script:Run").unwrap().trigger().unwrap_err();
        assert_eq!(err.to_string(), "Piece 'scan' has no action 'explode'");
        assert_eq!(*printed.lock(), vec!["cleanup"]);
    }

    #[test]
    fn stop_ends_iteration() {
        let (puzzle, printed) = lab();
        puzzle
            .run("set:scan:settle:0; set:scan:start:0; set:scan:end:10; set:scan:step:1")
            .unwrap();
        let script = puzzle.piece("script").unwrap();
        script.param("iterator").unwrap().set("scan").unwrap();
        script
            .param("text")
            .unwrap()
            .set("print:{script:counter}")
            .unwrap();
        let p = puzzle.clone();
        let counter = script.param("counter").unwrap().clone();
        counter.changed().connect(move |v| {
            if *v == Value::Int(1) {
                p.call_stop();
            }
        });
        script.action("Run").unwrap().trigger().unwrap();
        assert_eq!(*printed.lock(), vec!["0", "1"]);
    }

    #[test]
    fn save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routine.txt");
        let (puzzle, _) = lab();
        let script = puzzle.piece("script").unwrap();
        script.param("pre").unwrap().set("print:a").unwrap();
        script.param("post").unwrap().set("print:b").unwrap();
        script.param("text").unwrap().set("sleep:0\nprint:c").unwrap();
        script
            .param("filename")
            .unwrap()
            .set(path.to_string_lossy().into_owned())
            .unwrap();
        script.action("Save").unwrap().trigger().unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "#pre print:a\n#post print:b\nsleep:0\nprint:c"
        );

        puzzle.run("set:script:pre:; set:script:post:; set:script:text:").unwrap();
        script.action("Open").unwrap().trigger().unwrap();
        assert_eq!(script.param("pre").unwrap().value(), Some(Value::from("print:a")));
        assert_eq!(script.param("post").unwrap().value(), Some(Value::from("print:b")));
        assert_eq!(
            script.param("text").unwrap().value(),
            Some(Value::from("sleep:0\nprint:c"))
        );
    }
}
