#![forbid(unsafe_code)]
//! Evaluation gating. The core treats evaluators as a small capability:
//! run against a workspace directory, report pass/fail. The shipped
//! implementation shells out to configured commands; anything else can
//! implement the trait.

use fl_core::config::EvaluatorSpec;
use fl_core::model::EvaluationResult;
use serde_json::{Map, json};
use std::collections::BTreeMap;
use std::io::Read as _;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// What to do with a required-evaluator failure: gate the transition,
/// or record the outcome and accept anyway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalPolicy {
    Gate,
    RecordOnly,
}

#[derive(Clone, Debug)]
pub struct EvaluatorRun {
    pub name: String,
    pub passed: bool,
    pub required: bool,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

impl EvaluatorRun {
    fn failure(name: &str, required: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            required,
            returncode: -1,
            stdout: String::new(),
            stderr: message.into(),
            duration_ms: 0,
        }
    }
}

pub trait Evaluator {
    fn name(&self) -> &str;
    fn required(&self) -> bool;
    fn run(&self, workspace: &Path) -> EvaluatorRun;
}

/// Runs a configured shell command inside the workspace. `args` is the
/// cross-platform form; a bare `command` string is split on whitespace.
#[derive(Clone, Debug)]
pub struct CommandEvaluator {
    spec: EvaluatorSpec,
}

impl CommandEvaluator {
    pub fn new(spec: EvaluatorSpec) -> Self {
        Self { spec }
    }

    fn argv(&self) -> Option<Vec<String>> {
        if !self.spec.args.is_empty() {
            return Some(self.spec.args.clone());
        }
        if !self.spec.command.is_empty() {
            return Some(self.spec.command.split_whitespace().map(str::to_string).collect());
        }
        None
    }
}

impl Evaluator for CommandEvaluator {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn required(&self) -> bool {
        self.spec.required
    }

    fn run(&self, workspace: &Path) -> EvaluatorRun {
        let name = self.spec.name.clone();
        let required = self.spec.required;

        let Some(argv) = self.argv() else {
            return EvaluatorRun::failure(&name, required, "no command or args configured");
        };
        if argv.is_empty() {
            return EvaluatorRun::failure(&name, required, "empty command");
        }

        // The working directory must stay inside the workspace.
        let cwd = match &self.spec.working_directory {
            Some(sub) => {
                let candidate = workspace.join(sub);
                let contained = candidate
                    .canonicalize()
                    .ok()
                    .zip(workspace.canonicalize().ok())
                    .is_some_and(|(dir, root)| dir.starts_with(&root));
                if !contained {
                    return EvaluatorRun::failure(
                        &name,
                        required,
                        format!("working_directory '{sub}' escapes the workspace"),
                    );
                }
                candidate
            }
            None => workspace.to_path_buf(),
        };

        let start = Instant::now();
        let mut child = match Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                return EvaluatorRun::failure(&name, required, format!("spawn failed: {err}"));
            }
        };

        // Drain the pipes on threads so a chatty evaluator cannot
        // deadlock against a full pipe buffer.
        let stdout_handle = child.stdout.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut out = String::new();
                let _ = pipe.read_to_string(&mut out);
                out
            })
        });
        let stderr_handle = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut out = String::new();
                let _ = pipe.read_to_string(&mut out);
                out
            })
        });

        let timeout = Duration::from_secs(self.spec.timeout_seconds.max(1));
        let status = match child.wait_timeout(timeout) {
            Ok(Some(status)) => Some(status),
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                None
            }
            Err(err) => {
                return EvaluatorRun::failure(&name, required, format!("wait failed: {err}"));
            }
        };

        let stdout = stdout_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let duration_ms = start.elapsed().as_millis() as i64;

        match status {
            Some(status) => EvaluatorRun {
                name,
                passed: status.success(),
                required,
                returncode: status.code().unwrap_or(-1),
                stdout,
                stderr,
                duration_ms,
            },
            None => EvaluatorRun {
                name: name.clone(),
                passed: false,
                required,
                returncode: -1,
                stdout,
                stderr: format!(
                    "evaluator '{name}' timed out after {}s",
                    self.spec.timeout_seconds
                ),
                duration_ms,
            },
        }
    }
}

/// Run every evaluator and aggregate. Only required failures fail the
/// whole evaluation; optional results are recorded either way.
pub fn run_all(evaluators: &[Box<dyn Evaluator>], workspace: &Path) -> EvaluationResult {
    if evaluators.is_empty() {
        return EvaluationResult::passed("evaluator_runner", "no evaluators configured");
    }

    let mut checks = BTreeMap::new();
    let mut summaries = Vec::new();
    let mut results = Vec::new();
    let mut all_passed = true;
    let mut total_duration = 0;

    for evaluator in evaluators {
        let run = evaluator.run(workspace);
        checks.insert(run.name.clone(), run.passed);
        summaries.push(format!("{}: {}", run.name, if run.passed { "passed" } else { "FAILED" }));
        total_duration += run.duration_ms;
        if !run.passed && run.required {
            all_passed = false;
        }
        results.push(json!({
            "name": run.name,
            "passed": run.passed,
            "required": run.required,
            "returncode": run.returncode,
            "stdout": run.stdout,
            "stderr": run.stderr,
            "duration_ms": run.duration_ms,
        }));
    }

    let mut metadata = Map::new();
    metadata.insert("results".to_string(), json!(results));
    EvaluationResult {
        passed: all_passed,
        evaluator: "evaluator_runner".to_string(),
        checks,
        summary: summaries.join("; "),
        duration_ms: total_duration,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, args: &[&str], required: bool) -> EvaluatorSpec {
        EvaluatorSpec {
            name: name.to_string(),
            command: String::new(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_directory: None,
            required,
            timeout_seconds: 10,
        }
    }

    #[cfg(unix)]
    #[test]
    fn command_evaluator_reports_exit_status() {
        let dir = std::env::temp_dir();
        let ok = CommandEvaluator::new(spec("ok", &["true"], true));
        assert!(ok.run(&dir).passed);
        let bad = CommandEvaluator::new(spec("bad", &["false"], true));
        assert!(!bad.run(&dir).passed);
    }

    #[cfg(unix)]
    #[test]
    fn required_failure_gates_optional_does_not() {
        let dir = std::env::temp_dir();
        let evaluators: Vec<Box<dyn Evaluator>> = vec![
            Box::new(CommandEvaluator::new(spec("ok", &["true"], true))),
            Box::new(CommandEvaluator::new(spec("flaky", &["false"], false))),
        ];
        let result = run_all(&evaluators, &dir);
        assert!(result.passed, "optional failure must not gate");
        assert_eq!(result.checks.get("flaky"), Some(&false));

        let evaluators: Vec<Box<dyn Evaluator>> = vec![Box::new(CommandEvaluator::new(spec(
            "req",
            &["false"],
            true,
        )))];
        assert!(!run_all(&evaluators, &dir).passed);
    }

    #[test]
    fn escaping_working_directory_fails_the_run() {
        let mut bad = spec("escape", &["true"], true);
        bad.working_directory = Some("../..".to_string());
        let run = CommandEvaluator::new(bad).run(&std::env::temp_dir());
        assert!(!run.passed);
        assert!(run.stderr.contains("escapes"));
    }

    #[test]
    fn empty_evaluator_list_passes() {
        let result = run_all(&[], Path::new("/nonexistent"));
        assert!(result.passed);
    }
}
