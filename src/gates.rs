//! Gate Runner (C6): evaluates preconditions, executes gate commands in
//! order through C1, and aggregates pass/fail results with fatality
//! semantics (spec.md §4.6).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exec::{ExecSpec, OutputSink, run};
use crate::events::EventEmitter;

/// One configured check. `precondition` is a path, relative to the repo
/// root, that must exist for the gate to run at all.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateSpec {
    pub name: String,
    pub argv: Vec<String>,
    #[serde(default)]
    pub precondition: Option<PathBuf>,
    pub fatal: bool,
    #[serde(default = "default_gate_timeout")]
    pub timeout_secs: u64,
}

fn default_gate_timeout() -> u64 {
    300
}

impl GateSpec {
    pub fn new(name: impl Into<String>, argv: Vec<String>, fatal: bool) -> Self {
        Self {
            name: name.into(),
            argv,
            precondition: None,
            fatal,
            timeout_secs: default_gate_timeout(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateResult {
    pub name: String,
    pub fatal: bool,
    pub passed: bool,
    pub skipped: bool,
    pub duration: Duration,
    pub output_tail: String,
}

#[derive(Debug, Clone, Default)]
pub struct GateRunResult {
    pub all_fatal_passed: bool,
    pub per_gate: Vec<GateResult>,
}

impl GateRunResult {
    /// The captured output of the first fatal gate that failed, for feeding
    /// the FIX prompt as `previous_feedback`.
    pub fn first_fatal_failure(&self) -> Option<&GateResult> {
        self.per_gate.iter().find(|g| g.fatal && !g.passed && !g.skipped)
    }
}

const OUTPUT_TAIL_CHARS: usize = 2000;

fn tail(s: &str, n: usize) -> String {
    if s.len() <= n {
        s.to_string()
    } else {
        s[s.len() - n..].to_string()
    }
}

/// Run every gate in `gates` sequentially. Stops running further gates as
/// soon as a fatal one fails, since the remainder of the sequence is
/// aborted (spec.md glossary, "Fatal gate").
pub async fn run_gates(
    gates: &[GateSpec],
    repo_root: &Path,
    task_id: &str,
    phase: &str,
    emitter: &EventEmitter,
) -> GateRunResult {
    use crate::events::Event;

    emitter.emit(Event::GatesStarted {
        task_id: task_id.to_string(),
        phase: phase.to_string(),
    });

    let mut result = GateRunResult {
        all_fatal_passed: true,
        per_gate: Vec::new(),
    };

    for gate in gates {
        if let Some(precondition) = &gate.precondition {
            if !repo_root.join(precondition).exists() {
                result.per_gate.push(GateResult {
                    name: gate.name.clone(),
                    fatal: gate.fatal,
                    passed: false,
                    skipped: true,
                    duration: Duration::ZERO,
                    output_tail: String::new(),
                });
                continue;
            }
        }

        let spec = ExecSpec::new(
            gate.argv.clone(),
            repo_root,
            Duration::from_secs(gate.timeout_secs),
        );
        let outcome = run(spec, OutputSink::Collect).await;

        let (passed, duration, output_tail) = match outcome {
            Ok(exec_result) => {
                let combined = format!("{}{}", exec_result.stdout, exec_result.stderr);
                (exec_result.succeeded(), exec_result.duration, tail(&combined, OUTPUT_TAIL_CHARS))
            }
            Err(e) => (false, Duration::ZERO, e.to_string()),
        };

        if passed {
            emitter.emit(Event::GatePass {
                task_id: task_id.to_string(),
                gate: gate.name.clone(),
                duration_ms: duration.as_millis() as u64,
            });
        } else {
            emitter.emit(Event::GateFail {
                task_id: task_id.to_string(),
                gate: gate.name.clone(),
                fatal: gate.fatal,
                duration_ms: duration.as_millis() as u64,
                output_tail: output_tail.clone(),
            });
        }

        let fatal_failed = gate.fatal && !passed;
        result.per_gate.push(GateResult {
            name: gate.name.clone(),
            fatal: gate.fatal,
            passed,
            skipped: false,
            duration,
            output_tail,
        });

        if fatal_failed {
            result.all_fatal_passed = false;
            break;
        }
    }

    emitter.emit(Event::GatesCompleted {
        task_id: task_id.to_string(),
        all_fatal_passed: result.all_fatal_passed,
    });

    result
}
