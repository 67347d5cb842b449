//! Task Loop Engine (C8): the central per-task state machine (spec.md §4.8).
//!
//! ```text
//!   IMPL --signal ok--> TEST --signal ok--> GATES --all fatal pass--> REVIEW --approved--> Done
//!    ^ signal bad        ^ signal bad/       ^ fatal fail              ^ rejected
//!    +---- retry         | guardrail revert  |                         |
//!           ^            +---- retry         +---- FIX --signal ok-----+ (re-enters GATES)
//!           |                                      ^ signal bad
//!           +-------------- rejected feedback -----+     retry
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::agent::{AgentError, AgentInvocation, AgentRunner};
use crate::events::{Event, EventEmitter};
use crate::gates::{GateSpec, run_gates};
use crate::guardrail::{self, AllowList};
use crate::prompts::{self, GateFailureContext};
use crate::session::SessionToken;
use crate::signal::{self, SignalKind};
use crate::tasklist::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Impl,
    Test,
    Gates,
    Fix,
    Review,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Impl => "impl",
            Phase::Test => "test",
            Phase::Gates => "gates",
            Phase::Fix => "fix",
            Phase::Review => "review",
        }
    }
}

/// Budgets and configuration for one task's run through the loop.
pub struct TaskLoopConfig {
    pub max_iterations: u32,
    pub agent_timeout: Duration,
    pub agent_argv: Vec<String>,
    pub worktree: PathBuf,
    pub gates: Vec<GateSpec>,
    pub test_allow_list: AllowList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Done { iterations: u32 },
    Failed { reason: String, iterations: u32 },
    Aborted { iterations: u32 },
}

pub struct TaskLoop<'a, R: AgentRunner> {
    config: &'a TaskLoopConfig,
    runner: &'a R,
    emitter: &'a EventEmitter,
    session_token: &'a SessionToken,
}

impl<'a, R: AgentRunner> TaskLoop<'a, R> {
    pub fn new(
        config: &'a TaskLoopConfig,
        runner: &'a R,
        emitter: &'a EventEmitter,
        session_token: &'a SessionToken,
    ) -> Self {
        Self {
            config,
            runner,
            emitter,
            session_token,
        }
    }

    /// Run `task` through the full state machine until it's done, fails, or
    /// is aborted. `should_abort` is polled before every phase transition,
    /// before every agent invocation, and is the loop's sole cancellation
    /// mechanism (spec.md §4.9's cancellation contract).
    pub async fn run(&self, task: &Task, should_abort: &dyn Fn() -> bool) -> TaskOutcome {
        self.emitter.emit(Event::TaskStarted { task_id: task.id.clone() });

        let mut phase = Phase::Impl;
        let mut iterations: u32 = 0;
        let mut feedback: Option<String> = None;
        let mut last_fatal_gate_owned: Option<(String, Vec<String>, String)> = None;

        loop {
            if should_abort() {
                self.emitter.emit(Event::TaskFailed {
                    task_id: task.id.clone(),
                    reason: "aborted".to_string(),
                });
                return TaskOutcome::Aborted { iterations };
            }

            if iterations >= self.config.max_iterations {
                let reason = "max_iterations".to_string();
                self.emitter.emit(Event::TaskFailed {
                    task_id: task.id.clone(),
                    reason: reason.clone(),
                });
                return TaskOutcome::Failed { reason, iterations };
            }

            self.emitter.emit(Event::IterationStarted {
                task_id: task.id.clone(),
                phase: phase.name().to_string(),
                iteration: iterations,
            });

            let step = match phase {
                Phase::Impl => self.run_impl(task, &mut iterations, &feedback).await,
                Phase::Test => self.run_test(task, &mut iterations, &feedback).await,
                Phase::Gates => {
                    self.run_gates_phase(task, &mut last_fatal_gate_owned).await
                }
                Phase::Fix => {
                    let failure = last_fatal_gate_owned.clone();
                    self.run_fix(task, &mut iterations, failure).await
                }
                Phase::Review => self.run_review(task, &mut iterations, &feedback).await,
            };

            self.emitter.emit(Event::IterationEnded {
                task_id: task.id.clone(),
                phase: phase.name().to_string(),
                iteration: iterations,
            });

            match step {
                StepOutcome::Advance(next) => {
                    feedback = None;
                    phase = next;
                }
                StepOutcome::Retry(new_feedback) => {
                    feedback = Some(new_feedback);
                }
                StepOutcome::RejectedToImpl(new_feedback) => {
                    feedback = Some(new_feedback);
                    phase = Phase::Impl;
                }
                StepOutcome::Done => {
                    self.emitter.emit(Event::TaskCompleted { task_id: task.id.clone() });
                    return TaskOutcome::Done { iterations };
                }
                StepOutcome::FatalError(reason) => {
                    self.emitter.emit(Event::TaskFailed {
                        task_id: task.id.clone(),
                        reason: reason.clone(),
                    });
                    return TaskOutcome::Failed { reason, iterations };
                }
            }
        }
    }

    async fn invoke(
        &self,
        task: &Task,
        role: &str,
        prompt: String,
    ) -> Result<String, AgentError> {
        self.emitter.emit(Event::AgentStarted {
            task_id: task.id.clone(),
            role: role.to_string(),
            iteration: 0,
        });
        let invocation = AgentInvocation {
            argv: self.config.agent_argv.clone(),
            cwd: self.config.worktree.clone(),
            prompt,
            timeout: self.config.agent_timeout,
            task_id: task.id.clone(),
            role: role.to_string(),
        };
        let result = self.runner.run_turn(invocation, self.emitter).await;
        match &result {
            Ok(_) => self.emitter.emit(Event::AgentCompleted {
                task_id: task.id.clone(),
                role: role.to_string(),
                signal: None,
            }),
            Err(e) => self.emitter.emit(Event::AgentFailed {
                task_id: task.id.clone(),
                role: role.to_string(),
                reason: e.to_string(),
            }),
        }
        result
    }

    async fn run_impl(
        &self,
        task: &Task,
        iterations: &mut u32,
        feedback: &Option<String>,
    ) -> StepOutcome {
        *iterations += 1;
        let prompt = prompts::implementation_prompt(task, self.session_token, feedback.as_deref());
        let output = match self.invoke(task, "implementation", prompt).await {
            Ok(o) => o,
            Err(e) => return StepOutcome::Retry(format!("agent invocation failed: {e}")),
        };

        match signal::parse_signal(&output, SignalKind::TaskDone, self.session_token) {
            Ok(_) => {
                self.emitter.emit(Event::SignalAccepted {
                    task_id: task.id.clone(),
                    kind: "task-done".to_string(),
                });
                StepOutcome::Advance(Phase::Test)
            }
            Err(signal::SignalError::NoSignal) => {
                self.emitter.emit(Event::SignalRejected {
                    task_id: task.id.clone(),
                    reason: "no_signal".to_string(),
                });
                StepOutcome::Retry("no completion signal found; emit <task-done session=\"...\"> when finished".into())
            }
            Err(signal::SignalError::InvalidToken) => {
                self.emitter.emit(Event::SignalRejected {
                    task_id: task.id.clone(),
                    reason: "invalid_token".to_string(),
                });
                StepOutcome::Retry("signal carried the wrong session token".into())
            }
        }
    }

    async fn run_test(
        &self,
        task: &Task,
        iterations: &mut u32,
        feedback: &Option<String>,
    ) -> StepOutcome {
        *iterations += 1;
        let globs = self.config.test_allow_list.patterns_display();
        let prompt = prompts::test_writing_prompt(task, self.session_token, feedback.as_deref(), &globs);

        let before = match guardrail::Snapshot::capture(&self.config.worktree).await {
            Ok(s) => s,
            Err(e) => return StepOutcome::FatalError(format!("guardrail snapshot failed: {e}")),
        };

        let output = match self.invoke(task, "test-writing", prompt).await {
            Ok(o) => o,
            Err(e) => return StepOutcome::Retry(format!("agent invocation failed: {e}")),
        };

        let after = match guardrail::Snapshot::capture(&self.config.worktree).await {
            Ok(s) => s,
            Err(e) => return StepOutcome::FatalError(format!("guardrail snapshot failed: {e}")),
        };

        let reverted = match guardrail::enforce(&self.config.worktree, &before, &after, &self.config.test_allow_list).await {
            Ok(r) => r,
            Err(e) => return StepOutcome::FatalError(format!("guardrail enforcement failed: {e}")),
        };
        for (path, reason) in &reverted {
            self.emitter.emit(Event::GuardrailRevert {
                task_id: task.id.clone(),
                path: path.display().to_string(),
                reason: reason.clone(),
            });
        }

        match signal::parse_signal(&output, SignalKind::TestsDone, self.session_token) {
            Ok(_) if !reverted.is_empty() && no_test_files_remain(&self.config.worktree, &self.config.test_allow_list) => {
                self.emitter.emit(Event::SignalRejected {
                    task_id: task.id.clone(),
                    reason: "guardrail_emptied_declaration".to_string(),
                });
                StepOutcome::Retry("guardrail reverted all writes; no test files remain, try again within the allow-list".into())
            }
            Ok(_) => {
                self.emitter.emit(Event::SignalAccepted {
                    task_id: task.id.clone(),
                    kind: "tests-done".to_string(),
                });
                StepOutcome::Advance(Phase::Gates)
            }
            Err(signal::SignalError::NoSignal) => {
                self.emitter.emit(Event::SignalRejected {
                    task_id: task.id.clone(),
                    reason: "no_signal".to_string(),
                });
                StepOutcome::Retry("no completion signal found; emit <tests-done session=\"...\"> when finished".into())
            }
            Err(signal::SignalError::InvalidToken) => {
                self.emitter.emit(Event::SignalRejected {
                    task_id: task.id.clone(),
                    reason: "invalid_token".to_string(),
                });
                StepOutcome::Retry("signal carried the wrong session token".into())
            }
        }
    }

    async fn run_gates_phase(
        &self,
        task: &Task,
        last_fatal_gate_owned: &mut Option<(String, Vec<String>, String)>,
    ) -> StepOutcome {
        let result = run_gates(&self.config.gates, &self.config.worktree, &task.id, "full", self.emitter).await;
        if result.all_fatal_passed {
            *last_fatal_gate_owned = None;
            StepOutcome::Advance(Phase::Review)
        } else if let Some(failure) = result.first_fatal_failure() {
            let gate_spec = self.config.gates.iter().find(|g| g.name == failure.name);
            let argv = gate_spec.map(|g| g.argv.clone()).unwrap_or_default();
            *last_fatal_gate_owned = Some((failure.name.clone(), argv, failure.output_tail.clone()));
            StepOutcome::Advance(Phase::Fix)
        } else {
            StepOutcome::FatalError("gate sequence failed with no identifiable fatal gate".into())
        }
    }

    async fn run_fix(
        &self,
        task: &Task,
        iterations: &mut u32,
        failure: Option<(String, Vec<String>, String)>,
    ) -> StepOutcome {
        let Some((gate_name, argv, output_tail)) = failure else {
            return StepOutcome::FatalError("fix phase entered with no recorded gate failure".into());
        };
        *iterations += 1;
        self.emitter.emit(Event::FixLoopStarted {
            task_id: task.id.clone(),
            gate: gate_name.clone(),
        });
        self.emitter.emit(Event::FixLoopIteration {
            task_id: task.id.clone(),
            attempt: *iterations,
        });

        let ctx = GateFailureContext {
            gate_name: &gate_name,
            argv: &argv,
            output_tail: &output_tail,
        };
        let prompt = prompts::fix_prompt(task, self.session_token, &ctx);

        let output = match self.invoke(task, "fix", prompt).await {
            Ok(o) => o,
            Err(e) => return StepOutcome::Retry(format!("agent invocation failed: {e}")),
        };

        match signal::parse_signal(&output, SignalKind::FixDone, self.session_token) {
            Ok(_) => {
                self.emitter.emit(Event::SignalAccepted {
                    task_id: task.id.clone(),
                    kind: "fix-done".to_string(),
                });
                self.emitter.emit(Event::FixLoopEnded {
                    task_id: task.id.clone(),
                    resolved: true,
                });
                StepOutcome::Advance(Phase::Gates)
            }
            Err(_) => {
                self.emitter.emit(Event::SignalRejected {
                    task_id: task.id.clone(),
                    reason: "fix_signal_invalid".to_string(),
                });
                self.emitter.emit(Event::FixLoopEnded {
                    task_id: task.id.clone(),
                    resolved: false,
                });
                StepOutcome::Retry("fix attempt did not emit a valid fix-done signal".into())
            }
        }
    }

    async fn run_review(
        &self,
        task: &Task,
        iterations: &mut u32,
        feedback: &Option<String>,
    ) -> StepOutcome {
        *iterations += 1;
        let prompt = prompts::review_prompt(task, self.session_token, feedback.as_deref());
        let output = match self.invoke(task, "review", prompt).await {
            Ok(o) => o,
            Err(e) => return StepOutcome::Retry(format!("agent invocation failed: {e}")),
        };

        let approved_err = match signal::parse_signal(&output, SignalKind::ReviewApproved, self.session_token) {
            Ok(_) => {
                self.emitter.emit(Event::SignalAccepted {
                    task_id: task.id.clone(),
                    kind: "review-approved".to_string(),
                });
                return StepOutcome::Done;
            }
            Err(e) => e,
        };

        match signal::parse_signal(&output, SignalKind::ReviewRejected, self.session_token) {
            Ok(parsed) => {
                self.emitter.emit(Event::SignalAccepted {
                    task_id: task.id.clone(),
                    kind: "review-rejected".to_string(),
                });
                return StepOutcome::RejectedToImpl(parsed.body);
            }
            Err(signal::SignalError::InvalidToken) => {
                self.emitter.emit(Event::SignalRejected {
                    task_id: task.id.clone(),
                    reason: "invalid_token".to_string(),
                });
                return StepOutcome::Retry("signal carried the wrong session token".into());
            }
            Err(signal::SignalError::NoSignal) => {
                if matches!(approved_err, signal::SignalError::InvalidToken) {
                    self.emitter.emit(Event::SignalRejected {
                        task_id: task.id.clone(),
                        reason: "invalid_token".to_string(),
                    });
                    return StepOutcome::Retry("signal carried the wrong session token".into());
                }
            }
        }

        self.emitter.emit(Event::SignalRejected {
            task_id: task.id.clone(),
            reason: "no_signal".to_string(),
        });
        warn!(task_id = %task.id, "review phase produced neither approval nor rejection");
        StepOutcome::Retry("review must emit review-approved or review-rejected".into())
    }
}

enum StepOutcome {
    Advance(Phase),
    Retry(String),
    RejectedToImpl(String),
    Done,
    FatalError(String),
}

fn no_test_files_remain(worktree: &Path, allow_list: &AllowList) -> bool {
    use walkdir::WalkDir;
    !WalkDir::new(worktree)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| {
            let relative = e.path().strip_prefix(worktree).unwrap_or(e.path());
            e.file_type().is_file() && allow_list.allows(relative)
        })
}
