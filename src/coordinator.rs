//! Run Coordinator (C9): session lifecycle, task selection, per-task C8
//! invocation, and summary emission (spec.md §4.9).

use std::path::PathBuf;

use chrono::Utc;
use tracing::info;

use crate::agent::AgentRunner;
use crate::errors::RalphError;
use crate::events::{Event, EventEmitter};
use crate::session::{SessionError, SessionStore, SessionToken, TaskState};
use crate::task_loop::{TaskLoop, TaskLoopConfig, TaskOutcome};
use crate::tasklist::TaskList;

pub struct RunOptions {
    pub only: Option<String>,
    pub start_from: Option<String>,
    pub max_iterations: u32,
    /// Reopen the existing session status instead of starting a fresh one.
    /// A tampered or missing status file is still fatal either way — this
    /// only changes whether a legitimately unstarted run directory is
    /// treated as an error.
    pub resume: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub aborted: bool,
}

/// Drives an entire run to completion. Owns the session store and emits
/// `session.started`/`session.ended`; per-task work is delegated to
/// [`TaskLoop`].
pub struct RunCoordinator<'a, R: AgentRunner> {
    session_store: SessionStore,
    emitter: &'a EventEmitter,
    runner: &'a R,
    loop_config: TaskLoopConfig,
    token: SessionToken,
}

impl<'a, R: AgentRunner> RunCoordinator<'a, R> {
    pub fn new(run_dir: PathBuf, emitter: &'a EventEmitter, runner: &'a R, loop_config: TaskLoopConfig) -> Self {
        Self::with_token(run_dir, emitter, runner, loop_config, SessionToken::generate())
    }

    /// Same as [`new`](Self::new), but with the session token supplied by
    /// the caller rather than minted fresh — lets tests script mock agent
    /// responses against a known token.
    pub fn with_token(
        run_dir: PathBuf,
        emitter: &'a EventEmitter,
        runner: &'a R,
        loop_config: TaskLoopConfig,
        token: SessionToken,
    ) -> Self {
        Self {
            session_store: SessionStore::new(run_dir),
            emitter,
            runner,
            loop_config,
            token,
        }
    }

    pub fn session_token(&self) -> &SessionToken {
        &self.token
    }

    pub async fn run(
        &self,
        task_list: &mut TaskList,
        options: &RunOptions,
        should_abort: &dyn Fn() -> bool,
    ) -> Result<RunSummary, RalphError> {
        let token = self.token.clone();
        let mut status = match self.session_store.read().await {
            Ok(status) => {
                self.emitter.emit(Event::ChecksumVerified);
                status
            }
            Err(SessionError::NotFound(path)) => {
                if options.resume {
                    return Err(RalphError::Session(SessionError::NotFound(path)));
                }
                self.session_store.init(&token).await?
            }
            Err(err @ SessionError::TamperingDetected { .. }) => {
                if let SessionError::TamperingDetected { expected, actual } = &err {
                    self.emitter.emit(Event::ChecksumFailed {
                        expected: expected.clone(),
                        actual: actual.clone(),
                    });
                }
                return Err(RalphError::Session(err));
            }
            Err(err) => return Err(RalphError::Session(err)),
        };
        self.emitter.emit(Event::SessionStarted {
            session_id: token.to_string(),
        });

        let mut summary = RunSummary::default();
        let mut started = options.start_from.is_none();

        loop {
            if should_abort() {
                summary.aborted = true;
                break;
            }

            let pending_id = {
                let pending = task_list.pending_in_order();
                let candidate = pending.into_iter().find(|t| {
                    if !started {
                        if Some(t.id.as_str()) == options.start_from.as_deref() {
                            started = true;
                        } else {
                            return false;
                        }
                    }
                    options.only.as_deref().map(|only| only == t.id).unwrap_or(true)
                });
                candidate.map(|t| t.id.clone())
            };

            let Some(task_id) = pending_id else {
                break;
            };

            status.current_task_id = Some(task_id.clone());
            let task_started_at = Utc::now();
            status.last_updated = task_started_at;
            status
                .tasks
                .entry(task_id.clone())
                .or_default()
                .started_at
                .get_or_insert(task_started_at);
            self.session_store.write(&status).await?;

            let task = task_list
                .get(&task_id)
                .expect("task id taken from this task_list's own pending_in_order")
                .clone();

            let task_loop = TaskLoop::new(&self.loop_config, self.runner, self.emitter, &token);
            let outcome = task_loop.run(&task, should_abort).await;

            let now = Utc::now();
            match outcome {
                TaskOutcome::Done { iterations } => {
                    if let Some(t) = task_list.get_mut(&task_id) {
                        t.passes = true;
                    }
                    let started_at = status.tasks.get(&task_id).and_then(|s| s.started_at);
                    status.tasks.insert(
                        task_id.clone(),
                        TaskState {
                            passes: true,
                            last_phase: Some("review".into()),
                            iteration: iterations,
                            started_at,
                            completed_at: Some(now),
                            last_failure: None,
                        },
                    );
                    status.last_updated = now;
                    self.session_store.write(&status).await?;
                    summary.tasks_completed += 1;
                    info!(task_id = %task_id, "task completed");
                }
                TaskOutcome::Failed { reason, iterations } => {
                    summary.tasks_failed += 1;
                    let started_at = status.tasks.get(&task_id).and_then(|s| s.started_at);
                    status.tasks.insert(
                        task_id.clone(),
                        TaskState {
                            passes: false,
                            last_phase: None,
                            iteration: iterations,
                            started_at,
                            completed_at: None,
                            last_failure: Some(reason.clone()),
                        },
                    );
                    status.last_updated = now;
                    self.session_store.write(&status).await?;
                    self.finish(&token, &summary, "failed").await?;
                    return Err(RalphError::TaskFailed { reason });
                }
                TaskOutcome::Aborted { .. } => {
                    summary.aborted = true;
                    break;
                }
            }
        }

        let status_label = if summary.aborted { "aborted" } else { "completed" };
        self.finish(&token, &summary, status_label).await?;

        if summary.aborted {
            return Err(RalphError::Aborted);
        }
        Ok(summary)
    }

    async fn finish(&self, _token: &SessionToken, summary: &RunSummary, status: &str) -> Result<(), RalphError> {
        self.emitter.emit(Event::SessionEnded {
            status: status.to_string(),
            tasks_completed: summary.tasks_completed,
            tasks_failed: summary.tasks_failed,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockAgentRunner;
    use crate::events::EventBus;
    use crate::gates::GateSpec;
    use crate::guardrail::AllowList;
    use crate::tasklist::Task;
    use std::time::Duration;
    use tempfile::tempdir;

    fn one_task_list() -> TaskList {
        TaskList {
            project: "demo".into(),
            branch_name: None,
            description: "demo".into(),
            tasks: vec![Task {
                acceptance_criteria: vec!["does the thing".into()],
                ..Task::new("T-001", "add foo", "implement foo")
            }],
        }
    }

    #[tokio::test]
    async fn happy_path_marks_task_passing_and_emits_session_events() {
        let dir = tempdir().unwrap();
        let bus = EventBus::with_default_capacity();
        let mut rx = bus.subscribe();
        let emitter = bus.emitter();

        let token = SessionToken::generate();
        let responses = vec![
            format!(r#"<task-done session="{token}">done</task-done>"#),
            format!(r#"<tests-done session="{token}">done</tests-done>"#),
            format!(r#"<review-approved session="{token}"></review-approved>"#),
        ];
        let runner = MockAgentRunner::new(responses);
        let loop_config = TaskLoopConfig {
            max_iterations: 10,
            agent_timeout: Duration::from_secs(5),
            agent_argv: vec!["cat".into()],
            worktree: dir.path().to_path_buf(),
            gates: vec![GateSpec::new("noop", vec!["sh".into(), "-c".into(), "exit 0".into()], true)],
            test_allow_list: AllowList::defaults(),
        };
        let coordinator = RunCoordinator::with_token(dir.path().to_path_buf(), &emitter, &runner, loop_config, token);

        let mut task_list = one_task_list();
        let options = RunOptions {
            only: None,
            start_from: None,
            max_iterations: 10,
            resume: false,
        };

        let summary = coordinator.run(&mut task_list, &options, &|| false).await.unwrap();
        assert_eq!(summary.tasks_completed, 1);
        assert!(task_list.get("T-001").unwrap().passes);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event.kind(), "session.started");
    }

    #[tokio::test]
    async fn aborted_run_does_not_mark_task_passing() {
        let dir = tempdir().unwrap();
        let bus = EventBus::with_default_capacity();
        let emitter = bus.emitter();
        let runner = MockAgentRunner::new(vec![]);
        let loop_config = TaskLoopConfig {
            max_iterations: 10,
            agent_timeout: Duration::from_secs(5),
            agent_argv: vec!["cat".into()],
            worktree: dir.path().to_path_buf(),
            gates: vec![],
            test_allow_list: AllowList::defaults(),
        };
        let coordinator = RunCoordinator::new(dir.path().to_path_buf(), &emitter, &runner, loop_config);
        let mut task_list = one_task_list();
        let options = RunOptions {
            only: None,
            start_from: None,
            max_iterations: 10,
            resume: false,
        };

        let result = coordinator.run(&mut task_list, &options, &|| true).await;
        assert!(matches!(result, Err(RalphError::Aborted)));
        assert!(!task_list.get("T-001").unwrap().passes);
    }

    #[tokio::test]
    async fn only_filter_skips_non_matching_tasks() {
        let dir = tempdir().unwrap();
        let bus = EventBus::with_default_capacity();
        let emitter = bus.emitter();
        let runner = MockAgentRunner::new(vec![]);
        let loop_config = TaskLoopConfig {
            max_iterations: 10,
            agent_timeout: Duration::from_secs(5),
            agent_argv: vec!["cat".into()],
            worktree: dir.path().to_path_buf(),
            gates: vec![],
            test_allow_list: AllowList::defaults(),
        };
        let coordinator = RunCoordinator::new(dir.path().to_path_buf(), &emitter, &runner, loop_config);
        let mut task_list = one_task_list();
        let options = RunOptions {
            only: Some("T-999".into()),
            start_from: None,
            max_iterations: 10,
            resume: false,
        };

        // No matching task means the loop exits immediately without error.
        let result = coordinator.run(&mut task_list, &options, &|| false).await;
        assert!(result.is_ok());
        assert!(!task_list.get("T-001").unwrap().passes);
    }
}
