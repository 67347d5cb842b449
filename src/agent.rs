//! Agent invocation (spec.md §6.4): the black-box subprocess contract an
//! LLM agent command must honor — consume a prompt, emit text, exit.
//!
//! Grounded in the teacher's `LlmClient` trait (`td/src/llm/client.rs`): the
//! same `#[async_trait] trait ... + Send + Sync` shape and a `mock` module
//! for deterministic tests, generalized from a structured completion API to
//! a subprocess that takes its prompt on stdin and is read back as plain text.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::events::EventEmitter;
use crate::exec::{ExecError, ExecSpec, OutputSink, run};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// What an agent invocation needs to run and which task/role it's for — the
/// latter two purely for event tagging.
pub struct AgentInvocation {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub prompt: String,
    pub timeout: Duration,
    pub task_id: String,
    pub role: String,
}

/// Abstraction over "run an agent turn and get its output back", so the
/// task loop can be tested against a deterministic mock instead of a real
/// subprocess. Each call is independent — no conversation state carries
/// over between invocations, matching the stateless-per-turn contract the
/// task loop relies on for clean retries.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run_turn(&self, invocation: AgentInvocation, emitter: &EventEmitter) -> Result<String, AgentError>;
}

/// Runs the configured agent command as a real subprocess, streaming its
/// output onto the event bus as `agent.output` lines as they arrive.
pub struct SubprocessAgentRunner;

#[async_trait]
impl AgentRunner for SubprocessAgentRunner {
    async fn run_turn(&self, invocation: AgentInvocation, emitter: &EventEmitter) -> Result<String, AgentError> {
        use crate::events::Event;

        debug!(task_id = %invocation.task_id, role = %invocation.role, "agent: invoking");
        let task_id = invocation.task_id.clone();
        let role = invocation.role.clone();
        let on_line = |line: &str, is_stderr: bool| {
            emitter.emit(Event::AgentOutput {
                task_id: task_id.clone(),
                role: role.clone(),
                line: line.to_string(),
                is_stderr,
            });
        };

        let spec = ExecSpec::new(invocation.argv, invocation.cwd, invocation.timeout)
            .with_stdin(invocation.prompt);
        let result = run(spec, OutputSink::Stream(&on_line)).await?;
        Ok(result.stdout)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed sequence of canned outputs, one per call, in order —
    /// the direct analogue of the teacher's `MockLlmClient`.
    pub struct MockAgentRunner {
        responses: Mutex<Vec<String>>,
        call_count: AtomicUsize,
    }

    impl MockAgentRunner {
        pub fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses),
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentRunner for MockAgentRunner {
        async fn run_turn(&self, invocation: AgentInvocation, _emitter: &EventEmitter) -> Result<String, AgentError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let responses = self.responses.lock().unwrap();
            Ok(responses
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("<no mock response configured for call {idx} on {}>", invocation.task_id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use mock::MockAgentRunner;
    use tempfile::tempdir;

    fn invocation(prompt: &str) -> AgentInvocation {
        AgentInvocation {
            argv: vec!["cat".into()],
            cwd: tempdir().unwrap().keep(),
            prompt: prompt.to_string(),
            timeout: Duration::from_secs(5),
            task_id: "T-001".into(),
            role: "implementation".into(),
        }
    }

    #[tokio::test]
    async fn mock_runner_replays_responses_in_order() {
        let bus = EventBus::with_default_capacity();
        let emitter = bus.emitter();
        let runner = MockAgentRunner::new(vec!["first".into(), "second".into()]);

        let out1 = runner.run_turn(invocation("p1"), &emitter).await.unwrap();
        let out2 = runner.run_turn(invocation("p2"), &emitter).await.unwrap();

        assert_eq!(out1, "first");
        assert_eq!(out2, "second");
        assert_eq!(runner.call_count(), 2);
    }

    #[tokio::test]
    async fn subprocess_runner_echoes_prompt_via_stdin() {
        let bus = EventBus::with_default_capacity();
        let emitter = bus.emitter();
        let runner = SubprocessAgentRunner;

        let output = runner.run_turn(invocation("hello agent"), &emitter).await.unwrap();
        assert!(output.contains("hello agent"));
    }
}
