//! Subprocess Executor (C1).
//!
//! Generalizes the teacher's `run_validation`/`run_validation_streaming`
//! pair (`td/src/loop/validation.rs`) from a hardcoded `sh -c` command to an
//! arbitrary argv, and from a single buffered-output mode to a `Collect` vs.
//! `Stream` choice of output sink.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Where output should go while the child runs.
pub enum OutputSink<'a> {
    /// Buffer everything, return it at the end.
    Collect,
    /// Call `on_line(line, is_stderr)` as each line arrives.
    Stream(&'a dyn Fn(&str, bool)),
}

/// What to run.
pub struct ExecSpec {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl ExecSpec {
    pub fn new(argv: Vec<String>, cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            argv,
            cwd: cwd.into(),
            env: HashMap::new(),
            stdin: None,
            timeout,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Result of a completed (or timed-out) subprocess run.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ExecResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {argv0}: {source}")]
    SpawnError { argv0: String, source: std::io::Error },
    #[error("command timed out after {0:?}")]
    TimeoutError(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn build_command(spec: &ExecSpec) -> Result<Command, ExecError> {
    let Some((program, args)) = spec.argv.split_first() else {
        return Err(ExecError::SpawnError {
            argv0: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
        });
    };
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&spec.cwd)
        .envs(spec.env.iter())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if spec.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    Ok(cmd)
}

/// Run `spec` to completion, collecting or streaming output per `sink`.
pub async fn run(spec: ExecSpec, sink: OutputSink<'_>) -> Result<ExecResult, ExecError> {
    debug!(argv = ?spec.argv, cwd = ?spec.cwd, timeout = ?spec.timeout, "exec::run: spawning");
    let argv0 = spec.argv.first().cloned().unwrap_or_default();
    let timeout = spec.timeout;
    let stdin_data = spec.stdin.clone();
    let mut cmd = build_command(&spec)?;

    let start = std::time::Instant::now();
    let mut child = cmd.spawn().map_err(|source| ExecError::SpawnError {
        argv0: argv0.clone(),
        source,
    })?;

    if let Some(data) = stdin_data {
        use tokio::io::AsyncWriteExt;
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(data.as_bytes()).await;
        }
    }

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let result = match sink {
        OutputSink::Collect => {
            let wait = tokio::time::timeout(timeout, async {
                let stdout_task = tokio::spawn(read_all(stdout));
                let stderr_task = tokio::spawn(read_all(stderr));
                let status = child.wait().await?;
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                Ok::<_, std::io::Error>((status, stdout, stderr))
            })
            .await;
            finish(wait, &mut child, start, timeout).await?
        }
        OutputSink::Stream(on_line) => {
            // Reader tasks only forward owned lines through a channel, so they
            // stay Send+'static without requiring `on_line` itself to be Send;
            // the channel is drained here, in the same task that owns `on_line`.
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(String, bool)>();
            let tx_out = tx.clone();
            let stdout_task = tokio::spawn(async move {
                let mut buf = String::new();
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    buf.push_str(&line);
                    buf.push('\n');
                    let _ = tx_out.send((line, false));
                }
                buf
            });
            let stderr_task = tokio::spawn(async move {
                let mut buf = String::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    buf.push_str(&line);
                    buf.push('\n');
                    let _ = tx.send((line, true));
                }
                buf
            });

            let wait = tokio::time::timeout(timeout, async {
                let wait_fut = child.wait();
                tokio::pin!(wait_fut);
                let status = loop {
                    tokio::select! {
                        Some((line, is_stderr)) = rx.recv() => {
                            on_line(&line, is_stderr);
                        }
                        status = &mut wait_fut => break status,
                    }
                };
                while let Ok((line, is_stderr)) = rx.try_recv() {
                    on_line(&line, is_stderr);
                }
                let stdout_buf = stdout_task.await.unwrap_or_default();
                let stderr_buf = stderr_task.await.unwrap_or_default();
                Ok::<_, std::io::Error>((status?, stdout_buf, stderr_buf))
            })
            .await;
            finish(wait, &mut child, start, timeout).await?
        }
    };

    Ok(result)
}

async fn read_all(mut reader: impl tokio::io::AsyncRead + Unpin) -> String {
    use tokio::io::AsyncReadExt;
    let mut buf = String::new();
    let _ = reader.read_to_string(&mut buf).await;
    buf
}

async fn finish(
    wait: Result<Result<(std::process::ExitStatus, String, String), std::io::Error>, tokio::time::error::Elapsed>,
    child: &mut tokio::process::Child,
    start: std::time::Instant,
    timeout: Duration,
) -> Result<ExecResult, ExecError> {
    match wait {
        Ok(Ok((status, stdout, stderr))) => Ok(ExecResult {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            duration: start.elapsed(),
            timed_out: false,
        }),
        Ok(Err(e)) => Err(ExecError::Io(e)),
        Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            Err(ExecError::TimeoutError(timeout))
        }
    }
}

/// Convenience: run a shell-ish argv and collect output, no streaming.
pub async fn run_collect(
    argv: Vec<String>,
    cwd: &Path,
    timeout: Duration,
) -> Result<ExecResult, ExecError> {
    run(ExecSpec::new(argv, cwd, timeout), OutputSink::Collect).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn collect_mode_success() {
        let dir = tempdir().unwrap();
        let result = run_collect(
            vec!["sh".into(), "-c".into(), "echo ok".into()],
            dir.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(result.succeeded());
        assert!(result.stdout.contains("ok"));
    }

    #[tokio::test]
    async fn collect_mode_nonzero_exit() {
        let dir = tempdir().unwrap();
        let result = run_collect(
            vec!["sh".into(), "-c".into(), "exit 3".into()],
            dir.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let dir = tempdir().unwrap();
        let err = run_collect(
            vec!["sh".into(), "-c".into(), "sleep 10".into()],
            dir.path(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::TimeoutError(_)));
    }

    #[tokio::test]
    async fn spawn_error_for_missing_binary() {
        let dir = tempdir().unwrap();
        let err = run_collect(
            vec!["definitely-not-a-real-binary-xyz".into()],
            dir.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::SpawnError { .. }));
    }

    #[tokio::test]
    async fn stream_mode_tags_stdout_and_stderr() {
        let dir = tempdir().unwrap();
        let lines = std::sync::Mutex::new(Vec::<(String, bool)>::new());
        let on_line = |line: &str, is_stderr: bool| {
            lines.lock().unwrap().push((line.to_string(), is_stderr));
        };
        let result = run(
            ExecSpec::new(
                vec!["sh".into(), "-c".into(), "echo out; echo err >&2".into()],
                dir.path(),
                Duration::from_secs(5),
            ),
            OutputSink::Stream(&on_line),
        )
        .await
        .unwrap();
        assert!(result.succeeded());
        let captured = lines.into_inner().unwrap();
        assert!(captured.iter().any(|(l, stderr)| l == "out" && !stderr));
        assert!(captured.iter().any(|(l, stderr)| l == "err" && *stderr));
    }

    #[tokio::test]
    async fn stdin_is_forwarded() {
        let dir = tempdir().unwrap();
        let result = run(
            ExecSpec::new(vec!["cat".into()], dir.path(), Duration::from_secs(5)).with_stdin("hello\n"),
            OutputSink::Collect,
        )
        .await
        .unwrap();
        assert!(result.stdout.contains("hello"));
    }
}
