//! Durable JSONL persistence of the event timeline.
//!
//! Mirrors the teacher's `EventLogger`: open-append-flush per line so a
//! crash never leaves a partial line behind. [`read_timeline`] reads a run's
//! JSONL file back into a `Vec<TimelineEntry>` for inspection (`ralph verify`,
//! tests); it does not feed those entries back through a live `EventBus` —
//! `--resume` reopens the session status file (`session::SessionStore`), not
//! the event timeline.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::bus::EventBus;
use super::types::TimelineEntry;

/// Subscribes to an [`EventBus`] and writes every entry to a JSONL file,
/// flushing after each line so the write is durable before `emit` returns
/// to any other subscriber waiting on the same event.
pub struct JsonlLogger {
    writer: BufWriter<File>,
}

impl JsonlLogger {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_entry(&mut self, entry: &TimelineEntry) -> std::io::Result<()> {
        let line = serde_json::to_string(entry)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Run the logger to completion, persisting every event it receives
    /// until every `EventEmitter` (every broadcast sender) is dropped.
    ///
    /// Takes an owned receiver rather than `&EventBus`: a clone of the bus
    /// itself carries a sender, and a task that holds one of those while
    /// waiting for the channel to close would wait on itself forever.
    pub async fn run(mut self, mut rx: tokio::sync::broadcast::Receiver<TimelineEntry>) {
        loop {
            match rx.recv().await {
                Ok(entry) => {
                    if let Err(e) = self.write_entry(&entry) {
                        tracing::error!(error = %e, "failed to persist event");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger lagged behind the bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    debug!("event bus closed, logger exiting");
                    break;
                }
            }
        }
    }
}

/// Read every entry from a run's timeline file, in emission order.
pub fn read_timeline(path: impl AsRef<Path>) -> std::io::Result<Vec<TimelineEntry>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!(error = %e, "skipping malformed timeline line"),
        }
    }
    Ok(entries)
}

/// Default location for a run's timeline file.
pub fn timeline_path(run_dir: &Path) -> PathBuf {
    run_dir.join("events.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::Event;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut logger = JsonlLogger::create(&path).unwrap();
        logger
            .write_entry(&TimelineEntry::new(Event::SessionStarted {
                session_id: "s1".into(),
            }))
            .unwrap();
        logger
            .write_entry(&TimelineEntry::new(Event::TaskStarted {
                task_id: "T-001".into(),
            }))
            .unwrap();

        let entries = read_timeline(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event.kind(), "session.started");
        assert_eq!(entries[1].event.kind(), "task.started");
    }

    #[tokio::test]
    async fn logger_persists_bus_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let bus = EventBus::with_default_capacity();
        let emitter = bus.emitter();

        let logger = JsonlLogger::create(&path).unwrap();
        let rx = bus.subscribe();
        let handle = tokio::spawn(async move { logger.run(rx).await });

        emitter.emit(Event::ChecksumVerified);
        // dropping both the bus and its emitter drops every sender, which
        // closes the channel and lets the logger task return on its own
        drop(bus);
        drop(emitter);
        handle.await.unwrap();

        let entries = read_timeline(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.kind(), "checksum.verified");
    }
}
