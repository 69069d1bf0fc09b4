use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use quorum_core::event::EventBus;
use quorum_core::types::{RunEvent, RunId};

/// JSONL run logger.
///
/// Follows the next run published on an [`EventBus`] and writes one JSON
/// object per line to `{log_dir}/{run_id}/{timestamp}.jsonl`. Lines are
/// flushed as they are written, so a crashed process leaves a readable log.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a RunEvent,
}

impl RunLogger {
    /// `level` controls verbosity: 1=run summary and failures, 2=per-step,
    /// 3=per-invocation and per-tool.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Subscribe now and log in the background.
    ///
    /// Subscribing happens before the task is spawned so that a run started
    /// right after this call is not missed. The handle resolves to the log
    /// file path, or `None` if no run was logged.
    pub fn spawn(self, events: &EventBus, cancel: CancellationToken) -> JoinHandle<Option<PathBuf>> {
        let rx = events.subscribe();
        tokio::spawn(self.run(rx, cancel))
    }

    async fn run(self, mut rx: Receiver<RunEvent>, cancel: CancellationToken) -> Option<PathBuf> {
        let first = loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                result = rx.recv() => match result {
                    Ok(event @ RunEvent::RunStarted { .. }) => break event,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "RunLogger lagged before run start");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        };
        let run_id = first.run_id().clone();

        let run_dir = self.log_dir.join(&run_id.0);
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, "Failed to create log directory");
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return None;
            }
        };

        info!(path = %log_path.display(), run_id = %run_id, "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        let mut next = Some(first);
        loop {
            let event = match next.take() {
                Some(event) => event,
                None => tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("RunLogger cancelled");
                        break;
                    }
                    result = rx.recv() => match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                            continue;
                        }
                        Err(RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                },
            };

            if event.run_id() != &run_id {
                continue;
            }

            if self.should_log(&event) {
                let entry = LogEntry {
                    timestamp: Utc::now().to_rfc3339(),
                    event: &event,
                };
                if let Ok(json) = serde_json::to_string(&entry) {
                    let line = format!("{}\n", json);
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        error!(error = %e, "Failed to write log entry");
                        break;
                    }
                    if let Err(e) = writer.flush().await {
                        error!(error = %e, "Failed to flush log");
                    }
                }
            }

            if matches!(event, RunEvent::RunFinished { .. }) {
                break;
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
        Some(log_path)
    }

    fn should_log(&self, event: &RunEvent) -> bool {
        match event {
            RunEvent::RunStarted { .. }
            | RunEvent::RunFinished { .. }
            | RunEvent::StepFailed { .. }
            | RunEvent::InvocationRejected { .. } => true,
            RunEvent::StepStarted { .. }
            | RunEvent::StepCompleted { .. }
            | RunEvent::StepSkipped { .. }
            | RunEvent::UsageUpdate { .. } => self.level >= 2,
            RunEvent::ModelInvoked { .. } | RunEvent::ToolStart { .. } | RunEvent::ToolEnd { .. } => {
                self.level >= 3
            }
        }
    }
}

/// Path a run's logs are written under.
pub fn run_log_dir(log_dir: &std::path::Path, run_id: &RunId) -> PathBuf {
    log_dir.join(&run_id.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(s: &str) -> RunId {
        RunId(s.to_string())
    }

    #[test]
    fn entry_flattens_event() {
        let event = RunEvent::StepSkipped {
            run_id: rid("r1"),
            step_id: "vote".into(),
        };
        let entry = LogEntry {
            timestamp: "2026-02-24T12:00:00Z".to_string(),
            event: &event,
        };
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&entry).unwrap()).unwrap();
        assert_eq!(json["event"], "step_skipped");
        assert_eq!(json["run_id"], "r1");
        assert_eq!(json["timestamp"], "2026-02-24T12:00:00Z");
    }

    #[test]
    fn level_filtering() {
        let started = RunEvent::StepStarted {
            run_id: rid("r"),
            step_id: "a".into(),
        };
        let tool = RunEvent::ToolStart {
            run_id: rid("r"),
            call_id: "c".into(),
            name: "search".into(),
        };
        let finished = RunEvent::RunFinished {
            run_id: rid("r"),
            succeeded: true,
            elapsed_ms: 3,
        };

        let l1 = RunLogger::new(PathBuf::from("/tmp"), 1);
        assert!(l1.should_log(&finished));
        assert!(!l1.should_log(&started));
        assert!(!l1.should_log(&tool));

        let l2 = RunLogger::new(PathBuf::from("/tmp"), 2);
        assert!(l2.should_log(&started));
        assert!(!l2.should_log(&tool));

        let l3 = RunLogger::new(PathBuf::from("/tmp"), 3);
        assert!(l3.should_log(&tool));
    }

    #[tokio::test]
    async fn writes_one_run_and_stops_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::default();
        let handle = RunLogger::new(dir.path().to_path_buf(), 2).spawn(&bus, CancellationToken::new());

        bus.publish(RunEvent::StepStarted {
            run_id: rid("early"),
            step_id: "ignored".into(),
        });
        bus.publish(RunEvent::RunStarted {
            run_id: rid("r1"),
            workflow_id: "wf".into(),
        });
        bus.publish(RunEvent::StepStarted {
            run_id: rid("other"),
            step_id: "x".into(),
        });
        bus.publish(RunEvent::StepCompleted {
            run_id: rid("r1"),
            step_id: "a".into(),
            elapsed_ms: 1,
        });
        bus.publish(RunEvent::RunFinished {
            run_id: rid("r1"),
            succeeded: true,
            elapsed_ms: 2,
        });

        let path = handle.await.unwrap().expect("log path");
        assert!(path.starts_with(run_log_dir(dir.path(), &rid("r1"))));

        let content = std::fs::read_to_string(&path).unwrap();
        let events: Vec<String> = content
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["event"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(events, vec!["run_started", "step_completed", "run_finished"]);
    }

    #[tokio::test]
    async fn cancel_before_run_logs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let handle = RunLogger::new(dir.path().to_path_buf(), 1).spawn(&bus, cancel.clone());
        cancel.cancel();
        assert!(handle.await.unwrap().is_none());
    }
}
