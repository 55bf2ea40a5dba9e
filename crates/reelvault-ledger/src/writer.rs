//! Single-writer queue for one ledger file.
//!
//! A spawned task owns the [`UsageLedger`]. Handles send commands over a
//! bounded channel and wait on a oneshot reply, so appends from any number of
//! callers are applied one at a time in arrival order.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::anomaly::AnomalyRecord;
use crate::document::IntegrityReport;
use crate::entry::PlayEvent;
use crate::error::{LedgerError, Result};
use crate::ledger::{LedgerExport, RecordOutcome, UsageLedger};

const QUEUE_DEPTH: usize = 64;

enum Command {
    Record {
        event: PlayEvent,
        timestamp: Option<i64>,
        reply: oneshot::Sender<Result<RecordOutcome>>,
    },
    Validate {
        reply: oneshot::Sender<IntegrityReport>,
    },
    Prune {
        max_per_item: usize,
        reply: oneshot::Sender<Result<usize>>,
    },
    ResolveAnomaly {
        index: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    Anomalies {
        reply: oneshot::Sender<Vec<AnomalyRecord>>,
    },
    Export {
        reply: oneshot::Sender<LedgerExport>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Spawns the writer task.
pub struct LedgerWriter;

impl LedgerWriter {
    pub fn spawn(ledger: UsageLedger) -> LedgerHandle {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let task = tokio::spawn(run(ledger, rx));
        LedgerHandle {
            tx,
            task: std::sync::Arc::new(tokio::sync::Mutex::new(Some(task))),
        }
    }
}

async fn run(mut ledger: UsageLedger, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Record {
                event,
                timestamp,
                reply,
            } => {
                let result = match timestamp {
                    Some(ts) => ledger.record_play_at(event, ts).await,
                    None => {
                        ledger
                            .record_play(&event.media_id, event.played_ms, &event.session_id)
                            .await
                    }
                };
                let _ = reply.send(result);
            }
            Command::Validate { reply } => {
                let _ = reply.send(ledger.validate_integrity());
            }
            Command::Prune { max_per_item, reply } => {
                let _ = reply.send(ledger.prune_to(max_per_item).await);
            }
            Command::ResolveAnomaly { index, reply } => {
                let _ = reply.send(ledger.resolve_anomaly(index).await);
            }
            Command::Anomalies { reply } => {
                let _ = reply.send(ledger.anomalies().to_vec());
            }
            Command::Export { reply } => {
                let _ = reply.send(ledger.export());
            }
            Command::Shutdown { reply } => {
                rx.close();
                let _ = reply.send(());
                break;
            }
        }
    }
    tracing::debug!("ledger writer stopped");
}

/// Cloneable handle to a running writer.
#[derive(Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<Command>,
    task: std::sync::Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for LedgerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl LedgerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| LedgerError::WriterClosed)?;
        rx.await.map_err(|_| LedgerError::WriterClosed)
    }

    pub async fn record_play(&self, media_id: &str, played_ms: u64, session_id: &str) -> Result<RecordOutcome> {
        let event = PlayEvent::new(media_id, played_ms, session_id);
        self.request(|reply| Command::Record {
            event,
            timestamp: None,
            reply,
        })
        .await?
    }

    pub async fn record_play_at(&self, event: PlayEvent, timestamp: i64) -> Result<RecordOutcome> {
        self.request(|reply| Command::Record {
            event,
            timestamp: Some(timestamp),
            reply,
        })
        .await?
    }

    pub async fn validate_integrity(&self) -> Result<IntegrityReport> {
        self.request(|reply| Command::Validate { reply }).await
    }

    pub async fn prune_to(&self, max_per_item: usize) -> Result<usize> {
        self.request(|reply| Command::Prune { max_per_item, reply })
            .await?
    }

    pub async fn resolve_anomaly(&self, index: usize) -> Result<()> {
        self.request(|reply| Command::ResolveAnomaly { index, reply })
            .await?
    }

    pub async fn anomalies(&self) -> Result<Vec<AnomalyRecord>> {
        self.request(|reply| Command::Anomalies { reply }).await
    }

    pub async fn export(&self) -> Result<LedgerExport> {
        self.request(|reply| Command::Export { reply }).await
    }

    /// Finish queued commands, then stop the task. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
