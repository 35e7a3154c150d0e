use crate::domain::audit::{AuditEntry, AuditEvent};
use crate::domain::ports::AuditSinkRef;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

enum Command {
    Record(Box<AuditEntry>),
    Flush(oneshot::Sender<()>),
}

/// Best-effort audit trail.
///
/// Entries are queued on a bounded channel and written by a background task.
/// `record` never waits: a full queue drops the entry with a warning, and sink
/// failures are logged and swallowed.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<Command>,
}

impl AuditLog {
    /// Spawns the writer task on the current tokio runtime.
    pub fn spawn(sink: AuditSinkRef, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Record(entry) => {
                        if let Err(e) = sink.append(*entry).await {
                            warn!(error = %e, "audit write failed");
                        }
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    pub fn record(&self, event: AuditEvent) {
        let entry = Box::new(AuditEntry::now(event));
        if let Err(e) = self.tx.try_send(Command::Record(entry)) {
            warn!(error = %e, "audit entry dropped");
        }
    }

    /// Waits until every entry queued before this call has been handed to the sink.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }
}
