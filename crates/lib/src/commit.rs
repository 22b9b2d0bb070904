//! Background commit coordinator.
//!
//! Clients never wait on the server while it applies a transaction; they
//! request a commit and poll. The coordinator sweeps the backend periodically
//! for requested transactions, claims each one with a compare-and-set on its
//! start time, and applies its chunks inside a single [`CommitUnit`].
//!
//! Distinct transactions are applied concurrently. A transient failure hands
//! the transaction back to the next sweep until `max_commit_attempts` is
//! reached; a deterministic one fails it immediately.
//!
//! [`CommitUnit`]: crate::backend::CommitUnit

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::backend::{Backend, CommitOutcome, Failure, TransactionRow};
use crate::notify::{Event, Notifier};
use crate::transaction::apply;
use crate::{Clock, Config, Error, Result};

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub committed: usize,
    /// Returned to the queue after a transient failure.
    pub retried: usize,
    pub failed: usize,
    /// Claimed by someone else first.
    pub skipped: usize,
}

impl SweepReport {
    /// Number of transactions this sweep claimed.
    pub fn processed(&self) -> usize {
        self.committed + self.retried + self.failed
    }
}

enum Outcome {
    Committed,
    Retried,
    Failed,
    Skipped,
}

/// Finalizes requested transactions against the backend.
#[derive(Clone)]
pub struct CommitCoordinator {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    sweep_interval: Duration,
    max_attempts: u32,
}

impl CommitCoordinator {
    pub fn new(
        backend: Arc<dyn Backend>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Self {
        Self {
            backend,
            clock,
            notifier,
            sweep_interval: config.commit_sweep_interval().max(Duration::from_millis(1)),
            max_attempts: config.max_commit_attempts.max(1),
        }
    }

    /// Process every transaction currently waiting for a commit.
    ///
    /// Claims happen in request order; the claimed transactions are then
    /// applied concurrently.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let pending = self.backend.pending_commits().await?;
        let mut report = SweepReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        debug!(pending = pending.len(), "Sweeping requested commits");

        let mut tasks = JoinSet::new();
        for row in pending {
            if !self
                .backend
                .claim_commit(row.id, self.clock.now_millis())
                .await?
            {
                report.skipped += 1;
                continue;
            }
            let coordinator = self.clone();
            tasks.spawn(async move { coordinator.finish(row).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Outcome::Committed) => report.committed += 1,
                Ok(Outcome::Retried) => report.retried += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => warn!(error = %e, "Commit task panicked"),
            }
        }
        Ok(report)
    }

    /// Apply a claimed transaction and record the result.
    async fn finish(&self, row: TransactionRow) -> Outcome {
        match self.apply(&row).await {
            Ok(touched) => {
                info!(transaction = %row.id, containers = touched.len(), "Committed transaction");
                self.announce(&touched).await;
                Outcome::Committed
            }
            Err(err) => {
                let failure = Failure {
                    kind: err.kind(),
                    reason: err.to_string(),
                };
                let retry = err.is_retryable() && row.attempts + 1 < self.max_attempts;
                let outcome = if retry {
                    warn!(transaction = %row.id, attempt = row.attempts + 1, error = %err, "Commit attempt failed, will retry");
                    CommitOutcome::Retry(failure)
                } else {
                    warn!(transaction = %row.id, error = %err, "Commit failed");
                    CommitOutcome::Failed(failure)
                };

                if let Err(e) = self
                    .backend
                    .release_commit(row.id, &outcome, self.clock.now_millis())
                    .await
                {
                    // Left in COMMITTING; nothing else will pick it up
                    tracing::error!(transaction = %row.id, error = %e, "Failed to record commit failure");
                    return Outcome::Skipped;
                }
                match outcome {
                    CommitOutcome::Retry(_) => Outcome::Retried,
                    CommitOutcome::Failed(_) => Outcome::Failed,
                }
            }
        }
    }

    async fn apply(&self, row: &TransactionRow) -> Result<Vec<String>> {
        let chunks = self.backend.chunks(row.id).await?;
        let now = self.clock.now_millis();

        let mut unit = self.backend.begin_commit().await?;
        let touched = apply::apply_chunks(unit.as_mut(), row, &chunks, now).await?;
        unit.mark_committed(row.id, now).await?;
        unit.commit().await?;
        Ok(touched)
    }

    /// Tell every key holder of the touched containers about the write.
    async fn announce(&self, containers: &[String]) {
        for container in containers {
            match self.backend.key_holders(container).await {
                Ok(holders) => {
                    for holder in holders {
                        self.notifier.emit(
                            holder,
                            Event::ContainerUpdate {
                                container_name_hmac: container.clone(),
                            },
                        );
                    }
                }
                Err(e) => warn!(container = %container, error = %e, "Failed to list key holders"),
            }
        }
    }

    /// Run sweeps on an interval until the returned handle is shut down.
    pub fn start(&self) -> CoordinatorHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let coordinator = self.clone();
        let task = tokio::spawn(coordinator.run(shutdown_rx));
        CoordinatorHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        async move {
            info!(interval_ms = self.sweep_interval.as_millis() as u64, "Starting commit coordinator");
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Commit coordinator shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            // Keep sweeping; the backend may recover
                            tracing::error!(error = %e, "Commit sweep failed");
                        }
                    }
                }
            }
        }
        .instrument(info_span!("commit_coordinator"))
        .await
    }
}

/// Handle to a running coordinator task.
#[derive(Debug)]
pub struct CoordinatorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Stop after the current sweep finishes.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            // The task may already be gone
            let _ = tx.send(());
        }
        self.task.await.map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "commit coordinator task failed: {e}"
            )))
        })
    }
}
