use crate::queue::RecordQueue;
use crate::time::Clock;
use crate::worker::PendingWrite;
use tokio::time::{Duration, Instant};

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
#[error("Quorum not met: {acked} of {required} required groups acknowledged")]
pub(crate) struct QuorumNotMet {
    pub(crate) acked: usize,
    pub(crate) required: usize,
}

pub(crate) fn check_quorum(acked: usize, required: usize) -> Result<(), QuorumNotMet> {
    if acked >= required {
        Ok(())
    } else {
        Err(QuorumNotMet { acked, required })
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ReconcileReport {
    pub(crate) acknowledged: usize,
    pub(crate) retried: usize,
    pub(crate) dropped: usize,
}

enum Settled {
    Acknowledged,
    Retried,
    Dropped,
}

pub(crate) struct ReconcilerConfig<C: Clock> {
    pub(crate) logger: slog::Logger,
    pub(crate) retry_queue: RecordQueue,
    pub(crate) min_writes: usize,
    pub(crate) max_retries: u32,
    pub(crate) poll_interval: Duration,
    pub(crate) clock: C,
}

/// ResultReconciler waits out a batch of in-flight writes and decides the fate of each one:
/// acknowledged, sent back to the queue for another attempt, or dropped.
pub(crate) struct ResultReconciler<C: Clock> {
    logger: slog::Logger,
    retry_queue: RecordQueue,
    // Read from the store once, at client construction.
    min_writes: usize,
    max_retries: u32,
    poll_interval: Duration,
    clock: C,
}

impl<C: Clock> ResultReconciler<C> {
    pub(crate) fn new(config: ReconcilerConfig<C>) -> Self {
        ResultReconciler {
            logger: config.logger,
            retry_queue: config.retry_queue,
            min_writes: config.min_writes,
            max_retries: config.max_retries,
            poll_interval: config.poll_interval,
            clock: config.clock,
        }
    }

    /// Settles every write in `batch` whose result is available before `deadline`. Writes still
    /// in flight at the deadline are handed back untouched; they have not been lost and must not
    /// be resubmitted.
    pub(crate) async fn reconcile(
        &mut self,
        batch: Vec<PendingWrite>,
        deadline: Option<Instant>,
    ) -> (ReconcileReport, Vec<PendingWrite>) {
        let mut report = ReconcileReport::default();
        let mut unresolved = vec![];

        for mut pending in batch {
            if !self.wait_for_result(&mut pending, deadline).await {
                unresolved.push(pending);
                continue;
            }

            match self.settle(pending) {
                Settled::Acknowledged => report.acknowledged += 1,
                Settled::Retried => report.retried += 1,
                Settled::Dropped => report.dropped += 1,
            }
        }

        (report, unresolved)
    }

    // Returns false if the deadline passed first.
    async fn wait_for_result(&mut self, pending: &mut PendingWrite, deadline: Option<Instant>) -> bool {
        loop {
            if pending.poll(&self.logger) {
                return true;
            }

            if self.clock.now() >= pending.expires_at() {
                slog::warn!(
                    self.logger,
                    "No result for write of user {:?} within the write timeout",
                    pending.queued().record.user()
                );
                pending.expire();
                return true;
            }

            if self.clock.is_past(deadline) {
                return false;
            }

            self.clock.sleep(self.poll_interval).await;
        }
    }

    fn settle(&self, pending: PendingWrite) -> Settled {
        let acked = pending.acked();
        let queued = pending.into_queued();

        let shortfall = match check_quorum(acked, self.min_writes) {
            Ok(()) => return Settled::Acknowledged,
            Err(shortfall) => shortfall,
        };

        let user = queued.record.user().clone();
        let attempts = queued.retry_count + 1;
        if queued.retry_count >= self.max_retries {
            slog::error!(
                self.logger,
                "Dropping record of user {:?} after {} attempts. {}",
                user,
                attempts,
                shortfall
            );
            return Settled::Dropped;
        }

        if self.retry_queue.try_put(queued.into_retry()) {
            slog::debug!(self.logger, "Retrying record of user {:?} (attempt {}). {}", user, attempts, shortfall);
            Settled::Retried
        } else {
            slog::error!(
                self.logger,
                "Dropping record of user {:?}, queue is full and can't take the retry. {}",
                user,
                shortfall
            );
            Settled::Dropped
        }
    }
}
