use crate::queue::QueuedRecord;
use crate::store::{AckHandle, StoreError};
use tokio::time::Instant;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Operation {
    AppendLog,
    IndexActivity,
}

/// PendingWrite is a record that has been submitted to the store and whose acks have not been
/// counted yet. It is owned by the worker's window until the reconciler consumes it.
pub(crate) struct PendingWrite {
    queued: QueuedRecord,
    operations: Vec<PendingOperation>,
    expires_at: Instant,
}

struct PendingOperation {
    operation: Operation,
    handle: Option<AckHandle>,
    acked: Option<usize>,
}

impl PendingWrite {
    /// A failed submission is recorded as an operation that resolved with zero acks, so it flows
    /// through the same quorum check as any other shortfall.
    pub(crate) fn submitted(
        logger: &slog::Logger,
        queued: QueuedRecord,
        submissions: Vec<(Operation, Result<AckHandle, StoreError>)>,
        expires_at: Instant,
    ) -> Self {
        let operations = submissions
            .into_iter()
            .map(|(operation, submission)| match submission {
                Ok(handle) => PendingOperation {
                    operation,
                    handle: Some(handle),
                    acked: None,
                },
                Err(e) => {
                    slog::warn!(
                        logger,
                        "Store rejected {:?} for user {:?}: {}",
                        operation,
                        queued.record.user(),
                        e
                    );
                    PendingOperation {
                        operation,
                        handle: None,
                        acked: Some(0),
                    }
                }
            })
            .collect();

        PendingWrite {
            queued,
            operations,
            expires_at,
        }
    }

    pub(crate) fn queued(&self) -> &QueuedRecord {
        &self.queued
    }

    pub(crate) fn into_queued(self) -> QueuedRecord {
        self.queued
    }

    pub(crate) fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Checks every unresolved operation once, without waiting. Returns true when all operations
    /// have an ack count.
    pub(crate) fn poll(&mut self, logger: &slog::Logger) -> bool {
        for op in self.operations.iter_mut().filter(|op| op.acked.is_none()) {
            let result = match op.handle.as_mut().and_then(|handle| handle.try_take()) {
                Some(result) => result,
                None => continue,
            };

            op.handle = None;
            op.acked = match result {
                Ok(groups) => Some(groups.len()),
                Err(e) => {
                    slog::warn!(
                        logger,
                        "{:?} for user {:?} failed: {}",
                        op.operation,
                        self.queued.record.user(),
                        e
                    );
                    Some(0)
                }
            };
        }

        self.is_resolved()
    }

    /// Gives up on operations still in flight; they count as zero acks.
    pub(crate) fn expire(&mut self) {
        for op in self.operations.iter_mut().filter(|op| op.acked.is_none()) {
            op.handle = None;
            op.acked = Some(0);
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.operations.iter().all(|op| op.acked.is_some())
    }

    /// The weakest operation decides: a record is only as durable as its least acknowledged part.
    pub(crate) fn acked(&self) -> usize {
        self.operations
            .iter()
            .map(|op| op.acked.unwrap_or(0))
            .min()
            .unwrap_or(0)
    }
}
