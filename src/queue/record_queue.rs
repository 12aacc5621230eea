use crate::queue::QueuedRecord;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Duration;

/// Creates the bounded record queue. Callers get the `RecordQueue` side (cloneable, many
/// producers). The dispatch worker gets the only `RecordQueueReceiver`.
pub(crate) fn new(capacity: usize, put_timeout: Duration) -> (RecordQueue, RecordQueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);

    (
        RecordQueue { sender: tx, put_timeout },
        RecordQueueReceiver { receiver: rx },
    )
}

#[derive(Clone)]
pub(crate) struct RecordQueue {
    sender: mpsc::Sender<QueuedRecord>,
    put_timeout: Duration,
}

impl RecordQueue {
    /// Waits up to the put timeout for room in the queue. False means the record was dropped:
    /// the queue stayed full, or the worker is gone.
    pub(crate) async fn put(&self, record: QueuedRecord) -> bool {
        match self.sender.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) if self.put_timeout > Duration::from_secs(0) => {
                self.sender.send_timeout(record, self.put_timeout).await.is_ok()
            }
            Err(_) => false,
        }
    }

    /// Never waits. Used from inside the worker, which is the queue's only consumer and so can't
    /// wait for room it would have to make itself.
    pub(crate) fn try_put(&self, record: QueuedRecord) -> bool {
        self.sender.try_send(record).is_ok()
    }
}

pub(crate) struct RecordQueueReceiver {
    receiver: mpsc::Receiver<QueuedRecord>,
}

impl RecordQueueReceiver {
    pub(crate) async fn get_blocking(&mut self) -> Option<QueuedRecord> {
        self.receiver.recv().await
    }

    pub(crate) fn try_get(&mut self) -> Option<QueuedRecord> {
        self.receiver.try_recv().ok()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
