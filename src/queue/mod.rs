//! The bounded queue between callers and the dispatch worker, and the records it carries.

mod record;
mod record_queue;

pub(crate) use record::QueuedRecord;
pub(crate) use record::Record;
pub(crate) use record_queue::new as record_queue;
pub(crate) use record_queue::RecordQueue;
pub(crate) use record_queue::RecordQueueReceiver;
