//! The background side of the client: dispatching queued records to the store and reconciling
//! their results against the write quorum.

mod dispatch;
mod pending;
mod reconciler;
mod shutdown;

pub(crate) use dispatch::create as create_worker;
pub(crate) use dispatch::WorkerClient;
pub(crate) use dispatch::WorkerConfig;
pub(crate) use pending::Operation;
pub(crate) use pending::PendingWrite;
pub(crate) use shutdown::shutdown_signal;
pub(crate) use shutdown::WorkerShutdownHandle;
