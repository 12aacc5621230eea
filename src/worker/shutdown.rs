use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

pub(crate) fn shutdown_signal() -> (WorkerShutdownHandle, WorkerShutdownSignal) {
    let (tx, rx) = oneshot::channel();

    (WorkerShutdownHandle { tx }, WorkerShutdownSignal { rx })
}

/// Held by the client. The worker stops when this is shut down or dropped, whichever is first.
pub(crate) struct WorkerShutdownHandle {
    tx: oneshot::Sender<()>,
}

impl WorkerShutdownHandle {
    pub(crate) fn shutdown(self) {
        let _ = self.tx.send(());
    }
}

/// Resolves once the worker should stop. Poll it to completion at most once.
pub(crate) struct WorkerShutdownSignal {
    rx: oneshot::Receiver<()>,
}

impl Future for WorkerShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // An explicit send and a dropped handle mean the same thing here.
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}
