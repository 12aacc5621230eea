use crate::store::{GroupId, StoreError};
use bytes::Bytes;
use std::collections::HashSet;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

pub type AckHandle = StoreHandle<HashSet<GroupId>>;
pub type ReadHandle = StoreHandle<Bytes>;
pub type MembersHandle = StoreHandle<Vec<String>>;

/// Creates an unresolved handle and the completer a store uses to resolve it.
pub fn pending<T>() -> (HandleCompleter<T>, StoreHandle<T>) {
    let (tx, rx) = oneshot::channel();

    (HandleCompleter { tx }, StoreHandle { rx })
}

/// StoreHandle is the result of a submitted store operation. Submitting never waits; observing
/// the result is where waiting happens, either by polling `try_take()` or awaiting `wait()`.
pub struct StoreHandle<T> {
    rx: oneshot::Receiver<Result<T, StoreError>>,
}

impl<T> StoreHandle<T> {
    pub fn resolved(result: Result<T, StoreError>) -> Self {
        let (completer, handle) = pending();
        completer.complete(result);

        handle
    }

    /// Returns `None` while the operation is in flight. The result can be taken once; after that,
    /// this returns `StoreError::Abandoned`.
    pub fn try_take(&mut self) -> Option<Result<T, StoreError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(StoreError::Abandoned)),
        }
    }

    pub async fn wait(self) -> Result<T, StoreError> {
        self.rx.await.unwrap_or(Err(StoreError::Abandoned))
    }
}

pub struct HandleCompleter<T> {
    tx: oneshot::Sender<Result<T, StoreError>>,
}

impl<T> HandleCompleter<T> {
    pub fn complete(self, result: Result<T, StoreError>) {
        // Caller may have dropped the handle; nobody is interested in the result then.
        let _ = self.tx.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_take_before_and_after_completion() {
        let (completer, mut handle) = pending::<Bytes>();
        assert!(handle.try_take().is_none());

        completer.complete(Ok(Bytes::from_static(b"abc")));
        let result = handle.try_take().expect("should be ready");
        assert_eq!(result.unwrap(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn dropped_completer_abandons_handle() {
        let (completer, mut handle) = pending::<Bytes>();
        drop(completer);

        assert!(matches!(handle.try_take(), Some(Err(StoreError::Abandoned))));
    }

    #[tokio::test]
    async fn wait_on_completion_from_another_task() {
        let (completer, handle) = pending::<Vec<String>>();
        tokio::spawn(async move {
            completer.complete(Ok(vec!["u1".to_string()]));
        });

        assert_eq!(handle.wait().await.unwrap(), vec!["u1".to_string()]);
    }
}
