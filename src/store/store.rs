use crate::store::{AckHandle, MembersHandle, ReadHandle};
use bytes::Bytes;
use std::fmt;

/// GroupId identifies one replica group of the store. A write is acknowledged per group.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct GroupId(u32);

impl GroupId {
    pub fn new(id: u32) -> Self {
        GroupId(id)
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Key not found")]
    NotFound,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    // The store dropped the handle's completer without resolving it.
    #[error("Operation was abandoned by the store")]
    Abandoned,
}

/// Store is the replicated key-value substrate that history records are written to.
///
/// Every operation is a non-blocking submission. It returns a handle right away (or fails
/// synchronously), and the caller decides when and how to wait on that handle. Implementations
/// must be safe to use concurrently from the facade (reads) and the dispatch worker (writes).
pub trait Store: Send + Sync + 'static {
    /// Write `data` under `key` on every replica group. With `append` set, data is appended to
    /// whatever the key already holds. The handle resolves to the groups that acknowledged.
    fn write(&self, key: &str, data: Bytes, append: bool) -> Result<AckHandle, StoreError>;

    fn read(&self, key: &str) -> Result<ReadHandle, StoreError>;

    /// Add `member_id` to each of `index_keys`, recording `entry_key` as the indexed object.
    /// Resolves to the groups that acknowledged the index update.
    fn add_to_index(&self, entry_key: &str, index_keys: &[String], member_id: &str)
        -> Result<AckHandle, StoreError>;

    /// Resolves to the members of all `index_keys`, in the order the store returns them.
    fn query_index(&self, index_keys: &[String]) -> Result<MembersHandle, StoreError>;

    /// Minimum number of groups that must acknowledge a write for it to count as durable.
    fn min_writes(&self) -> usize;
}

/// StoreConnector opens a connection to a store cluster. It is called once per client, during
/// construction, and retried there.
#[async_trait::async_trait]
pub trait StoreConnector {
    type Store: Store;

    async fn connect(&self, servers: &[String], groups: &[GroupId]) -> Result<Self::Store, StoreError>;
}
