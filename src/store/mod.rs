//! The replicated storage collaborator: the `Store` trait the client writes through, the handles
//! its operations return, and an in-process implementation.

mod handle;
mod in_memory;
mod store;

pub use handle::pending;
pub use handle::AckHandle;
pub use handle::HandleCompleter;
pub use handle::MembersHandle;
pub use handle::ReadHandle;
pub use handle::StoreHandle;
pub use in_memory::MemoryStore;
pub use in_memory::MemoryStoreConnector;
pub use store::GroupId;
pub use store::Store;
pub use store::StoreConnector;
pub use store::StoreError;
