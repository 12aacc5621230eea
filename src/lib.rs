mod api;
mod keys;
mod queue;
mod store;
#[cfg(test)]
mod test_utils;
mod time;
mod worker;

pub use api::try_create_history_client;
pub use api::ActiveUsersQuery;
pub use api::AddActivityInput;
pub use api::AddLogInput;
pub use api::BucketRange;
pub use api::ConnectionError;
pub use api::FlushError;
pub use api::FlushOutput;
pub use api::HistoryClient;
pub use api::HistoryClientConfig;
pub use api::HistoryClientCreationError;
pub use api::HistoryOptions;
pub use api::LogEntry;
pub use api::UserId;
pub use api::UserLogsQuery;
pub use keys::combine_key;
pub use keys::time_range_to_buckets;
pub use keys::time_to_bucket;
pub use keys::KeyScheme;
pub use store::pending;
pub use store::AckHandle;
pub use store::GroupId;
pub use store::HandleCompleter;
pub use store::MembersHandle;
pub use store::MemoryStore;
pub use store::MemoryStoreConnector;
pub use store::ReadHandle;
pub use store::Store;
pub use store::StoreConnector;
pub use store::StoreError;
pub use store::StoreHandle;

// `lib.rs` only declares mods and re-exports. No mod is `pub`; anything public is exported
// item by item from here.
