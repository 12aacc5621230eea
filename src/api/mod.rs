//! This mod is meant to hold most of the code for the library's client-facing API.
mod client;
mod options;
mod types;
mod wiring;

pub use client::HistoryClient;
pub use options::HistoryOptions;
pub use types::ActiveUsersQuery;
pub use types::AddActivityInput;
pub use types::AddLogInput;
pub use types::BucketRange;
pub use types::FlushError;
pub use types::FlushOutput;
pub use types::LogEntry;
pub use types::UserId;
pub use types::UserLogsQuery;
pub use wiring::try_create_history_client;
pub use wiring::ConnectionError;
pub use wiring::HistoryClientConfig;
pub use wiring::HistoryClientCreationError;
