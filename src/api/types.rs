use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct UserId(String);

impl UserId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        UserId(id)
    }
}

/// Input for `add_log` and `add_log_with_activity`.
///
/// The record's bucket comes from `key` if set, else from `time`, else from the time of the call.
#[derive(Clone, Debug)]
pub struct AddLogInput {
    pub user: UserId,
    pub data: Bytes,
    pub time: Option<DateTime<Utc>>,
    pub key: Option<String>,
}

impl AddLogInput {
    pub fn new<U: Into<UserId>, D: Into<Bytes>>(user: U, data: D) -> Self {
        AddLogInput {
            user: user.into(),
            data: data.into(),
            time: None,
            key: None,
        }
    }
}

/// Input for `add_activity`. Bucket selection follows the same rules as `AddLogInput`.
#[derive(Clone, Debug)]
pub struct AddActivityInput {
    pub user: UserId,
    pub time: Option<DateTime<Utc>>,
    pub key: Option<String>,
}

impl AddActivityInput {
    pub fn new<U: Into<UserId>>(user: U) -> Self {
        AddActivityInput {
            user: user.into(),
            time: None,
            key: None,
        }
    }
}

/// Selects the buckets of a read. Explicit `keys` win over the time range. Without keys, `end`
/// defaults to now and `begin` defaults to `end`.
#[derive(Clone, Debug, Default)]
pub struct BucketRange {
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub keys: Option<Vec<String>>,
}

impl BucketRange {
    pub fn between(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        BucketRange {
            begin: Some(begin),
            end: Some(end),
            keys: None,
        }
    }

    pub fn keys(keys: Vec<String>) -> Self {
        BucketRange {
            keys: Some(keys),
            ..BucketRange::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct UserLogsQuery {
    pub user: UserId,
    pub range: BucketRange,
}

#[derive(Clone, Debug, Default)]
pub struct ActiveUsersQuery {
    pub range: BucketRange,
}

/// One bucket's worth of a user's log data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEntry {
    pub key: String,
    pub data: Bytes,
}

#[derive(Debug, Eq, PartialEq)]
pub struct FlushOutput {
    /// False if the flush deadline passed with records still queued. They stay queued.
    pub queue_empty: bool,
    /// Writes submitted to the store whose results were not observed before the deadline.
    pub in_flight: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    // Dispatch runs on a background task. This error is returned if the task has exited.
    #[error("Dispatch worker task has exited")]
    WorkerExited,
}
