use crate::api::{AddActivityInput, AddLogInput, UserId};
use crate::keys::KeyScheme;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Where a record lands. `key` takes precedence over `time`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BucketTarget {
    time: Option<DateTime<Utc>>,
    key: Option<String>,
}

impl BucketTarget {
    /// With neither `time` nor `key`, the current time is captured here, so every retry of the
    /// record resolves to the same bucket.
    pub(crate) fn new(time: Option<DateTime<Utc>>, key: Option<String>) -> Self {
        let time = match (&time, &key) {
            (None, None) => Some(Utc::now()),
            _ => time,
        };

        BucketTarget { time, key }
    }

    pub(crate) fn bucket_key(&self, scheme: &KeyScheme) -> String {
        match (&self.key, self.time) {
            (Some(key), _) => key.clone(),
            (None, Some(time)) => scheme.time_to_bucket(time),
            (None, None) => scheme.time_to_bucket(Utc::now()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Record {
    Log {
        user: UserId,
        data: Bytes,
        target: BucketTarget,
    },
    Activity {
        user: UserId,
        target: BucketTarget,
    },
    LogWithActivity {
        user: UserId,
        data: Bytes,
        target: BucketTarget,
    },
}

impl Record {
    pub(crate) fn log(input: AddLogInput) -> Self {
        Record::Log {
            user: input.user,
            data: input.data,
            target: BucketTarget::new(input.time, input.key),
        }
    }

    pub(crate) fn activity(input: AddActivityInput) -> Self {
        Record::Activity {
            user: input.user,
            target: BucketTarget::new(input.time, input.key),
        }
    }

    pub(crate) fn log_with_activity(input: AddLogInput) -> Self {
        Record::LogWithActivity {
            user: input.user,
            data: input.data,
            target: BucketTarget::new(input.time, input.key),
        }
    }

    pub(crate) fn user(&self) -> &UserId {
        match self {
            Record::Log { user, .. } | Record::Activity { user, .. } | Record::LogWithActivity { user, .. } => user,
        }
    }

    pub(crate) fn bucket_key(&self, scheme: &KeyScheme) -> String {
        match self {
            Record::Log { target, .. } | Record::Activity { target, .. } | Record::LogWithActivity { target, .. } => {
                target.bucket_key(scheme)
            }
        }
    }
}

/// QueuedRecord is the unit held by the record queue: a record and how often it has been retried.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct QueuedRecord {
    pub(crate) record: Record,
    pub(crate) retry_count: u32,
}

impl QueuedRecord {
    pub(crate) fn new(record: Record) -> Self {
        QueuedRecord { record, retry_count: 0 }
    }

    pub(crate) fn into_retry(self) -> Self {
        QueuedRecord {
            record: self.record,
            retry_count: self.retry_count + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::time::Duration;

    fn scheme() -> KeyScheme {
        KeyScheme::new(Duration::from_secs(60))
    }

    #[test]
    fn explicit_key_wins_over_time() {
        let mut input = AddLogInput::new("u1", "data");
        input.time = Some(Utc.timestamp_opt(600, 0).unwrap());
        input.key = Some("custom".to_string());

        let record = Record::log(input);
        assert_eq!(record.bucket_key(&scheme()), "custom");
    }

    #[test]
    fn time_selects_bucket() {
        let mut input = AddActivityInput::new("u1");
        input.time = Some(Utc.timestamp_opt(659, 0).unwrap());

        assert_eq!(Record::activity(input).bucket_key(&scheme()), "600");
    }

    #[test]
    fn missing_time_is_captured_once() {
        let record = Record::log_with_activity(AddLogInput::new("u1", "data"));
        let first = record.bucket_key(&scheme());

        let retried = QueuedRecord::new(record).into_retry().into_retry();
        assert_eq!(retried.retry_count, 2);
        assert_eq!(retried.record.bucket_key(&scheme()), first);
        assert_eq!(retried.record.user(), &UserId::new("u1"));
    }
}
