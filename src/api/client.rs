use crate::api::types::{
    ActiveUsersQuery, AddActivityInput, AddLogInput, BucketRange, FlushError, FlushOutput, LogEntry, UserId,
    UserLogsQuery,
};
use crate::keys::{self, KeyScheme};
use crate::queue::{QueuedRecord, Record, RecordQueue};
use crate::store::{Store, StoreError, StoreHandle};
use crate::worker::{WorkerClient, WorkerShutdownHandle};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// HistoryClient is the application's handle to the history store.
///
/// Adds are buffered and written by a background worker, so a successful add only means the
/// record was queued. Use `flush()` to wait for queued records to be written. Reads go to the
/// store directly and skip buckets that can't be read.
pub struct HistoryClient<S: Store> {
    pub(super) logger: slog::Logger,
    pub(super) store: Arc<S>,
    pub(super) queue: RecordQueue,
    pub(super) key_scheme: KeyScheme,
    pub(super) min_writes: usize,
    // Bounds each read, same as a write's result.
    pub(super) read_timeout: Duration,
    pub(super) worker: WorkerClient,
    pub(super) worker_shutdown: WorkerShutdownHandle,
    pub(super) worker_task: JoinHandle<()>,
}

impl<S: Store> HistoryClient<S> {
    /// Queues `input.data` to be appended to the user's log bucket. Returns false if the queue
    /// stayed full for the whole add timeout; the record is dropped in that case.
    pub async fn add_log(&self, input: AddLogInput) -> bool {
        self.enqueue(Record::log(input)).await
    }

    /// Queues the user to be added to the bucket's set of active users.
    pub async fn add_activity(&self, input: AddActivityInput) -> bool {
        self.enqueue(Record::activity(input)).await
    }

    /// Both of the above, as one record. It only counts as written once both parts reach the
    /// write quorum.
    pub async fn add_log_with_activity(&self, input: AddLogInput) -> bool {
        self.enqueue(Record::log_with_activity(input)).await
    }

    /// Waits for queued and in-flight records to be written, up to `timeout` if one is given.
    /// Records not written by then stay queued.
    pub async fn flush(&self, timeout: Option<Duration>) -> Result<FlushOutput, FlushError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        self.worker.flush(deadline).await
    }

    /// Returns the user's log data, one entry per bucket that has any, in bucket order.
    pub async fn get_user_logs(&self, query: UserLogsQuery) -> Vec<LogEntry> {
        let UserLogsQuery { user, range } = query;
        let buckets = self.bucket_keys(range);

        // Submit every read before waiting on any of them.
        let reads: Vec<_> = buckets
            .into_iter()
            .map(|bucket| {
                let read = self.store.read(&keys::combine_key(user.as_str(), &bucket));
                (bucket, read)
            })
            .collect();

        let mut entries = Vec::with_capacity(reads.len());
        for (bucket, read) in reads {
            match self.wait_for_read(read).await {
                Ok(data) => entries.push(LogEntry { key: bucket, data }),
                Err(StoreError::NotFound) => (),
                Err(e) => slog::debug!(
                    self.logger,
                    "Skipping bucket {} of user {:?}: {}",
                    bucket,
                    user,
                    e
                ),
            }
        }

        entries
    }

    /// Returns every user active in any of the selected buckets, each once, in the order the
    /// store first reports them.
    pub async fn get_active_users(&self, query: ActiveUsersQuery) -> Vec<UserId> {
        let buckets = self.bucket_keys(query.range);

        let queries: Vec<_> = buckets
            .into_iter()
            .map(|bucket| {
                let members = self.store.query_index(std::slice::from_ref(&bucket));
                (bucket, members)
            })
            .collect();

        let mut seen = HashSet::new();
        let mut users = vec![];
        for (bucket, members) in queries {
            let members = match self.wait_for_read(members).await {
                Ok(members) => members,
                Err(e) => {
                    slog::debug!(self.logger, "Skipping activity of bucket {}: {}", bucket, e);
                    continue;
                }
            };

            for member in members {
                if seen.insert(member.clone()) {
                    users.push(UserId::from(member));
                }
            }
        }

        users
    }

    /// Number of groups that must acknowledge a write. Read from the store once, when the client
    /// was created.
    pub fn min_writes(&self) -> usize {
        self.min_writes
    }

    /// Stops the dispatch worker and waits for it to exit. Records not yet written are dropped;
    /// call `flush()` first to avoid that.
    pub async fn shutdown(self) {
        self.worker_shutdown.shutdown();

        if let Err(e) = self.worker_task.await {
            slog::error!(self.logger, "Dispatch worker task failed: {}", e);
        }
    }

    async fn enqueue(&self, record: Record) -> bool {
        let user = record.user().clone();
        if self.queue.put(QueuedRecord::new(record)).await {
            return true;
        }

        slog::warn!(self.logger, "Record queue is full. Dropping record of user {:?}.", user);
        false
    }

    fn bucket_keys(&self, range: BucketRange) -> Vec<String> {
        if let Some(keys) = range.keys {
            return keys;
        }

        let end = range.end.unwrap_or_else(Utc::now);
        let begin = range.begin.unwrap_or(end);
        self.key_scheme.time_range_to_buckets(begin, end)
    }

    async fn wait_for_read<T>(&self, read: Result<StoreHandle<T>, StoreError>) -> Result<T, StoreError> {
        match tokio::time::timeout(self.read_timeout, read?.wait()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "no result within {:?}",
                self.read_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::{
        try_create_history_client, ActiveUsersQuery, AddLogInput, BucketRange, HistoryClient, HistoryClientConfig,
        HistoryOptions, UserId, UserLogsQuery,
    };
    use crate::store::{GroupId, MemoryStore, MemoryStoreConnector, Store};
    use crate::test_utils::test_logger;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use tokio::time::Duration;

    fn groups(n: u32) -> Vec<GroupId> {
        (1..=n).map(GroupId::new).collect()
    }

    async fn client(store: &MemoryStore, options: HistoryOptions) -> HistoryClient<MemoryStore> {
        let config = HistoryClientConfig {
            servers: vec!["localhost:1025".to_string()],
            groups: store.groups(),
            info_logger: test_logger(),
            options,
        };

        try_create_history_client(config, &MemoryStoreConnector::new(store.clone()))
            .await
            .unwrap()
    }

    fn log_at(user: &str, data: &'static str, key: &str) -> AddLogInput {
        let mut input = AddLogInput::new(user, data);
        input.key = Some(key.to_string());
        input
    }

    #[tokio::test]
    async fn added_logs_are_readable_after_flush() {
        let store = MemoryStore::new(&groups(3)).with_min_writes(2);
        let client = client(&store, HistoryOptions::default()).await;

        assert!(client.add_log(log_at("u1", "hello ", "600")).await);
        assert!(client.add_log(log_at("u1", "world", "600")).await);
        let output = client.flush(Some(Duration::from_secs(5))).await.unwrap();
        assert!(output.queue_empty);
        assert_eq!(output.in_flight, 0);

        let logs = client
            .get_user_logs(UserLogsQuery {
                user: UserId::new("u1"),
                range: BucketRange::keys(vec!["600".to_string()]),
            })
            .await;

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].key, "600");
        assert_eq!(logs[0].data, Bytes::from_static(b"hello world"));
        assert_eq!(client.min_writes(), 2);
    }

    #[tokio::test]
    async fn user_logs_skip_missing_buckets() {
        let store = MemoryStore::new(&groups(1));
        store.write("u1.0", Bytes::from_static(b"a"), true).unwrap();
        store.write("u1.120", Bytes::from_static(b"c"), true).unwrap();
        store.write("u2.60", Bytes::from_static(b"other user"), true).unwrap();
        let client = client(&store, HistoryOptions::default()).await;

        let range = BucketRange::between(Utc.timestamp_opt(10, 0).unwrap(), Utc.timestamp_opt(130, 0).unwrap());
        let logs = client
            .get_user_logs(UserLogsQuery {
                user: UserId::new("u1"),
                range,
            })
            .await;

        let keys: Vec<&str> = logs.iter().map(|entry| entry.key.as_str()).collect();
        assert_eq!(keys, vec!["0", "120"]);
        assert_eq!(logs[1].data, Bytes::from_static(b"c"));
    }

    #[tokio::test]
    async fn unreadable_store_yields_nothing() {
        let store = MemoryStore::new(&groups(2));
        store.write("u1.60", Bytes::from_static(b"a"), true).unwrap();
        let client = client(&store, HistoryOptions::default()).await;
        store.set_group_down(GroupId::new(1), true);
        store.set_group_down(GroupId::new(2), true);

        let logs = client
            .get_user_logs(UserLogsQuery {
                user: UserId::new("u1"),
                range: BucketRange::keys(vec!["60".to_string()]),
            })
            .await;

        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn active_users_are_deduplicated_in_first_seen_order() {
        let store = MemoryStore::new(&groups(2));
        let client = client(&store, HistoryOptions::default()).await;
        for (user, bucket) in &[("u2", "60"), ("u1", "60"), ("u1", "120"), ("u3", "120")] {
            store.add_to_index(&format!("{}.{}", user, bucket), &[bucket.to_string()], user).unwrap();
        }

        let users = client
            .get_active_users(ActiveUsersQuery {
                range: BucketRange::between(Utc.timestamp_opt(60, 0).unwrap(), Utc.timestamp_opt(179, 0).unwrap()),
            })
            .await;

        assert_eq!(users, vec![UserId::new("u2"), UserId::new("u1"), UserId::new("u3")]);
    }

    #[tokio::test]
    async fn add_returns_false_while_worker_is_stuck() {
        let store = MemoryStore::new(&groups(1));
        store.set_stalled(true);
        let options = HistoryOptions {
            queue_size: Some(1),
            simultaneous_writes: Some(1),
            add_timeout: Some(Duration::from_millis(50)),
            ..HistoryOptions::default()
        };
        let client = client(&store, options).await;

        // The worker takes u1 and blocks on its result; u2 then fills the queue.
        assert!(client.add_log(log_at("u1", "a", "k")).await);
        assert!(client.add_log(log_at("u2", "b", "k")).await);
        assert!(!client.add_log(log_at("u3", "c", "k")).await);

        store.set_stalled(false);
        store.release_stalled();
        let output = client.flush(Some(Duration::from_secs(5))).await.unwrap();

        assert!(output.queue_empty);
        assert_eq!(store.write_attempts("u1.k"), 1);
        assert_eq!(store.write_attempts("u2.k"), 1);
        assert_eq!(store.write_attempts("u3.k"), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_worker() {
        let store = MemoryStore::new(&groups(1));
        let client = client(&store, HistoryOptions::default()).await;
        assert!(client.add_log(log_at("u1", "a", "k")).await);
        client.flush(None).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), client.shutdown())
            .await
            .expect("shutdown should not hang");
        assert_eq!(store.write_attempts("u1.k"), 1);
    }
}
