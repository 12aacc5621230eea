use crate::api::{FlushError, FlushOutput};
use crate::keys::{self, KeyScheme};
use crate::queue::{QueuedRecord, Record, RecordQueue, RecordQueueReceiver};
use crate::store::Store;
use crate::time::Clock;
use crate::worker::reconciler::{ReconcilerConfig, ResultReconciler};
use crate::worker::shutdown::WorkerShutdownSignal;
use crate::worker::{Operation, PendingWrite};
use std::fmt::Debug;
use std::future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};

const EVENT_BUFFER_SIZE: usize = 10;

pub(crate) struct WorkerConfig<S: Store, C: Clock> {
    pub(crate) logger: slog::Logger,
    pub(crate) store: Arc<S>,
    pub(crate) key_scheme: KeyScheme,
    pub(crate) records: RecordQueueReceiver,
    // Sending side of the same queue, for retries.
    pub(crate) retry_queue: RecordQueue,
    pub(crate) shutdown: WorkerShutdownSignal,
    pub(crate) window_size: usize,
    pub(crate) window_linger: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) max_retries: u32,
    pub(crate) clock: C,
}

pub(crate) fn create<S: Store, C: Clock>(config: WorkerConfig<S, C>) -> (WorkerClient, DispatchWorker<S, C>) {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
    let client = WorkerClient { sender: tx };

    let reconciler = ResultReconciler::new(ReconcilerConfig {
        logger: config.logger.clone(),
        retry_queue: config.retry_queue,
        min_writes: config.store.min_writes(),
        max_retries: config.max_retries,
        poll_interval: config.poll_interval,
        clock: config.clock.clone(),
    });

    let worker = DispatchWorker {
        logger: config.logger,
        store: config.store,
        key_scheme: config.key_scheme,
        records: config.records,
        events: rx,
        shutdown: config.shutdown,
        window: Vec::with_capacity(config.window_size),
        window_size: config.window_size,
        window_linger: config.window_linger,
        write_timeout: config.write_timeout,
        poll_interval: config.poll_interval,
        reconciler,
        clock: config.clock,
    };

    (client, worker)
}

// Records don't go through here; they have their own queue. Events are requests from the client
// that need the worker's exclusive access to that queue and to the window.
#[derive(Debug)]
enum Event {
    // Reconcile the window, then keep draining the queue (submit + reconcile) until both are
    // empty or the deadline passes. Whatever is left stays queued or in flight.
    Flush(FlushInput, Callback<FlushOutput>),
}

#[derive(Debug)]
struct FlushInput {
    deadline: Option<Instant>,
}

#[derive(Debug)]
struct Callback<O: Debug>(oneshot::Sender<O>);

impl<O: Debug> Callback<O> {
    fn send(self, message: O) {
        let _ = self.0.send(message);
    }
}

#[derive(Clone)]
pub(crate) struct WorkerClient {
    sender: mpsc::Sender<Event>,
}

impl WorkerClient {
    pub(crate) async fn flush(&self, deadline: Option<Instant>) -> Result<FlushOutput, FlushError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Event::Flush(FlushInput { deadline }, Callback(tx)))
            .await
            .map_err(|_| FlushError::WorkerExited)?;

        rx.await.map_err(|_| FlushError::WorkerExited)
    }
}

/// DispatchWorker moves records from the queue to the store. It owns the queue's only receiver
/// and the window of writes that have been submitted but not yet reconciled.
pub(crate) struct DispatchWorker<S: Store, C: Clock> {
    logger: slog::Logger,
    store: Arc<S>,
    key_scheme: KeyScheme,
    records: RecordQueueReceiver,
    events: mpsc::Receiver<Event>,
    shutdown: WorkerShutdownSignal,
    window: Vec<PendingWrite>,
    window_size: usize,
    // How long a partly filled window waits for more records before it is reconciled anyway.
    window_linger: Duration,
    write_timeout: Duration,
    poll_interval: Duration,
    reconciler: ResultReconciler<C>,
    clock: C,
}

impl<S: Store, C: Clock> DispatchWorker<S, C> {
    pub(crate) async fn run_event_loop(mut self) {
        loop {
            let window_full = self.window.len() >= self.window_size;
            let window_pending = !self.window.is_empty();
            let mut linger_clock = self.clock.clone();

            tokio::select! {
                biased;

                _ = &mut self.shutdown => break,
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    // Client is gone.
                    None => break,
                },
                // A full window is waited on one poll interval at a time, so a flush or shutdown
                // is picked up between steps.
                _ = future::ready(()), if window_full => self.poll_window().await,
                queued = self.records.get_blocking(), if !window_full => match queued {
                    Some(queued) => self.submit(queued),
                    None => break,
                },
                _ = linger_clock.sleep(self.window_linger), if window_pending && !window_full => {
                    self.poll_window().await;
                }
            }
        }

        self.abandon();
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Flush(input, callback) => {
                let output = self.flush(input.deadline).await;
                callback.send(output);
            }
        }
    }

    async fn poll_window(&mut self) {
        let deadline = self.clock.now() + self.poll_interval;
        self.reconcile_window(Some(deadline)).await;
    }

    pub(crate) async fn flush(&mut self, deadline: Option<Instant>) -> FlushOutput {
        self.reconcile_window(deadline).await;

        while !self.clock.is_past(deadline) {
            match self.records.try_get() {
                Some(queued) => {
                    self.submit(queued);
                    if self.window.len() >= self.window_size {
                        self.reconcile_window(deadline).await;
                    }
                }
                None if self.window.is_empty() => break,
                // Reconciling may queue retries, so go around again.
                None => self.reconcile_window(deadline).await,
            }
        }

        FlushOutput {
            queue_empty: self.records.is_empty(),
            in_flight: self.window.len(),
        }
    }

    fn submit(&mut self, queued: QueuedRecord) {
        let bucket_key = queued.record.bucket_key(&self.key_scheme);
        let entry_key = keys::combine_key(queued.record.user().as_str(), &bucket_key);

        let submissions = match &queued.record {
            Record::Log { data, .. } => vec![(Operation::AppendLog, self.store.write(&entry_key, data.clone(), true))],
            Record::Activity { user, .. } => vec![(
                Operation::IndexActivity,
                self.store.add_to_index(&entry_key, &[bucket_key], user.as_str()),
            )],
            Record::LogWithActivity { user, data, .. } => vec![
                (Operation::AppendLog, self.store.write(&entry_key, data.clone(), true)),
                (
                    Operation::IndexActivity,
                    self.store.add_to_index(&entry_key, &[bucket_key], user.as_str()),
                ),
            ],
        };

        let expires_at = self.clock.now() + self.write_timeout;
        let pending = PendingWrite::submitted(&self.logger, queued, submissions, expires_at);
        self.window.push(pending);
    }

    async fn reconcile_window(&mut self, deadline: Option<Instant>) {
        if self.window.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.window);
        let (report, unresolved) = self.reconciler.reconcile(batch, deadline).await;
        if report.acknowledged + report.retried + report.dropped > 0 {
            slog::debug!(
                self.logger,
                "Reconciled write window: {} acknowledged, {} retried, {} dropped, {} still in flight",
                report.acknowledged,
                report.retried,
                report.dropped,
                unresolved.len()
            );
        }

        self.window = unresolved;
    }

    fn abandon(&mut self) {
        let mut queued = 0;
        while self.records.try_get().is_some() {
            queued += 1;
        }

        if queued > 0 || !self.window.is_empty() {
            slog::warn!(
                self.logger,
                "Dispatch worker stopped with {} writes in flight and {} records queued. They are dropped.",
                self.window.len(),
                queued
            );
        } else {
            slog::info!(self.logger, "Dispatch worker stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AddActivityInput, AddLogInput};
    use crate::queue;
    use crate::store::{GroupId, MemoryStore};
    use crate::test_utils::test_logger;
    use crate::time::RealClock;
    use crate::worker::{shutdown_signal, WorkerShutdownHandle};
    use bytes::Bytes;

    struct Harness {
        worker: DispatchWorker<MemoryStore, RealClock>,
        client: WorkerClient,
        queue: RecordQueue,
        store: MemoryStore,
        shutdown: WorkerShutdownHandle,
    }

    fn harness(store: MemoryStore, window_size: usize, max_retries: u32) -> Harness {
        let (queue, records) = queue::record_queue(16, Duration::from_secs(0));
        let (shutdown, shutdown_signal) = shutdown_signal();

        let (client, worker) = create(WorkerConfig {
            logger: test_logger(),
            store: Arc::new(store.clone()),
            key_scheme: KeyScheme::new(Duration::from_secs(60)),
            records,
            retry_queue: queue.clone(),
            shutdown: shutdown_signal,
            window_size,
            window_linger: Duration::from_millis(20),
            write_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
            max_retries,
            clock: RealClock,
        });

        Harness {
            worker,
            client,
            queue,
            store,
            shutdown,
        }
    }

    fn groups(n: u32) -> Vec<GroupId> {
        (1..=n).map(GroupId::new).collect()
    }

    fn log(user: &str) -> QueuedRecord {
        let mut input = AddLogInput::new(user, "data");
        input.key = Some("k".to_string());
        QueuedRecord::new(Record::log(input))
    }

    #[tokio::test]
    async fn flush_acknowledges_queued_records() {
        let mut h = harness(MemoryStore::new(&groups(3)).with_min_writes(2), 2, 5);
        for user in &["u1", "u2", "u3"] {
            assert!(h.queue.try_put(log(user)));
        }

        let output = h.worker.flush(None).await;

        assert_eq!(
            output,
            FlushOutput {
                queue_empty: true,
                in_flight: 0
            }
        );
        for user in &["u1", "u2", "u3"] {
            assert_eq!(h.store.write_attempts(&format!("{}.k", user)), 1);
        }
        assert_eq!(h.store.stored(GroupId::new(1), "u1.k").unwrap(), Bytes::from_static(b"data"));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let store = MemoryStore::new(&groups(2));
        store.set_group_down(GroupId::new(2), true);
        let mut h = harness(store, 1, 3);
        h.queue.try_put(log("u1"));

        let output = h.worker.flush(None).await;

        assert!(output.queue_empty);
        assert_eq!(h.store.write_attempts("u1.k"), 4);
    }

    #[tokio::test]
    async fn shortfall_recovers_on_retry() {
        let store = MemoryStore::new(&groups(3)).with_min_writes(2);
        store.set_group_down(GroupId::new(3), true);
        store.fail_next_writes(GroupId::new(2), 1);
        let mut h = harness(store, 1, 1);
        h.queue.try_put(log("u1"));

        h.worker.flush(None).await;

        assert_eq!(h.store.write_attempts("u1.k"), 2);
        assert_eq!(h.store.stored(GroupId::new(2), "u1.k").unwrap(), Bytes::from_static(b"data"));
    }

    #[tokio::test]
    async fn activity_adds_user_to_bucket_index() {
        let mut h = harness(MemoryStore::new(&groups(2)), 1, 0);
        let mut input = AddActivityInput::new("u1");
        input.key = Some("k".to_string());
        h.queue.try_put(QueuedRecord::new(Record::activity(input)));

        h.worker.flush(None).await;

        let mut members = h.store.query_index(&["k".to_string()]).unwrap();
        assert_eq!(members.try_take().unwrap().unwrap(), vec!["u1".to_string()]);
        assert!(h.store.stored(GroupId::new(1), "u1.k").is_none());
    }

    #[tokio::test]
    async fn log_with_activity_needs_quorum_on_both() {
        let store = MemoryStore::new(&groups(2));
        store.fail_next_writes(GroupId::new(2), 1);
        let mut h = harness(store, 1, 1);
        let mut input = AddLogInput::new("u1", "data");
        input.key = Some("k".to_string());
        h.queue.try_put(QueuedRecord::new(Record::log_with_activity(input)));

        h.worker.flush(None).await;

        // Append + index per attempt, and the first append fell short on group 2.
        assert_eq!(h.store.write_attempts("u1.k"), 4);
        assert_eq!(h.store.stored(GroupId::new(2), "u1.k").unwrap(), Bytes::from_static(b"data"));
    }

    #[tokio::test]
    async fn submission_failure_is_retried() {
        let store = MemoryStore::new(&groups(1));
        store.fail_next_submissions(1);
        let mut h = harness(store, 1, 1);
        h.queue.try_put(log("u1"));

        h.worker.flush(None).await;

        assert_eq!(h.store.write_attempts("u1.k"), 1);
        assert!(h.store.stored(GroupId::new(1), "u1.k").is_some());
    }

    #[tokio::test]
    async fn flush_deadline_leaves_remaining_records_queued() {
        let store = MemoryStore::new(&groups(1));
        store.set_stalled(true);
        let mut h = harness(store, 1, 5);
        for user in &["u1", "u2", "u3"] {
            h.queue.try_put(log(user));
        }

        let timeout = Duration::from_millis(30);
        let start = Instant::now();
        let output = h.worker.flush(Some(start + timeout)).await;

        assert!(start.elapsed() >= timeout);
        assert_eq!(
            output,
            FlushOutput {
                queue_empty: false,
                in_flight: 1
            }
        );
        assert_eq!(h.store.write_attempts("u1.k"), 1);
        assert_eq!(h.store.write_attempts("u2.k"), 0);

        h.store.set_stalled(false);
        h.store.release_stalled();
        let output = h.worker.flush(None).await;

        assert_eq!(
            output,
            FlushOutput {
                queue_empty: true,
                in_flight: 0
            }
        );
        for user in &["u1", "u2", "u3"] {
            assert_eq!(h.store.write_attempts(&format!("{}.k", user)), 1);
        }
    }

    #[tokio::test]
    async fn event_loop_serves_flush_until_shutdown() {
        let h = harness(MemoryStore::new(&groups(2)), 4, 5);
        let task = tokio::spawn(h.worker.run_event_loop());

        assert!(h.queue.put(log("u1")).await);
        assert!(h.queue.put(log("u2")).await);
        let output = h.client.flush(None).await.unwrap();

        assert!(output.queue_empty);
        assert_eq!(output.in_flight, 0);
        assert_eq!(h.store.write_attempts("u1.k"), 1);
        assert_eq!(h.store.write_attempts("u2.k"), 1);

        h.shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker should stop")
            .unwrap();
        assert!(matches!(h.client.flush(None).await, Err(FlushError::WorkerExited)));
    }

    #[tokio::test]
    async fn flush_is_served_while_full_window_is_stalled() {
        let store = MemoryStore::new(&groups(1));
        store.set_stalled(true);
        let h = harness(store, 1, 5);
        let _task = tokio::spawn(h.worker.run_event_loop());

        assert!(h.queue.put(log("u1")).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let start = Instant::now();
        let output = h.client.flush(Some(start + Duration::from_millis(50))).await.unwrap();

        // Well short of the 5s write timeout; the stalled write is still in flight, not retried.
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(output.in_flight, 1);
        assert_eq!(h.store.write_attempts("u1.k"), 1);

        h.store.set_stalled(false);
        h.store.release_stalled();
        let output = h.client.flush(None).await.unwrap();

        assert_eq!(
            output,
            FlushOutput {
                queue_empty: true,
                in_flight: 0
            }
        );
        assert_eq!(h.store.write_attempts("u1.k"), 1);
    }

    #[tokio::test]
    async fn lingering_window_is_reconciled_without_flush() {
        let store = MemoryStore::new(&groups(2));
        store.fail_next_writes(GroupId::new(2), 1);
        let h = harness(store, 10, 2);
        let _task = tokio::spawn(h.worker.run_event_loop());

        assert!(h.queue.put(log("u1")).await);

        // Window never fills, so only the linger timer can trigger the retry.
        let deadline = Instant::now() + Duration::from_secs(2);
        while h.store.write_attempts("u1.k") < 2 {
            assert!(Instant::now() < deadline, "record was never retried");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
