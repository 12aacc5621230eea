use crate::api::client::HistoryClient;
use crate::api::options::HistoryOptionsValidated;
use crate::api::HistoryOptions;
use crate::keys::KeyScheme;
use crate::queue;
use crate::store::{GroupId, Store, StoreConnector, StoreError};
use crate::time::RealClock;
use crate::worker::{self, WorkerConfig};
use std::convert::TryFrom;
use std::sync::Arc;
use tokio::time::Duration;

pub struct HistoryClientConfig {
    // Store cluster addresses, passed through to the connector as is.
    pub servers: Vec<String>,
    // Replica groups every record is written to.
    pub groups: Vec<GroupId>,
    pub info_logger: slog::Logger,
    pub options: HistoryOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryClientCreationError {
    #[error("Illegal options for configuring client: {0}")]
    IllegalClientOptions(String),
    #[error("No replica groups configured")]
    NoGroups,
    #[error("Failed to connect to the store")]
    Connection(#[from] ConnectionError),
}

#[derive(Debug, thiserror::Error)]
#[error("Gave up connecting after {attempts} attempts")]
pub struct ConnectionError {
    pub attempts: usize,
    pub source: StoreError,
}

/// Connects to the store through `connector` and starts the client's dispatch worker. Must be
/// called from within a tokio runtime.
pub async fn try_create_history_client<C: StoreConnector>(
    config: HistoryClientConfig,
    connector: &C,
) -> Result<HistoryClient<C::Store>, HistoryClientCreationError> {
    let root_logger = config.info_logger;

    let options = HistoryOptionsValidated::try_from(config.options)
        .map_err(|e| HistoryClientCreationError::IllegalClientOptions(e.to_string()))?;

    if config.groups.is_empty() {
        return Err(HistoryClientCreationError::NoGroups);
    }

    let store = connect_with_retries(
        &root_logger,
        connector,
        &config.servers,
        &config.groups,
        options.connection_retries,
        options.reconnect_timeout,
    )
    .await?;
    let store = Arc::new(store);

    let min_writes = store.min_writes();
    if min_writes > config.groups.len() {
        slog::warn!(
            root_logger,
            "Store requires {} acks per write but only {} groups are configured. No write can succeed.",
            min_writes,
            config.groups.len()
        );
    }

    let key_scheme = KeyScheme::new(options.bucket_resolution);
    let (record_queue, records) = queue::record_queue(options.queue_size, options.add_timeout);
    let (worker_shutdown, shutdown_signal) = worker::shutdown_signal();

    let (worker_client, dispatch_worker) = worker::create_worker(WorkerConfig {
        logger: root_logger.new(slog::o!("Component" => "DispatchWorker")),
        store: store.clone(),
        key_scheme,
        records,
        retry_queue: record_queue.clone(),
        shutdown: shutdown_signal,
        window_size: options.simultaneous_writes,
        window_linger: options.window_linger,
        write_timeout: options.write_timeout,
        poll_interval: options.poll_timeout,
        max_retries: options.add_retries,
        clock: RealClock,
    });
    let worker_task = tokio::spawn(dispatch_worker.run_event_loop());

    slog::info!(
        root_logger,
        "History client started with {} groups, min_writes {}",
        config.groups.len(),
        min_writes
    );

    Ok(HistoryClient {
        logger: root_logger,
        store,
        queue: record_queue,
        key_scheme,
        min_writes,
        read_timeout: options.write_timeout,
        worker: worker_client,
        worker_shutdown,
        worker_task,
    })
}

async fn connect_with_retries<C: StoreConnector>(
    logger: &slog::Logger,
    connector: &C,
    servers: &[String],
    groups: &[GroupId],
    max_attempts: usize,
    reconnect_timeout: Duration,
) -> Result<C::Store, ConnectionError> {
    let mut attempts = 0;
    loop {
        attempts += 1;

        match connector.connect(servers, groups).await {
            Ok(store) => return Ok(store),
            Err(e) if attempts < max_attempts => {
                slog::warn!(
                    logger,
                    "Connection attempt {} of {} failed: {}. Retrying in {:?}.",
                    attempts,
                    max_attempts,
                    e,
                    reconnect_timeout
                );
                tokio::time::sleep(reconnect_timeout).await;
            }
            Err(e) => {
                return Err(ConnectionError {
                    attempts,
                    source: e,
                })
            }
        }
    }
}
