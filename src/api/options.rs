use std::convert::TryFrom;
use tokio::time::Duration;

const MAX_BUCKET_RESOLUTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Tuning knobs for a `HistoryClient`. Unset fields take their defaults.
#[derive(Clone, Debug, Default)]
pub struct HistoryOptions {
    /// Capacity of the record queue between callers and the dispatch worker.
    pub queue_size: Option<usize>,
    /// Writes the worker keeps in flight before it waits on their results.
    pub simultaneous_writes: Option<usize>,
    /// Attempts to connect to the store at construction.
    pub connection_retries: Option<usize>,
    /// Times a write that missed quorum is sent again.
    pub add_retries: Option<u32>,
    /// How long an add waits for room in a full queue.
    pub add_timeout: Option<Duration>,
    /// Pause between connection attempts.
    pub reconnect_timeout: Option<Duration>,
    pub poll_timeout: Option<Duration>,
    /// A write with no result after this long counts as unacknowledged.
    pub write_timeout: Option<Duration>,
    pub window_linger: Option<Duration>,
    pub bucket_resolution: Option<Duration>,
}

#[derive(Debug)]
pub(super) struct HistoryOptionsValidated {
    pub queue_size: usize,
    pub simultaneous_writes: usize,
    pub connection_retries: usize,
    pub add_retries: u32,
    pub add_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub poll_timeout: Duration,
    pub write_timeout: Duration,
    pub window_linger: Duration,
    pub bucket_resolution: Duration,
}

impl HistoryOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.queue_size == 0 {
            return Err("Queue size must be greater than zero");
        }
        if self.simultaneous_writes == 0 {
            return Err("Simultaneous writes must be greater than zero");
        }
        if self.connection_retries == 0 {
            return Err("Connection retries must allow at least one attempt");
        }
        if self.poll_timeout == Duration::from_secs(0) {
            return Err("Poll timeout must be greater than zero");
        }
        if self.write_timeout <= self.poll_timeout {
            return Err("Write timeout must be greater than poll timeout");
        }
        if self.window_linger == Duration::from_secs(0) {
            return Err("Window linger must be greater than zero");
        }
        if self.bucket_resolution < Duration::from_secs(1) || self.bucket_resolution.subsec_nanos() != 0 {
            return Err("Bucket resolution must be a whole number of seconds");
        }
        if self.bucket_resolution > MAX_BUCKET_RESOLUTION {
            return Err("Bucket resolution must be at most 30 days");
        }

        Ok(())
    }
}

impl TryFrom<HistoryOptions> for HistoryOptionsValidated {
    type Error = &'static str;

    fn try_from(options: HistoryOptions) -> Result<Self, Self::Error> {
        let values = HistoryOptionsValidated {
            queue_size: options.queue_size.unwrap_or(100),
            simultaneous_writes: options.simultaneous_writes.unwrap_or(10),
            connection_retries: options.connection_retries.unwrap_or(1),
            add_retries: options.add_retries.unwrap_or(5),
            add_timeout: options.add_timeout.unwrap_or(Duration::from_millis(20)),
            reconnect_timeout: options.reconnect_timeout.unwrap_or(Duration::from_secs(3)),
            poll_timeout: options.poll_timeout.unwrap_or(Duration::from_millis(10)),
            write_timeout: options.write_timeout.unwrap_or(Duration::from_secs(10)),
            window_linger: options.window_linger.unwrap_or(Duration::from_millis(100)),
            bucket_resolution: options.bucket_resolution.unwrap_or(Duration::from_secs(60)),
        };

        values.validate()?;
        Ok(values)
    }
}
