use chrono::{DateTime, Utc};
use std::convert::TryFrom;
use tokio::time::Duration;

/// KeyScheme maps timestamps onto coarse time buckets. All records of a user that fall into the
/// same bucket share one storage key, which bounds how many keys a time-range read has to touch.
///
/// A bucket key is the bucket's start time in Unix seconds, rendered in decimal.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyScheme {
    resolution_secs: i64,
}

impl KeyScheme {
    /// Resolution is truncated to whole seconds, with a floor of one second.
    pub fn new(resolution: Duration) -> Self {
        let resolution_secs = i64::try_from(resolution.as_secs()).unwrap_or(i64::MAX);

        KeyScheme {
            resolution_secs: resolution_secs.max(1),
        }
    }

    pub fn time_to_bucket(&self, time: DateTime<Utc>) -> String {
        time_to_bucket(time, self.resolution_secs)
    }

    pub fn time_range_to_buckets(&self, begin: DateTime<Utc>, end: DateTime<Utc>) -> Vec<String> {
        time_range_to_buckets(begin, end, self.resolution_secs)
    }
}

pub fn time_to_bucket(time: DateTime<Utc>, resolution_secs: i64) -> String {
    bucket_start(time, resolution_secs).to_string()
}

/// Every bucket touched by `[begin, end]`, both ends inclusive, oldest first. Empty if
/// `begin > end`.
pub fn time_range_to_buckets(begin: DateTime<Utc>, end: DateTime<Utc>, resolution_secs: i64) -> Vec<String> {
    if begin > end {
        return vec![];
    }
    let resolution_secs = resolution_secs.max(1);

    let first = bucket_start(begin, resolution_secs);
    let last = bucket_start(end, resolution_secs);

    let mut buckets = vec![];
    let mut start = first;
    while start <= last {
        buckets.push(start.to_string());
        start = match start.checked_add(resolution_secs) {
            Some(next) => next,
            None => break,
        };
    }

    buckets
}

pub fn combine_key(user: &str, bucket_key: &str) -> String {
    format!("{}.{}", user, bucket_key)
}

fn bucket_start(time: DateTime<Utc>, resolution_secs: i64) -> i64 {
    let secs = time.timestamp();
    secs - secs.rem_euclid(resolution_secs.max(1))
}
