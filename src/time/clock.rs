#[cfg(test)]
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Clock is the worker's view of time: poll intervals, write expiry and flush deadlines all go
/// through it so tests can drive time by hand.
#[async_trait::async_trait]
pub(crate) trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }

    /// True if there is a deadline and it has been reached.
    fn is_past(&self, deadline: Option<Instant>) -> bool {
        matches!(deadline, Some(d) if self.now() >= d)
    }
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
pub(crate) fn manual_clock() -> (ManualClock, ManualClockDriver) {
    let start = Instant::now();
    let (tx, rx) = watch::channel(start);

    (ManualClock { now: rx }, ManualClockDriver { now: tx, start })
}

/// ManualClock only moves when its `ManualClockDriver` advances it.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct ManualClock {
    now: watch::Receiver<Instant>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        while *self.now.borrow() < deadline {
            if self.now.changed().await.is_err() {
                // Driver is gone, time will never move again.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) struct ManualClockDriver {
    now: watch::Sender<Instant>,
    start: Instant,
}

#[cfg(test)]
impl ManualClockDriver {
    pub(crate) fn elapsed(&self) -> Duration {
        *self.now.borrow() - self.start
    }

    /// Step in increments no larger than the poll interval of whatever is being tested. Sleepers
    /// only promise to wake at or after their deadline, so one big jump hides the steps between.
    pub(crate) fn advance(&self, duration: Duration) {
        let next = *self.now.borrow() + duration;
        let _ = self.now.send(next);
    }
}
