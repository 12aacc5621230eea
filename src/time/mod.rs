mod clock;

pub(crate) use clock::Clock;
pub(crate) use clock::RealClock;

#[cfg(test)]
pub(crate) use clock::{manual_clock, ManualClockDriver};
