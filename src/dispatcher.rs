use log::debug;
use tokio::time::{Duration, Instant};

use crate::types::MergedSample;

/// Trailing-edge debounce timer for outbound inference requests.
///
/// Every submission replaces the pending sample and pushes the deadline to
/// `window` after itself, so a burst collapses into one request carrying the
/// last sample. Earlier samples in the burst are discarded, never queued.
///
/// With a `max_wait`, a continuous burst still fires no later than
/// `max_wait` after its first submission, carrying the latest sample.
///
/// The timer only holds state; the owning event loop sleeps until
/// [`deadline`](Self::deadline) and then calls [`take_due`](Self::take_due).
#[derive(Debug)]
pub struct Dispatcher {
    window: Duration,
    max_wait: Option<Duration>,
    pending: Option<Pending>,
    armed: bool,
    coalesced: u64,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    sample: MergedSample,
    first: Instant,
    deadline: Instant,
}

impl Dispatcher {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            max_wait: None,
            pending: None,
            armed: false,
            coalesced: 0,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Accept submissions from now on.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Stop accepting submissions and drop anything pending.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.cancel();
    }

    /// Always accepted. While disarmed the sample is silently discarded.
    pub fn submit(&mut self, sample: MergedSample) {
        self.submit_at(sample, Instant::now());
    }

    pub fn submit_at(&mut self, sample: MergedSample, now: Instant) {
        if !self.armed {
            return;
        }
        let first = match self.pending {
            Some(pending) => {
                self.coalesced += 1;
                pending.first
            }
            None => now,
        };
        let mut deadline = now + self.window;
        if let Some(max_wait) = self.max_wait {
            deadline = deadline.min(first + max_wait);
        }
        self.pending = Some(Pending {
            sample,
            first,
            deadline,
        });
    }

    /// Drop the pending request, if any.
    pub fn cancel(&mut self) -> bool {
        let cancelled = self.pending.take().is_some();
        if cancelled {
            debug!("[dispatch] pending request cancelled");
        }
        cancelled
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|pending| pending.deadline)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Hand out the pending sample once its window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<MergedSample> {
        match self.pending {
            Some(pending) if pending.deadline <= now => {
                self.pending = None;
                Some(pending.sample)
            }
            _ => None,
        }
    }

    /// Submissions that replaced a still-pending sample.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorReading;

    fn sample(value: f64) -> MergedSample {
        MergedSample::new(
            SensorReading::new(value, 0.0, 0.0),
            SensorReading::ZERO,
        )
    }

    #[test]
    fn test_burst_collapses_to_last_sample() {
        let mut dispatcher = Dispatcher::new(Duration::from_millis(2000));
        dispatcher.arm();
        let start = Instant::now();

        for i in 0..20u64 {
            let now = start + Duration::from_millis(i * 100);
            dispatcher.submit_at(sample(i as f64), now);
            assert!(dispatcher.take_due(now).is_none());
        }

        let last_submit = start + Duration::from_millis(1900);
        assert_eq!(
            dispatcher.deadline(),
            Some(last_submit + Duration::from_millis(2000))
        );
        assert!(dispatcher
            .take_due(last_submit + Duration::from_millis(1999))
            .is_none());

        let fired = dispatcher
            .take_due(last_submit + Duration::from_millis(2000))
            .unwrap();
        assert_eq!(fired.accelerometer.x, 19.0);
        assert!(!dispatcher.has_pending());
        assert_eq!(dispatcher.coalesced(), 19);
    }

    #[test]
    fn test_max_wait_caps_continuous_burst() {
        let mut dispatcher = Dispatcher::new(Duration::from_millis(2000))
            .with_max_wait(Some(Duration::from_millis(3000)));
        dispatcher.arm();
        let start = Instant::now();

        let mut fired = Vec::new();
        for i in 0..50u64 {
            let now = start + Duration::from_millis(i * 100);
            if let Some(sample) = dispatcher.take_due(now) {
                fired.push((i, sample.accelerometer.x));
            }
            dispatcher.submit_at(sample(i as f64), now);
        }

        // due at 3000 ms, picked up on the tick at 3000 ms before that tick submits
        assert_eq!(fired[0], (30, 29.0));
        // next burst started at 3000 ms, capped at 6000 ms, past the end of the loop
        assert_eq!(fired.len(), 1);
        assert!(dispatcher.has_pending());
    }

    #[test]
    fn test_disarmed_accepts_but_drops() {
        let mut dispatcher = Dispatcher::new(Duration::from_millis(2000));
        let now = Instant::now();
        dispatcher.submit_at(sample(1.0), now);

        assert!(!dispatcher.has_pending());
        assert!(dispatcher.deadline().is_none());
        assert_eq!(dispatcher.coalesced(), 0);
    }

    #[test]
    fn test_disarm_cancels_pending() {
        let mut dispatcher = Dispatcher::new(Duration::from_millis(2000));
        dispatcher.arm();
        let now = Instant::now();
        dispatcher.submit_at(sample(1.0), now);
        assert!(dispatcher.has_pending());

        dispatcher.disarm();
        assert!(dispatcher.take_due(now + Duration::from_secs(10)).is_none());
        assert!(!dispatcher.cancel());
    }
}
