//! Live accounting of in-flight network requests.
//!
//! The tracker subscribes to the three request lifecycle events the
//! automation layer emits for every dispatched request: dispatch, finished,
//! failed. Every dispatch is guaranteed exactly one terminal event, so the
//! tracker performs no deduplication. It does not care what the gate decided
//! about a request; even an aborted request produces a failure event and
//! still decrements.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A request lifecycle event as delivered by the automation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestEvent {
    /// The page dispatched a request
    Dispatched,
    /// A dispatched request completed
    Finished,
    /// A dispatched request failed (including aborted requests)
    Failed,
}

impl RequestEvent {
    /// Get the event name string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatched => "request",
            Self::Finished => "requestfinished",
            Self::Failed => "requestfailed",
        }
    }
}

impl std::fmt::Display for RequestEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observer of request lifecycle events
///
/// Registered against the page session's event source. The [`ActivityTracker`]
/// is the canonical implementation; tests may supply their own.
pub trait RequestObserver: Send + Sync {
    /// React to one lifecycle event
    fn observe(&self, event: RequestEvent);
}

/// The number of requests dispatched but not yet resolved
///
/// Scoped to a single page session and shared between the tracker (writer)
/// and the idle waiter (reader). Reset between tests.
#[derive(Debug, Clone, Default)]
pub struct ActivityCounter {
    in_flight: Arc<AtomicI64>,
}

impl ActivityCounter {
    /// Create a new counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of in-flight requests
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let count = self.in_flight.load(Ordering::SeqCst);
        debug_assert!(count >= 0, "in-flight count must never be negative");
        usize::try_from(count).unwrap_or(0)
    }

    /// Reset to zero (session teardown)
    pub fn reset(&self) {
        self.in_flight.store(0, Ordering::SeqCst);
    }

    pub(crate) fn increment(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the count.
    ///
    /// # Panics
    ///
    /// Panics if the count would go negative. A decrement without a matching
    /// prior increment means the lifecycle event wiring is broken, and the
    /// test run must halt loudly rather than silently clamp the counter.
    pub(crate) fn decrement(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        assert!(
            previous > 0,
            "in-flight request count went negative: a terminal event arrived \
             without a matching dispatch (broken lifecycle subscription)"
        );
    }
}

/// Maintains an [`ActivityCounter`] from request lifecycle events
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    counter: ActivityCounter,
}

impl ActivityTracker {
    /// Create a tracker writing to the given counter
    #[must_use]
    pub fn new(counter: ActivityCounter) -> Self {
        Self { counter }
    }

    /// The counter this tracker maintains
    #[must_use]
    pub fn counter(&self) -> &ActivityCounter {
        &self.counter
    }
}

impl RequestObserver for ActivityTracker {
    fn observe(&self, event: RequestEvent) {
        match event {
            RequestEvent::Dispatched => self.counter.increment(),
            RequestEvent::Finished | RequestEvent::Failed => self.counter.decrement(),
        }
        tracing::trace!(
            event = %event,
            in_flight = self.counter.in_flight(),
            "request lifecycle event"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    mod counter_tests {
        use super::*;

        #[test]
        fn test_new_counter_is_zero() {
            let counter = ActivityCounter::new();
            assert_eq!(counter.in_flight(), 0);
        }

        #[test]
        fn test_increment_decrement() {
            let counter = ActivityCounter::new();
            counter.increment();
            counter.increment();
            assert_eq!(counter.in_flight(), 2);
            counter.decrement();
            assert_eq!(counter.in_flight(), 1);
        }

        #[test]
        fn test_reset() {
            let counter = ActivityCounter::new();
            counter.increment();
            counter.increment();
            counter.reset();
            assert_eq!(counter.in_flight(), 0);
        }

        #[test]
        fn test_clones_share_state() {
            let counter = ActivityCounter::new();
            let other = counter.clone();
            counter.increment();
            assert_eq!(other.in_flight(), 1);
        }

        #[test]
        #[should_panic(expected = "in-flight request count went negative")]
        fn test_decrement_without_increment_panics() {
            let counter = ActivityCounter::new();
            counter.decrement();
        }
    }

    mod tracker_tests {
        use super::*;

        #[test]
        fn test_dispatch_increments() {
            let tracker = ActivityTracker::new(ActivityCounter::new());
            tracker.observe(RequestEvent::Dispatched);
            assert_eq!(tracker.counter().in_flight(), 1);
        }

        #[test]
        fn test_finished_decrements() {
            let tracker = ActivityTracker::new(ActivityCounter::new());
            tracker.observe(RequestEvent::Dispatched);
            tracker.observe(RequestEvent::Finished);
            assert_eq!(tracker.counter().in_flight(), 0);
        }

        #[test]
        fn test_failed_decrements() {
            let tracker = ActivityTracker::new(ActivityCounter::new());
            tracker.observe(RequestEvent::Dispatched);
            tracker.observe(RequestEvent::Failed);
            assert_eq!(tracker.counter().in_flight(), 0);
        }

        #[test]
        fn test_mixed_sequence() {
            // Dispatch 3, finish 1, fail 1 → one request remains in flight
            let tracker = ActivityTracker::new(ActivityCounter::new());
            tracker.observe(RequestEvent::Dispatched);
            tracker.observe(RequestEvent::Dispatched);
            tracker.observe(RequestEvent::Dispatched);
            tracker.observe(RequestEvent::Finished);
            tracker.observe(RequestEvent::Failed);
            assert_eq!(tracker.counter().in_flight(), 1);
        }

        #[test]
        fn test_event_names() {
            assert_eq!(RequestEvent::Dispatched.as_str(), "request");
            assert_eq!(RequestEvent::Finished.as_str(), "requestfinished");
            assert_eq!(RequestEvent::Failed.as_str(), "requestfailed");
        }

        #[test]
        fn test_event_display() {
            assert_eq!(format!("{}", RequestEvent::Dispatched), "request");
            assert_eq!(format!("{}", RequestEvent::Failed), "requestfailed");
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// After any valid event sequence the count equals
            /// dispatched − finished − failed, and is never negative.
            #[test]
            fn in_flight_matches_event_arithmetic(ops in proptest::collection::vec(0u8..3, 0..200)) {
                let tracker = ActivityTracker::new(ActivityCounter::new());
                let mut dispatched = 0usize;
                let mut resolved = 0usize;

                for op in ops {
                    match op {
                        0 => {
                            tracker.observe(RequestEvent::Dispatched);
                            dispatched += 1;
                        }
                        // Terminal events only for requests still in flight;
                        // the automation layer guarantees this pairing.
                        1 if dispatched > resolved => {
                            tracker.observe(RequestEvent::Finished);
                            resolved += 1;
                        }
                        2 if dispatched > resolved => {
                            tracker.observe(RequestEvent::Failed);
                            resolved += 1;
                        }
                        _ => {}
                    }
                    prop_assert_eq!(tracker.counter().in_flight(), dispatched - resolved);
                }
            }
        }
    }
}
