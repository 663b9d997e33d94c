//! Waiting until the page's network activity has genuinely settled.
//!
//! A single zero-crossing of the in-flight count is not enough evidence of
//! settling: asset pipelines issue requests in bursts separated by brief
//! lulls (a script finishes, then its module graph triggers a follow-up
//! fetch). The waiter therefore polls the count down to the threshold,
//! sleeps a settle window, and re-checks; if activity resumed it starts
//! over. The settle-and-reconfirm step trades latency for reliability.

use crate::activity::ActivityCounter;
use crate::result::{SosegarError, SosegarResult};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Default polling interval while waiting for the count to drop (100ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default settle window before confirming idleness (500ms)
pub const DEFAULT_SETTLE_WINDOW_MS: u64 = 500;

/// How many in-flight requests still count as idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdleThreshold {
    /// Strict: idle means zero requests in flight
    NetworkIdle0,
    /// Lenient: up to two long-lived background connections tolerated
    NetworkIdle2,
}

impl IdleThreshold {
    /// Maximum in-flight count still considered idle
    #[must_use]
    pub const fn max_in_flight(&self) -> usize {
        match self {
            Self::NetworkIdle0 => 0,
            Self::NetworkIdle2 => 2,
        }
    }

    /// Get the mode name string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkIdle0 => "networkidle0",
            Self::NetworkIdle2 => "networkidle2",
        }
    }
}

impl Default for IdleThreshold {
    fn default() -> Self {
        Self::NetworkIdle0
    }
}

impl std::fmt::Display for IdleThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IdleThreshold {
    type Err = SosegarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "networkidle0" => Ok(Self::NetworkIdle0),
            "networkidle2" => Ok(Self::NetworkIdle2),
            other => Err(SosegarError::UnknownIdleMode {
                value: other.to_string(),
            }),
        }
    }
}

/// Options for an idle wait
#[derive(Debug, Clone)]
pub struct IdleOptions {
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Settle window in milliseconds
    pub settle_window_ms: u64,
    /// Optional overall deadline in milliseconds
    ///
    /// None by default: the wait is unbounded and the caller imposes its own
    /// outer timeout if one is desired.
    pub deadline_ms: Option<u64>,
}

impl Default for IdleOptions {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            settle_window_ms: DEFAULT_SETTLE_WINDOW_MS,
            deadline_ms: None,
        }
    }
}

impl IdleOptions {
    /// Create options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Set settle window in milliseconds
    #[must_use]
    pub const fn with_settle_window(mut self, settle_window_ms: u64) -> Self {
        self.settle_window_ms = settle_window_ms;
        self
    }

    /// Set an overall deadline in milliseconds
    #[must_use]
    pub const fn with_deadline(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Polling interval as a Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Settle window as a Duration
    #[must_use]
    pub const fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }
}

/// Resolves once the page's network activity has settled
#[derive(Debug, Clone)]
pub struct IdleWaiter {
    counter: ActivityCounter,
}

impl IdleWaiter {
    /// Create a waiter reading the given counter
    #[must_use]
    pub fn new(counter: ActivityCounter) -> Self {
        Self { counter }
    }

    /// Wait until network activity settles at or below the threshold
    ///
    /// Resolves only after the in-flight count has stayed at or below the
    /// threshold for a full settle window. Unbounded: never errors unless a
    /// deadline is supplied via [`IdleWaiter::wait_with_options`].
    pub async fn wait_until_idle(&self, threshold: IdleThreshold) -> SosegarResult<()> {
        self.wait_with_options(threshold, &IdleOptions::default())
            .await
    }

    /// Wait until idle with explicit options
    ///
    /// # Errors
    ///
    /// Returns [`SosegarError::Timeout`] if `options.deadline_ms` is set and
    /// expires before a clean settle window is observed.
    pub async fn wait_with_options(
        &self,
        threshold: IdleThreshold,
        options: &IdleOptions,
    ) -> SosegarResult<()> {
        let started = Instant::now();
        let max = threshold.max_in_flight();

        loop {
            while self.counter.in_flight() > max {
                check_deadline(options, started)?;
                tokio::time::sleep(options.poll_interval()).await;
            }

            // Below threshold is not yet settled: chained follow-up requests
            // may be about to dispatch. Give them a settle window to appear.
            tokio::time::sleep(options.settle_window()).await;

            if self.counter.in_flight() <= max {
                tracing::debug!(
                    threshold = %threshold,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "network settled"
                );
                return Ok(());
            }

            tracing::trace!(
                threshold = %threshold,
                in_flight = self.counter.in_flight(),
                "activity resumed within settle window, restarting"
            );
            check_deadline(options, started)?;
        }
    }
}

fn check_deadline(options: &IdleOptions, started: Instant) -> SosegarResult<()> {
    if let Some(ms) = options.deadline_ms {
        if started.elapsed() >= Duration::from_millis(ms) {
            return Err(SosegarError::Timeout { ms });
        }
    }
    Ok(())
}
