//! Sosegar: Network Settling for Browser-Driven End-to-End Tests
//!
//! Sosegar (Spanish: "to settle/calm") is a deterministic network-activity
//! synchronization layer for end-to-end tests driving a real browser page.
//! It intercepts every outbound request the page issues, optionally rewrites
//! the response the page receives, and lets a test driver block until the
//! page's asynchronous network activity has genuinely settled — without
//! being fooled by transient lulls between request bursts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      SOSEGAR Architecture                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │             page request lifecycle events (CDP)                  │
//! │                    │                    │                        │
//! │             ┌──────▼──────┐      ┌──────▼────────┐               │
//! │             │ RequestGate │      │ActivityTracker│               │
//! │             │ abort/pass/ │      │  in-flight    │               │
//! │             │ substitute  │      │  counter      │               │
//! │             └─────────────┘      └──────┬────────┘               │
//! │                                  ┌──────▼────────┐               │
//! │                                  │  IdleWaiter   │               │
//! │                                  │ poll + settle │               │
//! │                                  └───────────────┘               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The gate and the tracker are independent observers of the same event
//! stream. A test driver installs both on a [`PageSession`] before
//! navigating, triggers a user action, then awaits
//! [`IdleWaiter::wait_until_idle`].
//!
//! # Example
//!
//! ```no_run
//! use sosegar::{GatePolicy, IdleThreshold, PageSession};
//!
//! # async fn example() -> sosegar::SosegarResult<()> {
//! let session = PageSession::new(GatePolicy::default())?;
//! // With the `browser` feature: session.install(&page).await?;
//! // ... navigate, click ...
//! session.waiter().wait_until_idle(IdleThreshold::NetworkIdle0).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

mod activity;
mod gate;
mod idle;
mod result;
mod session;

pub use activity::{ActivityCounter, ActivityTracker, RequestEvent, RequestObserver};
pub use gate::{
    AssetProbe, GateDecision, GatePolicy, HttpProbe, ProbeResponse, RequestGate, ResourceKind,
    SubstituteResponse, DEFAULT_ASSETS_PATTERN, DEFAULT_FAVICON_PATH,
};
pub use idle::{
    IdleOptions, IdleThreshold, IdleWaiter, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SETTLE_WINDOW_MS,
};
pub use result::{SosegarError, SosegarResult};
pub use session::PageSession;
