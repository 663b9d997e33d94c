//! Per-page session owning the synchronization state.
//!
//! A [`PageSession`] binds a [`RequestGate`] and an [`ActivityTracker`] to
//! one controlled page. Both observe the same request lifecycle event
//! stream independently: the gate decides the fate of each request, the
//! tracker counts dispatches and resolutions regardless of what the gate
//! decided (an aborted request still fails, and still decrements).
//!
//! With the `browser` feature the session installs itself on a
//! chromiumoxide page via the CDP Fetch and Network domains. Without it the
//! session is driven directly through [`PageSession::handle_request_event`],
//! which is how the unit tests exercise it.

use crate::activity::{ActivityCounter, ActivityTracker, RequestEvent, RequestObserver};
use crate::gate::{AssetProbe, GatePolicy, RequestGate};
use crate::idle::IdleWaiter;
use crate::result::SosegarResult;
use std::sync::Arc;

/// Synchronization state scoped to a single controlled page
///
/// No state is shared across sessions; create one per page and drop it (or
/// call [`PageSession::reset`]) between tests.
#[derive(Debug, Clone)]
pub struct PageSession {
    counter: ActivityCounter,
    tracker: ActivityTracker,
    gate: RequestGate,
}

impl PageSession {
    /// Create a session with the shipped HTTP probe
    pub fn new(policy: GatePolicy) -> SosegarResult<Self> {
        Ok(Self::from_gate(RequestGate::new(policy)?))
    }

    /// Create a session with a custom asset probe
    #[must_use]
    pub fn with_probe(policy: GatePolicy, probe: Arc<dyn AssetProbe>) -> Self {
        Self::from_gate(RequestGate::with_probe(policy, probe))
    }

    fn from_gate(gate: RequestGate) -> Self {
        let counter = ActivityCounter::new();
        let tracker = ActivityTracker::new(counter.clone());
        Self {
            counter,
            tracker,
            gate,
        }
    }

    /// The session's in-flight counter
    #[must_use]
    pub fn counter(&self) -> &ActivityCounter {
        &self.counter
    }

    /// The session's request gate
    #[must_use]
    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    /// An idle waiter reading this session's counter
    #[must_use]
    pub fn waiter(&self) -> IdleWaiter {
        IdleWaiter::new(self.counter.clone())
    }

    /// Deliver one request lifecycle event to the tracker
    ///
    /// The CDP wiring calls this for every dispatch/finished/failed event;
    /// tests call it to simulate page activity.
    pub fn handle_request_event(&self, event: RequestEvent) {
        self.tracker.observe(event);
    }

    /// Deliver a dispatch observed on the wire
    ///
    /// CDP re-announces a redirected request once per hop under the same
    /// request id, while the terminal finished/failed event fires once for
    /// the whole chain. A hop therefore reuses the original dispatch's
    /// count; crediting it again would leave the counter above zero forever.
    pub fn handle_dispatch(&self, redirect_hop: bool) {
        if redirect_hop {
            tracing::trace!("redirect hop re-announcement, not a fresh dispatch");
            return;
        }
        self.tracker.observe(RequestEvent::Dispatched);
    }

    /// Reset session state between tests
    pub fn reset(&self) {
        self.counter.reset();
    }
}

// ============================================================================
// CDP wiring (when the `browser` feature is enabled)
// ============================================================================

#[cfg(feature = "browser")]
mod cdp {
    use super::*;
    use crate::gate::{GateDecision, ResourceKind, SubstituteResponse};
    use crate::result::SosegarError;
    use base64::Engine;
    use chromiumoxide::cdp::browser_protocol::fetch::{
        self, ContinueRequestParams, EventRequestPaused, FailRequestParams, FulfillRequestParams,
        HeaderEntry, RequestPattern, RequestStage,
    };
    use chromiumoxide::cdp::browser_protocol::network::{
        self, ErrorReason, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
        ResourceType,
    };
    use chromiumoxide::page::Page;
    use futures::StreamExt;

    impl From<&ResourceType> for ResourceKind {
        fn from(resource_type: &ResourceType) -> Self {
            match resource_type {
                ResourceType::Script => Self::Script,
                ResourceType::Stylesheet => Self::Stylesheet,
                ResourceType::Document => Self::Document,
                _ => Self::Other,
            }
        }
    }

    impl PageSession {
        /// Install interception and lifecycle tracking on a page
        ///
        /// Must be called before any navigation whose requests need to be
        /// observed. Spawns background tasks that live as long as the page's
        /// event streams.
        pub async fn install(&self, page: &Page) -> SosegarResult<()> {
            let install_err = |e: chromiumoxide::error::CdpError| SosegarError::InterceptionInstall {
                message: e.to_string(),
            };

            page.execute(network::EnableParams::default())
                .await
                .map_err(install_err)?;
            page.execute(
                fetch::EnableParams::builder()
                    .pattern(
                        RequestPattern::builder()
                            .url_pattern("*")
                            .request_stage(RequestStage::Request)
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(install_err)?;

            let paused = page
                .event_listener::<EventRequestPaused>()
                .await
                .map_err(install_err)?;
            let dispatched = page
                .event_listener::<EventRequestWillBeSent>()
                .await
                .map_err(install_err)?;
            let finished = page
                .event_listener::<EventLoadingFinished>()
                .await
                .map_err(install_err)?;
            let failed = page
                .event_listener::<EventLoadingFailed>()
                .await
                .map_err(install_err)?;

            let gate = self.gate.clone();
            let gate_page = page.clone();
            tokio::spawn(async move {
                let mut paused = paused;
                while let Some(event) = paused.next().await {
                    dispose(&gate, &gate_page, &event).await;
                }
            });

            let session = self.clone();
            tokio::spawn(async move {
                let mut dispatched = dispatched;
                while let Some(event) = dispatched.next().await {
                    tracing::trace!(url = %event.request.url, "request dispatched");
                    session.handle_dispatch(event.redirect_response.is_some());
                }
            });

            let session = self.clone();
            tokio::spawn(async move {
                let mut finished = finished;
                while finished.next().await.is_some() {
                    session.handle_request_event(RequestEvent::Finished);
                }
            });

            let session = self.clone();
            tokio::spawn(async move {
                let mut failed = failed;
                while failed.next().await.is_some() {
                    session.handle_request_event(RequestEvent::Failed);
                }
            });

            Ok(())
        }
    }

    /// Decide one paused request and deliver the disposition to the page
    async fn dispose(gate: &crate::gate::RequestGate, page: &Page, event: &EventRequestPaused) {
        let url = event.request.url.clone();
        let kind = ResourceKind::from(&event.resource_type);
        let decision = gate.decide(&url, kind).await;

        let result = match decision {
            GateDecision::Abort => page
                .execute(FailRequestParams::new(
                    event.request_id.clone(),
                    ErrorReason::Aborted,
                ))
                .await
                .map(|_| ()),
            GateDecision::PassThrough => page
                .execute(ContinueRequestParams::new(event.request_id.clone()))
                .await
                .map(|_| ()),
            GateDecision::Substitute(response) => {
                page.execute(fulfill_params(event.request_id.clone(), response))
                    .await
                    .map(|_| ())
            }
        };

        if let Err(err) = result {
            // The page may have navigated away while the decision was in
            // flight; the request is already gone.
            tracing::warn!(url = %url, error = %err, "failed to deliver request disposition");
        }
    }

    fn fulfill_params(
        request_id: fetch::RequestId,
        response: SubstituteResponse,
    ) -> FulfillRequestParams {
        let mut params = FulfillRequestParams::new(request_id, i64::from(response.status));
        params.body = Some(
            base64::engine::general_purpose::STANDARD
                .encode(&response.body)
                .into(),
        );
        if let Some(content_type) = response.content_type {
            params.response_headers = Some(vec![HeaderEntry {
                name: "content-type".to_string(),
                value: content_type,
            }]);
        }
        params
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::gate::{GateDecision, ProbeResponse, ResourceKind};
    use crate::idle::{IdleOptions, IdleThreshold};
    use crate::result::SosegarError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct HtmlProbe;

    #[async_trait]
    impl AssetProbe for HtmlProbe {
        async fn probe(&self, _url: &str) -> SosegarResult<ProbeResponse> {
            Ok(ProbeResponse {
                status: 200,
                content_type: Some("text/html".to_string()),
                body: b"<html></html>".to_vec(),
            })
        }
    }

    fn session() -> PageSession {
        PageSession::with_probe(GatePolicy::default(), Arc::new(HtmlProbe))
    }

    #[test]
    fn test_session_starts_quiet() {
        let session = session();
        assert_eq!(session.counter().in_flight(), 0);
    }

    #[test]
    fn test_events_drive_counter() {
        let session = session();
        session.handle_request_event(RequestEvent::Dispatched);
        session.handle_request_event(RequestEvent::Dispatched);
        session.handle_request_event(RequestEvent::Failed);
        assert_eq!(session.counter().in_flight(), 1);
    }

    #[test]
    fn test_reset_clears_counter() {
        let session = session();
        session.handle_request_event(RequestEvent::Dispatched);
        session.reset();
        assert_eq!(session.counter().in_flight(), 0);
    }

    #[test]
    fn test_waiter_shares_session_counter() {
        let session = session();
        session.handle_request_event(RequestEvent::Dispatched);
        let waiter = session.waiter();
        // Waiter created before or after activity sees the same count
        drop(waiter);
        assert_eq!(session.counter().in_flight(), 1);
    }

    #[tokio::test]
    async fn test_gate_and_tracker_are_independent() {
        // The gate aborts the favicon request, but the tracker still counts
        // its dispatch and its failure.
        let session = session();
        let decision = session
            .gate()
            .decide("http://localhost/favicon.ico", ResourceKind::Other)
            .await;
        assert_eq!(decision, GateDecision::Abort);

        session.handle_request_event(RequestEvent::Dispatched);
        assert_eq!(session.counter().in_flight(), 1);
        session.handle_request_event(RequestEvent::Failed);
        assert_eq!(session.counter().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_through_session() {
        let session = session();
        session.handle_request_event(RequestEvent::Dispatched);

        let waiter = session.waiter();
        let driver = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            driver.handle_request_event(RequestEvent::Finished);
        });

        let options = IdleOptions::new().with_poll_interval(10).with_settle_window(30);
        waiter
            .wait_with_options(IdleThreshold::NetworkIdle0, &options)
            .await
            .unwrap();
        assert_eq!(session.counter().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redirect_hop_does_not_leak_in_flight() {
        // One request redirecting once: a fresh dispatch, a hop
        // re-announcement, and a single terminal event for the whole chain.
        let session = session();
        session.handle_dispatch(false);
        session.handle_dispatch(true);
        session.handle_request_event(RequestEvent::Finished);
        assert_eq!(session.counter().in_flight(), 0);

        let options = IdleOptions::new().with_poll_interval(10).with_settle_window(30);
        let waiter = session.waiter();
        let wait = waiter.wait_with_options(IdleThreshold::NetworkIdle0, &options);
        tokio::time::timeout(Duration::from_secs(600), wait)
            .await
            .expect("idle wait must resolve once the redirect chain completes")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_deadline_surfaces_timeout() {
        let session = session();
        session.handle_request_event(RequestEvent::Dispatched);

        let options = IdleOptions::new()
            .with_poll_interval(10)
            .with_settle_window(30)
            .with_deadline(100);
        let result = session
            .waiter()
            .wait_with_options(IdleThreshold::NetworkIdle0, &options)
            .await;
        assert!(matches!(result, Err(SosegarError::Timeout { ms: 100 })));
    }
}
