//! Request classification and disposal.
//!
//! The gate sees every request the page attempts to issue, before the
//! network stack sends it, and decides its fate:
//!
//! 1. Favicon requests are aborted outright.
//! 2. Anything that is not a script/stylesheet under the plugin-assets path
//!    passes through untouched.
//! 3. Watched assets are re-fetched out of band with redirects disabled. A
//!    redirect, or a 200 that reports an HTML content type, means the asset
//!    path fell through to a catch-all page handler instead of serving the
//!    real file; the page gets a hard 404 rather than silently "loading" it.
//!    Anything else is mirrored back exactly. If the out-of-band fetch
//!    itself fails, the original request passes through so an unrelated
//!    network failure is not masked as an asset error.

use crate::result::{SosegarError, SosegarResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default favicon path aborted by the gate
pub const DEFAULT_FAVICON_PATH: &str = "/favicon.ico";

/// Default plugin-assets URL pattern watched by the gate
pub const DEFAULT_ASSETS_PATTERN: &str = "wp-content";

/// Resource kind of an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A script resource
    Script,
    /// A stylesheet resource
    Stylesheet,
    /// A top-level or frame document
    Document,
    /// Anything else (images, fonts, XHR, missing metadata, ...)
    Other,
}

impl ResourceKind {
    /// Whether this kind is subject to asset substitution
    #[must_use]
    pub const fn is_watched_asset(&self) -> bool {
        matches!(self, Self::Script | Self::Stylesheet)
    }
}

/// What the gate decided about one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Abort the request; the page sees a failed load
    Abort,
    /// Let the request through unmodified
    PassThrough,
    /// Deliver this response instead of performing the real request
    Substitute(SubstituteResponse),
}

/// The response delivered in place of a flagged request's real response
///
/// Constructed fresh per intercepted request; never cached or reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstituteResponse {
    /// HTTP status code
    pub status: u16,
    /// Content type, when the out-of-band fetch reported one
    pub content_type: Option<String>,
    /// Response body
    pub body: Vec<u8>,
}

impl SubstituteResponse {
    /// A synthetic 404 with an empty body
    ///
    /// The probe's content type is carried through unchanged.
    #[must_use]
    pub const fn not_found(content_type: Option<String>) -> Self {
        Self {
            status: 404,
            content_type,
            body: Vec::new(),
        }
    }

    /// Mirror an out-of-band fetch exactly
    #[must_use]
    pub fn mirror(probe: ProbeResponse) -> Self {
        Self {
            status: probe.status,
            content_type: probe.content_type,
            body: probe.body,
        }
    }
}

/// Result of an out-of-band asset fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// HTTP status code
    pub status: u16,
    /// Content type reported by the server
    pub content_type: Option<String>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl ProbeResponse {
    /// Whether the fetch was answered with a redirect
    #[must_use]
    pub const fn is_redirect(&self) -> bool {
        self.status >= 300 && self.status < 400
    }

    /// Whether the server reported an HTML content type
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("text/html"))
    }
}

/// Performs the out-of-band fetch used to classify watched assets
#[async_trait]
pub trait AssetProbe: Send + Sync {
    /// Fetch the URL with redirect-following disabled
    async fn probe(&self, url: &str) -> SosegarResult<ProbeResponse>;
}

/// HTTP probe backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Create a probe with no request timeout
    ///
    /// A hung asset host will stall the classification of that one request
    /// indefinitely; use [`HttpProbe::with_timeout`] to bound it.
    pub fn new() -> SosegarResult<Self> {
        Self::build(None)
    }

    /// Create a probe with a per-request timeout
    pub fn with_timeout(timeout: Duration) -> SosegarResult<Self> {
        Self::build(Some(timeout))
    }

    fn build(timeout: Option<Duration>) -> SosegarResult<Self> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| SosegarError::Session {
            message: format!("failed to build probe client: {e}"),
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetProbe for HttpProbe {
    async fn probe(&self, url: &str) -> SosegarResult<ProbeResponse> {
        let map_err = |e: reqwest::Error| SosegarError::ProbeFailed {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = response.bytes().await.map_err(map_err)?.to_vec();

        Ok(ProbeResponse {
            status,
            content_type,
            body,
        })
    }
}

/// URL rules applied by the gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatePolicy {
    /// Path aborted outright
    pub favicon_path: String,
    /// Regex selecting the plugin-assets URLs whose correctness the test
    /// cares about
    pub assets_pattern: String,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            favicon_path: DEFAULT_FAVICON_PATH.to_string(),
            assets_pattern: DEFAULT_ASSETS_PATTERN.to_string(),
        }
    }
}

impl GatePolicy {
    /// Create a policy with the default rules
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the favicon path
    #[must_use]
    pub fn with_favicon_path(mut self, path: impl Into<String>) -> Self {
        self.favicon_path = path.into();
        self
    }

    /// Set the plugin-assets URL pattern
    #[must_use]
    pub fn with_assets_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.assets_pattern = pattern.into();
        self
    }

    /// Load a policy from JSON
    pub fn from_json(json: &str) -> SosegarResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the policy to JSON
    pub fn to_json(&self) -> SosegarResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether the URL targets the favicon path
    #[must_use]
    pub fn is_favicon(&self, url: &str) -> bool {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        path == self.favicon_path || path.ends_with(&self.favicon_path)
    }

    /// Whether the URL falls under the watched assets path
    #[must_use]
    pub fn matches_assets(&self, url: &str) -> bool {
        regex::Regex::new(&self.assets_pattern)
            .map(|re| re.is_match(url))
            .unwrap_or(false)
    }
}

/// Classifies and disposes of every outbound request
#[derive(Clone)]
pub struct RequestGate {
    policy: GatePolicy,
    probe: std::sync::Arc<dyn AssetProbe>,
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RequestGate {
    /// Create a gate using the shipped HTTP probe
    pub fn new(policy: GatePolicy) -> SosegarResult<Self> {
        Ok(Self {
            policy,
            probe: std::sync::Arc::new(HttpProbe::new()?),
        })
    }

    /// Create a gate with a custom probe
    #[must_use]
    pub fn with_probe(policy: GatePolicy, probe: std::sync::Arc<dyn AssetProbe>) -> Self {
        Self { policy, probe }
    }

    /// The policy this gate applies
    #[must_use]
    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Decide the fate of one outbound request
    ///
    /// Never errors: out-of-band fetch failures degrade to pass-through so
    /// an unrelated network problem is not masked as an asset error.
    pub async fn decide(&self, url: &str, kind: ResourceKind) -> GateDecision {
        if self.policy.is_favicon(url) {
            tracing::debug!(url, "aborting favicon request");
            return GateDecision::Abort;
        }

        if !kind.is_watched_asset() || !self.policy.matches_assets(url) {
            return GateDecision::PassThrough;
        }

        match self.probe.probe(url).await {
            Ok(probe) => {
                if probe.is_redirect() || (probe.status == 200 && probe.is_html()) {
                    tracing::debug!(
                        url,
                        status = probe.status,
                        content_type = probe.content_type.as_deref().unwrap_or(""),
                        "asset resolved to html or redirect, substituting 404"
                    );
                    GateDecision::Substitute(SubstituteResponse::not_found(probe.content_type))
                } else {
                    tracing::trace!(url, status = probe.status, "mirroring asset response");
                    GateDecision::Substitute(SubstituteResponse::mirror(probe))
                }
            }
            Err(err) => {
                tracing::debug!(url, error = %err, "out-of-band fetch failed, passing through");
                GateDecision::PassThrough
            }
        }
    }
}
