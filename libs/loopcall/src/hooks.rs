//! Lifecycle hooks.
//!
//! A route carries an ordered hook list per stage. Request-side hooks thread
//! ownership of the [`ApiRequest`] through (tower style), pre-send hooks may
//! rewrite the in-flight [`ApiResponse`], and post-response hooks observe the
//! finalized response. All hooks are async and run strictly in registration
//! order; an empty stage is a no-op.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::{ApiRequest, ApiResponse};

/// Request-side hook (pre-routing / pre-handler stages).
pub type RequestHook =
    Arc<dyn Fn(ApiRequest) -> BoxFuture<'static, anyhow::Result<ApiRequest>> + Send + Sync>;

/// Hook running right before a response is finalized; may rewrite it.
pub type PreSendHook = Arc<
    dyn Fn(Arc<ApiRequest>, ApiResponse) -> BoxFuture<'static, anyhow::Result<ApiResponse>>
        + Send
        + Sync,
>;

/// Hook observing the finalized response.
pub type PostResponseHook = Arc<
    dyn Fn(Arc<ApiRequest>, Arc<ApiResponse>) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// Ordered hook lists, one per lifecycle stage.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) pre_routing: Vec<RequestHook>,
    pub(crate) pre_handler: Vec<RequestHook>,
    pub(crate) pre_send: Vec<PreSendHook>,
    pub(crate) post_response: Vec<PostResponseHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pre-routing hook.
    pub fn pre_routing<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ApiRequest>> + Send + 'static,
    {
        self.pre_routing.push(Arc::new(move |req| Box::pin(f(req))));
        self
    }

    /// Append a pre-handler hook.
    pub fn pre_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ApiRequest>> + Send + 'static,
    {
        self.pre_handler.push(Arc::new(move |req| Box::pin(f(req))));
        self
    }

    /// Append a pre-send hook.
    pub fn pre_send<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<ApiRequest>, ApiResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ApiResponse>> + Send + 'static,
    {
        self.pre_send
            .push(Arc::new(move |req, resp| Box::pin(f(req, resp))));
        self
    }

    /// Append a post-response hook.
    pub fn post_response<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<ApiRequest>, Arc<ApiResponse>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.post_response
            .push(Arc::new(move |req, resp| Box::pin(f(req, resp))));
        self
    }

    /// True iff any request-side stage has hooks. Routes without request
    /// hooks skip the per-route middleware layer entirely.
    pub(crate) fn has_request_hooks(&self) -> bool {
        !self.pre_routing.is_empty() || !self.pre_handler.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.pre_routing.is_empty()
            && self.pre_handler.is_empty()
            && self.pre_send.is_empty()
            && self.post_response.is_empty()
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_routing", &self.pre_routing.len())
            .field("pre_handler", &self.pre_handler.len())
            .field("pre_send", &self.pre_send.len())
            .field("post_response", &self.post_response.len())
            .finish()
    }
}
