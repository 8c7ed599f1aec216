//! Virtual request/response context.
//!
//! [`ApiRequest`] is the logical request view handlers and hooks see. For a
//! genuine HTTP call it is derived from the real axum request exactly once
//! and marked [`Origin::Http`]; for an in-process call it is synthesized from
//! the route template plus caller-supplied [`CallOverrides`] and marked
//! [`Origin::Internal`]. A real request is never re-wrapped.
//!
//! [`Reply`] is the response capture: handlers write status/headers and call
//! one of the `send_*` methods, which runs the pre-send and post-response
//! hooks and then resolves the invocation's pending result through an
//! explicit oneshot resolver. Dropping a `Reply` without sending rejects the
//! result instead of leaving the caller hanging.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::ApiError;
use crate::hooks::Hooks;
use crate::runner;

/// Whether a request entered through the network or was synthesized for an
/// in-process call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Http,
    Internal,
}

/// Logical request record shared by both call surfaces.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path after parameter substitution (no query string).
    pub url: String,
    pub query: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    origin: Origin,
}

impl ApiRequest {
    /// Synthesize a request for an internal call.
    pub fn internal(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            origin: Origin::Internal,
        }
    }

    /// Derive the view of a genuine HTTP request from its parts and buffered
    /// body. Used once per request by the registrar's axum-facing surface.
    pub(crate) fn from_http_parts(parts: &http::request::Parts, body: Bytes) -> Self {
        let query = parts
            .uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            method: parts.method.clone(),
            url: parts.uri.path().to_string(),
            query,
            headers: parts.headers.clone(),
            body,
            origin: Origin::Http,
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_internal(&self) -> bool {
        self.origin == Origin::Internal
    }

    /// Body parsed as JSON; `None` when the body is not valid JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_slice(&self.body).ok()
    }

    pub(crate) fn with_overrides(mut self, overrides: CallOverrides) -> Self {
        self.query.extend(overrides.query);
        self.headers.extend(overrides.headers);
        if let Some(body) = overrides.body {
            self.body = body;
        }
        self
    }
}

/// Caller-supplied logical fields for an internal or injected call.
#[derive(Debug, Clone, Default)]
pub struct CallOverrides {
    pub(crate) query: BTreeMap<String, String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Bytes>,
}

impl CallOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Raw body bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSON payload; also sets `content-type: application/json`.
    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                self.body = Some(Bytes::from(bytes));
            }
            Err(err) => tracing::warn!(error = %err, "ignoring unserializable override payload"),
        }
        self
    }
}

/// Finalized response record.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    /// Body parsed as JSON; `None` (not an error) on parse failure.
    pub fn json<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub(crate) fn into_http(self) -> axum::response::Response {
        let mut resp = axum::response::Response::new(axum::body::Body::from(self.body));
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers;
        resp
    }
}

pub(crate) type ReplyResolver = oneshot::Sender<Result<ApiResponse, ApiError>>;

/// Response capture handed to handlers.
pub struct Reply {
    request: Arc<ApiRequest>,
    status: StatusCode,
    headers: HeaderMap,
    pre_send: Vec<crate::hooks::PreSendHook>,
    post_response: Vec<crate::hooks::PostResponseHook>,
    resolver: Option<ReplyResolver>,
}

impl Reply {
    pub(crate) fn new(request: Arc<ApiRequest>, hooks: &Hooks, resolver: ReplyResolver) -> Self {
        Self {
            request,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            pre_send: hooks.pre_send.clone(),
            post_response: hooks.post_response.clone(),
            resolver: Some(resolver),
        }
    }

    /// Set the response status code. Out-of-range codes are ignored with a
    /// warning rather than failing the invocation.
    pub fn code(&mut self, status: u16) -> &mut Self {
        match StatusCode::from_u16(status) {
            Ok(code) => self.status = code,
            Err(_) => tracing::warn!(status, "ignoring invalid status code"),
        }
        self
    }

    pub fn header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Send a JSON body and finalize the response.
    pub async fn send_json<T: Serialize>(mut self, value: &T) -> Result<(), ApiError> {
        let bytes = serde_json::to_vec(value).map_err(|err| ApiError::Handler {
            source: anyhow::Error::new(err).context("serializing response body"),
        })?;
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        self.finalize(Bytes::from(bytes)).await
    }

    /// Send a plain-text body and finalize the response.
    pub async fn send_text(mut self, body: impl Into<String>) -> Result<(), ApiError> {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
        }
        self.finalize(Bytes::from(body.into())).await
    }

    /// Send raw bytes and finalize the response.
    pub async fn send_bytes(self, body: impl Into<Bytes>) -> Result<(), ApiError> {
        self.finalize(body.into()).await
    }

    /// Send an empty body and finalize the response.
    pub async fn send_empty(self) -> Result<(), ApiError> {
        self.finalize(Bytes::new()).await
    }

    /// Run pre-send hooks, freeze the response, run post-response hooks, and
    /// resolve the pending invocation. The result is designated final only
    /// after the last post-response hook completes.
    async fn finalize(mut self, body: Bytes) -> Result<(), ApiError> {
        let response = ApiResponse {
            status: self.status,
            headers: std::mem::take(&mut self.headers),
            body,
        };

        let request = Arc::clone(&self.request);
        let pre_send = std::mem::take(&mut self.pre_send);
        let post_response = std::mem::take(&mut self.post_response);
        let resolver = self.resolver.take();
        drop(self);

        let result = runner::run_send_stages(&request, response, &pre_send, &post_response).await;
        match result {
            Ok(response) => {
                if let Some(tx) = resolver {
                    let _ = tx.send(Ok(response));
                }
                Ok(())
            }
            Err((reported, returned)) => {
                if let Some(tx) = resolver {
                    let _ = tx.send(Err(reported));
                }
                Err(returned)
            }
        }
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if let Some(tx) = self.resolver.take() {
            let _ = tx.send(Err(ApiError::ReplyDropped));
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("url", &self.request.url)
            .field("status", &self.status)
            .field("sent", &self.resolver.is_none())
            .finish()
    }
}
