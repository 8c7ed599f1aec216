//! Injection-mode dispatch.
//!
//! Instead of synthesizing a context, an injected call hands a real
//! `http::Request` to a clone of the finished router and lets axum run its
//! ordinary dispatch, including every hook layer installed at registration.
//! No socket is involved; the router is driven directly as a tower service.

use std::sync::OnceLock;

use axum::body::Body;
use axum::Router;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use crate::api::MAX_BODY_BYTES;
use crate::context::CallOverrides;
use crate::error::ApiError;

/// Drives injected requests through the finished router.
#[derive(Clone)]
pub struct Injector {
    router: Router,
}

impl Injector {
    pub(crate) fn new(router: Router) -> Self {
        Self { router }
    }

    /// Dispatch `method url` through the router with the supplied logical
    /// fields and return the captured response.
    pub async fn inject(
        &self,
        method: Method,
        url: &str,
        overrides: CallOverrides,
    ) -> Result<InjectedResponse, ApiError> {
        let uri = if overrides.query.is_empty() {
            url.to_string()
        } else {
            let qs = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&overrides.query)
                .finish();
            format!("{url}?{qs}")
        };

        let mut builder = http::Request::builder().method(method).uri(&uri);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(overrides.headers);
        }
        let request = builder
            .body(Body::from(overrides.body.unwrap_or_default()))
            .map_err(|err| ApiError::Injection {
                source: anyhow::Error::new(err).context(format!("building request for '{uri}'")),
            })?;

        tracing::debug!(uri = %uri, "injecting request");
        let response = match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        };

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|err| ApiError::Injection {
                source: anyhow::Error::new(err).context("buffering response body"),
            })?;

        Ok(InjectedResponse {
            status: parts.status,
            headers: parts.headers,
            body,
            json: OnceLock::new(),
        })
    }
}

/// Captured result of an injected dispatch.
#[derive(Debug)]
pub struct InjectedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    json: OnceLock<Option<Value>>,
}

impl InjectedResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON, evaluated lazily and at most once. Returns
    /// `None` (never an error) when the body is not valid JSON, so callers
    /// that don't need structured access are unaffected.
    pub fn json(&self) -> Option<&Value> {
        self.json
            .get_or_init(|| serde_json::from_slice(&self.body).ok())
            .as_ref()
    }
}
