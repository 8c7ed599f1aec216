//! Route registrar.
//!
//! [`Api`] is an explicit registry object owned by the composing
//! application: every [`Route`] registered through it produces exactly one
//! axum route (plus a per-route hook layer when request-side hooks exist)
//! and one [`CallableMethod`] mounted in the callable tree, with a metadata
//! leaf of identical shape beside it. `finish()` hands back the composed
//! `Router` and an [`ApiClient`] for the in-process surface.
//!
//! Registration is validate-then-commit: template checks, key checks, and
//! duplicate detection all run before either tree or the router is touched,
//! so a failed registration never leaves a partially-mutated registry.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{RawPathParams, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use axum::Router;
use http::{Method, StatusCode};
use serde_json::Value;

use crate::context::{ApiRequest, ApiResponse, CallOverrides};
use crate::error::ApiError;
use crate::inject::{InjectedResponse, Injector};
use crate::route::{PathParams, Present, Route, RouteTarget};
use crate::runner::{self, HookRunner, Stage};
use crate::template;
use crate::tree::{CallableMethod, CallableNode, MetaNode};

/// Largest request body the HTTP surface will buffer into an [`ApiRequest`].
pub(crate) const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Notification fired once per registered route.
#[derive(Debug, Clone)]
pub struct RouteAdded {
    pub method: Method,
    pub path: String,
    pub name: String,
    pub expose_as: Option<String>,
    /// Namespace prefix the route was registered under (empty for flat
    /// registrations).
    pub namespace: Vec<String>,
}

impl RouteAdded {
    /// Dotted path where the callable is mounted: an explicit `expose_as`
    /// wins; otherwise the namespace prefix plus the route name.
    pub fn mount_path(&self) -> String {
        match &self.expose_as {
            Some(path) => path.clone(),
            None if self.namespace.is_empty() => self.name.clone(),
            None => format!("{}.{}", self.namespace.join("."), self.name),
        }
    }
}

type RouteAddedSubscriber = Box<dyn Fn(&RouteAdded) + Send + Sync>;

/// Route registrar: one declarative definition in, two call surfaces out.
#[derive(Default)]
pub struct Api {
    router: Router,
    client: CallableNode,
    meta: MetaNode,
    // Duplicate detection per (method, path); axum would panic on a
    // duplicate route, we fail with a structured error instead.
    registered: BTreeSet<(String, String)>,
    subscribers: Vec<RouteAddedSubscriber>,
}

impl Api {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe every subsequent registration.
    pub fn subscribe_route_added<F>(&mut self, f: F)
    where
        F: Fn(&RouteAdded) + Send + Sync + 'static,
    {
        self.subscribers.push(Box::new(f));
    }

    /// Register a flat route.
    pub fn register(&mut self, route: Route<Present>) -> Result<(), ApiError> {
        self.register_at(&[], route)
    }

    /// Register a group of routes under a namespace; scopes nest to
    /// arbitrary depth and the callable/metadata trees mirror the nesting
    /// 1:1.
    pub fn namespace<F>(&mut self, name: &str, f: F) -> Result<(), ApiError>
    where
        F: FnOnce(&mut Scope<'_>) -> Result<(), ApiError>,
    {
        // Read-only prefix check; tree nodes are only created by successful
        // registrations, so a failing scope closure leaves no trace.
        self.client.check_namespace(name)?;
        let prefix = vec![name.to_string()];
        let mut scope = Scope { api: self, prefix };
        f(&mut scope)
    }

    fn register_at(&mut self, prefix: &[String], route: Route<Present>) -> Result<(), ApiError> {
        let spec = route.into_spec();
        template::validate(&spec.path)?;
        let name = spec.name.clone().ok_or_else(|| ApiError::MissingRouteKey {
            path: spec.path.clone(),
        })?;
        let route_key = (spec.method.as_str().to_string(), spec.path.clone());
        if self.registered.contains(&route_key) {
            return Err(ApiError::DuplicateRoute {
                method: route_key.0,
                path: route_key.1,
            });
        }

        let event = RouteAdded {
            method: spec.method.clone(),
            path: spec.path.clone(),
            name: name.clone(),
            expose_as: spec.expose_as.clone(),
            namespace: prefix.to_vec(),
        };
        let mount = event.mount_path();

        let target = Arc::new(RouteTarget {
            handler: spec.handler,
            hooks: spec.hooks,
        });
        let callable = CallableMethod::new(
            name,
            spec.method.clone(),
            spec.path.clone(),
            Arc::clone(&target),
        );
        self.client.insert_at(&mount, callable)?;
        // The meta tree mirrors the callable tree in lockstep; this cannot
        // collide once the insert above succeeded.
        self.meta
            .insert_at(&mount, spec.method.clone(), spec.path.clone())?;
        self.registered.insert(route_key);

        let mut method_router = axum_method_router(&spec.method, Arc::clone(&target));
        if target.hooks.has_request_hooks() {
            let layer_target = Arc::clone(&target);
            method_router = method_router.layer(axum::middleware::from_fn(
                move |request: Request, next: Next| {
                    let target = Arc::clone(&layer_target);
                    async move { run_request_hook_stages(target, request, next).await }
                },
            ));
        }
        self.router = std::mem::take(&mut self.router).route(&spec.path, method_router);

        tracing::debug!(
            method = %event.method,
            path = %event.path,
            mount = %mount,
            "route registered"
        );
        for subscriber in &self.subscribers {
            subscriber(&event);
        }
        Ok(())
    }

    /// Consume the registrar: the composed router for serving, and the
    /// in-process client (which drives injected calls through a clone of
    /// that same router).
    pub fn finish(self) -> (Router, ApiClient) {
        let Api {
            router,
            client,
            meta,
            ..
        } = self;
        let api_client = ApiClient {
            injector: Injector::new(router.clone()),
            root: client,
            meta,
        };
        (router, api_client)
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("routes", &self.registered.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Registration scope for one namespace level.
pub struct Scope<'a> {
    api: &'a mut Api,
    prefix: Vec<String>,
}

impl Scope<'_> {
    pub fn register(&mut self, route: Route<Present>) -> Result<(), ApiError> {
        self.api.register_at(&self.prefix, route)
    }

    pub fn namespace<F>(&mut self, name: &str, f: F) -> Result<(), ApiError>
    where
        F: FnOnce(&mut Scope<'_>) -> Result<(), ApiError>,
    {
        let mut prefix = self.prefix.clone();
        prefix.push(name.to_string());
        self.api.client.check_namespace(&prefix.join("."))?;
        let mut scope = Scope {
            api: self.api,
            prefix,
        };
        f(&mut scope)
    }
}

/// The in-process call surface produced by [`Api::finish`].
pub struct ApiClient {
    root: CallableNode,
    meta: MetaNode,
    injector: Injector,
}

impl ApiClient {
    /// Resolve a dotted path to its callable.
    pub fn get(&self, path: &str) -> Option<&CallableMethod> {
        self.root.get(path)
    }

    /// Root of the callable tree.
    pub fn client(&self) -> &CallableNode {
        &self.root
    }

    /// Root of the metadata tree.
    pub fn meta(&self) -> &MetaNode {
        &self.meta
    }

    /// `(method, template)` for a callable, for introspection.
    pub fn meta_of(&self, path: &str) -> Option<(&Method, &str)> {
        self.meta.get(path)
    }

    /// Invoke a callable in-process (simulated mode: synthetic context, no
    /// router dispatch).
    pub async fn call(
        &self,
        path: &str,
        params: PathParams,
        overrides: CallOverrides,
    ) -> Result<ApiResponse, ApiError> {
        let method = self.root.get(path).ok_or_else(|| ApiError::UnknownRoute {
            path: path.to_string(),
        })?;
        method.call(params, overrides).await
    }

    /// Invoke a callable through the router (injection mode: axum's own
    /// dispatch runs, including installed hook layers).
    pub async fn inject(
        &self,
        path: &str,
        params: PathParams,
        overrides: CallOverrides,
    ) -> Result<InjectedResponse, ApiError> {
        let method = self.root.get(path).ok_or_else(|| ApiError::UnknownRoute {
            path: path.to_string(),
        })?;
        let url = template::apply_params(method.path(), &params)?;
        self.injector
            .inject(method.method().clone(), &url, overrides)
            .await
    }

    pub fn injector(&self) -> &Injector {
        &self.injector
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("client", &self.root)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// axum-facing surface
// ---------------------------------------------------------------------------

fn axum_method_router(method: &Method, target: Arc<RouteTarget>) -> MethodRouter {
    let handler = move |raw: RawPathParams, request: Request| {
        let target = Arc::clone(&target);
        async move { serve_http(target, raw, request).await }
    };
    match method.as_str() {
        "GET" => axum::routing::get(handler),
        "POST" => axum::routing::post(handler),
        "PUT" => axum::routing::put(handler),
        "DELETE" => axum::routing::delete(handler),
        // Route constructors only produce the four methods above.
        _ => axum::routing::any(handler),
    }
}

/// Framework-facing handler: picks up the request view (prepared by the hook
/// layer, or derived here for hook-less routes) and funnels it into the same
/// dispatch path internal calls use.
async fn serve_http(
    target: Arc<RouteTarget>,
    raw: RawPathParams,
    mut request: Request,
) -> Response {
    let params: PathParams = raw
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();

    let api_req = match request.extensions_mut().remove::<ApiRequest>() {
        Some(req) => req,
        None => match buffer_request(request).await {
            Ok(req) => req,
            Err(response) => return response,
        },
    };

    match runner::dispatch(target, params, api_req).await {
        Ok(response) => response.into_http(),
        Err(err) => error_response(&err),
    }
}

/// Per-route middleware: derives the request view once, runs the
/// request-side hook stages in order, and hands the (possibly rewritten)
/// view downstream through request extensions.
async fn run_request_hook_stages(
    target: Arc<RouteTarget>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "failed to buffer request body");
            return http_error(StatusCode::BAD_REQUEST, "invalid request body");
        }
    };

    let api_req = ApiRequest::from_http_parts(&parts, bytes);
    let hook_runner = HookRunner::new(&target.hooks);
    let api_req = match hook_runner
        .run_request_stage(Stage::PreRouting, api_req)
        .await
    {
        Ok(req) => req,
        Err(err) => return error_response(&err),
    };
    let api_req = match hook_runner
        .run_request_stage(Stage::PreHandler, api_req)
        .await
    {
        Ok(req) => req,
        Err(err) => return error_response(&err),
    };

    parts.extensions.insert(api_req);
    next.run(Request::from_parts(parts, Body::empty())).await
}

async fn buffer_request(request: Request) -> Result<ApiRequest, Response> {
    let (parts, body) = request.into_parts();
    match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => Ok(ApiRequest::from_http_parts(&parts, bytes)),
        Err(err) => {
            tracing::warn!(error = %err, "failed to buffer request body");
            Err(http_error(StatusCode::BAD_REQUEST, "invalid request body"))
        }
    }
}

/// Map an invocation failure into the framework's error pipeline.
fn error_response(err: &ApiError) -> Response {
    let status = match err {
        ApiError::MissingParam { .. }
        | ApiError::DuplicateParam { .. }
        | ApiError::InvalidTemplate { .. } => StatusCode::BAD_REQUEST,
        ApiError::UnknownRoute { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    http_error(status, &err.to_string())
}

fn http_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}
