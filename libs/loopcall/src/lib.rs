//! Declarative routes with a twin in-process call surface.
//!
//! One route definition produces two invocation surfaces with identical
//! semantics: a real HTTP route on an axum [`Router`](axum::Router), and a
//! callable mounted in a dotted-path tree for in-process use. Handlers,
//! hooks, and error mapping are shared by both, so a route behaves the same
//! whether it is hit over the wire, called directly, or injected through
//! the router without a socket.
//!
//! ```no_run
//! use loopcall::{Api, CallOverrides, Route, params};
//! use serde_json::json;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut api = Api::new();
//! api.register(
//!     Route::get("/echo/{id}")
//!         .name("echo")
//!         .handler(|params, _req, reply| async move {
//!             reply.send_json(&json!({ "id": params["id"] })).await?;
//!             Ok(())
//!         }),
//! )?;
//!
//! let (router, client) = api.finish();
//! // `router` serves HTTP as usual; `client` calls the same handler
//! // in-process.
//! let response = client
//!     .call("echo", params(json!({ "id": 456 })), CallOverrides::new())
//!     .await?;
//! assert_eq!(response.status.as_u16(), 200);
//! # let _ = router;
//! # Ok(())
//! # }
//! ```

mod api;
mod context;
mod error;
mod hooks;
mod inject;
mod route;
mod runner;
mod template;
mod tree;

pub use api::{Api, ApiClient, RouteAdded, Scope};
pub use context::{ApiRequest, ApiResponse, CallOverrides, Origin, Reply};
pub use error::ApiError;
pub use hooks::{Hooks, PostResponseHook, PreSendHook, RequestHook};
pub use inject::{InjectedResponse, Injector};
pub use route::{HandlerFn, HandlerSlot, Missing, PathParams, Present, Route};
pub use runner::Stage;
pub use template::{apply_params, has_params, normalize_path, param_names};
pub use tree::{CallableMethod, CallableNode, MetaNode};

/// Convenience conversion from a JSON object literal to [`PathParams`].
///
/// Non-object values have no named bindings; they produce an empty map and
/// a warning rather than a panic.
pub fn params(value: serde_json::Value) -> PathParams {
    match value {
        serde_json::Value::Object(map) => map,
        other => {
            tracing::warn!(value = %other, "path params must be a JSON object");
            PathParams::new()
        }
    }
}
