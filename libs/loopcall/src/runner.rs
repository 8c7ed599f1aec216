//! Per-invocation lifecycle driver.
//!
//! Stage order: `Init → PreRouting → PreHandler → Handler → PreSend →
//! PostResponse → Done`, with `Failed` reachable from any stage. Hooks within
//! a stage run strictly in registration order, each awaited before the next.
//!
//! For a genuine HTTP call the request-side stages (pre-routing,
//! pre-handler) have already been run by the per-route middleware layer, so
//! [`dispatch`] must not re-run them; for an internal call it drives them
//! itself before invoking the handler. Pre-send and post-response fire from
//! the [`Reply`](crate::Reply) at finalization regardless of mode.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::context::{ApiRequest, ApiResponse, Reply};
use crate::error::ApiError;
use crate::hooks::{Hooks, PostResponseHook, PreSendHook};
use crate::route::{PathParams, RouteTarget};

/// Invocation lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    PreRouting,
    PreHandler,
    Handler,
    PreSend,
    PostResponse,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::PreRouting => "pre-routing",
            Stage::PreHandler => "pre-handler",
            Stage::Handler => "handler",
            Stage::PreSend => "pre-send",
            Stage::PostResponse => "post-response",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs the request-side hook stages for one invocation.
pub(crate) struct HookRunner<'a> {
    hooks: &'a Hooks,
}

impl<'a> HookRunner<'a> {
    pub(crate) fn new(hooks: &'a Hooks) -> Self {
        Self { hooks }
    }

    /// Run one request-side stage, threading the request through each hook
    /// in registration order.
    pub(crate) async fn run_request_stage(
        &self,
        stage: Stage,
        mut req: ApiRequest,
    ) -> Result<ApiRequest, ApiError> {
        let list = match stage {
            Stage::PreRouting => &self.hooks.pre_routing,
            Stage::PreHandler => &self.hooks.pre_handler,
            _ => return Ok(req),
        };
        if list.is_empty() {
            return Ok(req);
        }
        tracing::debug!(stage = %stage, url = %req.url, hooks = list.len(), "entering stage");
        for hook in list {
            req = hook(req).await.map_err(|source| {
                tracing::error!(stage = %stage, error = %source, "hook failed");
                ApiError::Hook { stage, source }
            })?;
        }
        Ok(req)
    }
}

/// Run the send-side stages (pre-send, then post-response) over a response
/// being finalized. On failure returns the error twice: once for the pending
/// invocation's resolver and once for the immediate caller (errors carry a
/// non-clonable source).
pub(crate) async fn run_send_stages(
    request: &Arc<ApiRequest>,
    mut response: ApiResponse,
    pre_send: &[PreSendHook],
    post_response: &[PostResponseHook],
) -> Result<ApiResponse, (ApiError, ApiError)> {
    for hook in pre_send {
        response = match hook(Arc::clone(request), response).await {
            Ok(resp) => resp,
            Err(source) => return Err(split_hook_error(Stage::PreSend, source)),
        };
    }

    let finalized = Arc::new(response);
    for hook in post_response {
        if let Err(source) = hook(Arc::clone(request), Arc::clone(&finalized)).await {
            return Err(split_hook_error(Stage::PostResponse, source));
        }
    }

    tracing::debug!(stage = %Stage::Done, url = %request.url, status = %finalized.status, "response finalized");
    Ok(Arc::try_unwrap(finalized).unwrap_or_else(|arc| (*arc).clone()))
}

fn split_hook_error(stage: Stage, source: anyhow::Error) -> (ApiError, ApiError) {
    tracing::error!(stage = %stage, error = %source, "hook failed");
    let twin = anyhow::anyhow!("{source}");
    (
        ApiError::Hook { stage, source },
        ApiError::Hook {
            stage,
            source: twin,
        },
    )
}

/// Drive one invocation end to end: request-side stages (internal mode
/// only), the handler, then await the result the [`Reply`] resolves at
/// finalization.
pub(crate) async fn dispatch(
    target: Arc<RouteTarget>,
    params: PathParams,
    req: ApiRequest,
) -> Result<ApiResponse, ApiError> {
    let runner = HookRunner::new(&target.hooks);

    // The host framework has already run these for a real HTTP request.
    let req = if req.is_internal() {
        let req = runner.run_request_stage(Stage::PreRouting, req).await?;
        runner.run_request_stage(Stage::PreHandler, req).await?
    } else {
        req
    };

    tracing::debug!(stage = %Stage::Handler, method = %req.method, url = %req.url, "invoking handler");
    let req = Arc::new(req);
    let (tx, mut rx) = oneshot::channel();
    let reply = Reply::new(Arc::clone(&req), &target.hooks, tx);

    if let Err(source) = (target.handler)(params, Arc::clone(&req), reply).await {
        tracing::error!(stage = %Stage::Failed, error = %source, url = %req.url, "handler failed");
        // A send-side hook failure surfaces through the resolver with its
        // stage intact; otherwise the handler error wins. The handler
        // dropping its Reply on the way out also resolves the channel, so
        // anything but a hook error must not shadow `source`.
        return match rx.try_recv() {
            Ok(Err(resolved @ ApiError::Hook { .. })) => Err(resolved),
            _ => Err(ApiError::Handler { source }),
        };
    }

    match rx.await {
        Ok(result) => result,
        Err(_) => Err(ApiError::ReplyDropped),
    }
}
