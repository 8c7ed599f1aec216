use thiserror::Error;

use crate::runner::Stage;

/// Structured errors for registration and invocation.
#[derive(Debug, Error)]
pub enum ApiError {
    // Registration-time errors
    #[error("invalid route template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("duplicate parameter '{name}' in template '{template}'")]
    DuplicateParam { name: String, template: String },

    #[error("route '{path}' has no name; call .name(..) on the builder")]
    MissingRouteKey { path: String },

    #[error("a callable is already mounted at '{path}'")]
    DuplicateRouteKey { path: String },

    #[error("route {method} {path} is already registered")]
    DuplicateRoute { method: String, path: String },

    // Invocation-time errors
    #[error("missing or unbindable parameter '{name}' for template '{template}'")]
    MissingParam { name: String, template: String },

    #[error("no callable mounted at '{path}'")]
    UnknownRoute { path: String },

    #[error("{stage} hook failed")]
    Hook {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("handler failed")]
    Handler {
        #[source]
        source: anyhow::Error,
    },

    #[error("handler finished without sending a response")]
    ReplyDropped,

    #[error("injected dispatch failed")]
    Injection {
        #[source]
        source: anyhow::Error,
    },
}
