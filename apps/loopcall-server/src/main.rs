//! Demo server: a handful of declarative routes served over HTTP, with the
//! same handlers reachable in-process through the callable tree (see
//! `/invoke-echo`, which calls the `echo` route without touching a socket).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use clap::Parser;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use loopcall::{params, Api, ApiClient, CallOverrides, Route};
use serde_json::{json, Value};

/// Loopcall demo server
#[derive(Parser)]
#[command(name = "loopcall-server")]
#[command(about = "Demo server exposing declarative routes on both call surfaces")]
#[command(version = "0.1.0")]
struct Cli {
    /// Address to bind the HTTP listener to
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    // RUST_LOG wins over the -v flags when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        EnvFilter::new(level)
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_api() -> Result<Api> {
    let mut api = Api::new();
    api.subscribe_route_added(|event| {
        tracing::info!(
            method = %event.method,
            path = %event.path,
            mount = %event.mount_path(),
            "route exposed"
        );
    });

    api.register(
        Route::get("/echo/{id}")
            .name("echo")
            .pre_routing(|req| async move {
                tracing::info!(url = %req.url, "echo pre-routing");
                Ok(req)
            })
            .pre_handler(|req| async move {
                tracing::info!(url = %req.url, "echo pre-handler");
                Ok(req)
            })
            .post_response(|req, resp| async move {
                tracing::info!(url = %req.url, status = %resp.status, "echo responded");
                Ok(())
            })
            .handler(|params, req, reply| async move {
                reply
                    .send_json(&json!({
                        "id": params["id"],
                        "url": req.url,
                        "query": req.query,
                    }))
                    .await?;
                Ok(())
            }),
    )?;

    api.namespace("users", |scope| {
        scope.register(Route::get("/users").name("list").handler(
            |_, _, reply| async move {
                reply.send_json(&json!({ "users": ["ada", "grace"] })).await?;
                Ok(())
            },
        ))?;
        scope.register(Route::post("/users").name("create").handler(
            |_, req, mut reply| async move {
                let body: Value = req.json().unwrap_or(Value::Null);
                reply.code(201);
                reply.send_json(&json!({ "created": body })).await?;
                Ok(())
            },
        ))
    })?;

    api.register(
        Route::get("/reports/daily")
            .name("daily")
            .expose_as("reports.daily")
            .handler(|_, _, reply| async move {
                reply.send_json(&json!({ "total": 0 })).await?;
                Ok(())
            }),
    )?;

    Ok(api)
}

/// Plain axum route demonstrating an in-process call: the `echo` handler
/// runs with its full hook lifecycle, but no HTTP request is dispatched.
async fn invoke_echo(Extension(client): Extension<Arc<ApiClient>>) -> axum::response::Response {
    let overrides = CallOverrides::new().query("foobar", "1").header(
        HeaderName::from_static("x-foobar"),
        HeaderValue::from_static("1"),
    );
    match client
        .call("echo", params(json!({ "id": 456 })), overrides)
        .await
    {
        Ok(resp) => (resp.status, resp.headers, resp.body).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "in-process echo call failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (router, client) = build_api()?.finish();
    let client = Arc::new(client);

    let app: Router = router
        .route("/", get(|| async { "ok" }))
        .route("/invoke-echo", get(invoke_echo))
        .layer(Extension(client));

    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    tracing::info!(addr = %cli.bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
