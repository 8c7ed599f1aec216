//! End-to-end tests over both call surfaces: the composed router (driven
//! through injection) and the in-process callable tree.

use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};
use http::Method;
use loopcall::{params, Api, ApiClient, ApiError, CallOverrides, Route, Stage};
use parking_lot::Mutex;
use serde_json::{json, Value};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn echo_api() -> Api {
    let mut api = Api::new();
    api.register(
        Route::get("/echo/{id}")
            .name("echo")
            .handler(|params, req, mut reply| async move {
                reply.code(201);
                reply
                    .send_json(&json!({ "id": params["id"], "url": req.url }))
                    .await?;
                Ok(())
            }),
    )
    .unwrap();
    api
}

#[tokio::test]
async fn echo_route_binds_params_and_builds_context() {
    let (_router, client) = echo_api().finish();

    let response = client
        .call("echo", params(json!({ "id": 456 })), CallOverrides::new())
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 201);
    assert_eq!(
        response.json::<Value>().unwrap(),
        json!({ "id": "456", "url": "/echo/456" })
    );
}

#[tokio::test]
async fn internal_and_injected_calls_agree() {
    let (_router, client) = echo_api().finish();

    let called = client
        .call("echo", params(json!({ "id": 456 })), CallOverrides::new())
        .await
        .unwrap();
    let injected = client
        .inject("echo", params(json!({ "id": 456 })), CallOverrides::new())
        .await
        .unwrap();

    assert_eq!(injected.status(), called.status);
    assert_eq!(injected.body(), &called.body);
}

#[tokio::test]
async fn handlers_see_only_template_params_as_strings() {
    let mut api = Api::new();
    api.register(
        Route::get("/echo/{id}")
            .name("echo")
            .handler(|params, _, reply| async move {
                reply.send_json(&Value::Object(params)).await?;
                Ok(())
            }),
    )
    .unwrap();
    let (_router, client) = api.finish();

    // Extra keys bind nothing; non-scalar values among them are discarded
    // rather than leaking through untyped.
    let supplied = params(json!({ "id": 7, "tags": ["a", "b"], "note": null }));

    let called = client
        .call("echo", supplied.clone(), CallOverrides::new())
        .await
        .unwrap();
    assert_eq!(called.json::<Value>().unwrap(), json!({ "id": "7" }));

    let injected = client
        .inject("echo", supplied, CallOverrides::new())
        .await
        .unwrap();
    assert_eq!(injected.json().unwrap(), &json!({ "id": "7" }));
}

#[tokio::test]
async fn missing_param_fails_before_the_handler_runs() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut api = Api::new();
    {
        let log = log.clone();
        api.register(
            Route::get("/echo/{id}")
                .name("echo")
                .handler(move |_, _, reply| {
                    let log = log.clone();
                    async move {
                        log.lock().push("handler");
                        reply.send_empty().await?;
                        Ok(())
                    }
                }),
        )
        .unwrap();
    }
    let (_router, client) = api.finish();

    let err = client
        .call("echo", params(json!({})), CallOverrides::new())
        .await
        .unwrap_err();
    assert!(matches!(&err, ApiError::MissingParam { name, .. } if name == "id"));

    // null and empty-string values are equally unbindable
    let err = client
        .call("echo", params(json!({ "id": null })), CallOverrides::new())
        .await
        .unwrap_err();
    assert!(matches!(&err, ApiError::MissingParam { name, .. } if name == "id"));
    let err = client
        .call("echo", params(json!({ "id": "" })), CallOverrides::new())
        .await
        .unwrap_err();
    assert!(matches!(&err, ApiError::MissingParam { name, .. } if name == "id"));

    assert!(log.lock().is_empty());
}

fn staged_api(log: &Log) -> Api {
    let mut api = Api::new();
    let route = Route::get("/staged/{id}")
        .name("staged")
        .pre_routing({
            let log = log.clone();
            move |req| {
                let log = log.clone();
                async move {
                    log.lock().push("pre-routing");
                    Ok(req)
                }
            }
        })
        .pre_handler({
            let log = log.clone();
            move |req| {
                let log = log.clone();
                async move {
                    log.lock().push("pre-handler");
                    Ok(req)
                }
            }
        })
        .pre_send({
            let log = log.clone();
            move |_req, resp| {
                let log = log.clone();
                async move {
                    log.lock().push("pre-send");
                    Ok(resp)
                }
            }
        })
        .post_response({
            let log = log.clone();
            move |_req, _resp| {
                let log = log.clone();
                async move {
                    log.lock().push("post-response");
                    Ok(())
                }
            }
        })
        .handler({
            let log = log.clone();
            move |_, _, reply| {
                let log = log.clone();
                async move {
                    log.lock().push("handler");
                    reply.send_json(&json!({ "ok": true })).await?;
                    Ok(())
                }
            }
        });
    api.register(route).unwrap();
    api
}

#[tokio::test]
async fn hook_stages_run_in_order_for_internal_calls() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let (_router, client) = staged_api(&log).finish();

    client
        .call("staged", params(json!({ "id": 1 })), CallOverrides::new())
        .await
        .unwrap();

    assert_eq!(
        *log.lock(),
        vec!["pre-routing", "pre-handler", "handler", "pre-send", "post-response"]
    );
}

#[tokio::test]
async fn hook_stages_run_in_order_for_injected_calls() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let (_router, client) = staged_api(&log).finish();

    let injected = client
        .inject("staged", params(json!({ "id": 1 })), CallOverrides::new())
        .await
        .unwrap();

    assert_eq!(injected.status().as_u16(), 200);
    assert_eq!(
        *log.lock(),
        vec!["pre-routing", "pre-handler", "handler", "pre-send", "post-response"]
    );
}

#[tokio::test]
async fn post_response_fires_exactly_once_per_invocation() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let (_router, client) = staged_api(&log).finish();

    client
        .call("staged", params(json!({ "id": 1 })), CallOverrides::new())
        .await
        .unwrap();
    client
        .call("staged", params(json!({ "id": 2 })), CallOverrides::new())
        .await
        .unwrap();

    let fired = log.lock().iter().filter(|s| **s == "post-response").count();
    assert_eq!(fired, 2);
}

#[tokio::test]
async fn failing_hook_surfaces_its_stage() {
    let mut api = Api::new();
    api.register(
        Route::get("/guarded")
            .name("guarded")
            .pre_handler(|_req| async move { anyhow::bail!("token check failed") })
            .handler(|_, _, reply| async move {
                reply.send_empty().await?;
                Ok(())
            }),
    )
    .unwrap();
    let (_router, client) = api.finish();

    let err = client
        .call("guarded", params(json!({})), CallOverrides::new())
        .await
        .unwrap_err();
    assert!(matches!(&err, ApiError::Hook { stage: Stage::PreHandler, .. }));
    assert_eq!(err.to_string(), "pre-handler hook failed");

    // Over the router the same failure maps to a 500 with the error message.
    let injected = client
        .inject("guarded", params(json!({})), CallOverrides::new())
        .await
        .unwrap();
    assert_eq!(injected.status().as_u16(), 500);
    assert_eq!(
        injected.json().unwrap()["error"],
        json!("pre-handler hook failed")
    );
}

#[tokio::test]
async fn namespaces_mount_dotted_callables() {
    let mut api = Api::new();
    api.namespace("users", |scope| {
        scope.register(Route::get("/users").name("list").handler(
            |_, _, reply| async move {
                reply.send_json(&json!({ "users": [] })).await?;
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
        ))?;
        scope.namespace("admin", |scope| {
            scope.register(Route::del("/users/{id}").name("remove").handler(
                |_, _, reply| async move {
                    reply.send_empty().await?;
                    Ok(())
                },
            ))
        })
    })
    .unwrap();
    let (_router, client) = api.finish();

    let listed = client
        .call("users.list", params(json!({})), CallOverrides::new())
        .await
        .unwrap();
    assert_eq!(listed.json::<Value>().unwrap(), json!({ "users": [] }));

    let created = client
        .call(
            "users.create",
            params(json!({})),
            CallOverrides::new().json(&json!({ "name": "ada" })),
        )
        .await
        .unwrap();
    assert_eq!(created.status.as_u16(), 201);
    assert_eq!(
        created.json::<Value>().unwrap(),
        json!({ "created": { "name": "ada" } })
    );

    let removed = client
        .call(
            "users.admin.remove",
            params(json!({ "id": 7 })),
            CallOverrides::new(),
        )
        .await
        .unwrap();
    assert_eq!(removed.status.as_u16(), 200);

    let (method, template) = client.meta_of("users.create").unwrap();
    assert_eq!(method, &Method::POST);
    assert_eq!(template, "/users");
    assert_eq!(client.client().node("users").unwrap().keys(), vec![
        "admin", "create", "list"
    ]);
}

#[tokio::test]
async fn expose_as_overrides_the_mount_path() {
    let mut api = Api::new();
    api.register(
        Route::get("/reports/daily")
            .name("daily")
            .expose_as("reports.daily")
            .handler(|_, _, reply| async move {
                reply.send_json(&json!({ "total": 0 })).await?;
                Ok(())
            }),
    )
    .unwrap();
    let (_router, client) = api.finish();

    assert!(client.get("daily").is_none());
    let response = client
        .call("reports.daily", params(json!({})), CallOverrides::new())
        .await
        .unwrap();
    assert_eq!(response.json::<Value>().unwrap(), json!({ "total": 0 }));

    let (method, template) = client.meta_of("reports.daily").unwrap();
    assert_eq!(method, &Method::GET);
    assert_eq!(template, "/reports/daily");
}

#[tokio::test]
async fn duplicate_mount_keys_are_rejected() {
    let mut api = Api::new();
    api.register(Route::get("/a").name("dup").handler(|_, _, reply| async move {
        reply.send_empty().await?;
        Ok(())
    }))
    .unwrap();

    let err = api
        .register(Route::get("/b").name("dup").handler(|_, _, reply| async move {
            reply.send_empty().await?;
            Ok(())
        }))
        .unwrap_err();
    assert!(matches!(&err, ApiError::DuplicateRouteKey { path } if path == "dup"));
}

#[tokio::test]
async fn duplicate_method_and_path_are_rejected() {
    let mut api = Api::new();
    api.register(Route::get("/same").name("one").handler(|_, _, reply| async move {
        reply.send_empty().await?;
        Ok(())
    }))
    .unwrap();

    let err = api
        .register(Route::get("/same").name("two").handler(|_, _, reply| async move {
            reply.send_empty().await?;
            Ok(())
        }))
        .unwrap_err();
    assert!(matches!(&err, ApiError::DuplicateRoute { .. }));
}

#[tokio::test]
async fn failed_namespace_registration_leaves_no_shell_behind() {
    let mut api = Api::new();
    let err = api
        .namespace("ghost", |scope| {
            // unnamed, so registration fails inside the scope
            scope.register(Route::get("/ghost").handler(|_, _, reply| async move {
                reply.send_empty().await?;
                Ok(())
            }))
        })
        .unwrap_err();
    assert!(matches!(err, ApiError::MissingRouteKey { .. }));

    let (_router, client) = api.finish();
    assert!(client.client().node("ghost").is_none());
    assert_eq!(client.meta(), &loopcall::MetaNode::default());
}

#[tokio::test]
async fn unnamed_routes_are_rejected() {
    let mut api = Api::new();
    let err = api
        .register(Route::get("/anon").handler(|_, _, reply| async move {
            reply.send_empty().await?;
            Ok(())
        }))
        .unwrap_err();
    assert!(matches!(&err, ApiError::MissingRouteKey { path } if path == "/anon"));
}

#[tokio::test]
async fn unknown_callable_paths_fail_cleanly() {
    let (_router, client) = echo_api().finish();

    let err = client
        .call("nope", params(json!({})), CallOverrides::new())
        .await
        .unwrap_err();
    assert!(matches!(&err, ApiError::UnknownRoute { path } if path == "nope"));

    // Injection of an unregistered HTTP path falls through to the router's
    // own 404.
    let injected = client
        .injector()
        .inject(Method::GET, "/nope", CallOverrides::new())
        .await
        .unwrap();
    assert_eq!(injected.status().as_u16(), 404);
}

#[tokio::test]
async fn dropped_reply_rejects_the_pending_result() {
    let mut api = Api::new();
    api.register(
        Route::get("/silent")
            .name("silent")
            .handler(|_, _, _reply| async move { Ok(()) }),
    )
    .unwrap();
    let (_router, client) = api.finish();

    let err = client
        .call("silent", params(json!({})), CallOverrides::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ReplyDropped));
}

#[tokio::test]
async fn handler_errors_map_to_500_over_http() {
    let mut api = Api::new();
    api.register(
        Route::get("/broken")
            .name("broken")
            .handler(|_, _, _reply| async move { anyhow::bail!("storage offline") }),
    )
    .unwrap();
    let (_router, client) = api.finish();

    let err = client
        .call("broken", params(json!({})), CallOverrides::new())
        .await
        .unwrap_err();
    // The unsent Reply dropped inside the failing handler must not shadow
    // the handler's own error.
    assert!(matches!(&err, ApiError::Handler { .. }));
    let source = std::error::Error::source(&err).map(ToString::to_string);
    assert_eq!(source.as_deref(), Some("storage offline"));

    let injected = client
        .inject("broken", params(json!({})), CallOverrides::new())
        .await
        .unwrap();
    assert_eq!(injected.status().as_u16(), 500);
}

#[tokio::test]
async fn failing_pre_send_hook_keeps_its_stage() {
    let mut api = Api::new();
    api.register(
        Route::get("/fussy")
            .name("fussy")
            .pre_send(|_req, _resp| async move { anyhow::bail!("rewrite refused") })
            .handler(|_, _, reply| async move {
                reply.send_empty().await?;
                Ok(())
            }),
    )
    .unwrap();
    let (_router, client) = api.finish();

    let err = client
        .call("fussy", params(json!({})), CallOverrides::new())
        .await
        .unwrap_err();
    assert!(matches!(&err, ApiError::Hook { stage: Stage::PreSend, .. }));
}

#[tokio::test]
async fn non_json_bodies_decode_softly() {
    let mut api = Api::new();
    api.register(
        Route::get("/plain")
            .name("plain")
            .handler(|_, _, reply| async move {
                reply.send_text("just text").await?;
                Ok(())
            }),
    )
    .unwrap();
    let (_router, client) = api.finish();

    let response = client
        .call("plain", params(json!({})), CallOverrides::new())
        .await
        .unwrap();
    assert_eq!(response.json::<Value>(), None);
    assert_eq!(response.text(), "just text");

    let injected = client
        .inject("plain", params(json!({})), CallOverrides::new())
        .await
        .unwrap();
    assert_eq!(injected.json(), None);
    assert_eq!(injected.text(), "just text");
}

#[tokio::test]
async fn overrides_reach_the_handler_in_both_modes() {
    let mut api = Api::new();
    api.register(
        Route::post("/inspect")
            .name("inspect")
            .handler(|_, req, reply| async move {
                reply
                    .send_json(&json!({
                        "token": req.query.get("token"),
                        "trace": req.headers.get("x-trace").and_then(|v| v.to_str().ok()),
                        "body": req.json::<Value>(),
                    }))
                    .await?;
                Ok(())
            }),
    )
    .unwrap();
    let (_router, client) = api.finish();

    let overrides = || {
        CallOverrides::new()
            .query("token", "t-1")
            .header(
                HeaderName::from_static("x-trace"),
                HeaderValue::from_static("abc"),
            )
            .json(&json!({ "n": 3 }))
    };
    let expected = json!({ "token": "t-1", "trace": "abc", "body": { "n": 3 } });

    let called = client
        .call("inspect", params(json!({})), overrides())
        .await
        .unwrap();
    assert_eq!(called.json::<Value>().unwrap(), expected);

    let injected = client
        .inject("inspect", params(json!({})), overrides())
        .await
        .unwrap();
    assert_eq!(injected.json().unwrap(), &expected);
}

#[tokio::test]
async fn registration_produces_identical_trees_across_instances() {
    fn build() -> ApiClient {
        let mut api = Api::new();
        api.register(
            Route::get("/echo/{id}")
                .name("echo")
                .handler(|_, _, reply| async move {
                    reply.send_empty().await?;
                    Ok(())
                }),
        )
        .unwrap();
        api.namespace("users", |scope| {
            scope.register(Route::get("/users").name("list").handler(
                |_, _, reply| async move {
                    reply.send_empty().await?;
                    Ok(())
                },
            ))
        })
        .unwrap();
        api.finish().1
    }

    assert_eq!(build().meta(), build().meta());
}

#[tokio::test]
async fn route_added_events_carry_mount_paths() {
    let mounts: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut api = Api::new();
    {
        let mounts = mounts.clone();
        api.subscribe_route_added(move |event| mounts.lock().push(event.mount_path()));
    }

    api.register(Route::get("/echo").name("echo").handler(|_, _, reply| async move {
        reply.send_empty().await?;
        Ok(())
    }))
    .unwrap();
    api.namespace("users", |scope| {
        scope.register(Route::get("/users").name("list").handler(
            |_, _, reply| async move {
                reply.send_empty().await?;
                Ok(())
            },
        ))
    })
    .unwrap();
    api.register(
        Route::get("/reports/daily")
            .name("daily")
            .expose_as("reports.daily")
            .handler(|_, _, reply| async move {
                reply.send_empty().await?;
                Ok(())
            }),
    )
    .unwrap();

    assert_eq!(*mounts.lock(), vec!["echo", "users.list", "reports.daily"]);
}

#[tokio::test]
async fn post_response_hook_sees_the_bound_url_over_http() {
    let urls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut api = Api::new();
    {
        let urls = urls.clone();
        api.register(
            Route::get("/echo-hooked/{id}")
                .name("hooked")
                .post_response(move |req, _resp| {
                    let urls = urls.clone();
                    let url = req.url.clone();
                    async move {
                        urls.lock().push(url);
                        Ok(())
                    }
                })
                .handler(|_, _, reply| async move {
                    reply.send_json(&json!({ "ok": true })).await?;
                    Ok(())
                }),
        )
        .unwrap();
    }
    let (_router, client) = api.finish();

    client
        .inject("hooked", params(json!({ "id": 42 })), CallOverrides::new())
        .await
        .unwrap();

    assert_eq!(*urls.lock(), vec!["/echo-hooked/42"]);
}

#[tokio::test]
async fn legacy_colon_templates_normalize_and_serve() {
    let mut api = Api::new();
    api.register(
        Route::get("/legacy/:id")
            .name("legacy")
            .handler(|params, _, reply| async move {
                reply.send_json(&json!({ "id": params["id"] })).await?;
                Ok(())
            }),
    )
    .unwrap();
    let (_router, client) = api.finish();

    assert_eq!(client.meta_of("legacy").unwrap().1, "/legacy/{id}");
    let injected = client
        .inject("legacy", params(json!({ "id": 9 })), CallOverrides::new())
        .await
        .unwrap();
    assert_eq!(injected.json().unwrap(), &json!({ "id": "9" }));
}
