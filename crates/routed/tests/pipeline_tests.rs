use routed::config::Config;
use routed::context::Context;
use routed::engine::Engine;
use routed::middleware::{from_fn, Next};
use routed::models::request::Request;
use serde_json::json;
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

fn tag(log: &Log, entry: &str) {
    log.lock().unwrap().push(entry.to_string());
}

fn tagging(name: &'static str, log: Log) -> impl routed::middleware::Middleware {
    from_fn(move |ctx: Context, next: Next| {
        let log = log.clone();
        async move {
            tag(&log, &format!("pre-{}", name));
            let result = next.run(ctx).await;
            tag(&log, &format!("post-{}", name));
            result
        }
    })
}

#[tokio::test]
async fn global_group_route_ordering() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let handler_log = log.clone();
    let group_log = log.clone();
    let route_log = log.clone();
    let engine = Engine::builder(Config::new())
        .middleware(tagging("M1", log.clone()))
        .routes(move |r| {
            let group_log = group_log.clone();
            let route_log = route_log.clone();
            let handler_log = handler_log.clone();
            r.group("/api", move |api| {
                api.middleware(tagging("M2", group_log.clone()));
                let handler_log = handler_log.clone();
                api.get("/work", move |_ctx: Context| {
                    let log = handler_log.clone();
                    async move {
                        tag(&log, "H");
                        Ok(())
                    }
                })
                .unwrap()
                .middleware(tagging("M3", route_log.clone()));
            });
        })
        .build()
        .unwrap();

    engine.handle_request(Request::new("GET", "/api/work")).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["pre-M1", "pre-M2", "pre-M3", "H", "post-M3", "post-M2", "post-M1"]
    );
}

#[tokio::test]
async fn abort_hides_later_handler_writes() {
    let engine = Engine::builder(Config::new())
        .middleware(from_fn(|ctx: Context, next: Next| async move {
            ctx.text(403, "blocked")?;
            ctx.abort();
            next.run(ctx).await
        }))
        .routes(|r| {
            r.get("/secret", |ctx: Context| async move { ctx.text(200, "secret data") })
                .unwrap();
        })
        .build()
        .unwrap();

    let response = engine.handle_request(Request::new("GET", "/secret")).await;
    assert_eq!(response.status(), 403);
    assert_eq!(response.body_bytes().unwrap().as_ref(), b"blocked");
}

#[tokio::test]
async fn timeout_discards_slow_handler_output() {
    let engine = Engine::builder(
        Config::from_value(json!({"engine": {"request_timeout_secs": 1}})).unwrap(),
    )
    .routes(|r| {
        r.get("/slow", |ctx: Context| async move {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            ctx.text(200, "finally")
        })
        .unwrap();
    })
    .build()
    .unwrap();

    let started = std::time::Instant::now();
    let response = engine.handle_request(Request::new("GET", "/slow")).await;
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(response.status(), 504);
    let body: serde_json::Value = serde_json::from_slice(response.body_bytes().unwrap()).unwrap();
    assert_eq!(body["error"], "Gateway Timeout");
}

#[tokio::test]
async fn handler_panic_becomes_500() {
    let engine = Engine::builder(Config::new())
        .routes(|r| {
            r.get("/boom", |_ctx: Context| async move {
                panic!("exploded");
                #[allow(unreachable_code)]
                Ok(())
            })
            .unwrap();
        })
        .build()
        .unwrap();

    let response = engine.handle_request(Request::new("GET", "/boom")).await;
    assert_eq!(response.status(), 500);
    let body: serde_json::Value = serde_json::from_slice(response.body_bytes().unwrap()).unwrap();
    assert_eq!(body["error"], "Internal Server Error");
}

#[tokio::test]
async fn typed_status_errors_render_their_status() {
    let engine = Engine::builder(Config::new())
        .routes(|r| {
            r.get("/teapot", |_ctx: Context| async move {
                Err(routed::models::error::EngineError::status(418, "short and stout"))
            })
            .unwrap();
        })
        .build()
        .unwrap();

    let response = engine.handle_request(Request::new("GET", "/teapot")).await;
    assert_eq!(response.status(), 418);
    let body: serde_json::Value = serde_json::from_slice(response.body_bytes().unwrap()).unwrap();
    assert_eq!(body["error"], "short and stout");
}

#[tokio::test]
async fn validation_rules_reject_bad_payloads_with_422() {
    let engine = Engine::builder(Config::new())
        .routes(|r| {
            r.post("/signup", |ctx: Context| async move { ctx.text(201, "created") })
                .unwrap()
                .rules("email", "required|email")
                .unwrap()
                .rules("age", "int|min:13")
                .unwrap();
        })
        .build()
        .unwrap();

    let request = Request::new("POST", "/signup")
        .with_header("content-type", "application/json")
        .with_body(routed::models::request::Body::from_bytes(
            serde_json::to_vec(&json!({"email": "nope", "age": 9})).unwrap(),
        ));
    let response = engine.handle_request(request).await;
    assert_eq!(response.status(), 422);
    let body: serde_json::Value = serde_json::from_slice(response.body_bytes().unwrap()).unwrap();
    assert!(body["errors"]["email"][0].as_str().unwrap().contains("email"));
    assert!(body["errors"]["age"][0].as_str().unwrap().contains("13"));

    let request = Request::new("POST", "/signup")
        .with_header("content-type", "application/json")
        .with_body(routed::models::request::Body::from_bytes(
            serde_json::to_vec(&json!({"email": "a@b.example", "age": 30})).unwrap(),
        ));
    let response = engine.handle_request(request).await;
    assert_eq!(response.status(), 201);
}
