use routed::config::Config;
use routed::context::Context;
use routed::engine::events::Event;
use routed::engine::Engine;
use routed::models::request::{Body, Request};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn engine_with(config: serde_json::Value, routes: impl FnOnce(&mut routed::router::Router)) -> Engine {
    Engine::builder(Config::from_value(config).unwrap())
        .routes(routes)
        .build()
        .expect("engine builds")
}

fn default_routes(r: &mut routed::router::Router) {
    r.get("/users/{id:int}", |ctx: Context| async move {
        let id = ctx.param("id").and_then(|p| p.as_int()).unwrap_or(-1);
        ctx.json(200, &json!({ "id": id }))
    })
    .unwrap()
    .name("users.show");

    r.get("/about", |ctx: Context| async move { ctx.text(200, "about") })
        .unwrap();

    r.post("/about", |ctx: Context| async move { ctx.text(200, "posted") })
        .unwrap();
}

fn body_json(response: &routed::models::response::Response) -> serde_json::Value {
    serde_json::from_slice(response.body_bytes().expect("buffered body")).unwrap()
}

#[tokio::test]
async fn typed_route_casts_parameters() {
    let engine = engine_with(json!({}), default_routes);

    let response = engine.handle_request(Request::new("GET", "/users/42")).await;
    assert_eq!(response.status(), 200);
    assert_eq!(body_json(&response)["id"], 42);

    // A failed cast is a routing miss, not a client error.
    let response = engine.handle_request(Request::new("GET", "/users/abc")).await;
    assert_eq!(response.status(), 404);
    assert_eq!(body_json(&response)["error"], "Not Found");
}

#[tokio::test]
async fn trailing_slash_redirect_preserves_query() {
    let engine = engine_with(json!({}), default_routes);

    let response = engine
        .handle_request(Request::new("GET", "/about/").with_query("tab=2"))
        .await;
    assert_eq!(response.status(), 301);
    assert_eq!(response.header("location"), Some("/about?tab=2"));

    let response = engine.handle_request(Request::new("POST", "/about/")).await;
    assert_eq!(response.status(), 308);
}

#[tokio::test]
async fn method_not_allowed_lists_verbs() {
    let engine = engine_with(json!({}), default_routes);

    let response = engine.handle_request(Request::new("DELETE", "/about")).await;
    assert_eq!(response.status(), 405);
    assert_eq!(response.header("allow"), Some("GET, POST"));

    let engine = engine_with(
        json!({"engine": {"handle_method_not_allowed": false}}),
        default_routes,
    );
    let response = engine.handle_request(Request::new("DELETE", "/about")).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn trusted_proxy_controls_forwarded_scheme() {
    let routes = |r: &mut routed::router::Router| {
        r.get("/scheme", |ctx: Context| async move {
            let scheme = ctx.scheme().to_string();
            ctx.text(200, scheme)
        })
        .unwrap();
    };

    let engine = engine_with(json!({"engine": {"trusted_proxies": ["10.0.0.0/8"]}}), routes);

    // Peer inside the trusted range: forwarded proto wins.
    let mut req = Request::new("GET", "/scheme").with_header("x-forwarded-proto", "https");
    req.peer_addr = Some("10.1.2.3".parse().unwrap());
    let response = engine.handle_request(req).await;
    assert_eq!(response.body_bytes().unwrap().as_ref(), b"https");

    // Untrusted peer: the header is ignored.
    let mut req = Request::new("GET", "/scheme").with_header("x-forwarded-proto", "https");
    req.peer_addr = Some("203.0.113.9".parse().unwrap());
    let response = engine.handle_request(req).await;
    assert_eq!(response.body_bytes().unwrap().as_ref(), b"http");
}

#[tokio::test]
async fn lifecycle_events_fire_once_and_on_reload() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let engine = Engine::builder(Config::new())
        .routes(default_routes)
        .subscribe_all(move |event: &Event| {
            if matches!(event, Event::ConfigLoaded | Event::ConfigReloaded) {
                sink.lock().unwrap().push(event.name().to_string());
            }
        })
        .build()
        .unwrap();

    engine.initialize();
    engine.initialize(); // idempotent
    engine.replace_config(Config::from_value(json!({"app": {"name": "demo"}})).unwrap());

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["config.loaded".to_string(), "config.reloaded".to_string()]
    );
    let config = engine.config();
    assert_eq!(config.get_str("app.name"), Some("demo"));
}

#[tokio::test]
async fn closed_engine_answers_503() {
    let engine = engine_with(json!({}), default_routes);
    engine.initialize();
    engine.close();
    let response = engine.handle_request(Request::new("GET", "/about")).await;
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn url_generation_matches_resolution() {
    let engine = engine_with(json!({}), default_routes);
    engine.initialize();

    let url = engine.url("users.show", &[("id", "7")]).unwrap();
    assert_eq!(url, "/users/7");

    let response = engine.handle_request(Request::new("GET", url.as_str())).await;
    assert_eq!(response.status(), 200);
    assert_eq!(body_json(&response)["id"], 7);
}

#[tokio::test]
async fn request_body_flows_to_handler() {
    let routes = |r: &mut routed::router::Router| {
        r.post("/sum", |ctx: Context| async move {
            let body = ctx.read_body().await;
            let text = String::from_utf8_lossy(&body);
            let total: i64 = text.split(',').filter_map(|p| p.trim().parse::<i64>().ok()).sum();
            ctx.json(200, &json!({ "total": total }))
        })
        .unwrap();
    };
    let engine = engine_with(json!({}), routes);

    let request = Request::new("POST", "/sum").with_body(Body::from_bytes("1, 2, 3"));
    let response = engine.handle_request(request).await;
    assert_eq!(body_json(&response)["total"], 6);
}
