use routed::config::Config;
use routed::context::Context;
use routed::engine::Engine;
use routed::models::request::{Body, Request};
use serde_json::json;
use std::io::Read;

fn engine_with(config: serde_json::Value, routes: impl FnOnce(&mut routed::router::Router)) -> Engine {
    Engine::builder(Config::from_value(config).unwrap())
        .routes(routes)
        .build()
        .expect("engine builds")
}

fn cookie_pair(response: &routed::models::response::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .into_iter()
        .find(|c| c.starts_with(&format!("{}=", name)))
        .and_then(|c| c.split(';').next().map(str::to_string))
}

mod csrf {
    use super::*;

    fn routes(r: &mut routed::router::Router) {
        r.get("/form", |ctx: Context| async move { ctx.text(200, "form") })
            .unwrap();
        r.post("/submit", |ctx: Context| async move { ctx.text(200, "accepted") })
            .unwrap();
    }

    const SESSIONS_ON: &str = r#"{"session": {"enabled": true}}"#;

    #[tokio::test]
    async fn token_mismatch_is_rejected_with_403() {
        let engine = engine_with(serde_json::from_str(SESSIONS_ON).unwrap(), routes);

        // Prime a session; the safe method issues the cookies.
        let response = engine.handle_request(Request::new("GET", "/form")).await;
        let session_cookie = cookie_pair(&response, "routed_session").expect("session cookie");
        assert!(cookie_pair(&response, "routed_csrf").is_some());

        let request = Request::new("POST", "/submit")
            .with_header("cookie", session_cookie)
            .with_header("x-csrf-token", "B-not-the-token");
        let response = engine.handle_request(request).await;
        assert_eq!(response.status(), 403);
        assert_eq!(
            response.body_bytes().unwrap().as_ref(),
            b"CSRF token mismatch"
        );
    }

    #[tokio::test]
    async fn matching_header_token_passes() {
        let engine = engine_with(serde_json::from_str(SESSIONS_ON).unwrap(), routes);

        let response = engine.handle_request(Request::new("GET", "/form")).await;
        let session_cookie = cookie_pair(&response, "routed_session").unwrap();
        let csrf_cookie = cookie_pair(&response, "routed_csrf").unwrap();
        let token = csrf_cookie.split_once('=').unwrap().1.to_string();

        let request = Request::new("POST", "/submit")
            .with_header("cookie", session_cookie)
            .with_header("x-csrf-token", token);
        let response = engine.handle_request(request).await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn form_field_token_is_accepted() {
        let engine = engine_with(serde_json::from_str(SESSIONS_ON).unwrap(), routes);

        let response = engine.handle_request(Request::new("GET", "/form")).await;
        let session_cookie = cookie_pair(&response, "routed_session").unwrap();
        let token = cookie_pair(&response, "routed_csrf")
            .unwrap()
            .split_once('=')
            .unwrap()
            .1
            .to_string();

        let request = Request::new("POST", "/submit")
            .with_header("cookie", session_cookie)
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(Body::from_bytes(format!("_csrf={}&note=hi", token)));
        let response = engine.handle_request(request).await;
        assert_eq!(response.status(), 200);
    }
}

mod cors {
    use super::*;

    fn config() -> serde_json::Value {
        json!({
            "cors": {
                "enabled": true,
                "allowed_origins": ["https://app.example"],
                "allowed_methods": ["GET", "POST"],
                "max_age_secs": 600
            }
        })
    }

    fn routes(r: &mut routed::router::Router) {
        r.get("/data", |ctx: Context| async move { ctx.json(200, &json!({"ok": true})) })
            .unwrap();
    }

    #[tokio::test]
    async fn disallowed_origin_is_refused() {
        let engine = engine_with(config(), routes);
        let request = Request::new("GET", "/data").with_header("origin", "https://evil.example");
        let response = engine.handle_request(request).await;
        assert_eq!(response.status(), 403);
        assert_eq!(response.body_bytes().unwrap().as_ref(), b"CORS origin denied");
    }

    #[tokio::test]
    async fn allowed_origin_is_echoed_with_vary() {
        let engine = engine_with(config(), routes);
        let request = Request::new("GET", "/data").with_header("origin", "https://app.example");
        let response = engine.handle_request(request).await;
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.header("access-control-allow-origin"),
            Some("https://app.example")
        );
        assert!(response
            .headers()
            .get_all("vary")
            .iter()
            .any(|v| v.contains("Origin")));
    }

    #[tokio::test]
    async fn preflight_validates_method_and_answers_204() {
        let engine = engine_with(config(), routes);

        let request = Request::new("OPTIONS", "/data")
            .with_header("origin", "https://app.example")
            .with_header("access-control-request-method", "POST");
        let response = engine.handle_request(request).await;
        assert_eq!(response.status(), 204);
        assert_eq!(
            response.header("access-control-allow-methods"),
            Some("GET, POST")
        );
        assert_eq!(response.header("access-control-max-age"), Some("600"));

        let request = Request::new("OPTIONS", "/data")
            .with_header("origin", "https://app.example")
            .with_header("access-control-request-method", "DELETE");
        let response = engine.handle_request(request).await;
        assert_eq!(response.status(), 403);
    }
}

mod rate_limit {
    use super::*;

    #[tokio::test]
    async fn excess_requests_get_429_with_retry_after() {
        let engine = engine_with(
            json!({"rate_limit": {"enabled": true, "requests_per_second": 1, "burst": 2}}),
            |r| {
                r.get("/ping", |ctx: Context| async move { ctx.text(200, "pong") })
                    .unwrap();
            },
        );

        for _ in 0..2 {
            let response = engine.handle_request(Request::new("GET", "/ping")).await;
            assert_eq!(response.status(), 200);
        }

        let response = engine.handle_request(Request::new("GET", "/ping")).await;
        assert_eq!(response.status(), 429);
        let retry_after: u64 = response.header("retry-after").unwrap().parse().unwrap();
        assert!(retry_after >= 1);
        let body: serde_json::Value =
            serde_json::from_slice(response.body_bytes().unwrap()).unwrap();
        assert_eq!(body["error"], "too_many_requests");
        assert_eq!(body["retry_after"], retry_after);
    }

    #[tokio::test]
    async fn per_route_patterns_override_the_default() {
        let engine = engine_with(
            json!({"rate_limit": {
                "enabled": true,
                "requests_per_second": 100,
                "burst": 200,
                "routes": [{"pattern": "^/strict$", "requests_per_second": 1, "burst": 1}]
            }}),
            |r| {
                r.get("/strict", |ctx: Context| async move { ctx.text(200, "ok") })
                    .unwrap();
                r.get("/lenient", |ctx: Context| async move { ctx.text(200, "ok") })
                    .unwrap();
            },
        );

        assert_eq!(
            engine.handle_request(Request::new("GET", "/strict")).await.status(),
            200
        );
        assert_eq!(
            engine.handle_request(Request::new("GET", "/strict")).await.status(),
            429
        );
        // The lenient route keeps its own generous bucket.
        assert_eq!(
            engine.handle_request(Request::new("GET", "/lenient")).await.status(),
            200
        );
    }
}

mod compression {
    use super::*;

    fn config() -> serde_json::Value {
        json!({"compression": {"enabled": true, "min_length": 64}})
    }

    fn routes(r: &mut routed::router::Router) {
        r.get("/big", |ctx: Context| async move { ctx.text(200, "x".repeat(4096)) })
            .unwrap();
        r.get("/small", |ctx: Context| async move { ctx.text(200, "tiny") })
            .unwrap();
    }

    #[tokio::test]
    async fn gzip_is_negotiated_and_round_trips() {
        let engine = engine_with(config(), routes);
        let request = Request::new("GET", "/big").with_header("accept-encoding", "gzip, deflate");
        let response = engine.handle_request(request).await;

        assert_eq!(response.header("content-encoding"), Some("gzip"));
        assert!(response
            .header("vary")
            .unwrap()
            .contains("Accept-Encoding"));

        let mut decoder = flate2::read::GzDecoder::new(&response.body_bytes().unwrap()[..]);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out, "x".repeat(4096));
    }

    #[tokio::test]
    async fn small_bodies_and_q_zero_are_skipped() {
        let engine = engine_with(config(), routes);

        let request = Request::new("GET", "/small").with_header("accept-encoding", "gzip");
        let response = engine.handle_request(request).await;
        assert_eq!(response.header("content-encoding"), None);

        let request = Request::new("GET", "/big").with_header("accept-encoding", "gzip;q=0");
        let response = engine.handle_request(request).await;
        assert_eq!(response.header("content-encoding"), None);
    }

    #[tokio::test]
    async fn head_requests_are_never_compressed() {
        let engine = engine_with(config(), |r| {
            r.head("/big", |ctx: Context| async move { ctx.text(200, "x".repeat(4096)) })
                .unwrap();
        });
        let request = Request::new("HEAD", "/big").with_header("accept-encoding", "gzip");
        let response = engine.handle_request(request).await;
        assert_eq!(response.header("content-encoding"), None);
    }
}

mod conditional {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    fn routes(r: &mut routed::router::Router) {
        r.get("/doc", |ctx: Context| async move { ctx.text(200, "document body") })
            .unwrap()
            .etag(Arc::new(|_ctx| Some("v1".to_string())))
            .last_modified(Arc::new(|_ctx| {
                Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
            }));
    }

    #[tokio::test]
    async fn matching_if_none_match_yields_304() {
        let engine = engine_with(json!({}), routes);

        let response = engine.handle_request(Request::new("GET", "/doc")).await;
        assert_eq!(response.status(), 200);
        let etag = response.header("etag").unwrap().to_string();
        assert_eq!(etag, "\"v1\"");
        assert!(response.header("last-modified").is_some());

        let request = Request::new("GET", "/doc").with_header("if-none-match", etag);
        let response = engine.handle_request(request).await;
        assert_eq!(response.status(), 304);
        assert_eq!(response.header("etag"), Some("\"v1\""));
    }

    #[tokio::test]
    async fn stale_if_match_yields_412() {
        let engine = engine_with(json!({}), routes);
        let request = Request::new("GET", "/doc").with_header("if-match", "\"v0\"");
        let response = engine.handle_request(request).await;
        assert_eq!(response.status(), 412);
    }

    #[tokio::test]
    async fn if_modified_since_respects_the_resolver() {
        let engine = engine_with(json!({}), routes);
        let modified = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let fresh = httpdate::fmt_http_date(modified + Duration::from_secs(3600));
        let request = Request::new("GET", "/doc").with_header("if-modified-since", fresh);
        let response = engine.handle_request(request).await;
        assert_eq!(response.status(), 304);

        let stale = httpdate::fmt_http_date(modified - Duration::from_secs(3600));
        let request = Request::new("GET", "/doc").with_header("if-modified-since", stale);
        let response = engine.handle_request(request).await;
        assert_eq!(response.status(), 200);
    }
}

mod security {
    use super::*;

    #[tokio::test]
    async fn default_header_set_is_applied() {
        let engine = engine_with(json!({}), |r| {
            r.get("/", |ctx: Context| async move { ctx.text(200, "home") })
                .unwrap();
        });
        let response = engine.handle_request(Request::new("GET", "/")).await;
        assert_eq!(response.header("x-content-type-options"), Some("nosniff"));
        assert_eq!(response.header("x-frame-options"), Some("DENY"));
        assert_eq!(
            response.header("content-security-policy"),
            Some("default-src 'self'")
        );
        // Plain http: no HSTS.
        assert_eq!(response.header("strict-transport-security"), None);
    }

    #[tokio::test]
    async fn hsts_only_on_secure_requests() {
        let engine = engine_with(json!({}), |r| {
            r.get("/", |ctx: Context| async move { ctx.text(200, "home") })
                .unwrap();
        });
        let request = Request::new("GET", "/").with_scheme("https");
        let response = engine.handle_request(request).await;
        assert!(response.header("strict-transport-security").is_some());
    }

    #[tokio::test]
    async fn headers_can_be_disabled() {
        let engine = engine_with(json!({"security": {"headers": false}}), |r| {
            r.get("/", |ctx: Context| async move { ctx.text(200, "home") })
                .unwrap();
        });
        let response = engine.handle_request(Request::new("GET", "/")).await;
        assert_eq!(response.header("x-content-type-options"), None);
    }
}
