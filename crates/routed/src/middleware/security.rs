//! Security headers middleware for production deployments.

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::models::error::EngineError;
use futures::future::BoxFuture;

/// Baseline security header set.
///
/// Headers are only added when a handler has not set them itself; HSTS is
/// emitted only on secure requests where the browser will honor it.
#[derive(Default)]
pub struct SecurityHeadersMiddleware;

impl SecurityHeadersMiddleware {
    pub fn new() -> Self {
        Self
    }
}

const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("content-security-policy", "default-src 'self'"),
    ("permissions-policy", "geolocation=(), microphone=(), camera=()"),
];

impl Middleware for SecurityHeadersMiddleware {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>> {
        Box::pin(async move {
            let result = next.run(ctx.clone()).await;
            let secure = ctx.is_secure();
            ctx.with_response(|resp| {
                for (name, value) in DEFAULT_HEADERS {
                    if resp.header(name).is_none() {
                        resp.set_header(name, *value);
                    }
                }
                if secure && resp.header("strict-transport-security").is_none() {
                    resp.set_header(
                        "strict-transport-security",
                        "max-age=31536000; includeSubDomains",
                    );
                }
            });
            result
        })
    }

    fn name(&self) -> &'static str {
        "security-headers"
    }
}
