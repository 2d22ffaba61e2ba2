//! CSRF protection middleware.
//!
//! Active only when a session is bound to the request. Safe methods ensure a
//! per-session token exists and mirror it in a readable cookie; unsafe
//! methods must present the token via the `X-CSRF-Token` header or a
//! `_csrf` form field, and a mismatch fails the request with a 403.

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::models::error::EngineError;
use crate::models::request::parse_urlencoded;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use cookie::{Cookie, SameSite};
use futures::future::BoxFuture;

const SESSION_KEY: &str = "_csrf_token";
const HEADER_NAME: &str = "x-csrf-token";
const FORM_FIELD: &str = "_csrf";
const COOKIE_NAME: &str = "routed_csrf";
const COOKIE_MAX_AGE_SECS: i64 = 3600;

fn generate_token() -> String {
    let raw: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(raw)
}

fn is_safe_method(method: &str) -> bool {
    matches!(method, "GET" | "HEAD" | "OPTIONS" | "TRACE")
}

#[derive(Default)]
pub struct CsrfMiddleware;

impl CsrfMiddleware {
    pub fn new() -> Self {
        Self
    }

    async fn provided_token(ctx: &Context) -> Option<String> {
        if let Some(token) = ctx.header(HEADER_NAME) {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
        if ctx.content_type() == Some("application/x-www-form-urlencoded") {
            let body = ctx.read_body().await;
            if let Ok(text) = std::str::from_utf8(&body) {
                return parse_urlencoded(text)
                    .into_iter()
                    .find(|(name, _)| name == FORM_FIELD)
                    .map(|(_, value)| value);
            }
        }
        None
    }

    fn emit_cookie(ctx: &Context, token: &str) {
        let secure = ctx.is_secure();
        let cookie = Cookie::build((COOKIE_NAME, token.to_string()))
            .path("/")
            .http_only(true)
            .secure(secure)
            .same_site(if secure { SameSite::Strict } else { SameSite::Lax })
            .max_age(cookie::time::Duration::seconds(COOKIE_MAX_AGE_SECS))
            .build();
        ctx.with_response(|resp| resp.append_header("set-cookie", cookie.to_string()));
    }
}

impl Middleware for CsrfMiddleware {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>> {
        Box::pin(async move {
            let Some(session) = ctx.session() else {
                // No session binding; nothing to protect against.
                return next.run(ctx).await;
            };

            if is_safe_method(ctx.method()) {
                let token = match session.get_str(SESSION_KEY) {
                    Some(token) => token.to_string(),
                    None => {
                        let token = generate_token();
                        ctx.with_session_mut(|session| {
                            session.insert(SESSION_KEY, serde_json::Value::String(token.clone()))
                        });
                        token
                    }
                };
                Self::emit_cookie(&ctx, &token);
                return next.run(ctx).await;
            }

            let expected = session.get_str(SESSION_KEY).map(str::to_string);
            let provided = Self::provided_token(&ctx).await;
            match (expected, provided) {
                (Some(expected), Some(provided)) if expected == provided => next.run(ctx).await,
                _ => {
                    log::debug!("CSRF token mismatch on {} {}", ctx.method(), ctx.path());
                    ctx.text(403, "CSRF token mismatch")?;
                    ctx.abort();
                    Ok(())
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "csrf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn safe_method_table() {
        assert!(is_safe_method("GET"));
        assert!(is_safe_method("HEAD"));
        assert!(!is_safe_method("POST"));
        assert!(!is_safe_method("DELETE"));
    }
}
