//! Session loading and persistence middleware.

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::models::error::EngineError;
use crate::session::SessionManager;
use cookie::{Cookie, SameSite};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Extracts a named cookie value from a `Cookie` request header.
pub(crate) fn cookie_value(header: Option<&str>, name: &str) -> Option<String> {
    let header = header?;
    for part in header.split(';') {
        if let Ok(cookie) = Cookie::parse(part.trim()) {
            if cookie.name() == name {
                return Some(cookie.value().to_string());
            }
        }
    }
    None
}

/// Loads the session before the chain runs and saves it after, emitting the
/// id cookie for freshly created sessions.
pub struct SessionMiddleware {
    manager: Arc<SessionManager>,
}

impl SessionMiddleware {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

impl Middleware for SessionMiddleware {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>> {
        let manager = self.manager.clone();
        Box::pin(async move {
            let cookie_id = cookie_value(ctx.header("cookie"), manager.cookie_name());
            let session = manager.load_or_create(cookie_id.as_deref()).await?;
            let fresh = session.is_fresh();
            let session_id = session.id().to_string();
            ctx.set_session(session);

            let result = next.run(ctx.clone()).await;

            if let Some(session) = ctx.session() {
                if session.is_dirty() || fresh {
                    manager.save(&session).await?;
                }
            }
            if fresh {
                let secure = ctx.is_secure();
                let cookie = Cookie::build((manager.cookie_name().to_string(), session_id))
                    .path("/")
                    .http_only(true)
                    .secure(secure)
                    .same_site(if secure { SameSite::Strict } else { SameSite::Lax })
                    .max_age(cookie::time::Duration::seconds(manager.ttl().as_secs() as i64))
                    .build();
                ctx.with_response(|resp| resp.append_header("set-cookie", cookie.to_string()));
            }
            result
        })
    }

    fn name(&self) -> &'static str {
        "session"
    }
}
