//! Outermost error and panic boundary.
//!
//! Converts typed errors bubbling out of the chain into their default
//! responses, logs panics with a terse message, and turns anything
//! unexpected into `500 {"error":"Internal Server Error"}` — unless a
//! handler already committed a response, in which case the committed
//! response wins. Broken-pipe transport failures abort silently.

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::models::error::EngineError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;

#[derive(Default)]
pub struct RecoveryMiddleware;

impl RecoveryMiddleware {
    pub fn new() -> Self {
        Self
    }

    fn render_error(ctx: &Context, err: EngineError) {
        if err.is_disconnect() {
            log::debug!("peer disconnected during {} {}", ctx.method(), ctx.path());
            ctx.abort();
            return;
        }

        let status = err.status_code();
        if status >= 500 {
            log::error!("{} {} failed: {}", ctx.method(), ctx.path(), err);
        } else {
            log::debug!("{} {} -> {}: {}", ctx.method(), ctx.path(), status, err);
        }

        if ctx.committed() {
            return;
        }

        if let EngineError::MethodNotAllowed { allowed } = &err {
            ctx.set_header("allow", allowed.join(", "));
        }
        let body = err.default_body();
        ctx.with_response(|resp| {
            resp.set_status(status);
            resp.set_header("content-type", "application/json");
            resp.swap_body(serde_json::to_vec(&body).unwrap_or_default());
        });
    }
}

impl Middleware for RecoveryMiddleware {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(next.run(ctx.clone())).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => {
                    Self::render_error(&ctx, err);
                    Ok(())
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    log::error!("panic handling {} {}: {}", ctx.method(), ctx.path(), message);
                    if !ctx.committed() {
                        ctx.with_response(|resp| {
                            resp.set_status(500);
                            resp.set_header("content-type", "application/json");
                            resp.swap_body(
                                serde_json::to_vec(&json!({"error": "Internal Server Error"}))
                                    .unwrap_or_default(),
                            );
                        });
                    }
                    Ok(())
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "recovery"
    }
}
