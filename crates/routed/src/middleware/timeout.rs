//! Pipeline deadline enforcement.

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::models::error::EngineError;
use futures::future::BoxFuture;
use serde_json::json;
use std::time::Duration;

/// Races the remainder of the chain against a timer.
///
/// On expiry the context is aborted, a 504 is written directly to the
/// response, and this middleware's future resolves; the losing branch is
/// dropped, so any output it would have produced is discarded.
pub struct TimeoutMiddleware {
    duration: Duration,
}

impl TimeoutMiddleware {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Middleware for TimeoutMiddleware {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>> {
        let duration = self.duration;
        Box::pin(async move {
            if duration.is_zero() {
                return next.run(ctx).await;
            }
            tokio::select! {
                result = next.run(ctx.clone()) => result,
                _ = tokio::time::sleep(duration) => {
                    log::warn!("{} {} exceeded {}s deadline", ctx.method(), ctx.path(), duration.as_secs());
                    ctx.abort();
                    let body = serde_json::to_vec(&json!({"error": "Gateway Timeout"}))
                        .unwrap_or_default();
                    ctx.with_response(|resp| {
                        resp.set_status(504);
                        resp.set_header("content-type", "application/json");
                        resp.swap_body(body);
                    });
                    Ok(())
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "timeout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::container::Container;
    use crate::middleware::{run_chain, Endpoint};
    use crate::models::request::Request;
    use ahash::HashMap as AHashMap;
    use std::sync::Arc;

    fn test_context() -> Context {
        Context::new(
            Request::new("GET", "/slow"),
            AHashMap::default(),
            None,
            "http".to_string(),
            None,
            Arc::new(Container::new()),
        )
    }

    #[tokio::test]
    async fn expiry_writes_504_and_aborts() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(TimeoutMiddleware::new(
            Duration::from_millis(20),
        ))];
        let endpoint: Arc<dyn Endpoint> = Arc::new(|ctx: Context| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ctx.text(200, "too late")
        });

        let ctx = test_context();
        run_chain(chain, endpoint, ctx.clone()).await.unwrap();

        assert!(ctx.aborted());
        assert_eq!(ctx.status(), 504);
    }

    #[tokio::test]
    async fn fast_handlers_pass_through() {
        let chain: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(TimeoutMiddleware::new(Duration::from_secs(5)))];
        let endpoint: Arc<dyn Endpoint> =
            Arc::new(|ctx: Context| async move { ctx.text(200, "ok") });

        let ctx = test_context();
        run_chain(chain, endpoint, ctx.clone()).await.unwrap();

        assert!(!ctx.aborted());
        assert_eq!(ctx.status(), 200);
    }
}
