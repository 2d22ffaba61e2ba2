//! Middleware pipeline: composable `(ctx, next)` units over the request
//! context.
//!
//! Middlewares run in the order global → group (outermost first) → route →
//! injected, with the route handler at the end of the chain. Code after
//! `next.run(ctx).await` executes in reverse registration order. Calling
//! [`Context::abort`] short-circuits the remainder of the chain: any later
//! `next` becomes a no-op and write helpers stop producing output.
//!
//! # Examples
//!
//! ```rust
//! use routed::middleware::{from_fn, Next};
//! use routed::context::Context;
//!
//! let timing = from_fn(|ctx: Context, next: Next| async move {
//!     let start = std::time::Instant::now();
//!     let result = next.run(ctx.clone()).await;
//!     ctx.set_header("x-elapsed-ms", start.elapsed().as_millis().to_string());
//!     result
//! });
//! # let _ = timing;
//! ```

use crate::context::Context;
use crate::models::error::EngineError;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

pub mod compression;
pub mod conditional;
pub mod cors;
pub mod csrf;
pub mod rate_limit;
pub mod recovery;
pub mod security;
pub mod session;
pub mod timeout;
pub mod validation;

/// A unit of the request pipeline.
///
/// Implementations receive the context and a [`Next`] cursor; they may run
/// code before and after awaiting `next.run(ctx)`, write to the response,
/// or abort the context to short-circuit downstream stages.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>>;

    /// Name used in trace logs.
    fn name(&self) -> &'static str {
        "middleware"
    }
}

/// Terminal stage of a pipeline: the route handler.
pub trait Endpoint: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> BoxFuture<'static, Result<(), EngineError>>;
}

impl<F, Fut> Endpoint for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, Result<(), EngineError>> {
        Box::pin(self(ctx))
    }
}

/// Cursor over the remainder of a pipeline.
///
/// Consuming `run` invokes the next middleware, or the endpoint once the
/// chain is exhausted. An aborted context makes `run` a no-op.
#[derive(Clone)]
pub struct Next {
    chain: Arc<Vec<Arc<dyn Middleware>>>,
    index: usize,
    endpoint: Arc<dyn Endpoint>,
}

impl Next {
    pub(crate) fn new(chain: Arc<Vec<Arc<dyn Middleware>>>, endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            chain,
            index: 0,
            endpoint,
        }
    }

    /// Runs the rest of the chain.
    pub async fn run(self, ctx: Context) -> Result<(), EngineError> {
        if ctx.aborted() {
            return Ok(());
        }
        match self.chain.get(self.index).cloned() {
            Some(middleware) => {
                let next = Self {
                    chain: self.chain,
                    index: self.index + 1,
                    endpoint: self.endpoint,
                };
                log::trace!("entering middleware {}", middleware.name());
                middleware.call(ctx, next).await
            }
            None => self.endpoint.call(ctx).await,
        }
    }
}

/// Adapts a closure into a [`Middleware`].
pub fn from_fn<F, Fut>(f: F) -> FnMiddleware<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
{
    FnMiddleware(f)
}

/// See [`from_fn`].
pub struct FnMiddleware<F>(F);

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
{
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>> {
        Box::pin((self.0)(ctx, next))
    }

    fn name(&self) -> &'static str {
        "fn"
    }
}

/// Runs `chain` over `ctx`, finishing at `endpoint`.
pub(crate) async fn run_chain(
    chain: Vec<Arc<dyn Middleware>>,
    endpoint: Arc<dyn Endpoint>,
    ctx: Context,
) -> Result<(), EngineError> {
    Next::new(Arc::new(chain), endpoint).run(ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::container::Container;
    use crate::models::request::Request;
    use ahash::HashMap as AHashMap;
    use std::sync::Mutex;

    fn test_context() -> Context {
        Context::new(
            Request::new("GET", "/"),
            AHashMap::default(),
            None,
            "http".to_string(),
            None,
            Arc::new(Container::new()),
        )
    }

    fn tagging(tag: &'static str, log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Middleware> {
        Arc::new(from_fn(move |ctx: Context, next: Next| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("pre-{}", tag));
                let result = next.run(ctx).await;
                log.lock().unwrap().push(format!("post-{}", tag));
                result
            }
        }))
    }

    #[tokio::test]
    async fn post_handler_code_runs_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            tagging("M1", log.clone()),
            tagging("M2", log.clone()),
            tagging("M3", log.clone()),
        ];
        let handler_log = log.clone();
        let endpoint: Arc<dyn Endpoint> = Arc::new(move |_ctx: Context| {
            let log = handler_log.clone();
            async move {
                log.lock().unwrap().push("H".to_string());
                Ok(())
            }
        });

        run_chain(chain, endpoint, test_context()).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["pre-M1", "pre-M2", "pre-M3", "H", "post-M3", "post-M2", "post-M1"]
        );
    }

    #[tokio::test]
    async fn abort_short_circuits_downstream_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let aborting: Arc<dyn Middleware> = Arc::new(from_fn(|ctx: Context, next: Next| async move {
            ctx.text(403, "denied")?;
            ctx.abort();
            next.run(ctx).await
        }));
        let chain = vec![aborting, tagging("after", log.clone())];
        let handler_log = log.clone();
        let endpoint: Arc<dyn Endpoint> = Arc::new(move |_ctx: Context| {
            let log = handler_log.clone();
            async move {
                log.lock().unwrap().push("H".to_string());
                Ok(())
            }
        });

        let ctx = test_context();
        run_chain(chain, endpoint, ctx.clone()).await.unwrap();

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(ctx.status(), 403);
    }
}
