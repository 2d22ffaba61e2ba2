//! Request payload validation middleware.
//!
//! Injected for routes that declare rules. The request body is parsed as
//! JSON or form data (query pairs are folded in underneath), validated, and
//! the request fails with a 422 error bag before the handler runs.

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::models::error::EngineError;
use crate::models::request::parse_urlencoded;
use crate::validation::Rules;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

pub struct ValidationMiddleware {
    rules: Rules,
}

impl ValidationMiddleware {
    pub fn new(rules: Rules) -> Self {
        Self { rules }
    }

    async fn collect_data(ctx: &Context) -> Result<Map<String, Value>, EngineError> {
        let mut data = Map::new();
        for (key, value) in parse_urlencoded(ctx.query()) {
            data.insert(key, Value::String(value));
        }

        match ctx.content_type() {
            Some("application/json") => {
                let body = ctx.read_body().await;
                if body.is_empty() {
                    return Ok(data);
                }
                let parsed: Value = serde_json::from_slice(&body).map_err(|e| {
                    EngineError::status(400, format!("malformed JSON body: {}", e))
                })?;
                match parsed {
                    Value::Object(object) => data.extend(object),
                    _ => {
                        return Err(EngineError::status(400, "JSON body must be an object"));
                    }
                }
            }
            Some("application/x-www-form-urlencoded") => {
                let body = ctx.read_body().await;
                if let Ok(text) = std::str::from_utf8(&body) {
                    for (key, value) in parse_urlencoded(text) {
                        data.insert(key, Value::String(value));
                    }
                }
            }
            _ => {}
        }
        Ok(data)
    }
}

impl Middleware for ValidationMiddleware {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>> {
        let rules = self.rules.clone();
        Box::pin(async move {
            let data = Self::collect_data(&ctx).await?;
            rules.validate(&data).map_err(EngineError::Validation)?;
            next.run(ctx).await
        })
    }

    fn name(&self) -> &'static str {
        "validation"
    }
}
