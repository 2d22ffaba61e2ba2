//! Cross-origin resource sharing middleware.

use crate::config::Config;
use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::models::error::EngineError;
use futures::future::BoxFuture;

/// CORS policy configuration (`cors.*` section).
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: vec!["*".to_string()],
            allow_credentials: false,
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: vec!["content-type".to_string(), "authorization".to_string()],
            exposed_headers: Vec::new(),
            max_age_secs: 3600,
        }
    }
}

impl CorsConfig {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let or_default = |values: Vec<String>, fallback: Vec<String>| {
            if values.is_empty() {
                fallback
            } else {
                values
            }
        };
        Self {
            enabled: config.get_bool("cors.enabled").unwrap_or(false),
            allowed_origins: or_default(
                config.get_strs("cors.allowed_origins"),
                defaults.allowed_origins,
            ),
            allow_credentials: config.get_bool("cors.allow_credentials").unwrap_or(false),
            allowed_methods: or_default(
                config.get_strs("cors.allowed_methods"),
                defaults.allowed_methods,
            )
            .into_iter()
            .map(|m| m.to_ascii_uppercase())
            .collect(),
            allowed_headers: or_default(
                config.get_strs("cors.allowed_headers"),
                defaults.allowed_headers,
            ),
            exposed_headers: config.get_strs("cors.exposed_headers"),
            max_age_secs: config
                .get_i64("cors.max_age_secs")
                .map(|v| v.max(0) as u64)
                .unwrap_or(defaults.max_age_secs),
        }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }

    fn wildcard(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn apply_origin(&self, ctx: &Context, origin: &str) {
        // Browsers reject `*` combined with credentials; echo the origin
        // and mark the response as origin-dependent instead.
        if self.config.wildcard() && !self.config.allow_credentials {
            ctx.set_header("access-control-allow-origin", "*");
        } else {
            ctx.set_header("access-control-allow-origin", origin);
            ctx.append_header("vary", "Origin");
        }
        if self.config.allow_credentials {
            ctx.set_header("access-control-allow-credentials", "true");
        }
    }
}

impl Middleware for CorsMiddleware {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>> {
        let config = self.config.clone();
        let this = CorsMiddleware { config };
        Box::pin(async move {
            let Some(origin) = ctx.header("origin").map(str::to_string) else {
                return next.run(ctx).await;
            };

            if !this.config.origin_allowed(&origin) {
                ctx.text(403, "CORS origin denied")?;
                ctx.abort();
                return Ok(());
            }

            let preflight = ctx.method() == "OPTIONS"
                && ctx.header("access-control-request-method").is_some();
            if preflight {
                let requested = ctx
                    .header("access-control-request-method")
                    .unwrap_or_default()
                    .to_ascii_uppercase();
                if !this.config.allowed_methods.iter().any(|m| *m == requested) {
                    ctx.text(403, "CORS method denied")?;
                    ctx.abort();
                    return Ok(());
                }
                this.apply_origin(&ctx, &origin);
                ctx.set_header(
                    "access-control-allow-methods",
                    this.config.allowed_methods.join(", "),
                );
                if !this.config.allowed_headers.is_empty() {
                    ctx.set_header(
                        "access-control-allow-headers",
                        this.config.allowed_headers.join(", "),
                    );
                }
                ctx.set_header("access-control-max-age", this.config.max_age_secs.to_string());
                ctx.set_status(204);
                ctx.write_body(bytes::Bytes::new())?;
                ctx.abort();
                return Ok(());
            }

            this.apply_origin(&ctx, &origin);
            if !this.config.exposed_headers.is_empty() {
                ctx.set_header(
                    "access-control-expose-headers",
                    this.config.exposed_headers.join(", "),
                );
            }
            next.run(ctx).await
        })
    }

    fn name(&self) -> &'static str {
        "cors"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_defaults_and_overrides() {
        let config = Config::from_value(json!({
            "cors": {
                "enabled": true,
                "allowed_origins": ["https://app.example"],
                "allow_credentials": true,
                "allowed_methods": ["get", "post"]
            }
        }))
        .unwrap();
        let cors = CorsConfig::from_config(&config);
        assert!(cors.enabled);
        assert!(cors.allow_credentials);
        assert_eq!(cors.allowed_methods, vec!["GET", "POST"]);
        assert!(cors.origin_allowed("https://app.example"));
        assert!(!cors.origin_allowed("https://evil.example"));
    }

    #[test]
    fn wildcard_allows_any_origin() {
        let cors = CorsConfig::default();
        assert!(cors.origin_allowed("https://anything.example"));
        assert!(cors.wildcard());
    }
}
