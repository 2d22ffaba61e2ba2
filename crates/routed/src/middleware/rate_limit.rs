//! Token-bucket rate limiting with per-route configuration support.
//!
//! Beyond the global default limit, individual route patterns (regexes over
//! the request path) can carry their own requests-per-second and burst
//! settings. Buckets are keyed by client IP combined with the limit tier,
//! so one client can have different budgets on different endpoints.

use crate::config::Config;
use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::models::error::EngineError;
use ahash::HashMap as AHashMap;
use futures::future::BoxFuture;
use log::{debug, warn};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Rate limiting rule for a route pattern.
#[derive(Debug, Clone)]
pub struct RouteRateLimit {
    /// Route pattern (regex) matched against request paths.
    pub pattern: String,
    /// Requests per second allowed for this route.
    pub requests_per_second: u64,
    /// Burst capacity for this route.
    pub burst_size: u64,
    regex: Regex,
}

impl RouteRateLimit {
    pub fn new(
        pattern: &str,
        requests_per_second: u64,
        burst_size: u64,
    ) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        Ok(Self {
            pattern: pattern.to_string(),
            requests_per_second,
            burst_size,
            regex,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// Rate limiter configuration (`rate_limit.*` section).
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub default_requests_per_second: u64,
    pub default_burst_size: u64,
    pub routes: Vec<RouteRateLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_requests_per_second: 100,
            default_burst_size: 200,
            routes: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let mut routes = Vec::new();
        if let Some(entries) = config.get("rate_limit.routes").and_then(|v| v.as_array()) {
            for entry in entries {
                let pattern = entry.get("pattern").and_then(|v| v.as_str());
                let rps = entry
                    .get("requests_per_second")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(defaults.default_requests_per_second);
                let burst = entry
                    .get("burst")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(rps * 2);
                match pattern.map(|p| RouteRateLimit::new(p, rps, burst)) {
                    Some(Ok(limit)) => routes.push(limit),
                    Some(Err(e)) => warn!("ignoring invalid rate limit pattern: {}", e),
                    None => warn!("rate limit route entry missing pattern"),
                }
            }
        }
        Self {
            enabled: config.get_bool("rate_limit.enabled").unwrap_or(false),
            default_requests_per_second: config
                .get_i64("rate_limit.requests_per_second")
                .map(|v| v.max(1) as u64)
                .unwrap_or(defaults.default_requests_per_second),
            default_burst_size: config
                .get_i64("rate_limit.burst")
                .map(|v| v.max(1) as u64)
                .unwrap_or(defaults.default_burst_size),
            routes,
        }
    }

    /// Resolves the `(rps, burst)` pair for a path.
    pub fn limit_for_path(&self, path: &str) -> (u64, u64) {
        for limit in &self.routes {
            if limit.matches(path) {
                debug!(
                    "path {} matched rate limit pattern {} ({}/s)",
                    path, limit.pattern, limit.requests_per_second
                );
                return (limit.requests_per_second, limit.burst_size);
            }
        }
        (self.default_requests_per_second, self.default_burst_size)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Token-bucket limiter over the whole pipeline.
pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    buckets: Arc<Mutex<AHashMap<String, Bucket>>>,
}

impl RateLimitMiddleware {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(AHashMap::default())),
        }
    }

    /// Takes one token for `key`; on refusal returns seconds to wait,
    /// rounded up to at least one.
    fn try_take(&self, key: &str, rps: u64, burst: u64) -> Result<(), u64> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limit buckets poisoned");
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: burst as f64,
            refilled_at: now,
        });

        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rps as f64).min(burst as f64);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }
        let wait_secs = (1.0 - bucket.tokens) / rps as f64;
        // Any positive fractional remainder rounds up to a whole second.
        Err((wait_secs.ceil() as u64).max(1))
    }
}

impl Middleware for RateLimitMiddleware {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>> {
        let (rps, burst) = self.config.limit_for_path(ctx.path());
        let client = ctx
            .client_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        // Composite key: same client can sit in different tiers per route.
        let key = format!("{}:{}rps", client, rps);
        let outcome = self.try_take(&key, rps, burst);

        Box::pin(async move {
            match outcome {
                Ok(()) => next.run(ctx).await,
                Err(retry_after) => {
                    debug!("rate limit exceeded for {}", key);
                    ctx.set_header("retry-after", retry_after.to_string());
                    ctx.json(
                        429,
                        &json!({ "error": "too_many_requests", "retry_after": retry_after }),
                    )?;
                    ctx.abort();
                    Ok(())
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "rate-limit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_pattern_matching() {
        let limit = RouteRateLimit::new(r"^/admin/.*", 10, 20).unwrap();
        assert!(limit.matches("/admin/status"));
        assert!(!limit.matches("/health"));
        assert!(!limit.matches("/api/admin"));
    }

    #[test]
    fn limit_selection_falls_back_to_default() {
        let config = RateLimitConfig {
            enabled: true,
            default_requests_per_second: 50,
            default_burst_size: 100,
            routes: vec![
                RouteRateLimit::new(r"^/admin/.*", 5, 10).unwrap(),
                RouteRateLimit::new(r"^/health$", 100, 200).unwrap(),
            ],
        };
        assert_eq!(config.limit_for_path("/admin/status"), (5, 10));
        assert_eq!(config.limit_for_path("/health"), (100, 200));
        assert_eq!(config.limit_for_path("/api/test"), (50, 100));
    }

    #[test]
    fn bucket_exhaustion_reports_wait_time() {
        let limiter = RateLimitMiddleware::new(RateLimitConfig {
            enabled: true,
            default_requests_per_second: 1,
            default_burst_size: 2,
            routes: Vec::new(),
        });
        assert!(limiter.try_take("k", 1, 2).is_ok());
        assert!(limiter.try_take("k", 1, 2).is_ok());
        let wait = limiter.try_take("k", 1, 2).unwrap_err();
        assert!(wait >= 1);
    }
}
