//! Conditional request evaluation (ETag / Last-Modified).
//!
//! Routes supply resolver closures producing the current validators; the
//! middleware answers `If-None-Match`/`If-Modified-Since` with 304 and
//! `If-Match`/`If-Unmodified-Since` with 412. Validators are stamped on the
//! response on both the short-circuit and the normal path.

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::models::error::EngineError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub type EtagResolver = Arc<dyn Fn(&Context) -> Option<String> + Send + Sync>;
pub type LastModifiedResolver = Arc<dyn Fn(&Context) -> Option<SystemTime> + Send + Sync>;

pub struct ConditionalMiddleware {
    etag: Option<EtagResolver>,
    last_modified: Option<LastModifiedResolver>,
}

impl ConditionalMiddleware {
    pub fn new(etag: Option<EtagResolver>, last_modified: Option<LastModifiedResolver>) -> Self {
        Self { etag, last_modified }
    }
}

/// Wraps a raw tag in quotes unless the caller already did (or made it weak).
fn normalize_etag(tag: &str) -> String {
    if tag.starts_with('"') || tag.starts_with("W/") {
        tag.to_string()
    } else {
        format!("\"{}\"", tag)
    }
}

/// True when `header` (a comma-separated ETag list or `*`) covers `etag`.
fn etag_listed(header: &str, etag: &str) -> bool {
    header
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == etag)
}

/// Second-granularity comparison; HTTP dates cannot carry sub-second parts.
fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

fn set_validators(ctx: &Context, etag: Option<&str>, last_modified: Option<SystemTime>) {
    if let Some(etag) = etag {
        ctx.set_header("etag", etag);
    }
    if let Some(time) = last_modified {
        ctx.set_header("last-modified", httpdate::fmt_http_date(time));
    }
}

impl Middleware for ConditionalMiddleware {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>> {
        let etag = self
            .etag
            .as_ref()
            .and_then(|resolve| resolve(&ctx))
            .map(|tag| normalize_etag(&tag));
        let last_modified = self.last_modified.as_ref().and_then(|resolve| resolve(&ctx));

        Box::pin(async move {
            // Preconditions first: If-Match / If-Unmodified-Since -> 412.
            if let (Some(header), Some(etag)) = (ctx.header("if-match"), etag.as_deref()) {
                if !etag_listed(header, etag) {
                    set_validators(&ctx, Some(etag), last_modified);
                    ctx.text(412, "Precondition Failed")?;
                    ctx.abort();
                    return Ok(());
                }
            }
            if let (Some(header), Some(modified)) =
                (ctx.header("if-unmodified-since"), last_modified)
            {
                if let Ok(limit) = httpdate::parse_http_date(header) {
                    if epoch_secs(modified) > epoch_secs(limit) {
                        set_validators(&ctx, etag.as_deref(), last_modified);
                        ctx.text(412, "Precondition Failed")?;
                        ctx.abort();
                        return Ok(());
                    }
                }
            }

            // Freshness: If-None-Match / If-Modified-Since -> 304.
            let mut not_modified = false;
            if let (Some(header), Some(etag)) = (ctx.header("if-none-match"), etag.as_deref()) {
                not_modified = etag_listed(header, etag);
            } else if let (Some(header), Some(modified)) =
                (ctx.header("if-modified-since"), last_modified)
            {
                if let Ok(since) = httpdate::parse_http_date(header) {
                    not_modified = epoch_secs(modified) <= epoch_secs(since);
                }
            }
            if not_modified {
                set_validators(&ctx, etag.as_deref(), last_modified);
                ctx.set_status(304);
                ctx.write_body(bytes::Bytes::new())?;
                ctx.abort();
                return Ok(());
            }

            let result = next.run(ctx.clone()).await;
            set_validators(&ctx, etag.as_deref(), last_modified);
            result
        })
    }

    fn name(&self) -> &'static str {
        "conditional"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etags_are_quoted_once() {
        assert_eq!(normalize_etag("abc"), "\"abc\"");
        assert_eq!(normalize_etag("\"abc\""), "\"abc\"");
        assert_eq!(normalize_etag("W/\"abc\""), "W/\"abc\"");
    }

    #[test]
    fn etag_lists_and_wildcards_match() {
        assert!(etag_listed("\"a\", \"b\"", "\"b\""));
        assert!(etag_listed("*", "\"anything\""));
        assert!(!etag_listed("\"a\"", "\"b\""));
    }
}
