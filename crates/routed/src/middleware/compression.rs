//! Response compression negotiated from `Accept-Encoding`.
//!
//! Gzip is always available; Brotli is compiled in behind the `brotli`
//! feature. Compression is skipped for small bodies, already-encoded
//! responses, bodiless statuses, HEAD requests, content types outside the
//! allow-list (or inside the deny-list), and requests where a handler
//! called [`disable_compression`].

use crate::config::Config;
use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::models::error::EngineError;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::future::BoxFuture;
use std::io::Write;

const DISABLE_ATTRIBUTE: &str = "compression.disabled";

/// Opts the current response out of compression.
pub fn disable_compression(ctx: &Context) {
    ctx.set_attribute(DISABLE_ATTRIBUTE, serde_json::Value::Bool(true));
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Encoding {
    Gzip,
    #[cfg(feature = "brotli")]
    Brotli,
}

impl Encoding {
    fn token(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            #[cfg(feature = "brotli")]
            Self::Brotli => "br",
        }
    }
}

/// Compression settings (`compression.*` section).
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Bodies below this byte count are left alone.
    pub min_length: usize,
    /// Content-type prefixes eligible for compression.
    pub mime_allow: Vec<String>,
    /// Content-type prefixes never compressed; wins over the allow-list.
    pub mime_deny: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_length: 1024,
            mime_allow: [
                "text/",
                "application/json",
                "application/javascript",
                "application/xml",
                "image/svg+xml",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            mime_deny: Vec::new(),
        }
    }
}

impl CompressionConfig {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let allow = config.get_strs("compression.mime_allow");
        Self {
            enabled: config.get_bool("compression.enabled").unwrap_or(false),
            min_length: config
                .get_i64("compression.min_length")
                .map(|v| v.max(0) as usize)
                .unwrap_or(defaults.min_length),
            mime_allow: if allow.is_empty() { defaults.mime_allow } else { allow },
            mime_deny: config.get_strs("compression.mime_deny"),
        }
    }

    fn mime_eligible(&self, content_type: &str) -> bool {
        let mime = content_type.split(';').next().unwrap_or(content_type).trim();
        if self.mime_deny.iter().any(|deny| mime.starts_with(deny.as_str())) {
            return false;
        }
        self.mime_allow.is_empty()
            || self.mime_allow.iter().any(|allow| mime.starts_with(allow.as_str()))
    }
}

/// Picks the best supported encoding from an `Accept-Encoding` header,
/// honoring `q` values. `*` counts as gzip; `q=0` excludes an encoding.
fn negotiate(header: &str) -> Option<Encoding> {
    let mut best: Option<(Encoding, f32)> = None;
    for part in header.split(',') {
        let mut pieces = part.trim().split(';');
        let token = pieces.next().unwrap_or("").trim().to_ascii_lowercase();
        let q = pieces
            .filter_map(|p| p.trim().strip_prefix("q="))
            .filter_map(|q| q.parse::<f32>().ok())
            .next()
            .unwrap_or(1.0);
        if q <= 0.0 {
            continue;
        }
        let encoding = match token.as_str() {
            "gzip" | "*" => Some(Encoding::Gzip),
            #[cfg(feature = "brotli")]
            "br" => Some(Encoding::Brotli),
            _ => None,
        };
        if let Some(encoding) = encoding {
            let better = match best {
                Some((_, best_q)) => q > best_q,
                None => true,
            };
            if better {
                best = Some((encoding, q));
            }
        }
    }
    best.map(|(encoding, _)| encoding)
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

#[cfg(feature = "brotli")]
fn brotli_compress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
    writer.write_all(bytes)?;
    drop(writer);
    Ok(out)
}

pub struct CompressionMiddleware {
    config: CompressionConfig,
}

impl CompressionMiddleware {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }
}

impl Middleware for CompressionMiddleware {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), EngineError>> {
        let config = self.config.clone();
        Box::pin(async move {
            let accept = ctx.header("accept-encoding").map(str::to_string);
            let head_request = ctx.method() == "HEAD";
            let result = next.run(ctx.clone()).await;

            if !config.enabled || head_request {
                return result;
            }
            if ctx.attribute(DISABLE_ATTRIBUTE) == Some(serde_json::Value::Bool(true)) {
                return result;
            }
            let Some(encoding) = accept.as_deref().and_then(negotiate) else {
                return result;
            };

            ctx.with_response(|resp| {
                let status = resp.status();
                if status < 200 || status == 204 || status == 205 || status == 304 {
                    return;
                }
                if resp.header("content-encoding").is_some() {
                    return;
                }
                let eligible = resp
                    .header("content-type")
                    .map(|ct| config.mime_eligible(ct))
                    .unwrap_or(false);
                if !eligible {
                    return;
                }
                let Some(body) = resp.body_bytes().cloned() else {
                    return;
                };
                if body.len() < config.min_length {
                    return;
                }

                let compressed = match encoding {
                    Encoding::Gzip => gzip(&body),
                    #[cfg(feature = "brotli")]
                    Encoding::Brotli => brotli_compress(&body),
                };
                match compressed {
                    Ok(compressed) => {
                        resp.swap_body(compressed);
                        resp.remove_header("content-length");
                        resp.set_header("content-encoding", encoding.token());
                        match resp.header("vary") {
                            Some(vary) if !vary.to_ascii_lowercase().contains("accept-encoding") => {
                                let vary = format!("{}, Accept-Encoding", vary);
                                resp.set_header("vary", vary);
                            }
                            None => resp.set_header("vary", "Accept-Encoding"),
                            _ => {}
                        }
                    }
                    Err(e) => log::warn!("response compression failed: {}", e),
                }
            });
            result
        })
    }

    fn name(&self) -> &'static str {
        "compression"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_honors_q_values() {
        assert_eq!(negotiate("gzip"), Some(Encoding::Gzip));
        assert_eq!(negotiate("gzip;q=0"), None);
        assert_eq!(negotiate("identity"), None);
        assert_eq!(negotiate("*;q=0.5"), Some(Encoding::Gzip));
        assert_eq!(negotiate("deflate, gzip;q=0.8"), Some(Encoding::Gzip));
    }

    #[test]
    fn mime_deny_wins_over_allow() {
        let mut config = CompressionConfig::default();
        config.mime_deny = vec!["text/event-stream".to_string()];
        assert!(config.mime_eligible("text/html; charset=utf-8"));
        assert!(!config.mime_eligible("text/event-stream"));
        assert!(!config.mime_eligible("image/png"));
    }

    #[test]
    fn gzip_round_trips() {
        let payload = vec![b'a'; 4096];
        let compressed = gzip(&payload).unwrap();
        assert!(compressed.len() < payload.len());

        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }
}
