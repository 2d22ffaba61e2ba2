//! Engine-level settings derived from the configuration map.

use crate::config::Config;
use std::net::IpAddr;

/// Session configuration section (`session.*`).
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub enabled: bool,
    /// Cache store backing session payloads; engine default when `None`.
    pub store: Option<String>,
    pub cookie_name: String,
    pub ttl_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            store: None,
            cookie_name: "routed_session".to_string(),
            ttl_secs: 7200,
        }
    }
}

/// Settings owned by the engine kernel, not by individual routes.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Redirect `/a/b` ↔ `/a/b/` with 301/308 when the alternate matches.
    pub redirect_trailing_slash: bool,
    /// Respond 405 with an `Allow` set instead of 404.
    pub handle_method_not_allowed: bool,
    /// Collapse `//` runs in the request path before matching.
    pub collapse_duplicate_slashes: bool,
    /// Percent-decode path segments before matching.
    pub unescape_path_segments: bool,
    /// Pipeline deadline in seconds; 0 disables the timeout middleware.
    pub request_timeout_secs: u64,
    /// CIDR ranges whose forwarded headers are trusted.
    pub trusted_proxies: TrustedProxies,
    pub forwarded_for_header: String,
    pub forwarded_proto_header: String,
    pub session: SessionSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            redirect_trailing_slash: true,
            handle_method_not_allowed: true,
            collapse_duplicate_slashes: false,
            unescape_path_segments: true,
            request_timeout_secs: 30,
            trusted_proxies: TrustedProxies::default(),
            forwarded_for_header: "x-forwarded-for".to_string(),
            forwarded_proto_header: "x-forwarded-proto".to_string(),
            session: SessionSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Builds settings from the `engine.*` and `session.*` sections.
    pub fn from_config(config: &Config) -> Result<Self, String> {
        let defaults = Self::default();
        let trusted = config.get_strs("engine.trusted_proxies");
        let settings = Self {
            redirect_trailing_slash: config
                .get_bool("engine.redirect_trailing_slash")
                .unwrap_or(defaults.redirect_trailing_slash),
            handle_method_not_allowed: config
                .get_bool("engine.handle_method_not_allowed")
                .unwrap_or(defaults.handle_method_not_allowed),
            collapse_duplicate_slashes: config
                .get_bool("engine.collapse_duplicate_slashes")
                .unwrap_or(defaults.collapse_duplicate_slashes),
            unescape_path_segments: config
                .get_bool("engine.unescape_path_segments")
                .unwrap_or(defaults.unescape_path_segments),
            request_timeout_secs: config
                .get_i64("engine.request_timeout_secs")
                .map(|v| v.max(0) as u64)
                .unwrap_or(defaults.request_timeout_secs),
            trusted_proxies: TrustedProxies::parse(&trusted)?,
            forwarded_for_header: config
                .get_str("engine.forwarded_for_header")
                .unwrap_or(&defaults.forwarded_for_header)
                .to_ascii_lowercase(),
            forwarded_proto_header: config
                .get_str("engine.forwarded_proto_header")
                .unwrap_or(&defaults.forwarded_proto_header)
                .to_ascii_lowercase(),
            session: SessionSettings {
                enabled: config.get_bool("session.enabled").unwrap_or(false),
                store: config.get_str("session.store").map(str::to_string),
                cookie_name: config
                    .get_str("session.cookie")
                    .unwrap_or("routed_session")
                    .to_string(),
                ttl_secs: config
                    .get_i64("session.ttl_secs")
                    .map(|v| v.max(0) as u64)
                    .unwrap_or(7200),
            },
        };
        Ok(settings)
    }
}

/// Parsed trusted-proxy CIDR ranges.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    ranges: Vec<Cidr>,
}

#[derive(Debug, Clone)]
struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl TrustedProxies {
    /// Parses entries like `10.0.0.0/8`, `::1/128`, or a bare address.
    pub fn parse(entries: &[String]) -> Result<Self, String> {
        let mut ranges = Vec::with_capacity(entries.len());
        for entry in entries {
            let (addr, prefix) = match entry.split_once('/') {
                Some((addr, prefix)) => {
                    let prefix: u8 = prefix
                        .parse()
                        .map_err(|_| format!("invalid CIDR prefix in '{}'", entry))?;
                    (addr, Some(prefix))
                }
                None => (entry.as_str(), None),
            };
            let network: IpAddr = addr
                .parse()
                .map_err(|_| format!("invalid trusted proxy address '{}'", entry))?;
            let max_prefix = if network.is_ipv4() { 32 } else { 128 };
            let prefix = prefix.unwrap_or(max_prefix);
            if prefix > max_prefix {
                return Err(format!("CIDR prefix out of range in '{}'", entry));
            }
            ranges.push(Cidr { network, prefix });
        }
        Ok(Self { ranges })
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// True when `addr` falls inside any configured range.
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.ranges.iter().any(|cidr| cidr.contains(addr))
    }
}

impl Cidr {
    fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(network), IpAddr::V4(addr)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix as u32)
                };
                (u32::from(network) & mask) == (u32::from(addr) & mask)
            }
            (IpAddr::V6(network), IpAddr::V6(addr)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix as u32)
                };
                (u128::from(network) & mask) == (u128::from(addr) & mask)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cidr_membership() {
        let proxies =
            TrustedProxies::parse(&["10.0.0.0/8".to_string(), "127.0.0.1".to_string()]).unwrap();
        assert!(proxies.contains("10.1.2.3".parse().unwrap()));
        assert!(proxies.contains("127.0.0.1".parse().unwrap()));
        assert!(!proxies.contains("192.168.1.1".parse().unwrap()));
        assert!(!proxies.contains("::1".parse().unwrap()));
    }

    #[test]
    fn invalid_cidr_is_a_configuration_error() {
        assert!(TrustedProxies::parse(&["not-an-ip/8".to_string()]).is_err());
        assert!(TrustedProxies::parse(&["10.0.0.0/40".to_string()]).is_err());
    }

    #[test]
    fn settings_read_engine_section() {
        let config = Config::from_value(json!({
            "engine": {
                "redirect_trailing_slash": false,
                "request_timeout_secs": 5,
                "trusted_proxies": ["10.0.0.0/8"]
            },
            "session": {"enabled": true, "cookie": "sid"}
        }))
        .unwrap();

        let settings = EngineSettings::from_config(&config).unwrap();
        assert!(!settings.redirect_trailing_slash);
        assert_eq!(settings.request_timeout_secs, 5);
        assert!(settings.session.enabled);
        assert_eq!(settings.session.cookie_name, "sid");
        assert!(settings.trusted_proxies.contains("10.9.9.9".parse().unwrap()));
    }
}
