//! Fixed header-name token table for compact framing.
//!
//! Common header names are encoded as `u16` identifiers on the wire;
//! `0xFFFF` escapes to a literal string for anything outside the table.
//! The table is part of the protocol and must not be reordered.

use ahash::HashMap as AHashMap;
use once_cell::sync::Lazy;

/// Escape token introducing a literal string header name.
pub const LITERAL_TOKEN: u16 = 0xFFFF;

/// Token values are `1 + index` into this table.
pub const TOKEN_TABLE: &[&str] = &[
    "host",
    "connection",
    "user-agent",
    "accept",
    "accept-encoding",
    "accept-language",
    "content-type",
    "content-length",
    "transfer-encoding",
    "cookie",
    "set-cookie",
    "cache-control",
    "pragma",
    "upgrade",
    "authorization",
    "origin",
    "referer",
    "location",
    "server",
    "date",
    "x-forwarded-for",
    "x-forwarded-proto",
    "x-forwarded-host",
    "x-forwarded-port",
    "x-request-id",
    "sec-websocket-key",
    "sec-websocket-accept",
    "sec-websocket-version",
    "sec-websocket-protocol",
    "sec-websocket-extensions",
];

static TOKENS_BY_NAME: Lazy<AHashMap<&'static str, u16>> = Lazy::new(|| {
    TOKEN_TABLE
        .iter()
        .enumerate()
        .map(|(index, name)| (*name, (index + 1) as u16))
        .collect()
});

/// Token for a lowercase header name, if it is in the table.
pub fn token_for(name: &str) -> Option<u16> {
    TOKENS_BY_NAME.get(name).copied()
}

/// Header name for a token; `None` for unknown or the literal escape.
pub fn name_for(token: u16) -> Option<&'static str> {
    if token == 0 || token == LITERAL_TOKEN {
        return None;
    }
    TOKEN_TABLE.get(token as usize - 1).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip() {
        for (index, name) in TOKEN_TABLE.iter().enumerate() {
            let token = (index + 1) as u16;
            assert_eq!(token_for(name), Some(token));
            assert_eq!(name_for(token), Some(*name));
        }
    }

    #[test]
    fn out_of_table_names_have_no_token() {
        assert_eq!(token_for("x-made-up-header"), None);
        assert_eq!(name_for(0), None);
        assert_eq!(name_for(LITERAL_TOKEN), None);
        assert_eq!(name_for(TOKEN_TABLE.len() as u16 + 1), None);
    }
}
