use crate::models::headers::Headers;
use bytes::{Bytes, BytesMut};
use std::net::IpAddr;
use tokio::sync::mpsc;

/// Request body, either buffered or fed chunk-by-chunk from a transport.
///
/// Bridge requests stream their chunks through a channel so large uploads
/// never have to be buffered whole; reading to completion collapses the
/// stream into buffered bytes so repeated reads (CSRF form probing, then
/// the handler) see the same data.
#[derive(Debug)]
pub enum Body {
    Empty,
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

impl Body {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// A channel-fed body; the sender side is owned by the transport.
    pub fn stream(rx: mpsc::Receiver<Bytes>) -> Self {
        Self::Stream(rx)
    }

    /// True when the body is known to carry no bytes without reading it.
    pub fn is_empty_hint(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(b) => b.is_empty(),
            Self::Stream(_) => false,
        }
    }

    /// Next chunk of a streaming body; buffered bodies yield once.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        match self {
            Self::Empty => None,
            Self::Bytes(bytes) => {
                let out = bytes.clone();
                *self = Self::Empty;
                if out.is_empty() {
                    None
                } else {
                    Some(out)
                }
            }
            Self::Stream(rx) => rx.recv().await,
        }
    }

    /// Drains the body and leaves it buffered for subsequent reads.
    pub async fn read_to_bytes(&mut self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Bytes(bytes) => bytes.clone(),
            Self::Stream(rx) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk);
                }
                let bytes = buf.freeze();
                *self = Self::Bytes(bytes.clone());
                bytes
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::Empty
    }
}

/// A transport-neutral HTTP request.
///
/// Both the in-process HTTP adapter and the bridge decoder produce this
/// value; the engine kernel never sees transport-specific types. Fields
/// follow the bridge request-start layout: method, scheme, authority,
/// path, query, protocol, headers, body.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub query: String,
    pub protocol: String,
    pub headers: Headers,
    pub peer_addr: Option<IpAddr>,
    pub body: Body,
}

impl Request {
    /// Creates a request with transport defaults for the omitted fields.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            scheme: "http".to_string(),
            authority: "127.0.0.1".to_string(),
            path: path.into(),
            query: String::new(),
            protocol: "1.1".to_string(),
            headers: Headers::new(),
            peer_addr: None,
            body: Body::Empty,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Authority without any port suffix, for host-constraint matching.
    pub fn host(&self) -> &str {
        match self.authority.rsplit_once(':') {
            // Avoid chopping bare IPv6 authorities.
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => &self.authority,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get("content-type")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }

    /// Decoded `key=value` pairs from the query string.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        parse_urlencoded(&self.query)
    }
}

/// Parses an `application/x-www-form-urlencoded` payload or query string.
pub fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = match part.split_once('=') {
                Some((k, v)) => (k, v),
                None => (part, ""),
            };
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(input: &str) -> String {
    let plus_decoded = input.replace('+', " ");
    percent_encoding::percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or(plus_decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streaming_body_collapses_to_bytes() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"ab")).await.unwrap();
        tx.send(Bytes::from_static(b"c")).await.unwrap();
        drop(tx);

        let mut body = Body::stream(rx);
        assert_eq!(body.read_to_bytes().await, Bytes::from_static(b"abc"));
        // Second read sees the buffered copy.
        assert_eq!(body.read_to_bytes().await, Bytes::from_static(b"abc"));
    }

    #[test]
    fn host_strips_port_but_not_ipv6() {
        let req = Request::new("GET", "/").with_authority("example.com:8080");
        assert_eq!(req.host(), "example.com");

        let req = Request::new("GET", "/").with_authority("::1");
        assert_eq!(req.host(), "::1");
    }

    #[test]
    fn query_pairs_decode_components() {
        let req = Request::new("GET", "/search").with_query("q=a+b&lang=en%2DUS&flag");
        assert_eq!(
            req.query_pairs(),
            vec![
                ("q".to_string(), "a b".to_string()),
                ("lang".to_string(), "en-US".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn method_is_uppercased() {
        assert_eq!(Request::new("post", "/x").method, "POST");
    }
}
