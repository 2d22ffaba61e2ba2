//! Remote key-value cache driver.
//!
//! Speaks the RESP wire protocol over a TCP connection to a Redis-compatible
//! server. Values are type-tagged on write (`str:`, `json:`, plain numerics,
//! `bool:0|1`) and auto-parsed on read, so interop with other clients keeps
//! scalar values human-readable. Increments are delegated to the server and
//! are therefore atomic; the keyspace is enumerated with cursor `SCAN`s.

use crate::cache::drivers::{Store, StoreLock};
use crate::cache::CacheError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

const SCAN_PAGE: usize = 250;

/// A single RESP reply.
#[derive(Debug, PartialEq)]
enum Resp {
    Simple(String),
    Error(String),
    Int(i64),
    Bulk(Option<Vec<u8>>),
    Array(Vec<Resp>),
}

/// One pooled connection with reconnect-on-failure.
struct RespClient {
    addr: String,
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl RespClient {
    fn new(addr: String) -> Self {
        Self {
            addr,
            conn: Mutex::new(None),
        }
    }

    async fn command(&self, args: &[Vec<u8>]) -> Result<Resp, CacheError> {
        let mut guard = self.conn.lock().await;
        // One reconnect attempt on a dead socket.
        for attempt in 0..2 {
            if guard.is_none() {
                let stream = TcpStream::connect(&self.addr)
                    .await
                    .map_err(|e| CacheError::Remote(format!("connect {}: {}", self.addr, e)))?;
                *guard = Some(BufStream::new(stream));
            }
            let conn = guard.as_mut().expect("connection established above");
            match Self::round_trip(conn, args).await {
                Ok(reply) => return Ok(reply),
                Err(e) if attempt == 0 => {
                    log::debug!("remote cache connection reset, retrying: {}", e);
                    *guard = None;
                }
                Err(e) => return Err(CacheError::Remote(e.to_string())),
            }
        }
        unreachable!("loop returns on second attempt")
    }

    async fn round_trip(
        conn: &mut BufStream<TcpStream>,
        args: &[Vec<u8>],
    ) -> std::io::Result<Resp> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
        for arg in args {
            out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            out.extend_from_slice(arg);
            out.extend_from_slice(b"\r\n");
        }
        conn.write_all(&out).await?;
        conn.flush().await?;
        Self::read_reply(conn).await
    }

    async fn read_line(conn: &mut BufStream<TcpStream>) -> std::io::Result<String> {
        let mut line = Vec::new();
        conn.read_until(b'\n', &mut line).await?;
        if line.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed",
            ));
        }
        while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 reply"))
    }

    fn read_reply<'a>(
        conn: &'a mut BufStream<TcpStream>,
    ) -> futures::future::BoxFuture<'a, std::io::Result<Resp>> {
        Box::pin(async move {
            let line = Self::read_line(conn).await?;
            let (kind, rest) = line.split_at(1);
            match kind {
                "+" => Ok(Resp::Simple(rest.to_string())),
                "-" => Ok(Resp::Error(rest.to_string())),
                ":" => Ok(Resp::Int(rest.parse().map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "bad integer reply")
                })?)),
                "$" => {
                    let len: i64 = rest.parse().map_err(|_| {
                        std::io::Error::new(std::io::ErrorKind::InvalidData, "bad bulk length")
                    })?;
                    if len < 0 {
                        return Ok(Resp::Bulk(None));
                    }
                    let mut buf = vec![0u8; len as usize + 2];
                    conn.read_exact(&mut buf).await?;
                    buf.truncate(len as usize);
                    Ok(Resp::Bulk(Some(buf)))
                }
                "*" => {
                    let len: i64 = rest.parse().map_err(|_| {
                        std::io::Error::new(std::io::ErrorKind::InvalidData, "bad array length")
                    })?;
                    let mut items = Vec::with_capacity(len.max(0) as usize);
                    for _ in 0..len.max(0) {
                        items.push(Self::read_reply(conn).await?);
                    }
                    Ok(Resp::Array(items))
                }
                _ => Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unknown reply marker {:?}", kind),
                )),
            }
        })
    }
}

/// Tags JSON value bytes for storage.
fn encode_value(json_bytes: &[u8]) -> Vec<u8> {
    match serde_json::from_slice::<Value>(json_bytes) {
        Ok(Value::String(s)) => {
            let mut out = b"str:".to_vec();
            out.extend_from_slice(s.as_bytes());
            out
        }
        Ok(Value::Number(n)) => n.to_string().into_bytes(),
        Ok(Value::Bool(b)) => if b { b"bool:1".to_vec() } else { b"bool:0".to_vec() },
        _ => {
            let mut out = b"json:".to_vec();
            out.extend_from_slice(json_bytes);
            out
        }
    }
}

/// Auto-parses tagged storage bytes back into JSON value bytes.
fn decode_value(stored: &[u8]) -> Vec<u8> {
    if let Some(rest) = stored.strip_prefix(b"str:") {
        return serde_json::to_vec(&Value::String(String::from_utf8_lossy(rest).into_owned()))
            .unwrap_or_else(|_| b"null".to_vec());
    }
    if let Some(rest) = stored.strip_prefix(b"bool:") {
        return if rest == b"1" { b"true".to_vec() } else { b"false".to_vec() };
    }
    if let Some(rest) = stored.strip_prefix(b"json:") {
        return rest.to_vec();
    }
    let text = String::from_utf8_lossy(stored);
    if text.parse::<i64>().is_ok() || text.parse::<f64>().is_ok() {
        return stored.to_vec();
    }
    // Untagged foreign value; surface it as a string.
    serde_json::to_vec(&Value::String(text.into_owned())).unwrap_or_else(|_| b"null".to_vec())
}

/// Remote store client with an optional key prefix.
pub struct RemoteStore {
    client: Arc<RespClient>,
    prefix: String,
}

impl RemoteStore {
    pub fn new(addr: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client: Arc::new(RespClient::new(addr.into())),
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> Vec<u8> {
        format!("{}{}", self.prefix, key).into_bytes()
    }

    async fn scan_keys(&self) -> Result<Vec<String>, CacheError> {
        let pattern = format!("{}*", self.prefix);
        let mut cursor = "0".to_string();
        let mut keys = Vec::new();
        loop {
            let reply = self
                .client
                .command(&[
                    b"SCAN".to_vec(),
                    cursor.clone().into_bytes(),
                    b"MATCH".to_vec(),
                    pattern.clone().into_bytes(),
                    b"COUNT".to_vec(),
                    SCAN_PAGE.to_string().into_bytes(),
                ])
                .await?;
            let items = match reply {
                Resp::Array(items) if items.len() == 2 => items,
                Resp::Error(e) => return Err(CacheError::Remote(e)),
                other => {
                    return Err(CacheError::Remote(format!("unexpected SCAN reply: {:?}", other)))
                }
            };
            let mut items = items.into_iter();
            cursor = match items.next() {
                Some(Resp::Bulk(Some(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                _ => "0".to_string(),
            };
            if let Some(Resp::Array(page)) = items.next() {
                for item in page {
                    if let Resp::Bulk(Some(bytes)) = item {
                        let full = String::from_utf8_lossy(&bytes).into_owned();
                        keys.push(
                            full.strip_prefix(&self.prefix).unwrap_or(&full).to_string(),
                        );
                    }
                }
            }
            if cursor == "0" {
                break;
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl Store for RemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.client.command(&[b"GET".to_vec(), self.key(key)]).await? {
            Resp::Bulk(Some(bytes)) => Ok(Some(decode_value(&bytes))),
            Resp::Bulk(None) => Ok(None),
            Resp::Error(e) => Err(CacheError::Remote(e)),
            other => Err(CacheError::Remote(format!("unexpected GET reply: {:?}", other))),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut args = vec![b"SET".to_vec(), self.key(key), encode_value(&value)];
        if let Some(ttl) = ttl {
            args.push(b"PX".to_vec());
            args.push(ttl.as_millis().max(1).to_string().into_bytes());
        }
        match self.client.command(&args).await? {
            Resp::Simple(_) => Ok(()),
            Resp::Error(e) => Err(CacheError::Remote(e)),
            other => Err(CacheError::Remote(format!("unexpected SET reply: {:?}", other))),
        }
    }

    async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut args = vec![b"SET".to_vec(), self.key(key), encode_value(&value), b"NX".to_vec()];
        if let Some(ttl) = ttl {
            args.push(b"PX".to_vec());
            args.push(ttl.as_millis().max(1).to_string().into_bytes());
        }
        match self.client.command(&args).await? {
            Resp::Simple(_) => Ok(true),
            Resp::Bulk(None) => Ok(false),
            Resp::Error(e) => Err(CacheError::Remote(e)),
            other => Err(CacheError::Remote(format!("unexpected SET NX reply: {:?}", other))),
        }
    }

    async fn forget(&self, key: &str) -> Result<bool, CacheError> {
        match self.client.command(&[b"DEL".to_vec(), self.key(key)]).await? {
            Resp::Int(n) => Ok(n > 0),
            Resp::Error(e) => Err(CacheError::Remote(e)),
            other => Err(CacheError::Remote(format!("unexpected DEL reply: {:?}", other))),
        }
    }

    async fn flush(&self) -> Result<(), CacheError> {
        if self.prefix.is_empty() {
            match self.client.command(&[b"FLUSHDB".to_vec()]).await? {
                Resp::Simple(_) => return Ok(()),
                Resp::Error(e) => return Err(CacheError::Remote(e)),
                other => {
                    return Err(CacheError::Remote(format!("unexpected FLUSHDB reply: {:?}", other)))
                }
            }
        }
        for key in self.scan_keys().await? {
            self.forget(&key).await?;
        }
        Ok(())
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let reply = self
            .client
            .command(&[
                b"INCRBY".to_vec(),
                self.key(key),
                by.to_string().into_bytes(),
            ])
            .await?;
        match reply {
            Resp::Int(n) => Ok(n),
            Resp::Error(e) => Err(CacheError::Remote(e)),
            other => Err(CacheError::Remote(format!("unexpected INCRBY reply: {:?}", other))),
        }
    }

    async fn decrement(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        self.increment(key, -by).await
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError> {
        self.scan_keys().await
    }

    fn make_lock(&self, name: &str, ttl: Duration, owner: String) -> Arc<dyn StoreLock> {
        Arc::new(RemoteLock {
            client: self.client.clone(),
            key: format!("{}lock:{}", self.prefix, name).into_bytes(),
            name: name.to_string(),
            ttl,
            owner,
        })
    }

    fn is_atomic(&self) -> bool {
        true
    }
}

struct RemoteLock {
    client: Arc<RespClient>,
    key: Vec<u8>,
    name: String,
    ttl: Duration,
    owner: String,
}

#[async_trait]
impl StoreLock for RemoteLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    async fn acquire(&self) -> Result<bool, CacheError> {
        let mut args = vec![
            b"SET".to_vec(),
            self.key.clone(),
            self.owner.clone().into_bytes(),
            b"NX".to_vec(),
        ];
        if !self.ttl.is_zero() {
            args.push(b"PX".to_vec());
            args.push(self.ttl.as_millis().max(1).to_string().into_bytes());
        }
        match self.client.command(&args).await? {
            Resp::Simple(_) => Ok(true),
            Resp::Bulk(None) => Ok(false),
            Resp::Error(e) => Err(CacheError::Remote(e)),
            other => Err(CacheError::Remote(format!("unexpected lock reply: {:?}", other))),
        }
    }

    async fn release(&self) -> Result<bool, CacheError> {
        // Check-then-delete: the window between GET and DEL is accepted for
        // a cooperative lock.
        let current = self.client.command(&[b"GET".to_vec(), self.key.clone()]).await?;
        match current {
            Resp::Bulk(Some(bytes)) if bytes == self.owner.as_bytes() => {
                self.client.command(&[b"DEL".to_vec(), self.key.clone()]).await?;
                Ok(true)
            }
            Resp::Error(e) => Err(CacheError::Remote(e)),
            _ => Ok(false),
        }
    }

    async fn force_release(&self) -> Result<(), CacheError> {
        self.client.command(&[b"DEL".to_vec(), self.key.clone()]).await?;
        Ok(())
    }

    fn retry_interval(&self) -> Duration {
        Duration::from_millis(250)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_tagged_and_round_trip() {
        let json = serde_json::to_vec(&Value::String("hello".into())).unwrap();
        let stored = encode_value(&json);
        assert_eq!(stored, b"str:hello");
        assert_eq!(decode_value(&stored), json);
    }

    #[test]
    fn numerics_stay_plain() {
        let json = b"42".to_vec();
        let stored = encode_value(&json);
        assert_eq!(stored, b"42");
        assert_eq!(decode_value(&stored), json);
    }

    #[test]
    fn bools_use_bit_tags() {
        assert_eq!(encode_value(b"true"), b"bool:1");
        assert_eq!(encode_value(b"false"), b"bool:0");
        assert_eq!(decode_value(b"bool:1"), b"true");
    }

    #[test]
    fn structures_keep_json_tag() {
        let json = br#"{"a":[1,2]}"#.to_vec();
        let stored = encode_value(&json);
        assert!(stored.starts_with(b"json:"));
        assert_eq!(decode_value(&stored), json);
    }

    #[test]
    fn untagged_foreign_values_surface_as_strings() {
        assert_eq!(decode_value(b"plain-text"), br#""plain-text""#.to_vec());
    }
}
