use crate::models::error::EngineError;
use crate::models::headers::Headers;
use crate::models::request::Body;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::mpsc;

/// Bidirectional byte pipe handed to an upgrade handler once the transport
/// switches into tunnel mode. `incoming` carries bytes from the peer,
/// `outgoing` pushes bytes back; dropping `outgoing` closes the tunnel.
pub struct Tunnel {
    pub incoming: mpsc::Receiver<Bytes>,
    pub outgoing: mpsc::Sender<Bytes>,
}

/// Callback invoked with the raw tunnel after an upgraded response is
/// committed. Only the bridge transport supports tunnelling.
pub type UpgradeHandler = Box<dyn FnOnce(Tunnel) -> BoxFuture<'static, ()> + Send>;

/// A response under construction by the pipeline.
///
/// At most one body may be committed; later writes fail. Header mutation is
/// rejected once a transport has started emitting bytes (`locked`), which
/// can only happen after the pipeline returned the response.
#[derive(Default)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Body,
    committed: bool,
    locked: bool,
    upgrade: Option<UpgradeHandler>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("committed", &self.committed)
            .field("locked", &self.locked)
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: 200,
            ..Default::default()
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Sets a header, replacing existing values. Ignored with a warning
    /// once the transport has locked the response.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        if self.locked {
            log::warn!("header {:?} mutated after response was emitted; ignored", name);
            return;
        }
        self.headers.set(name, value);
    }

    pub fn append_header(&mut self, name: &str, value: impl Into<String>) {
        if self.locked {
            log::warn!("header {:?} appended after response was emitted; ignored", name);
            return;
        }
        self.headers.append(name, value);
    }

    pub fn remove_header(&mut self, name: &str) -> bool {
        if self.locked {
            return false;
        }
        self.headers.remove(name)
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Marks the response as being emitted; further mutation is rejected.
    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    /// Commits a buffered body. Fails if a body was already committed.
    pub fn write_body(&mut self, bytes: impl Into<Bytes>) -> Result<(), EngineError> {
        if self.committed {
            return Err(EngineError::Internal(
                "response body already committed".to_string(),
            ));
        }
        self.body = Body::Bytes(bytes.into());
        self.committed = true;
        Ok(())
    }

    /// Commits a channel-fed streaming body.
    pub fn stream_body(&mut self, rx: mpsc::Receiver<Bytes>) -> Result<(), EngineError> {
        if self.committed {
            return Err(EngineError::Internal(
                "response body already committed".to_string(),
            ));
        }
        self.body = Body::Stream(rx);
        self.committed = true;
        Ok(())
    }

    /// Serializes `value` as the JSON body with the given status.
    pub fn json<T: Serialize>(&mut self, status: u16, value: &T) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| EngineError::Internal(format!("json serialization failed: {}", e)))?;
        self.status = status;
        self.set_header("content-type", "application/json");
        self.write_body(bytes)
    }

    /// Plain-text body with the given status.
    pub fn text(&mut self, status: u16, body: impl Into<String>) -> Result<(), EngineError> {
        self.status = status;
        self.set_header("content-type", "text/plain; charset=utf-8");
        self.write_body(body.into().into_bytes())
    }

    /// HTML body with the given status.
    pub fn html(&mut self, status: u16, body: impl Into<String>) -> Result<(), EngineError> {
        self.status = status;
        self.set_header("content-type", "text/html; charset=utf-8");
        self.write_body(body.into().into_bytes())
    }

    /// Detaches the response: after the head is emitted the transport
    /// switches the connection into tunnel mode and invokes `handler`.
    pub fn upgrade(&mut self, handler: UpgradeHandler) {
        self.upgrade = Some(handler);
    }

    pub fn is_upgrade(&self) -> bool {
        self.upgrade.is_some()
    }

    pub(crate) fn take_upgrade(&mut self) -> Option<UpgradeHandler> {
        self.upgrade.take()
    }

    /// Buffered body bytes, if the body is buffered.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Swaps the committed body in place; used by response filters
    /// (compression) that rewrite an already-committed body.
    pub(crate) fn swap_body(&mut self, bytes: impl Into<Bytes>) {
        self.body = Body::Bytes(bytes.into());
        self.committed = true;
    }

    /// Hands the body to the transport for emission.
    pub(crate) fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_commit_is_rejected() {
        let mut resp = Response::new();
        resp.write_body(Bytes::from_static(b"one")).unwrap();
        assert!(resp.write_body(Bytes::from_static(b"two")).is_err());
        assert_eq!(resp.body_bytes().unwrap().as_ref(), b"one");
    }

    #[test]
    fn locked_response_ignores_header_mutation() {
        let mut resp = Response::new();
        resp.set_header("x-one", "1");
        resp.lock();
        resp.set_header("x-two", "2");
        assert_eq!(resp.header("x-one"), Some("1"));
        assert_eq!(resp.header("x-two"), None);
    }

    #[test]
    fn json_sets_content_type_and_status() {
        let mut resp = Response::new();
        resp.json(201, &serde_json::json!({"ok": true})).unwrap();
        assert_eq!(resp.status(), 201);
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert!(resp.is_committed());
    }
}
