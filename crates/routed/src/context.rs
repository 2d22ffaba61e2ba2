//! Per-request state threaded through the middleware pipeline.
//!
//! A [`Context`] is a cheap clone (an `Arc` around the request and its
//! mutable state), created by the engine for each request and owned by that
//! request's task. The interior mutex exists so the timeout middleware can
//! race the rest of the chain against a timer while both sides hold a
//! handle; it is never contended across requests.

use crate::engine::container::Container;
use crate::models::error::{EngineError, ErrorEntry};
use crate::models::headers::Headers;
use crate::models::param::ParamValue;
use crate::models::request::{Body, Request};
use crate::models::response::Response;
use crate::session::Session;
use ahash::HashMap as AHashMap;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

struct State {
    response: Response,
    attributes: AHashMap<String, Value>,
    errors: Vec<ErrorEntry>,
    aborted: bool,
    session: Option<Session>,
}

struct Inner {
    request: Request,
    body: tokio::sync::Mutex<Body>,
    params: AHashMap<String, ParamValue>,
    route_name: Option<String>,
    scheme: String,
    client_ip: Option<IpAddr>,
    container: Arc<Container>,
    state: Mutex<State>,
}

/// Handle to a single request's state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    pub(crate) fn new(
        mut request: Request,
        params: AHashMap<String, ParamValue>,
        route_name: Option<String>,
        scheme: String,
        client_ip: Option<IpAddr>,
        container: Arc<Container>,
    ) -> Self {
        let body = std::mem::take(&mut request.body);
        Self {
            inner: Arc::new(Inner {
                request,
                body: tokio::sync::Mutex::new(body),
                params,
                route_name,
                scheme,
                client_ip,
                container,
                state: Mutex::new(State {
                    response: Response::new(),
                    attributes: AHashMap::default(),
                    errors: Vec::new(),
                    aborted: false,
                    session: None,
                }),
            }),
        }
    }

    // Request accessors

    pub fn method(&self) -> &str {
        &self.inner.request.method
    }

    pub fn path(&self) -> &str {
        &self.inner.request.path
    }

    pub fn query(&self) -> &str {
        &self.inner.request.query
    }

    pub fn authority(&self) -> &str {
        &self.inner.request.authority
    }

    pub fn protocol(&self) -> &str {
        &self.inner.request.protocol
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.request.headers.get(name)
    }

    pub fn headers(&self) -> &Headers {
        &self.inner.request.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.inner.request.content_type()
    }

    /// Scheme after trusted-proxy resolution (`http` or `https`).
    pub fn scheme(&self) -> &str {
        &self.inner.scheme
    }

    pub fn is_secure(&self) -> bool {
        self.inner.scheme == "https"
    }

    /// Client address after trusted-proxy resolution.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.inner.client_ip
    }

    /// Name of the matched route, if it was registered with one.
    pub fn route_name(&self) -> Option<&str> {
        self.inner.route_name.as_deref()
    }

    /// Value of a matched route parameter.
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.inner.params.get(name)
    }

    pub fn params(&self) -> &AHashMap<String, ParamValue> {
        &self.inner.params
    }

    /// Reads the request body to completion, leaving it buffered so the
    /// body can be read again by a later stage.
    pub async fn read_body(&self) -> Bytes {
        let mut body = self.inner.body.lock().await;
        body.read_to_bytes().await
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.inner.container
    }

    // Abort and error bookkeeping

    /// Marks the request aborted. Subsequent `next()` calls become no-ops
    /// and response write helpers stop producing output.
    pub fn abort(&self) {
        self.state(|state| state.aborted = true);
    }

    pub fn aborted(&self) -> bool {
        self.state(|state| state.aborted)
    }

    /// Records a non-fatal error on the request.
    pub fn push_error(&self, entry: ErrorEntry) {
        self.state(|state| state.errors.push(entry));
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.state(|state| state.errors.clone())
    }

    // Attributes

    pub fn set_attribute(&self, name: &str, value: Value) {
        self.state(|state| {
            state.attributes.insert(name.to_string(), value);
        });
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.state(|state| state.attributes.get(name).cloned())
    }

    // Session

    pub fn session(&self) -> Option<Session> {
        self.state(|state| state.session.clone())
    }

    pub fn set_session(&self, session: Session) {
        self.state(|state| state.session = Some(session));
    }

    /// Mutates the session in place; no-op when none is loaded.
    pub fn with_session_mut<R>(&self, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.state(|state| state.session.as_mut().map(f))
    }

    // Response access

    /// Runs `f` with exclusive access to the response.
    pub fn with_response<R>(&self, f: impl FnOnce(&mut Response) -> R) -> R {
        self.state(|state| f(&mut state.response))
    }

    pub fn status(&self) -> u16 {
        self.with_response(|resp| resp.status())
    }

    pub fn set_status(&self, status: u16) {
        self.with_response(|resp| resp.set_status(status));
    }

    pub fn set_header(&self, name: &str, value: impl Into<String>) {
        self.with_response(|resp| resp.set_header(name, value));
    }

    pub fn append_header(&self, name: &str, value: impl Into<String>) {
        self.with_response(|resp| resp.append_header(name, value));
    }

    pub fn committed(&self) -> bool {
        self.with_response(|resp| resp.is_committed())
    }

    /// Writes a buffered body unless the request was aborted.
    pub fn write_body(&self, bytes: impl Into<Bytes>) -> Result<(), EngineError> {
        if self.aborted() {
            return Ok(());
        }
        self.with_response(|resp| resp.write_body(bytes))
    }

    /// JSON response helper; silently skipped after abort.
    pub fn json<T: Serialize>(&self, status: u16, value: &T) -> Result<(), EngineError> {
        if self.aborted() {
            return Ok(());
        }
        self.with_response(|resp| resp.json(status, value))
    }

    /// Plain-text response helper; silently skipped after abort.
    pub fn text(&self, status: u16, body: impl Into<String>) -> Result<(), EngineError> {
        if self.aborted() {
            return Ok(());
        }
        self.with_response(|resp| resp.text(status, body))
    }

    /// HTML response helper; silently skipped after abort.
    pub fn html(&self, status: u16, body: impl Into<String>) -> Result<(), EngineError> {
        if self.aborted() {
            return Ok(());
        }
        self.with_response(|resp| resp.html(status, body))
    }

    /// Extracts the finished response, leaving a default in place.
    pub(crate) fn take_response(&self) -> Response {
        self.state(|state| std::mem::replace(&mut state.response, Response::new()))
    }

    fn state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.inner.state.lock().expect("context state lock poisoned");
        f(&mut state)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.method())
            .field("path", &self.path())
            .field("aborted", &self.aborted())
            .finish()
    }
}
