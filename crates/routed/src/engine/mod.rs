//! Engine kernel: configuration, container, event bus, router, pipeline
//! assembly, and the transport-neutral `handle_request` entry point.
//!
//! Both the in-process HTTP adapter ([`crate::server`]) and the native
//! bridge runtime ([`crate::bridge`]) feed requests through the same
//! [`Engine::handle_request`]; the kernel owns normalization, routing,
//! trusted-proxy resolution, and middleware composition.

pub mod container;
pub mod events;

use crate::cache::{CacheManager, DriverSpec};
use crate::config::settings::EngineSettings;
use crate::config::Config;
use crate::context::Context;
use crate::engine::container::Container;
use crate::engine::events::{Event, EventBus};
use crate::middleware::compression::{CompressionConfig, CompressionMiddleware};
use crate::middleware::conditional::ConditionalMiddleware;
use crate::middleware::cors::{CorsConfig, CorsMiddleware};
use crate::middleware::csrf::CsrfMiddleware;
use crate::middleware::rate_limit::{RateLimitConfig, RateLimitMiddleware};
use crate::middleware::recovery::RecoveryMiddleware;
use crate::middleware::security::SecurityHeadersMiddleware;
use crate::middleware::session::SessionMiddleware;
use crate::middleware::timeout::TimeoutMiddleware;
use crate::middleware::validation::ValidationMiddleware;
use crate::middleware::{run_chain, Middleware};
use crate::models::error::EngineError;
use crate::models::request::Request;
use crate::models::response::Response;
use crate::router::{Resolution, Router};
use crate::session::SessionManager;
use log::{debug, error, info};
use serde_json::json;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Builder for [`Engine`]; collects routes, middlewares, drivers, and
/// subscribers before the registries are frozen.
pub struct EngineBuilder {
    config: Config,
    router: Router,
    global: Vec<Arc<dyn Middleware>>,
    events: Arc<EventBus>,
    container: Arc<Container>,
    cache_drivers: Vec<(String, DriverSpec)>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            router: Router::new(),
            global: Vec::new(),
            events: Arc::new(EventBus::new()),
            container: Arc::new(Container::new()),
            cache_drivers: Vec::new(),
        }
    }

    /// Registers routes and groups on the engine's router.
    pub fn routes(mut self, f: impl FnOnce(&mut Router)) -> Self {
        f(&mut self.router);
        self
    }

    /// Adds a global middleware, outermost-first in call order.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.global.push(Arc::new(middleware));
        self
    }

    /// Subscribes to engine events by name.
    pub fn subscribe(self, name: &str, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.events.subscribe(name, f);
        self
    }

    /// Subscribes to every engine event.
    pub fn subscribe_all(self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.events.subscribe_all(f);
        self
    }

    /// Registers a custom cache driver before stores are resolved.
    pub fn cache_driver(mut self, name: &str, spec: DriverSpec) -> Self {
        self.cache_drivers.push((name.to_string(), spec));
        self
    }

    /// Registers a service instance on the container.
    pub fn service<T: Send + Sync + 'static>(self, value: T) -> Self {
        self.container.instance(value);
        self
    }

    /// Compiles the engine. Configuration problems surface here, never
    /// masked into request-time failures.
    pub fn build(mut self) -> Result<Engine, EngineError> {
        let settings =
            EngineSettings::from_config(&self.config).map_err(EngineError::Configuration)?;

        self.router.freeze().map_err(|e| {
            EngineError::Configuration(format!("route compilation failed: {}", e))
        })?;

        let cache = Arc::new(CacheManager::new(
            &self.config,
            self.events.clone(),
            self.container.clone(),
        )?);
        for (name, spec) in self.cache_drivers {
            cache.register_driver(&name, spec);
        }

        let sessions = if settings.session.enabled {
            let repo = cache.store(settings.session.store.as_deref())?;
            Some(Arc::new(SessionManager::new(repo, settings.session.clone())))
        } else {
            None
        };

        let cors_config = CorsConfig::from_config(&self.config);
        let cors = cors_config
            .enabled
            .then(|| Arc::new(CorsMiddleware::new(cors_config)));

        let rate_limit_config = RateLimitConfig::from_config(&self.config);
        let rate_limit = rate_limit_config
            .enabled
            .then(|| Arc::new(RateLimitMiddleware::new(rate_limit_config)));

        let compression_config = CompressionConfig::from_config(&self.config);
        let compression = compression_config
            .enabled
            .then(|| Arc::new(CompressionMiddleware::new(compression_config)));

        let security = self
            .config
            .get_bool("security.headers")
            .unwrap_or(true)
            .then(|| Arc::new(SecurityHeadersMiddleware::new()));

        let timeout = (settings.request_timeout_secs > 0).then(|| {
            Arc::new(TimeoutMiddleware::new(Duration::from_secs(
                settings.request_timeout_secs,
            )))
        });

        self.container.instance_arc(cache.clone());
        if let Some(sessions) = &sessions {
            self.container.instance_arc(sessions.clone());
        }

        Ok(Engine {
            settings,
            config: RwLock::new(self.config),
            container: self.container,
            events: self.events,
            router: self.router,
            global: self.global,
            cache,
            sessions,
            recovery: Arc::new(RecoveryMiddleware::new()),
            timeout,
            security,
            cors,
            rate_limit,
            compression,
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }
}

/// The framework kernel.
pub struct Engine {
    settings: EngineSettings,
    config: RwLock<Config>,
    container: Arc<Container>,
    events: Arc<EventBus>,
    router: Router,
    global: Vec<Arc<dyn Middleware>>,
    cache: Arc<CacheManager>,
    sessions: Option<Arc<SessionManager>>,
    recovery: Arc<RecoveryMiddleware>,
    timeout: Option<Arc<TimeoutMiddleware>>,
    security: Option<Arc<SecurityHeadersMiddleware>>,
    cors: Option<Arc<CorsMiddleware>>,
    rate_limit: Option<Arc<RateLimitMiddleware>>,
    compression: Option<Arc<CompressionMiddleware>>,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Marks the engine live and emits `ConfigLoaded` once. Idempotent.
    pub fn initialize(&self) {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            info!("engine initialized ({} routes)", self.router.routes().count());
            self.events.emit(&Event::ConfigLoaded);
        }
    }

    /// Swaps the configuration map and emits `ConfigReloaded`. Structural
    /// settings (routes, stores, middleware toggles) keep their built
    /// state; dotted-key lookups observe the new values.
    pub fn replace_config(&self, config: Config) {
        *self.config.write().expect("config lock poisoned") = config;
        self.events.emit(&Event::ConfigReloaded);
    }

    /// Stops accepting requests; subsequent calls answer 503.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("engine closed");
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn config(&self) -> Config {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn sessions(&self) -> Option<&Arc<SessionManager>> {
        self.sessions.as_ref()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Reverse URL generation for a named route.
    pub fn url(&self, name: &str, params: &[(&str, &str)]) -> Result<String, EngineError> {
        self.router
            .url(name, params)
            .map_err(|e| EngineError::Internal(e.to_string()))
    }

    /// Scheme and client address after trusted-proxy evaluation.
    fn resolve_client(&self, req: &Request) -> (String, Option<IpAddr>) {
        let direct_scheme = if req.scheme.is_empty() {
            "http".to_string()
        } else {
            req.scheme.clone()
        };
        let peer = req.peer_addr;

        let trusted = match peer {
            Some(addr) => self.settings.trusted_proxies.contains(addr),
            None => false,
        };
        if !trusted {
            return (direct_scheme, peer);
        }

        let scheme = req
            .headers
            .get(&self.settings.forwarded_proto_header)
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| v == "http" || v == "https")
            .unwrap_or(direct_scheme);
        let client_ip = req
            .headers
            .get(&self.settings.forwarded_for_header)
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok())
            .or(peer);
        (scheme, client_ip)
    }

    fn normalize_path(&self, path: &str) -> String {
        let mut path = if path.is_empty() { "/" } else { path }.to_string();
        if self.settings.collapse_duplicate_slashes {
            while path.contains("//") {
                path = path.replace("//", "/");
            }
        }
        if self.settings.unescape_path_segments {
            if let Ok(decoded) = percent_encoding::percent_decode_str(&path).decode_utf8() {
                path = decoded.into_owned();
            }
        }
        path
    }

    fn plain_response(status: u16, body: serde_json::Value) -> Response {
        let mut response = Response::new();
        if response.json(status, &body).is_err() {
            response.set_status(status);
        }
        response
    }

    /// Drives one request through resolution and the middleware pipeline.
    pub async fn handle_request(&self, mut req: Request) -> Response {
        self.initialize();
        if self.closed.load(Ordering::SeqCst) {
            return Self::plain_response(503, json!({"error": "Service Unavailable"}));
        }

        if req.method.is_empty() {
            req.method = "GET".to_string();
        }
        req.path = self.normalize_path(&req.path);
        let (scheme, client_ip) = self.resolve_client(&req);
        let host = req.host().to_string();

        let resolution = self.router.resolve(
            &req.method,
            &host,
            &req.path,
            self.settings.redirect_trailing_slash,
            self.settings.handle_method_not_allowed,
        );

        match resolution {
            Resolution::Redirect { location, status } => {
                let location = if req.query.is_empty() {
                    location
                } else {
                    format!("{}?{}", location, req.query)
                };
                let mut response = Response::new();
                response.set_status(status);
                response.set_header("location", location);
                response
            }
            Resolution::NotFound => {
                debug!("no route for {} {}", req.method, req.path);
                Self::plain_response(404, json!({"error": "Not Found"}))
            }
            Resolution::MethodNotAllowed { allowed } => {
                // A CORS preflight probes with OPTIONS; the route itself
                // usually registers no OPTIONS handler, so give the CORS
                // middleware the request before rendering 405.
                let preflight = req.method == "OPTIONS"
                    && req.headers.contains("access-control-request-method");
                if let (true, Some(cors)) = (preflight, &self.cors) {
                    let ctx = Context::new(
                        req,
                        Default::default(),
                        None,
                        scheme,
                        client_ip,
                        self.container.clone(),
                    );
                    let chain: Vec<Arc<dyn Middleware>> =
                        vec![self.recovery.clone(), cors.clone()];
                    let allowed = allowed.clone();
                    let endpoint = Arc::new(move |_ctx: Context| {
                        let allowed = allowed.clone();
                        async move {
                            Err::<(), EngineError>(EngineError::MethodNotAllowed { allowed })
                        }
                    });
                    if run_chain(chain, endpoint, ctx.clone()).await.is_ok() {
                        return ctx.take_response();
                    }
                }
                let mut response =
                    Self::plain_response(405, json!({"error": "Method Not Allowed"}));
                response.set_header("allow", allowed.join(", "));
                response
            }
            Resolution::Match { route, params } => {
                let record = self.router.record(route);
                let route_name = record.name.clone();
                let ctx = Context::new(
                    req,
                    params,
                    route_name,
                    scheme,
                    client_ip,
                    self.container.clone(),
                );

                let mut chain: Vec<Arc<dyn Middleware>> = Vec::new();
                chain.push(self.recovery.clone());
                if let Some(timeout) = &self.timeout {
                    chain.push(timeout.clone());
                }
                if let Some(security) = &self.security {
                    chain.push(security.clone());
                }
                if let Some(cors) = &self.cors {
                    chain.push(cors.clone());
                }
                if let Some(sessions) = &self.sessions {
                    chain.push(Arc::new(SessionMiddleware::new(sessions.clone())));
                    chain.push(Arc::new(CsrfMiddleware::new()));
                }
                if let Some(rate_limit) = &self.rate_limit {
                    chain.push(rate_limit.clone());
                }
                chain.extend(self.global.iter().cloned());
                chain.extend(self.router.chain_for(route));
                if let Some(rules) = &record.rules {
                    chain.push(Arc::new(ValidationMiddleware::new(rules.clone())));
                }
                if record.etag.is_some() || record.last_modified.is_some() {
                    chain.push(Arc::new(ConditionalMiddleware::new(
                        record.etag.clone(),
                        record.last_modified.clone(),
                    )));
                }
                if let Some(compression) = &self.compression {
                    chain.push(compression.clone());
                }

                let handler = record.handler.clone();
                if let Err(err) = run_chain(chain, handler, ctx.clone()).await {
                    // Recovery is outermost, so this only fires if recovery
                    // itself failed.
                    error!("pipeline error escaped recovery: {}", err);
                    return Self::plain_response(500, json!({"error": "Internal Server Error"}));
                }
                ctx.take_response()
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("router", &self.router)
            .field("cache", &self.cache)
            .field("initialized", &self.initialized.load(Ordering::SeqCst))
            .finish()
    }
}
