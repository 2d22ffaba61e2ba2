//! Route registration and resolution.
//!
//! A [`Router`] collects route records and nested groups while the engine
//! is being built, then `freeze` compiles everything into a radix trie and
//! a name index. After freeze the router is read-only and shared across
//! request tasks without synchronization.
//!
//! # Examples
//!
//! ```rust
//! use routed::router::Router;
//! use routed::context::Context;
//! use routed::models::error::EngineError;
//!
//! async fn show_user(ctx: Context) -> Result<(), EngineError> {
//!     let id = ctx.param("id").and_then(|p| p.as_int()).unwrap_or(0);
//!     ctx.json(200, &serde_json::json!({ "id": id }))
//! }
//!
//! let mut router = Router::new();
//! router.get("/users/{id:int}", show_user).unwrap().name("users.show");
//! router.group("/api", |api| {
//!     api.get("/health", |ctx: Context| async move { ctx.text(200, "ok") }).unwrap();
//! });
//! ```

pub mod params;
pub mod segment;
mod trie;
mod urls;

use crate::middleware::conditional::{EtagResolver, LastModifiedResolver};
use crate::middleware::{Endpoint, Middleware};
use crate::models::param::ParamValue;
use crate::router::params::ParamTypes;
use crate::router::segment::{parse_pattern, Segment};
use crate::router::trie::{Trie, TrieOutcome};
use crate::validation::{RuleParseError, Rules};
use ahash::HashMap as AHashMap;
use regex::Regex;
use std::sync::Arc;

/// Verbs registered by [`Router::any`].
pub const ALL_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "TRACE",
];

/// Registration-time routing errors.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("invalid route pattern: {pattern}")]
    InvalidPattern { pattern: String },

    #[error("unknown parameter type {type_id:?} in pattern {pattern}")]
    UnknownParamType { pattern: String, type_id: String },

    #[error("duplicate route: {method} {pattern}")]
    DuplicateRoute { method: String, pattern: String },

    #[error("wildcard segment must be final in {pattern}")]
    WildcardPosition { pattern: String },

    #[error("invalid constraint regex for {param:?}")]
    ConstraintRegex {
        param: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid parameter type regex {name:?}")]
    ParamTypeRegex {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid host constraint")]
    HostRegex {
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Rule(#[from] RuleParseError),

    #[error("unknown route name: {0}")]
    UnknownName(String),

    #[error("missing parameter {param:?} for route {name:?}")]
    MissingParam { name: String, param: String },

    #[error("router is frozen; routes must be registered before initialize")]
    Frozen,
}

/// Index of a route in the router's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(pub(crate) usize);

/// Index of a group in the router's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupId(usize);

struct GroupRecord {
    prefix: String,
    middlewares: Vec<Arc<dyn Middleware>>,
    parent: Option<GroupId>,
}

/// A registered route: compiled pattern, handler, scoped middleware, and
/// optional metadata consumed by injected middlewares.
pub struct RouteRecord {
    pub(crate) id: RouteId,
    pub pattern: String,
    pub segments: Vec<Segment>,
    pub methods: Vec<String>,
    pub name: Option<String>,
    pub(crate) handler: Arc<dyn Endpoint>,
    pub(crate) middlewares: Vec<Arc<dyn Middleware>>,
    pub(crate) constraints: AHashMap<String, Regex>,
    pub(crate) host: Option<Regex>,
    pub(crate) rules: Option<Rules>,
    pub(crate) etag: Option<EtagResolver>,
    pub(crate) last_modified: Option<LastModifiedResolver>,
    pub(crate) group: Option<GroupId>,
}

impl RouteRecord {
    /// Names the route for reverse URL generation.
    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = Some(name.to_string());
        self
    }

    /// Attaches a route-scoped middleware.
    pub fn middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Constrains a parameter with an anchored regex.
    pub fn constrain(&mut self, param: &str, pattern: &str) -> Result<&mut Self, RouteError> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
            RouteError::ConstraintRegex {
                param: param.to_string(),
                source,
            }
        })?;
        self.constraints.insert(param.to_string(), regex);
        Ok(self)
    }

    /// Restricts the route to hosts matching `pattern`.
    pub fn host(&mut self, pattern: &str) -> Result<&mut Self, RouteError> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|source| RouteError::HostRegex { source })?;
        self.host = Some(regex);
        Ok(self)
    }

    /// Declares validation rules for a body/query field.
    pub fn rules(&mut self, field: &str, rules: &str) -> Result<&mut Self, RouteError> {
        let current = self.rules.take().unwrap_or_default();
        self.rules = Some(current.field(field, rules)?);
        Ok(self)
    }

    /// Supplies the ETag resolver for conditional requests.
    pub fn etag(&mut self, resolver: EtagResolver) -> &mut Self {
        self.etag = Some(resolver);
        self
    }

    /// Supplies the Last-Modified resolver for conditional requests.
    pub fn last_modified(&mut self, resolver: LastModifiedResolver) -> &mut Self {
        self.last_modified = Some(resolver);
        self
    }

    pub(crate) fn id(&self) -> RouteId {
        self.id
    }
}

impl std::fmt::Debug for RouteRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRecord")
            .field("pattern", &self.pattern)
            .field("methods", &self.methods)
            .field("name", &self.name)
            .finish()
    }
}

/// Result of resolving `(method, host, path)`.
#[derive(Debug)]
pub enum Resolution {
    Match {
        route: RouteId,
        params: AHashMap<String, ParamValue>,
    },
    NotFound,
    MethodNotAllowed {
        allowed: Vec<String>,
    },
    Redirect {
        location: String,
        status: u16,
    },
}

/// Route registry and resolver.
pub struct Router {
    routes: Vec<RouteRecord>,
    groups: Vec<GroupRecord>,
    global: Vec<Arc<dyn Middleware>>,
    current_group: Option<GroupId>,
    types: Arc<ParamTypes>,
    trie: Option<Trie>,
    names: AHashMap<String, RouteId>,
}

impl Router {
    /// Router backed by the builtin parameter types.
    pub fn new() -> Self {
        Self::with_types(Arc::new(ParamTypes::with_builtins()))
    }

    /// Router backed by an explicit (engine-scoped) type registry.
    pub fn with_types(types: Arc<ParamTypes>) -> Self {
        Self {
            routes: Vec::new(),
            groups: Vec::new(),
            global: Vec::new(),
            current_group: None,
            types,
            trie: None,
            names: AHashMap::default(),
        }
    }

    pub fn param_types(&self) -> &Arc<ParamTypes> {
        &self.types
    }

    fn is_frozen(&self) -> bool {
        self.trie.is_some()
    }

    /// Adds a middleware to the current group, or to the router's global
    /// chain when called outside a group closure.
    pub fn middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        let middleware: Arc<dyn Middleware> = Arc::new(middleware);
        match self.current_group {
            Some(GroupId(index)) => self.groups[index].middlewares.push(middleware),
            None => self.global.push(middleware),
        }
        self
    }

    /// Opens a nested group under `prefix`; routes and middlewares
    /// registered inside the closure are scoped to it.
    pub fn group(&mut self, prefix: &str, f: impl FnOnce(&mut Router)) -> &mut Self {
        let parent = self.current_group;
        self.groups.push(GroupRecord {
            prefix: prefix.trim_end_matches('/').to_string(),
            middlewares: Vec::new(),
            parent,
        });
        self.current_group = Some(GroupId(self.groups.len() - 1));
        f(self);
        self.current_group = parent;
        self
    }

    fn full_prefix(&self, group: Option<GroupId>) -> String {
        let mut parts = Vec::new();
        let mut cursor = group;
        while let Some(GroupId(index)) = cursor {
            parts.push(self.groups[index].prefix.as_str());
            cursor = self.groups[index].parent;
        }
        parts.reverse();
        parts.concat()
    }

    /// Registers a route for the given methods.
    pub fn route(
        &mut self,
        methods: &[&str],
        pattern: &str,
        handler: impl Endpoint,
    ) -> Result<&mut RouteRecord, RouteError> {
        if self.is_frozen() {
            return Err(RouteError::Frozen);
        }
        let prefix = self.full_prefix(self.current_group);
        let full_pattern = if pattern == "/" && !prefix.is_empty() {
            prefix
        } else {
            format!("{}{}", prefix, pattern)
        };
        let segments = parse_pattern(&full_pattern)?;
        let id = RouteId(self.routes.len());
        self.routes.push(RouteRecord {
            id,
            pattern: full_pattern,
            segments,
            methods: methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
            name: None,
            handler: Arc::new(handler),
            middlewares: Vec::new(),
            constraints: AHashMap::default(),
            host: None,
            rules: None,
            etag: None,
            last_modified: None,
            group: self.current_group,
        });
        Ok(self.routes.last_mut().expect("route pushed above"))
    }

    pub fn get(
        &mut self,
        pattern: &str,
        handler: impl Endpoint,
    ) -> Result<&mut RouteRecord, RouteError> {
        self.route(&["GET"], pattern, handler)
    }

    pub fn post(
        &mut self,
        pattern: &str,
        handler: impl Endpoint,
    ) -> Result<&mut RouteRecord, RouteError> {
        self.route(&["POST"], pattern, handler)
    }

    pub fn put(
        &mut self,
        pattern: &str,
        handler: impl Endpoint,
    ) -> Result<&mut RouteRecord, RouteError> {
        self.route(&["PUT"], pattern, handler)
    }

    pub fn delete(
        &mut self,
        pattern: &str,
        handler: impl Endpoint,
    ) -> Result<&mut RouteRecord, RouteError> {
        self.route(&["DELETE"], pattern, handler)
    }

    pub fn patch(
        &mut self,
        pattern: &str,
        handler: impl Endpoint,
    ) -> Result<&mut RouteRecord, RouteError> {
        self.route(&["PATCH"], pattern, handler)
    }

    pub fn head(
        &mut self,
        pattern: &str,
        handler: impl Endpoint,
    ) -> Result<&mut RouteRecord, RouteError> {
        self.route(&["HEAD"], pattern, handler)
    }

    pub fn options(
        &mut self,
        pattern: &str,
        handler: impl Endpoint,
    ) -> Result<&mut RouteRecord, RouteError> {
        self.route(&["OPTIONS"], pattern, handler)
    }

    /// Registers the route for every standard verb.
    pub fn any(
        &mut self,
        pattern: &str,
        handler: impl Endpoint,
    ) -> Result<&mut RouteRecord, RouteError> {
        self.route(ALL_METHODS, pattern, handler)
    }

    /// Expands a route's optional tail into every concrete variant.
    fn variants(segments: &[Segment]) -> Vec<Vec<Segment>> {
        let required = segments.iter().take_while(|s| !s.is_optional()).count();
        (required..=segments.len())
            .map(|len| segments[..len].to_vec())
            .collect()
    }

    /// Compiles the trie and name index. Idempotent once successful.
    pub fn freeze(&mut self) -> Result<(), RouteError> {
        if self.is_frozen() {
            return Ok(());
        }
        let mut trie = Trie::new();
        let mut names = AHashMap::default();
        for route in &self.routes {
            for segment in &route.segments {
                if let Segment::Typed { type_id, .. } = segment {
                    if self.types.get(type_id).is_none() {
                        return Err(RouteError::UnknownParamType {
                            pattern: route.pattern.clone(),
                            type_id: type_id.clone(),
                        });
                    }
                }
            }
            for variant in Self::variants(&route.segments) {
                trie.insert(&variant, &route.methods, route.id, &route.pattern)?;
            }
            if let Some(name) = &route.name {
                if names.insert(name.clone(), route.id).is_some() {
                    log::warn!("route name {:?} registered more than once; last wins", name);
                }
            }
        }
        self.trie = Some(trie);
        self.names = names;
        Ok(())
    }

    fn split_segments(path: &str) -> Vec<&str> {
        if path == "/" || path.is_empty() {
            return Vec::new();
        }
        path.trim_start_matches('/').split('/').collect()
    }

    /// Resolves a request to a route, redirect, or failure outcome.
    ///
    /// Must be called after [`Router::freeze`].
    pub fn resolve(
        &self,
        method: &str,
        host: &str,
        path: &str,
        redirect_trailing_slash: bool,
        handle_method_not_allowed: bool,
    ) -> Resolution {
        let trie = match &self.trie {
            Some(trie) => trie,
            None => {
                log::error!("router resolve called before freeze");
                return Resolution::NotFound;
            }
        };
        let segments = Self::split_segments(path);
        match trie.resolve(method, host, &segments, &self.types, &self.routes) {
            TrieOutcome::Found { route, params } => {
                let mut params: AHashMap<String, ParamValue> = params.into_iter().collect();
                // Optional segments that were not present report as Absent.
                for segment in &self.routes[route.0].segments {
                    if let Some(name) = segment.param_name() {
                        params
                            .entry(name.to_string())
                            .or_insert(ParamValue::Absent);
                    }
                }
                Resolution::Match { route, params }
            }
            TrieOutcome::MethodMismatch { allowed } => {
                if handle_method_not_allowed {
                    Resolution::MethodNotAllowed {
                        allowed: allowed.into_iter().collect(),
                    }
                } else {
                    Resolution::NotFound
                }
            }
            TrieOutcome::NoMatch => {
                if redirect_trailing_slash {
                    let alternate = if path.len() > 1 && path.ends_with('/') {
                        path.trim_end_matches('/').to_string()
                    } else {
                        format!("{}/", path)
                    };
                    let alt_segments = Self::split_segments(&alternate);
                    if let TrieOutcome::Found { .. } =
                        trie.resolve(method, host, &alt_segments, &self.types, &self.routes)
                    {
                        let status = if method == "GET" { 301 } else { 308 };
                        return Resolution::Redirect {
                            location: alternate,
                            status,
                        };
                    }
                }
                Resolution::NotFound
            }
        }
    }

    /// Looks up a registered route by id.
    pub fn route_record(&self, id: RouteId) -> Option<&RouteRecord> {
        self.routes.get(id.0)
    }

    pub(crate) fn record(&self, id: RouteId) -> &RouteRecord {
        &self.routes[id.0]
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteRecord> {
        self.routes.iter()
    }

    /// Middleware chain for a route: router-global, then groups from the
    /// outermost in, then route-scoped.
    pub(crate) fn chain_for(&self, id: RouteId) -> Vec<Arc<dyn Middleware>> {
        let route = &self.routes[id.0];
        let mut group_chain = Vec::new();
        let mut cursor = route.group;
        while let Some(GroupId(index)) = cursor {
            group_chain.push(index);
            cursor = self.groups[index].parent;
        }
        group_chain.reverse();

        let mut chain: Vec<Arc<dyn Middleware>> = self.global.clone();
        for index in group_chain {
            chain.extend(self.groups[index].middlewares.iter().cloned());
        }
        chain.extend(route.middlewares.iter().cloned());
        chain
    }

    /// Generates a URL for a named route.
    pub fn url(&self, name: &str, params: &[(&str, &str)]) -> Result<String, RouteError> {
        let id = self
            .names
            .get(name)
            .copied()
            .ok_or_else(|| RouteError::UnknownName(name.to_string()))?;
        urls::generate(&self.routes[id.0], params)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .field("groups", &self.groups.len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    async fn ok(ctx: Context) -> Result<(), crate::models::error::EngineError> {
        ctx.text(200, "ok")
    }

    fn frozen(build: impl FnOnce(&mut Router)) -> Router {
        let mut router = Router::new();
        build(&mut router);
        router.freeze().unwrap();
        router
    }

    fn must_match(router: &Router, method: &str, path: &str) -> AHashMap<String, ParamValue> {
        match router.resolve(method, "localhost", path, true, true) {
            Resolution::Match { params, .. } => params,
            other => panic!("expected match for {} {}, got {:?}", method, path, other),
        }
    }

    #[test]
    fn typed_param_casts_to_int() {
        let router = frozen(|r| {
            r.get("/users/{id:int}", ok).unwrap();
        });
        let params = must_match(&router, "GET", "/users/42");
        assert_eq!(params.get("id"), Some(&ParamValue::Int(42)));

        assert!(matches!(
            router.resolve("GET", "localhost", "/users/abc", true, true),
            Resolution::NotFound
        ));
    }

    #[test]
    fn literal_beats_typed() {
        let router = frozen(|r| {
            r.get("/users/new", ok).unwrap();
            r.get("/users/{id:int}", ok).unwrap().name("users.show");
        });
        // The literal wins even though "new" also fails the int regex; use
        // a numeric-looking literal to prove priority.
        let router2 = frozen(|r| {
            r.get("/users/42", ok).unwrap().name("lit");
            r.get("/users/{id:int}", ok).unwrap().name("typed");
        });
        let params = must_match(&router2, "GET", "/users/42");
        assert!(params.is_empty());
        let params = must_match(&router, "GET", "/users/7");
        assert_eq!(params.get("id"), Some(&ParamValue::Int(7)));
    }

    #[test]
    fn wildcard_captures_remainder() {
        let router = frozen(|r| {
            r.get("/files/{*path}", ok).unwrap();
        });
        let params = must_match(&router, "GET", "/files/docs/readme.md");
        assert_eq!(
            params.get("path"),
            Some(&ParamValue::Str("docs/readme.md".to_string()))
        );
    }

    #[test]
    fn optional_tail_reports_absent() {
        let router = frozen(|r| {
            r.get("/posts/{id:int}/{slug?}", ok).unwrap();
        });
        let params = must_match(&router, "GET", "/posts/5/intro");
        assert_eq!(params.get("slug"), Some(&ParamValue::Str("intro".into())));

        let params = must_match(&router, "GET", "/posts/5");
        assert_eq!(params.get("slug"), Some(&ParamValue::Absent));
    }

    #[test]
    fn method_not_allowed_collects_verbs() {
        let router = frozen(|r| {
            r.get("/things", ok).unwrap();
            r.post("/things", ok).unwrap();
        });
        match router.resolve("DELETE", "localhost", "/things", true, true) {
            Resolution::MethodNotAllowed { allowed } => {
                assert_eq!(allowed, vec!["GET".to_string(), "POST".to_string()]);
            }
            other => panic!("expected MethodNotAllowed, got {:?}", other),
        }
        // Downgrades to NotFound when disabled.
        assert!(matches!(
            router.resolve("DELETE", "localhost", "/things", true, false),
            Resolution::NotFound
        ));
    }

    #[test]
    fn trailing_slash_redirect_preserves_method_semantics() {
        let router = frozen(|r| {
            r.get("/about", ok).unwrap();
            r.post("/submit", ok).unwrap();
        });
        match router.resolve("GET", "localhost", "/about/", true, true) {
            Resolution::Redirect { location, status } => {
                assert_eq!(location, "/about");
                assert_eq!(status, 301);
            }
            other => panic!("expected redirect, got {:?}", other),
        }
        match router.resolve("POST", "localhost", "/submit/", true, true) {
            Resolution::Redirect { status, .. } => assert_eq!(status, 308),
            other => panic!("expected redirect, got {:?}", other),
        }
        assert!(matches!(
            router.resolve("GET", "localhost", "/about/", false, true),
            Resolution::NotFound
        ));
    }

    #[test]
    fn host_constraints_skip_routes() {
        let router = frozen(|r| {
            r.get("/dash", ok).unwrap().host(r"admin\..*").unwrap();
        });
        assert!(matches!(
            router.resolve("GET", "admin.example.com", "/dash", true, true),
            Resolution::Match { .. }
        ));
        assert!(matches!(
            router.resolve("GET", "www.example.com", "/dash", true, true),
            Resolution::NotFound
        ));
    }

    #[test]
    fn param_constraints_fall_through_to_not_found() {
        let router = frozen(|r| {
            r.get("/orders/{code}", ok)
                .unwrap()
                .constrain("code", r"[A-Z]{3}-\d+")
                .unwrap();
        });
        assert!(matches!(
            router.resolve("GET", "localhost", "/orders/ABC-9", true, true),
            Resolution::Match { .. }
        ));
        assert!(matches!(
            router.resolve("GET", "localhost", "/orders/abc", true, true),
            Resolution::NotFound
        ));
    }

    #[test]
    fn duplicate_routes_fail_freeze() {
        let mut router = Router::new();
        router.get("/same", ok).unwrap();
        router.get("/same", ok).unwrap();
        assert!(matches!(
            router.freeze(),
            Err(RouteError::DuplicateRoute { .. })
        ));
    }

    #[test]
    fn group_prefixes_compose() {
        let router = frozen(|r| {
            r.group("/api", |api| {
                api.group("/v1", |v1| {
                    v1.get("/users/{id:int}", ok).unwrap().name("api.users");
                });
            });
        });
        let params = must_match(&router, "GET", "/api/v1/users/3");
        assert_eq!(params.get("id"), Some(&ParamValue::Int(3)));
        assert_eq!(
            router.url("api.users", &[("id", "3")]).unwrap(),
            "/api/v1/users/3"
        );
    }

    #[test]
    fn url_generation_appends_extras_as_query() {
        let router = frozen(|r| {
            r.get("/users/{id:int}", ok).unwrap().name("users.show");
        });
        assert_eq!(
            router
                .url("users.show", &[("id", "9"), ("tab", "posts")])
                .unwrap(),
            "/users/9?tab=posts"
        );
        assert!(matches!(
            router.url("missing", &[]),
            Err(RouteError::UnknownName(_))
        ));
        assert!(matches!(
            router.url("users.show", &[]),
            Err(RouteError::MissingParam { .. })
        ));
    }
}
