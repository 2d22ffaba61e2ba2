//! Radix trie over path segments.
//!
//! Nodes live in an arena indexed by position, so the structure is a flat
//! `Vec` with index links rather than a web of reference-counted pointers.
//! Each node keeps literal children in a hash map, typed children in
//! registration order, and at most one wildcard child. Match priority is
//! literal > typed > wildcard; typed candidates whose regex or cast fails
//! fall through to the next candidate, and method mismatches accumulate an
//! allowed-verb set across every terminal whose constraints accept the
//! request.

use crate::models::param::ParamValue;
use crate::router::params::ParamTypes;
use crate::router::segment::Segment;
use crate::router::{RouteError, RouteId, RouteRecord};
use ahash::HashMap as AHashMap;
use std::collections::BTreeSet;

#[derive(Debug)]
struct TypedEdge {
    name: String,
    type_id: String,
    node: usize,
}

#[derive(Debug)]
struct WildcardEdge {
    name: String,
    node: usize,
}

#[derive(Debug, Default)]
struct Node {
    literals: AHashMap<String, usize>,
    typed: Vec<TypedEdge>,
    wildcard: Option<WildcardEdge>,
    terminals: AHashMap<String, RouteId>,
}

/// Matched parameter capture: name, raw text, cast value.
type Capture = (String, String, ParamValue);

#[derive(Debug)]
pub(crate) enum TrieOutcome {
    Found {
        route: RouteId,
        params: Vec<(String, ParamValue)>,
    },
    MethodMismatch {
        allowed: BTreeSet<String>,
    },
    NoMatch,
}

#[derive(Debug)]
pub(crate) struct Trie {
    nodes: Vec<Node>,
}

impl Trie {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    fn alloc(&mut self) -> usize {
        self.nodes.push(Node::default());
        self.nodes.len() - 1
    }

    /// Inserts one expanded segment list (optionals already resolved by the
    /// caller) for every method of the route.
    pub(crate) fn insert(
        &mut self,
        segments: &[Segment],
        methods: &[String],
        route: RouteId,
        pattern: &str,
    ) -> Result<(), RouteError> {
        let mut node = 0usize;
        for segment in segments {
            node = match segment {
                Segment::Literal(text) => {
                    match self.nodes[node].literals.get(text).copied() {
                        Some(child) => child,
                        None => {
                            let child = self.alloc();
                            self.nodes[node].literals.insert(text.clone(), child);
                            child
                        }
                    }
                }
                Segment::Typed { name, type_id, .. } => {
                    let existing = self.nodes[node]
                        .typed
                        .iter()
                        .find(|edge| edge.name == *name && edge.type_id == *type_id)
                        .map(|edge| edge.node);
                    match existing {
                        Some(child) => child,
                        None => {
                            let child = self.alloc();
                            self.nodes[node].typed.push(TypedEdge {
                                name: name.clone(),
                                type_id: type_id.clone(),
                                node: child,
                            });
                            child
                        }
                    }
                }
                Segment::Wildcard(name) => {
                    let existing = match &self.nodes[node].wildcard {
                        Some(edge) if edge.name == *name => Some(edge.node),
                        Some(_) => {
                            return Err(RouteError::InvalidPattern {
                                pattern: pattern.to_string(),
                            })
                        }
                        None => None,
                    };
                    match existing {
                        Some(child) => child,
                        None => {
                            let child = self.alloc();
                            self.nodes[node].wildcard = Some(WildcardEdge {
                                name: name.clone(),
                                node: child,
                            });
                            child
                        }
                    }
                }
            };
        }

        for method in methods {
            if self.nodes[node].terminals.contains_key(method) {
                return Err(RouteError::DuplicateRoute {
                    method: method.clone(),
                    pattern: pattern.to_string(),
                });
            }
            self.nodes[node].terminals.insert(method.clone(), route);
        }
        Ok(())
    }

    pub(crate) fn resolve(
        &self,
        method: &str,
        host: &str,
        segments: &[&str],
        types: &ParamTypes,
        routes: &[RouteRecord],
    ) -> TrieOutcome {
        let mut allowed = BTreeSet::new();
        let mut captures: Vec<Capture> = Vec::new();
        match self.walk(
            0,
            method,
            host,
            segments,
            0,
            types,
            routes,
            &mut captures,
            &mut allowed,
        ) {
            Some((route, params)) => TrieOutcome::Found { route, params },
            None if !allowed.is_empty() => TrieOutcome::MethodMismatch { allowed },
            None => TrieOutcome::NoMatch,
        }
    }

    /// Host and per-parameter constraints gate a terminal; a rejected route
    /// is skipped as if it were not registered.
    fn accept(route: &RouteRecord, host: &str, captures: &[Capture]) -> bool {
        if let Some(pattern) = &route.host {
            if !pattern.is_match(host) {
                return false;
            }
        }
        for (name, raw, _) in captures {
            if let Some(pattern) = route.constraints.get(name) {
                if !pattern.is_match(raw) {
                    return false;
                }
            }
        }
        true
    }

    fn check_terminals(
        &self,
        node_idx: usize,
        method: &str,
        host: &str,
        captures: &[Capture],
        routes: &[RouteRecord],
        allowed: &mut BTreeSet<String>,
    ) -> Option<RouteId> {
        let node = &self.nodes[node_idx];
        if let Some(&route_id) = node.terminals.get(method) {
            if Self::accept(&routes[route_id.0], host, captures) {
                return Some(route_id);
            }
        }
        for (verb, &route_id) in &node.terminals {
            if verb != method && Self::accept(&routes[route_id.0], host, captures) {
                allowed.insert(verb.clone());
            }
        }
        None
    }

    fn snapshot(captures: &[Capture]) -> Vec<(String, ParamValue)> {
        captures
            .iter()
            .map(|(name, _, value)| (name.clone(), value.clone()))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        node_idx: usize,
        method: &str,
        host: &str,
        segments: &[&str],
        depth: usize,
        types: &ParamTypes,
        routes: &[RouteRecord],
        captures: &mut Vec<Capture>,
        allowed: &mut BTreeSet<String>,
    ) -> Option<(RouteId, Vec<(String, ParamValue)>)> {
        if depth == segments.len() {
            if let Some(route) =
                self.check_terminals(node_idx, method, host, captures, routes, allowed)
            {
                return Some((route, Self::snapshot(captures)));
            }
            // A wildcard may match an empty remainder.
            if let Some(edge) = &self.nodes[node_idx].wildcard {
                captures.push((edge.name.clone(), String::new(), ParamValue::Str(String::new())));
                let found =
                    self.check_terminals(edge.node, method, host, captures, routes, allowed);
                let result = found.map(|route| (route, Self::snapshot(captures)));
                captures.pop();
                return result;
            }
            return None;
        }

        let segment = segments[depth];
        let node = &self.nodes[node_idx];

        if let Some(&child) = node.literals.get(segment) {
            if let Some(found) = self.walk(
                child,
                method,
                host,
                segments,
                depth + 1,
                types,
                routes,
                captures,
                allowed,
            ) {
                return Some(found);
            }
        }

        for edge in &node.typed {
            let Some(param_type) = types.get(&edge.type_id) else {
                continue;
            };
            if !param_type.matches(segment) {
                continue;
            }
            let Ok(value) = param_type.cast(Some(segment)) else {
                continue;
            };
            captures.push((edge.name.clone(), segment.to_string(), value));
            if let Some(found) = self.walk(
                edge.node,
                method,
                host,
                segments,
                depth + 1,
                types,
                routes,
                captures,
                allowed,
            ) {
                return Some(found);
            }
            captures.pop();
        }

        if let Some(edge) = &node.wildcard {
            let remainder = segments[depth..].join("/");
            captures.push((
                edge.name.clone(),
                remainder.clone(),
                ParamValue::Str(remainder),
            ));
            let found = self.check_terminals(edge.node, method, host, captures, routes, allowed);
            let result = found.map(|route| (route, Self::snapshot(captures)));
            captures.pop();
            if result.is_some() {
                return result;
            }
        }

        None
    }
}
