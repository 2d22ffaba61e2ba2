//! # Routed
//!
//! A server-side web framework built around four pieces of systems work:
//! a radix-tree router with typed parameters, a composable middleware
//! pipeline over a per-request context, a cache subsystem with pluggable
//! drivers and cooperative locks, and a framed binary bridge that hands
//! requests from a native front-end process to the in-process pipeline.
//!
//! ## Quick Start
//!
//! ```rust
//! use routed::config::Config;
//! use routed::context::Context;
//! use routed::engine::Engine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::builder(Config::new())
//!         .routes(|r| {
//!             r.get("/users/{id:int}", |ctx: Context| async move {
//!                 let id = ctx.param("id").and_then(|p| p.as_int()).unwrap_or(0);
//!                 ctx.json(200, &serde_json::json!({ "id": id }))
//!             })
//!             .unwrap()
//!             .name("users.show");
//!         })
//!         .build()?;
//!     engine.initialize();
//!
//!     let request = routed::models::request::Request::new("GET", "/users/42");
//!     let response = engine.handle_request(request).await;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//! native front ──bridge frames──▶ ┌─────────────────────────────┐
//!                                 │          Engine             │
//! http client ──actix adapter──▶  │  normalize → route trie     │
//!                                 │  → middleware pipeline      │
//!                                 │  → handler → response       │
//!                                 └─────────────┬───────────────┘
//!                                    cache ─ sessions ─ events
//! ```
//!
//! ## Module Organization
//!
//! - **[`engine`]** - kernel: container, event bus, pipeline assembly
//! - **[`router`]** - route registration, radix trie, parameter types
//! - **[`middleware`]** - pipeline composition and the builtin middlewares
//! - **[`context`]** - per-request state threaded through the pipeline
//! - **[`cache`]** - driver registry, repository facade, tags, locks
//! - **[`session`]** - cookie sessions stored through the cache
//! - **[`bridge`]** - framed binary transport for native front-ends
//! - **[`server`]** - in-process HTTP host adapter (Actix Web)
//! - **[`validation`]** - field rules for request payloads
//! - **[`config`]** - dotted-key configuration and engine settings
//! - **[`models`]** - requests, responses, headers, errors
//! - **[`logs`]** - logger setup
//!
//! ## Environment Variables
//!
//! - `ROUTED_CONFIG_PATH`: configuration file path (default `./config.json`)
//! - `ROUTED_LOG_LEVEL` / `ROUTED_LOG_FORMAT`: logging controls
//! - `NO_COLOR`: disable colored log output

pub mod bridge;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod logs;
pub mod middleware;
pub mod models;
pub mod router;
pub mod server;
pub mod session;
pub mod validation;
