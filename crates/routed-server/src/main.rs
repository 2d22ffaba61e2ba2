//! Routed standalone server.
//!
//! Loads configuration, builds an engine with a small default route set,
//! and serves it over HTTP plus (optionally) the native bridge transport.
//!
//! Environment:
//! - `ROUTED_CONFIG_PATH`: config file (default `./config.json`, optional)
//! - `ROUTED_HOST` / `ROUTED_PORT`: HTTP bind address (default 0.0.0.0:5900)
//! - `ROUTED_BRIDGE_ADDR`: TCP bridge bind address (optional)
//! - `ROUTED_BRIDGE_SOCKET`: Unix bridge socket path (optional, preferred)

use log::{error, info};
use routed::config::Config;
use routed::context::Context;
use routed::engine::Engine;
use routed::logs::logger::configure_logger;
use serde_json::json;
use std::sync::Arc;

fn load_config() -> Config {
    let path =
        std::env::var("ROUTED_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());
    if std::path::Path::new(&path).exists() {
        match Config::from_file(&path) {
            Ok(config) => {
                info!("loaded configuration from {}", path);
                return config;
            }
            Err(e) => {
                error!("failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    }
    info!("no configuration file at {}, using defaults", path);
    Config::new()
}

fn build_engine(config: Config) -> Arc<Engine> {
    let engine = Engine::builder(config)
        .routes(|r| {
            r.get("/health", |ctx: Context| async move {
                ctx.json(200, &json!({"status": "healthy"}))
            })
            .expect("health route")
            .name("health");

            r.any("/echo/{*rest}", |ctx: Context| async move {
                let body = ctx.read_body().await;
                ctx.json(
                    200,
                    &json!({
                        "method": ctx.method(),
                        "path": ctx.path(),
                        "rest": ctx.param("rest").map(|p| p.to_string()),
                        "body_bytes": body.len(),
                    }),
                )
            })
            .expect("echo route");
        })
        .build();

    match engine {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("engine build failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let config = load_config();
    let engine = build_engine(config);
    engine.initialize();

    let host = std::env::var("ROUTED_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("ROUTED_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(5900);

    // Optional native bridge listeners run alongside the HTTP server.
    if let Ok(addr) = std::env::var("ROUTED_BRIDGE_ADDR") {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let bridge_engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = routed::bridge::runtime::serve_tcp(bridge_engine, listener).await {
                error!("bridge listener failed: {}", e);
            }
        });
    }
    #[cfg(unix)]
    if let Ok(path) = std::env::var("ROUTED_BRIDGE_SOCKET") {
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path)?;
        let bridge_engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = routed::bridge::runtime::serve_unix(bridge_engine, listener).await {
                error!("bridge socket listener failed: {}", e);
            }
        });
    }

    info!("starting routed-server v{}", env!("CARGO_PKG_VERSION"));
    let shutdown_engine = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_engine.close();
        }
    });

    routed::server::serve(engine, &host, port).await
}
