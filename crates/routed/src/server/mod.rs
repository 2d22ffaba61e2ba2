//! In-process HTTP host adapter.
//!
//! Mounts an [`Engine`] on an Actix Web server: a catch-all service
//! converts each incoming request into the framework's transport-neutral
//! request value, awaits [`Engine::handle_request`], and converts the
//! response back. Routing, middleware, and error rendering all live in the
//! engine; Actix is only the byte transport here.

use crate::engine::Engine;
use crate::models::headers::Headers;
use crate::models::request::{Body, Request};
use crate::models::response::Response;
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::http::{StatusCode, Version};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use bytes::Bytes;
use log::{info, warn};
use std::sync::Arc;

/// Serves the engine over HTTP until the server is stopped.
pub async fn serve(engine: Arc<Engine>, host: &str, port: u16) -> std::io::Result<()> {
    engine.initialize();
    info!("http server listening on {}:{}", host, port);
    let data = web::Data::from(engine);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .app_data(web::PayloadConfig::new(64 * 1024 * 1024))
            .default_service(web::route().to(dispatch))
    })
    .bind((host, port))?
    .run()
    .await
}

async fn dispatch(
    req: HttpRequest,
    body: web::Bytes,
    engine: web::Data<Engine>,
) -> HttpResponse {
    let request = into_request(&req, &body);
    let response = engine.handle_request(request).await;
    into_http_response(response)
}

fn protocol_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}

fn into_request(req: &HttpRequest, body: &[u8]) -> Request {
    let info = req.connection_info();
    let scheme = info.scheme().to_string();
    let authority = info.host().to_string();
    drop(info);

    let mut headers = Headers::new();
    for (name, value) in req.headers() {
        headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }

    Request {
        method: req.method().as_str().to_string(),
        scheme,
        authority,
        path: req.path().to_string(),
        query: req.query_string().to_string(),
        protocol: protocol_label(req.version()).to_string(),
        headers,
        peer_addr: req.peer_addr().map(|addr| addr.ip()),
        body: if body.is_empty() {
            Body::Empty
        } else {
            Body::from_bytes(Bytes::copy_from_slice(body))
        },
    }
}

fn into_http_response(mut response: Response) -> HttpResponse {
    if response.is_upgrade() {
        // Tunnelling is a bridge-transport capability.
        warn!("upgraded response over the http adapter; tunnel not started");
    }
    response.lock();

    let status =
        StatusCode::from_u16(response.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = HttpResponse::build(status);
    for (name, value) in response.headers().iter() {
        let display = Headers::display_name(name);
        match (
            HeaderName::from_bytes(display.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                builder.append_header((name, value));
            }
            _ => warn!("dropping unrepresentable header {:?}", name),
        }
    }

    match response.take_body() {
        Body::Empty => builder.finish(),
        Body::Bytes(bytes) => builder.body(bytes.to_vec()),
        Body::Stream(rx) => {
            let stream = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|bytes| {
                    (
                        Ok::<_, std::io::Error>(web::Bytes::copy_from_slice(&bytes)),
                        rx,
                    )
                })
            });
            builder.streaming(stream)
        }
    }
}
