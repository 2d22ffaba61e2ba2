//! Bridge runtime: accepts framed requests from a native front-end and
//! drives them through the engine.
//!
//! One request-response is in flight per socket; the front-end holds a pool
//! of sockets for concurrency. Each logical request is dispatched to a
//! fresh task while the connection loop keeps pumping body chunks, so
//! streamed uploads never buffer whole. A handler that detaches its
//! response switches the same socket into tunnel mode.

use crate::bridge::frame::{
    read_frame, write_frame, BridgeError, Frame, RequestHead, ResponseHead, CHUNK_SIZE,
};
use crate::engine::Engine;
use crate::models::headers::Headers;
use crate::models::request::{Body, Request};
use crate::models::response::{Response, Tunnel, UpgradeHandler};
use bytes::Bytes;
use log::{debug, error, info, warn};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Serves bridge connections from a TCP listener.
pub async fn serve_tcp(engine: Arc<Engine>, listener: TcpListener) -> std::io::Result<()> {
    info!(
        "bridge listening on tcp {}",
        listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );
    loop {
        let (stream, peer) = listener.accept().await?;
        let engine = engine.clone();
        tokio::spawn(async move {
            serve_connection(engine, stream, Some(peer.ip())).await;
        });
    }
}

/// Serves bridge connections from a Unix socket listener (preferred).
#[cfg(unix)]
pub async fn serve_unix(
    engine: Arc<Engine>,
    listener: tokio::net::UnixListener,
) -> std::io::Result<()> {
    info!("bridge listening on unix socket");
    loop {
        let (stream, _) = listener.accept().await?;
        let engine = engine.clone();
        tokio::spawn(async move {
            serve_connection(engine, stream, None).await;
        });
    }
}

/// Runs the frame loop for one accepted connection.
pub async fn serve_connection<S>(engine: Arc<Engine>, stream: S, peer: Option<IpAddr>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    match connection_loop(engine, &mut reader, &mut writer, peer).await {
        Ok(()) => {}
        Err(err) if err.drops_connection() => {
            debug!("bridge connection dropped: {}", err);
        }
        Err(err) => {
            // Malformed payload: answer 400 with a text body, then close.
            debug!("bridge decode failure: {}", err);
            let reply = Frame::LegacyResponse {
                head: ResponseHead {
                    status: 400,
                    headers: vec![(
                        "content-type".to_string(),
                        "text/plain; charset=utf-8".to_string(),
                    )],
                },
                body: Bytes::from(format!("bad request: {}", err)),
                tokenized: false,
            };
            let _ = write_frame(&mut writer, &reply).await;
        }
    }
}

fn build_request(head: RequestHead, body: Body, peer: Option<IpAddr>) -> Request {
    Request {
        method: head.method.to_ascii_uppercase(),
        scheme: head.scheme,
        authority: head.authority,
        path: head.path,
        query: head.query,
        protocol: head.protocol,
        headers: Headers::from_pairs(head.headers),
        peer_addr: peer,
        body,
    }
}

fn response_head(response: &Response) -> ResponseHead {
    ResponseHead {
        status: response.status(),
        headers: response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
    }
}

fn fallback_response(status: u16) -> Response {
    let mut response = Response::new();
    let _ = response.json(status, &serde_json::json!({"error": "Internal Server Error"}));
    response
}

async fn connection_loop<R, W>(
    engine: Arc<Engine>,
    reader: &mut ReadHalf<R>,
    writer: &mut WriteHalf<W>,
    peer: Option<IpAddr>,
) -> Result<(), BridgeError>
where
    R: AsyncRead,
    W: AsyncWrite,
{
    loop {
        let Some(frame) = read_frame(reader).await? else {
            return Ok(());
        };
        match frame {
            Frame::LegacyRequest {
                head,
                body,
                tokenized,
            } => {
                let request = build_request(head, Body::from_bytes(body), peer);
                let mut response = engine.handle_request(request).await;
                if response.take_upgrade().is_some() {
                    warn!("upgraded response on the legacy frame path; tunnel not started");
                }
                response.lock();
                let head = response_head(&response);
                let body = response.take_body().read_to_bytes().await;
                write_frame(writer, &Frame::LegacyResponse { head, body, tokenized }).await?;
            }
            Frame::RequestStart(head) => {
                let (tx, rx) = mpsc::channel::<Bytes>(16);
                let request = build_request(head, Body::stream(rx), peer);
                let engine_task = engine.clone();
                let handler =
                    tokio::spawn(async move { engine_task.handle_request(request).await });

                // Pump request chunks; a send error just means the handler
                // finished without draining the body.
                loop {
                    match read_frame(reader).await? {
                        Some(Frame::RequestChunk(bytes)) => {
                            let _ = tx.send(bytes).await;
                        }
                        Some(Frame::RequestEnd) => break,
                        Some(other) => {
                            return Err(BridgeError::Decode(format!(
                                "unexpected frame inside request stream: {:?}",
                                frame_name(&other)
                            )))
                        }
                        None => return Ok(()),
                    }
                }
                drop(tx);

                let mut response = handler.await.unwrap_or_else(|e| {
                    error!("request task failed: {}", e);
                    fallback_response(500)
                });
                let upgrade = response.take_upgrade();
                response.lock();
                write_frame(writer, &Frame::ResponseStart(response_head(&response))).await?;

                if let Some(upgrade) = upgrade {
                    return run_tunnel(reader, writer, upgrade).await;
                }

                match response.take_body() {
                    Body::Empty => {}
                    Body::Bytes(bytes) => {
                        for chunk in bytes.chunks(CHUNK_SIZE) {
                            write_frame(writer, &Frame::ResponseChunk(Bytes::copy_from_slice(chunk)))
                                .await?;
                        }
                    }
                    Body::Stream(mut rx) => {
                        while let Some(bytes) = rx.recv().await {
                            for chunk in bytes.chunks(CHUNK_SIZE) {
                                write_frame(
                                    writer,
                                    &Frame::ResponseChunk(Bytes::copy_from_slice(chunk)),
                                )
                                .await?;
                            }
                        }
                    }
                }
                write_frame(writer, &Frame::ResponseEnd).await?;
            }
            other => {
                return Err(BridgeError::Decode(format!(
                    "unexpected frame at request boundary: {:?}",
                    frame_name(&other)
                )))
            }
        }
    }
}

/// Switches the connection to raw byte tunnelling after an upgraded
/// response; runs until either side closes.
async fn run_tunnel<R, W>(
    reader: &mut ReadHalf<R>,
    writer: &mut WriteHalf<W>,
    upgrade: UpgradeHandler,
) -> Result<(), BridgeError>
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let (in_tx, in_rx) = mpsc::channel::<Bytes>(16);
    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(upgrade(Tunnel {
        incoming: in_rx,
        outgoing: out_tx,
    }));

    loop {
        tokio::select! {
            frame = read_frame(reader) => {
                match frame? {
                    Some(Frame::TunnelChunk(bytes)) => {
                        let _ = in_tx.send(bytes).await;
                    }
                    Some(Frame::TunnelClose) | None => break,
                    Some(other) => {
                        return Err(BridgeError::Decode(format!(
                            "unexpected frame in tunnel: {:?}",
                            frame_name(&other)
                        )))
                    }
                }
            }
            chunk = out_rx.recv() => {
                match chunk {
                    Some(bytes) => write_frame(writer, &Frame::TunnelChunk(bytes)).await?,
                    None => {
                        write_frame(writer, &Frame::TunnelClose).await?;
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

fn frame_name(frame: &Frame) -> &'static str {
    match frame {
        Frame::LegacyRequest { .. } => "legacy-request",
        Frame::LegacyResponse { .. } => "legacy-response",
        Frame::RequestStart(_) => "request-start",
        Frame::RequestChunk(_) => "request-chunk",
        Frame::RequestEnd => "request-end",
        Frame::ResponseStart(_) => "response-start",
        Frame::ResponseChunk(_) => "response-chunk",
        Frame::ResponseEnd => "response-end",
        Frame::TunnelChunk(_) => "tunnel-chunk",
        Frame::TunnelClose => "tunnel-close",
    }
}
