//! Front-end side of the bridge: a pooled client used by native fronts
//! (and the test suite) to exchange framed requests with a runtime.
//!
//! Sockets carry one request-response at a time; the pool holds idle
//! sockets for concurrency with a hot slot that skips the shared queue on
//! the fast path. A transport failure is retried once on a fresh socket,
//! but only when the request carried no body; with a body the failure
//! surfaces to the caller, who reports it as a 502.

use crate::bridge::frame::{
    read_frame, write_frame, BridgeError, Frame, RequestHead, ResponseHead, CHUNK_SIZE,
};
use crate::models::response::Tunnel;
use bytes::{Bytes, BytesMut};
use log::debug;
#[cfg(unix)]
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};

trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

type Conn = Box<dyn Duplex>;

enum Target {
    Tcp(String),
    #[cfg(unix)]
    Unix(PathBuf),
}

/// Outcome of a bridge exchange.
pub enum ClientResponse {
    Complete { head: ResponseHead, body: Bytes },
    Upgraded { head: ResponseHead, tunnel: Tunnel },
}

pub struct BridgeClient {
    target: Target,
    hot: Mutex<Option<Conn>>,
    pool: Mutex<Vec<Conn>>,
}

impl BridgeClient {
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self {
            target: Target::Tcp(addr.into()),
            hot: Mutex::new(None),
            pool: Mutex::new(Vec::new()),
        }
    }

    #[cfg(unix)]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::Unix(path.into()),
            hot: Mutex::new(None),
            pool: Mutex::new(Vec::new()),
        }
    }

    async fn connect(&self) -> std::io::Result<Conn> {
        match &self.target {
            Target::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr).await?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Target::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Box::new(stream))
            }
        }
    }

    async fn checkout(&self) -> std::io::Result<Conn> {
        if let Some(conn) = self.hot.lock().await.take() {
            return Ok(conn);
        }
        if let Some(conn) = self.pool.lock().await.pop() {
            return Ok(conn);
        }
        self.connect().await
    }

    async fn checkin(&self, conn: Conn) {
        let mut hot = self.hot.lock().await;
        if hot.is_none() {
            *hot = Some(conn);
            return;
        }
        drop(hot);
        self.pool.lock().await.push(conn);
    }

    /// Sends one request and reads the full response.
    pub async fn request(
        &self,
        head: RequestHead,
        body: Option<Bytes>,
    ) -> Result<ClientResponse, BridgeError> {
        let retryable = body.is_none();
        let mut attempt = 0;
        loop {
            // Retries always use a fresh socket.
            let conn = if attempt == 0 {
                self.checkout().await?
            } else {
                self.connect().await?
            };
            match self.exchange(conn, &head, body.as_ref()).await {
                Ok((response, Some(conn))) => {
                    self.checkin(conn).await;
                    return Ok(response);
                }
                Ok((response, None)) => return Ok(response),
                Err(BridgeError::Io(e)) if retryable && attempt == 0 => {
                    debug!("bridge call failed ({}), retrying on a fresh socket", e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs one exchange; the connection comes back for reuse unless the
    /// response upgraded into a tunnel.
    async fn exchange(
        &self,
        mut conn: Conn,
        head: &RequestHead,
        body: Option<&Bytes>,
    ) -> Result<(ClientResponse, Option<Conn>), BridgeError> {
        write_frame(&mut conn, &Frame::RequestStart(head.clone())).await?;
        if let Some(body) = body {
            for chunk in body.chunks(CHUNK_SIZE) {
                write_frame(&mut conn, &Frame::RequestChunk(Bytes::copy_from_slice(chunk)))
                    .await?;
            }
        }
        write_frame(&mut conn, &Frame::RequestEnd).await?;

        let head = match read_frame(&mut conn).await? {
            Some(Frame::ResponseStart(head)) => head,
            Some(Frame::LegacyResponse { head, body, .. }) => {
                return Ok((ClientResponse::Complete { head, body }, Some(conn)));
            }
            Some(other) => {
                return Err(BridgeError::Decode(format!(
                    "unexpected response frame: {:?}",
                    other
                )))
            }
            None => {
                return Err(BridgeError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before response",
                )))
            }
        };

        if head.status == 101 {
            let tunnel = spawn_tunnel(conn);
            return Ok((ClientResponse::Upgraded { head, tunnel }, None));
        }

        let mut body = BytesMut::new();
        loop {
            match read_frame(&mut conn).await? {
                Some(Frame::ResponseChunk(bytes)) => body.extend_from_slice(&bytes),
                Some(Frame::ResponseEnd) => break,
                Some(other) => {
                    return Err(BridgeError::Decode(format!(
                        "unexpected frame in response stream: {:?}",
                        other
                    )))
                }
                None => {
                    return Err(BridgeError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed mid-response",
                    )))
                }
            }
        }
        Ok((
            ClientResponse::Complete {
                head,
                body: body.freeze(),
            },
            Some(conn),
        ))
    }
}

/// Detaches the socket into a raw byte tunnel, pumping frames in both
/// directions until either side closes.
fn spawn_tunnel(conn: Conn) -> Tunnel {
    let (in_tx, in_rx) = mpsc::channel::<Bytes>(16);
    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(16);

    tokio::spawn(async move {
        let mut conn = conn;
        loop {
            tokio::select! {
                frame = read_frame(&mut conn) => {
                    match frame {
                        Ok(Some(Frame::TunnelChunk(bytes))) => {
                            if in_tx.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        Ok(Some(Frame::TunnelClose)) | Ok(None) => break,
                        Ok(Some(_)) => break,
                        Err(e) => {
                            debug!("tunnel read failed: {}", e);
                            break;
                        }
                    }
                }
                chunk = out_rx.recv() => {
                    match chunk {
                        Some(bytes) => {
                            if write_frame(&mut conn, &Frame::TunnelChunk(bytes)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = write_frame(&mut conn, &Frame::TunnelClose).await;
                            break;
                        }
                    }
                }
            }
        }
    });

    Tunnel {
        incoming: in_rx,
        outgoing: out_tx,
    }
}
