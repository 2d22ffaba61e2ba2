//! Bridge frame codec.
//!
//! Framing is `u32 BE length` + payload; each payload begins with a
//! `u8 version` (currently 1) and a `u8 frame_type`. Strings and byte runs
//! are `u32 BE length` + data; integers are big-endian. Tokenised variants
//! encode header names through the fixed token table with `0xFFFF` as the
//! literal-string escape. Decoders accept legacy single-frame and chunked
//! framings alike; encoders emit chunked tokenised frames by default.

use crate::bridge::tokens::{name_for, token_for, LITERAL_TOKEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Only protocol version in existence.
pub const PROTOCOL_VERSION: u8 = 1;

/// Hard cap on a single frame payload.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Largest body slice emitted per chunk frame.
pub(crate) const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("frame decode error: {0}")]
    Decode(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),

    #[error("frame of {0} bytes exceeds the 64 MiB limit")]
    FrameTooLarge(usize),

    #[error("bridge i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Errors that poison the connection rather than a single request.
    pub fn drops_connection(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVersion(_) | Self::FrameTooLarge(_) | Self::Io(_)
        )
    }
}

mod frame_type {
    pub const LEGACY_REQUEST: u8 = 1;
    pub const LEGACY_RESPONSE: u8 = 2;
    pub const REQUEST_START: u8 = 3;
    pub const REQUEST_CHUNK: u8 = 4;
    pub const REQUEST_END: u8 = 5;
    pub const RESPONSE_START: u8 = 6;
    pub const RESPONSE_CHUNK: u8 = 7;
    pub const RESPONSE_END: u8 = 8;
    pub const TUNNEL_CHUNK: u8 = 9;
    pub const TUNNEL_CLOSE: u8 = 10;
    pub const LEGACY_REQUEST_TOKENS: u8 = 11;
    pub const LEGACY_RESPONSE_TOKENS: u8 = 12;
    pub const REQUEST_START_TOKENS: u8 = 13;
    pub const RESPONSE_START_TOKENS: u8 = 14;
}

/// Request head carried by request-start and legacy request frames.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestHead {
    pub method: String,
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub query: String,
    pub protocol: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Applies the decode-side defaults for empty fields.
    pub fn normalized(mut self) -> Self {
        if self.method.is_empty() {
            self.method = "GET".to_string();
        }
        if self.scheme.is_empty() {
            self.scheme = "http".to_string();
        }
        if self.authority.is_empty() {
            self.authority = "127.0.0.1".to_string();
        }
        if self.path.is_empty() {
            self.path = "/".to_string();
        }
        if self.protocol.is_empty() {
            self.protocol = "1.1".to_string();
        }
        self
    }
}

/// Response head carried by response-start and legacy response frames.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// One decoded bridge frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    LegacyRequest {
        head: RequestHead,
        body: Bytes,
        /// Whether the peer used the tokenised variant; replies mirror it.
        tokenized: bool,
    },
    LegacyResponse {
        head: ResponseHead,
        body: Bytes,
        tokenized: bool,
    },
    RequestStart(RequestHead),
    RequestChunk(Bytes),
    RequestEnd,
    ResponseStart(ResponseHead),
    ResponseChunk(Bytes),
    ResponseEnd,
    TunnelChunk(Bytes),
    TunnelClose,
}

// Field codecs

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn get_string(buf: &mut Bytes) -> Result<String, BridgeError> {
    let raw = get_bytes(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| BridgeError::Decode("non-utf8 string".to_string()))
}

fn get_bytes(buf: &mut Bytes) -> Result<Bytes, BridgeError> {
    if buf.remaining() < 4 {
        return Err(BridgeError::Decode("truncated length field".to_string()));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(BridgeError::Decode("truncated field body".to_string()));
    }
    Ok(buf.split_to(len))
}

fn get_u16(buf: &mut Bytes) -> Result<u16, BridgeError> {
    if buf.remaining() < 2 {
        return Err(BridgeError::Decode("truncated u16 field".to_string()));
    }
    Ok(buf.get_u16())
}

fn put_header_name(buf: &mut BytesMut, name: &str, tokenized: bool) {
    if !tokenized {
        put_string(buf, name);
        return;
    }
    match token_for(name) {
        Some(token) => buf.put_u16(token),
        None => {
            buf.put_u16(LITERAL_TOKEN);
            put_string(buf, name);
        }
    }
}

fn get_header_name(buf: &mut Bytes, tokenized: bool) -> Result<String, BridgeError> {
    if !tokenized {
        return get_string(buf);
    }
    let token = get_u16(buf)?;
    if token == LITERAL_TOKEN {
        return get_string(buf);
    }
    name_for(token)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::Decode(format!("unknown header token {}", token)))
}

fn put_headers(buf: &mut BytesMut, headers: &[(String, String)], tokenized: bool) {
    buf.put_u16(headers.len() as u16);
    for (name, value) in headers {
        put_header_name(buf, name, tokenized);
        put_string(buf, value);
    }
}

fn get_headers(buf: &mut Bytes, tokenized: bool) -> Result<Vec<(String, String)>, BridgeError> {
    let count = get_u16(buf)? as usize;
    let mut headers = Vec::with_capacity(count.min(128));
    for _ in 0..count {
        let name = get_header_name(buf, tokenized)?.to_ascii_lowercase();
        let value = get_string(buf)?;
        headers.push((name, value));
    }
    Ok(headers)
}

fn put_request_head(buf: &mut BytesMut, head: &RequestHead, tokenized: bool) {
    put_string(buf, &head.method);
    put_string(buf, &head.scheme);
    put_string(buf, &head.authority);
    put_string(buf, &head.path);
    put_string(buf, &head.query);
    put_string(buf, &head.protocol);
    put_headers(buf, &head.headers, tokenized);
}

fn get_request_head(buf: &mut Bytes, tokenized: bool) -> Result<RequestHead, BridgeError> {
    Ok(RequestHead {
        method: get_string(buf)?,
        scheme: get_string(buf)?,
        authority: get_string(buf)?,
        path: get_string(buf)?,
        query: get_string(buf)?,
        protocol: get_string(buf)?,
        headers: get_headers(buf, tokenized)?,
    }
    .normalized())
}

fn put_response_head(buf: &mut BytesMut, head: &ResponseHead, tokenized: bool) {
    buf.put_u16(head.status);
    put_headers(buf, &head.headers, tokenized);
}

fn get_response_head(buf: &mut Bytes, tokenized: bool) -> Result<ResponseHead, BridgeError> {
    Ok(ResponseHead {
        status: get_u16(buf)?,
        headers: get_headers(buf, tokenized)?,
    })
}

/// Encodes a frame, length prefix included.
pub fn encode_frame(frame: &Frame) -> BytesMut {
    let mut payload = BytesMut::with_capacity(64);
    payload.put_u8(PROTOCOL_VERSION);
    match frame {
        Frame::LegacyRequest {
            head,
            body,
            tokenized,
        } => {
            payload.put_u8(if *tokenized {
                frame_type::LEGACY_REQUEST_TOKENS
            } else {
                frame_type::LEGACY_REQUEST
            });
            put_request_head(&mut payload, head, *tokenized);
            put_bytes(&mut payload, body);
        }
        Frame::LegacyResponse {
            head,
            body,
            tokenized,
        } => {
            payload.put_u8(if *tokenized {
                frame_type::LEGACY_RESPONSE_TOKENS
            } else {
                frame_type::LEGACY_RESPONSE
            });
            put_response_head(&mut payload, head, *tokenized);
            put_bytes(&mut payload, body);
        }
        Frame::RequestStart(head) => {
            payload.put_u8(frame_type::REQUEST_START_TOKENS);
            put_request_head(&mut payload, head, true);
        }
        Frame::RequestChunk(bytes) => {
            payload.put_u8(frame_type::REQUEST_CHUNK);
            payload.put_slice(bytes);
        }
        Frame::RequestEnd => payload.put_u8(frame_type::REQUEST_END),
        Frame::ResponseStart(head) => {
            payload.put_u8(frame_type::RESPONSE_START_TOKENS);
            put_response_head(&mut payload, head, true);
        }
        Frame::ResponseChunk(bytes) => {
            payload.put_u8(frame_type::RESPONSE_CHUNK);
            payload.put_slice(bytes);
        }
        Frame::ResponseEnd => payload.put_u8(frame_type::RESPONSE_END),
        Frame::TunnelChunk(bytes) => {
            payload.put_u8(frame_type::TUNNEL_CHUNK);
            payload.put_slice(bytes);
        }
        Frame::TunnelClose => payload.put_u8(frame_type::TUNNEL_CLOSE),
    }

    let mut framed = BytesMut::with_capacity(payload.len() + 4);
    framed.put_u32(payload.len() as u32);
    framed.extend_from_slice(&payload);
    framed
}

/// Decodes one frame payload (the bytes after the length prefix).
pub fn decode_frame(payload: Bytes) -> Result<Frame, BridgeError> {
    let mut buf = payload;
    if buf.remaining() < 2 {
        return Err(BridgeError::Decode("payload shorter than header".to_string()));
    }
    let version = buf.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(BridgeError::UnsupportedVersion(version));
    }
    let kind = buf.get_u8();
    let frame = match kind {
        frame_type::LEGACY_REQUEST | frame_type::LEGACY_REQUEST_TOKENS => {
            let tokenized = kind == frame_type::LEGACY_REQUEST_TOKENS;
            Frame::LegacyRequest {
                head: get_request_head(&mut buf, tokenized)?,
                body: get_bytes(&mut buf)?,
                tokenized,
            }
        }
        frame_type::LEGACY_RESPONSE | frame_type::LEGACY_RESPONSE_TOKENS => {
            let tokenized = kind == frame_type::LEGACY_RESPONSE_TOKENS;
            Frame::LegacyResponse {
                head: get_response_head(&mut buf, tokenized)?,
                body: get_bytes(&mut buf)?,
                tokenized,
            }
        }
        frame_type::REQUEST_START => Frame::RequestStart(get_request_head(&mut buf, false)?),
        frame_type::REQUEST_START_TOKENS => Frame::RequestStart(get_request_head(&mut buf, true)?),
        frame_type::REQUEST_CHUNK => Frame::RequestChunk(buf),
        frame_type::REQUEST_END => Frame::RequestEnd,
        frame_type::RESPONSE_START => Frame::ResponseStart(get_response_head(&mut buf, false)?),
        frame_type::RESPONSE_START_TOKENS => {
            Frame::ResponseStart(get_response_head(&mut buf, true)?)
        }
        frame_type::RESPONSE_CHUNK => Frame::ResponseChunk(buf),
        frame_type::RESPONSE_END => Frame::ResponseEnd,
        frame_type::TUNNEL_CHUNK => Frame::TunnelChunk(buf),
        frame_type::TUNNEL_CLOSE => Frame::TunnelClose,
        other => return Err(BridgeError::UnknownFrameType(other)),
    };
    Ok(frame)
}

/// Reads one frame; `Ok(None)` on a clean end-of-stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, BridgeError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(BridgeError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode_frame(Bytes::from(payload)).map(Some)
}

/// Writes and flushes one frame.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame);
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) -> Frame {
        let mut encoded = encode_frame(&frame).freeze();
        let len = encoded.get_u32() as usize;
        assert_eq!(len, encoded.len());
        decode_frame(encoded).unwrap()
    }

    fn sample_request_head() -> RequestHead {
        RequestHead {
            method: "POST".to_string(),
            scheme: "https".to_string(),
            authority: "app.example".to_string(),
            path: "/submit".to_string(),
            query: "a=1".to_string(),
            protocol: "1.1".to_string(),
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("x-custom-tag".to_string(), "7".to_string()),
            ],
        }
    }

    #[test]
    fn request_start_round_trips_with_tokens() {
        let head = sample_request_head();
        match round_trip(Frame::RequestStart(head.clone())) {
            Frame::RequestStart(decoded) => assert_eq!(decoded, head),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn legacy_request_round_trips_in_both_encodings() {
        for tokenized in [false, true] {
            let frame = Frame::LegacyRequest {
                head: sample_request_head(),
                body: Bytes::from_static(b"payload"),
                tokenized,
            };
            assert_eq!(round_trip(frame.clone()), frame);
        }
    }

    #[test]
    fn response_and_tunnel_frames_round_trip() {
        let head = ResponseHead {
            status: 201,
            headers: vec![("set-cookie".to_string(), "a=1".to_string())],
        };
        match round_trip(Frame::ResponseStart(head.clone())) {
            Frame::ResponseStart(decoded) => assert_eq!(decoded, head),
            other => panic!("unexpected frame {:?}", other),
        }
        assert_eq!(
            round_trip(Frame::TunnelChunk(Bytes::from_static(b"raw"))),
            Frame::TunnelChunk(Bytes::from_static(b"raw"))
        );
        assert_eq!(round_trip(Frame::TunnelClose), Frame::TunnelClose);
    }

    #[test]
    fn empty_head_fields_normalize_on_decode() {
        let frame = Frame::RequestStart(RequestHead::default());
        match round_trip(frame) {
            Frame::RequestStart(head) => {
                assert_eq!(head.method, "GET");
                assert_eq!(head.scheme, "http");
                assert_eq!(head.authority, "127.0.0.1");
                assert_eq!(head.path, "/");
                assert_eq!(head.protocol, "1.1");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn wrong_version_and_unknown_type_fail_decode() {
        let mut payload = BytesMut::new();
        payload.put_u8(9);
        payload.put_u8(frame_type::REQUEST_END);
        assert!(matches!(
            decode_frame(payload.freeze()),
            Err(BridgeError::UnsupportedVersion(9))
        ));

        let mut payload = BytesMut::new();
        payload.put_u8(PROTOCOL_VERSION);
        payload.put_u8(99);
        assert!(matches!(
            decode_frame(payload.freeze()),
            Err(BridgeError::UnknownFrameType(99))
        ));
    }

    #[test]
    fn truncated_payloads_are_decode_errors() {
        let mut payload = BytesMut::new();
        payload.put_u8(PROTOCOL_VERSION);
        payload.put_u8(frame_type::REQUEST_START);
        payload.put_u32(100); // promises 100 bytes that never come
        assert!(matches!(
            decode_frame(payload.freeze()),
            Err(BridgeError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn oversize_frames_are_rejected_before_allocation() {
        let mut framed = BytesMut::new();
        framed.put_u32((MAX_FRAME_SIZE + 1) as u32);
        let mut reader = std::io::Cursor::new(framed.to_vec());
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(BridgeError::FrameTooLarge(_))
        ));
    }
}
