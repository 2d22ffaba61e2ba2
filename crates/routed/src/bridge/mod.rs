//! Native front-end bridge: a framed binary transport that hands HTTP
//! requests from an external front-end process to the in-process pipeline.
//!
//! The wire protocol is length-prefixed, versioned frames (§ [`frame`]),
//! with a fixed header-name token table (§ [`tokens`]) for compact heads.
//! The [`runtime`] side accepts connections over a Unix socket (preferred)
//! or TCP and feeds [`crate::engine::Engine::handle_request`]; the
//! [`client`] side is the pooled front-end used by native fronts and the
//! test suite. Upgraded (detached) responses switch the socket into raw
//! byte tunnelling.

pub mod client;
pub mod frame;
pub mod runtime;
pub mod tokens;

pub use client::{BridgeClient, ClientResponse};
pub use frame::{BridgeError, Frame, RequestHead, ResponseHead, MAX_FRAME_SIZE, PROTOCOL_VERSION};
