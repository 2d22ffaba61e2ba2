//! Data models and domain types shared across the framework.
//!
//! Everything in here is transport-neutral: the same [`request::Request`]
//! and [`response::Response`] values flow through the pipeline whether they
//! arrived over the in-process HTTP adapter or the native bridge.

pub mod error;
pub mod headers;
pub mod param;
pub mod request;
pub mod response;
