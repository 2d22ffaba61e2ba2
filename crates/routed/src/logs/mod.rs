//! Logging configuration and formatters.

pub mod logger;
