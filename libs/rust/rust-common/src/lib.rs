//! Shared library for cross-cutting concerns in auth-platform Rust services.
//!
//! This crate provides centralized implementations for:
//! - Retryability classification for downstream errors
//! - Retry policies with bounded per-attempt timeouts and backoff
//! - Tracing subscriber initialisation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod retry;
pub mod tracing_config;

pub use error::{AttemptTimedOut, Retryable};
pub use retry::{RetryConfig, RetryPolicy};
pub use tracing_config::{init_tracing, TracingConfig};
