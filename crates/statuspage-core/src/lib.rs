//! # statuspage-core
//!
//! Transport foundation for the Statuspage provider.
//!
//! Every API call made by the provider is a *logical call* that the
//! [`transport::RetryingTransport`] realises as one or more physical HTTP
//! exchanges, governed by a [`retry::RetryPolicy`].
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy shared by the transport and the provider
//! - [`retry`] - Attempt budget, backoff schedule and retry predicates
//! - [`transport`] - The retrying transport and the `HttpSend` seam
//! - [`client`] - HTTP client configuration and the base-URL service client

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod retry;
pub mod transport;

// Re-export commonly used types
pub use client::{ClientConfig, ServiceClient, ServiceClientBuilder};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use tokio_util::sync::CancellationToken;
pub use transport::{BufferedResponse, HttpSend, RetryingTransport};
