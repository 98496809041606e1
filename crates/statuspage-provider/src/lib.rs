//! # statuspage-provider
//!
//! Statuspage resources and data sources for infrastructure-as-code hosts.
//!
//! [`provider::configure`] resolves the API key, builds the authenticated
//! [`client::StatuspageClient`] over the retrying transport and returns the
//! [`provider::ProviderContext`] shared by every operation. The
//! [`provider::Provider`] registry dispatches host type names to resource and
//! data-source implementations and reports failures as diagnostics.
//!
//! ## Example
//!
//! ```no_run
//! use statuspage_provider::{configure, HostInfo, Provider, ProviderConfig, ResourceData};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProviderConfig::new().with_host(HostInfo::new("terraform", "1.9.5", "abc123"));
//! let ctx = configure(&config)?;
//!
//! let provider = Provider::new();
//! let query = ResourceData::default().with_attribute("page_id", "p1");
//! let (components, _warnings) = provider
//!     .read_data_source(&ctx, "statuspage_components", &query)
//!     .await
//!     .map_err(|diags| diags[0].summary.clone())?;
//! println!("{:?}", components.attributes["components"]);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod data_sources;
pub mod diagnostics;
pub mod provider;
pub mod resources;
pub mod user_agent;

pub use client::{StatuspageClient, StatuspageClientBuilder};
pub use config::{HostInfo, ProviderConfig};
pub use data_sources::{DataSource, ListDataSource};
pub use diagnostics::{
    translate_client_error, translate_client_error_diag, Diagnostic, Diagnostics, Severity,
};
pub use provider::{configure, configure_with_env, Provider, ProviderContext};
pub use resources::{ApiResource, Resource, ResourceData, ResourceKind};
pub use statuspage_core::{CancellationToken, Error};
pub use user_agent::user_agent;

/// Result type for provider operations.
pub type Result<T> = statuspage_core::Result<T>;
