//! User-agent construction.

use crate::config::HostInfo;

/// Version of this provider.
pub const PROVIDER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Product token of this provider.
pub const PROVIDER_NAME: &str = "statuspage-provider";

/// Build the user agent sent with every API request.
///
/// Format: `statuspage-provider/<version> (<host> <host-version>; <host>-build <build>) <wrapped>`,
/// where `wrapped` is the user agent of the transport underneath.
#[must_use]
pub fn user_agent(host: &HostInfo, wrapped: &str) -> String {
    let product = format!(
        "{PROVIDER_NAME}/{PROVIDER_VERSION} ({name} {version}; {name}-build {build})",
        name = host.name,
        version = host.version,
        build = host.build,
    );

    let wrapped = wrapped.trim();
    if wrapped.is_empty() {
        product
    } else {
        format!("{product} {wrapped}")
    }
}
