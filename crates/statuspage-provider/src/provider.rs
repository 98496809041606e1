//! Provider bootstrap and the resource registry.
//!
//! [`configure`] turns a [`ProviderConfig`] into a [`ProviderContext`]: the
//! authenticated client with the retrying transport installed, plus the clock.
//! [`Provider`] holds the static mapping from type names to resource and
//! data-source implementations and translates their errors into diagnostics.

use crate::client::{StatuspageClient, StatuspageClientBuilder};
use crate::config::ProviderConfig;
use crate::data_sources::{DataSource, ListDataSource, TRUNCATED};
use crate::diagnostics::{translate_client_error_diag, Diagnostic, Diagnostics};
use crate::resources::{ApiResource, Resource, ResourceData, ResourceKind};
use crate::user_agent::user_agent;
use crate::Result;
use chrono::{DateTime, Utc};
use statuspage_core::client::CORE_USER_AGENT;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use statuspage_core::Error;
use tracing::{debug, info, warn};

/// Shared state handed to every resource operation.
#[derive(Clone)]
pub struct ProviderContext {
    client: StatuspageClient,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl ProviderContext {
    /// Wrap a client, using the system clock.
    #[must_use]
    pub fn new(client: StatuspageClient) -> Self {
        Self {
            client,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// The authenticated API client.
    #[must_use]
    pub const fn client(&self) -> &StatuspageClient {
        &self.client
    }

    /// Current time according to the context clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

/// Build the provider context from configuration.
///
/// Credentials are resolved before anything else, so a missing API key fails
/// without any network activity.
///
/// # Errors
///
/// - [`statuspage_core::Error::MissingCredentials`] if no API key is available
/// - [`statuspage_core::Error::ValidationError`] if a setting is out of range
/// - [`statuspage_core::Error::ConfigError`] if the settings contradict each other
pub fn configure(config: &ProviderConfig) -> Result<ProviderContext> {
    configure_with_env(config, |name| std::env::var(name).ok())
}

/// [`configure`] with an explicit environment lookup.
///
/// # Errors
///
/// See [`configure`].
pub fn configure_with_env<F>(config: &ProviderConfig, lookup: F) -> Result<ProviderContext>
where
    F: Fn(&str) -> Option<String>,
{
    info!("Initializing Statuspage client");

    let api_key = config.resolve_api_key_with(lookup)?;
    config.check()?;

    let client = StatuspageClientBuilder::new(&config.base_url)?
        .with_api_key(&api_key)?
        .with_user_agent(user_agent(&config.host, CORE_USER_AGENT))
        .with_http_config(config.http_config())
        .build()?;

    debug!(
        base_url = %client.base_url(),
        user_agent = client.user_agent(),
        "Statuspage client ready"
    );

    Ok(ProviderContext::new(client))
}

/// Registry of every resource and data source the provider exposes.
pub struct Provider {
    resources: BTreeMap<&'static str, Arc<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Arc<dyn DataSource>>,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("resources", &self.resource_types())
            .field("data_sources", &self.data_source_types())
            .finish()
    }
}

impl Provider {
    /// Register the built-in resources and data sources.
    #[must_use]
    pub fn new() -> Self {
        let mut resources: BTreeMap<&'static str, Arc<dyn Resource>> = BTreeMap::new();
        for kind in ResourceKind::ALL {
            resources.insert(kind.type_name(), Arc::new(ApiResource::new(kind)));
        }

        let mut data_sources: BTreeMap<&'static str, Arc<dyn DataSource>> = BTreeMap::new();
        for source in [ListDataSource::components(), ListDataSource::component_groups()] {
            data_sources.insert(source.type_name(), Arc::new(source));
        }

        Self {
            resources,
            data_sources,
        }
    }

    /// Register (or replace) a resource implementation under its type name.
    #[must_use]
    pub fn with_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.resources.insert(resource.kind().type_name(), resource);
        self
    }

    /// Register (or replace) a data source under its type name.
    #[must_use]
    pub fn with_data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.data_sources.insert(source.type_name(), source);
        self
    }

    /// Names of all registered resources.
    #[must_use]
    pub fn resource_types(&self) -> Vec<&'static str> {
        self.resources.keys().copied().collect()
    }

    /// Names of all registered data sources.
    #[must_use]
    pub fn data_source_types(&self) -> Vec<&'static str> {
        self.data_sources.keys().copied().collect()
    }

    /// Look up a resource implementation.
    #[must_use]
    pub fn resource(&self, type_name: &str) -> Option<Arc<dyn Resource>> {
        self.resources.get(type_name).cloned()
    }

    /// Look up a data-source implementation.
    #[must_use]
    pub fn data_source(&self, type_name: &str) -> Option<Arc<dyn DataSource>> {
        self.data_sources.get(type_name).cloned()
    }

    /// Create a resource.
    pub async fn create(
        &self,
        ctx: &ProviderContext,
        type_name: &str,
        data: &ResourceData,
    ) -> std::result::Result<ResourceData, Diagnostics> {
        let resource = self.lookup_resource(type_name)?;
        resource
            .create(ctx, data)
            .await
            .map_err(|err| failure(&err, &action("creating", resource.kind())))
    }

    /// Refresh a resource; `Ok(None)` means it no longer exists remotely.
    pub async fn read(
        &self,
        ctx: &ProviderContext,
        type_name: &str,
        data: &ResourceData,
    ) -> std::result::Result<Option<ResourceData>, Diagnostics> {
        let resource = self.lookup_resource(type_name)?;
        resource
            .read(ctx, data)
            .await
            .map_err(|err| failure(&err, &action("reading", resource.kind())))
    }

    /// Update a resource in place.
    pub async fn update(
        &self,
        ctx: &ProviderContext,
        type_name: &str,
        data: &ResourceData,
    ) -> std::result::Result<ResourceData, Diagnostics> {
        let resource = self.lookup_resource(type_name)?;
        resource
            .update(ctx, data)
            .await
            .map_err(|err| failure(&err, &action("updating", resource.kind())))
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        ctx: &ProviderContext,
        type_name: &str,
        data: &ResourceData,
    ) -> std::result::Result<(), Diagnostics> {
        let resource = self.lookup_resource(type_name)?;
        resource
            .delete(ctx, data)
            .await
            .map_err(|err| failure(&err, &action("deleting", resource.kind())))
    }

    /// Read a data source.
    ///
    /// The second element carries warnings about a result that is usable but
    /// incomplete.
    pub async fn read_data_source(
        &self,
        ctx: &ProviderContext,
        type_name: &str,
        query: &ResourceData,
    ) -> std::result::Result<(ResourceData, Diagnostics), Diagnostics> {
        let source = self
            .data_source(type_name)
            .ok_or_else(|| vec![unknown_type("data source", type_name)])?;
        let data = source
            .read(ctx, query)
            .await
            .map_err(|err| failure(&err, &format!("error reading {type_name}")))?;

        let mut warnings = Diagnostics::new();
        if data.attributes.get(TRUNCATED) == Some(&serde_json::Value::Bool(true)) {
            warnings.push(
                Diagnostic::warning(format!("{type_name} returned a truncated listing"))
                    .with_detail("the page limit was reached before the API ran out of results"),
            );
        }
        Ok((data, warnings))
    }

    fn lookup_resource(&self, type_name: &str) -> std::result::Result<Arc<dyn Resource>, Diagnostics> {
        self.resource(type_name)
            .ok_or_else(|| vec![unknown_type("resource", type_name)])
    }
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

/// Translate `err`, logging the failures an operator needs to see.
fn failure(err: &Error, msg: &str) -> Diagnostics {
    if err.should_log() {
        warn!(code = err.error_code(), error = %err, "{msg}");
    }
    translate_client_error_diag(err, msg)
}

fn action(verb: &str, kind: ResourceKind) -> String {
    format!("error {verb} {}", kind.description())
}

fn unknown_type(what: &str, type_name: &str) -> Diagnostic {
    Diagnostic::error(format!("unknown {what} type `{type_name}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sources::MockDataSource;
    use crate::resources::MockResource;
    use chrono::TimeZone;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn registers_every_resource_and_data_source() {
        let provider = Provider::new();
        assert_eq!(
            provider.resource_types(),
            vec![
                "statuspage_component",
                "statuspage_component_group",
                "statuspage_incident",
                "statuspage_metric",
                "statuspage_metric_provider",
                "statuspage_page_access_group",
                "statuspage_page_access_user",
                "statuspage_subscriber",
            ]
        );
        assert_eq!(
            provider.data_source_types(),
            vec!["statuspage_component_groups", "statuspage_components"]
        );
        assert!(provider.resource("statuspage_page").is_none());
    }

    #[test]
    fn configure_fails_without_credentials() {
        let err = configure_with_env(&ProviderConfig::new(), no_env).unwrap_err();
        assert!(matches!(err, Error::MissingCredentials(_)));
    }

    #[test]
    fn configure_rejects_invalid_configuration() {
        let config = ProviderConfig::new()
            .with_api_key("key")
            .with_base_url("definitely not a url");
        let err = configure_with_env(&config, no_env).unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[test]
    fn configure_installs_user_agent() {
        let config = ProviderConfig::new()
            .with_api_key("key")
            .with_host(crate::config::HostInfo::new("terraform", "1.9.5", "abc123"));
        let ctx = configure_with_env(&config, no_env).unwrap();

        let ua = ctx.client().user_agent();
        assert!(ua.starts_with("statuspage-provider/"));
        assert!(ua.contains("(terraform 1.9.5; terraform-build abc123)"));
        assert!(ua.ends_with(CORE_USER_AGENT));
    }

    #[test]
    fn context_clock_is_replaceable() {
        let fixed = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let ctx = configure_with_env(&ProviderConfig::new().with_api_key("key"), no_env)
            .unwrap()
            .with_clock(move || fixed);
        assert_eq!(ctx.now(), fixed);
    }

    #[tokio::test]
    async fn unknown_resource_type_is_a_diagnostic() {
        let provider = Provider::new();
        let ctx = configure_with_env(&ProviderConfig::new().with_api_key("key"), no_env).unwrap();

        let diags = provider
            .create(&ctx, "statuspage_widget", &ResourceData::default())
            .await
            .unwrap_err();
        assert_eq!(diags.len(), 1);
        assert!(diags[0].summary.contains("statuspage_widget"));
    }

    #[tokio::test]
    async fn resource_errors_become_diagnostics() {
        let mut resource = MockResource::new();
        resource.expect_kind().return_const(ResourceKind::Incident);
        resource.expect_update().times(1).returning(|_, _| {
            Err(Error::Api {
                status: 422,
                body: r#"{"error":"status is invalid"}"#.to_string(),
            })
        });

        let provider = Provider::new().with_resource(Arc::new(resource));
        let ctx = configure_with_env(&ProviderConfig::new().with_api_key("key"), no_env).unwrap();

        let diags = provider
            .update(&ctx, "statuspage_incident", &ResourceData::default().with_id("i1"))
            .await
            .unwrap_err();
        assert_eq!(
            diags[0].summary,
            r#"error updating incident: API error 422: {"error":"status is invalid"}"#
        );
    }

    #[tokio::test]
    async fn data_source_errors_name_the_data_source() {
        let mut source = MockDataSource::new();
        source
            .expect_type_name()
            .return_const("statuspage_components");
        source
            .expect_read()
            .times(1)
            .returning(|_, _| Err(Error::Timeout("slow".to_string())));

        let provider = Provider::new().with_data_source(Arc::new(source));
        let ctx = configure_with_env(&ProviderConfig::new().with_api_key("key"), no_env).unwrap();

        let diags = provider
            .read_data_source(&ctx, "statuspage_components", &ResourceData::default())
            .await
            .unwrap_err();
        assert_eq!(
            diags[0].summary,
            "error reading statuspage_components (transport error): Request timed out: slow"
        );
    }

    #[tokio::test]
    async fn truncated_listing_is_a_warning() {
        let mut source = MockDataSource::new();
        source
            .expect_type_name()
            .return_const("statuspage_components");
        source.expect_read().times(1).returning(|_, _| {
            Ok(ResourceData::default()
                .with_id("p1")
                .with_attribute(TRUNCATED, true))
        });

        let provider = Provider::new().with_data_source(Arc::new(source));
        let ctx = configure_with_env(&ProviderConfig::new().with_api_key("key"), no_env).unwrap();

        let (data, warnings) = provider
            .read_data_source(&ctx, "statuspage_components", &ResourceData::default())
            .await
            .unwrap();
        assert_eq!(data.id.as_deref(), Some("p1"));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, crate::diagnostics::Severity::Warning);
        assert_eq!(
            warnings[0].summary,
            "statuspage_components returned a truncated listing"
        );
    }
}
