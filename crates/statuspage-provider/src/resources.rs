//! Statuspage resources.
//!
//! Every resource maps onto one REST collection below a page. Attributes are
//! carried as untyped JSON; the parent identifiers (`page_id` and, for
//! metrics, `metrics_provider_id`) address the collection and are never sent
//! in the request body.

use crate::provider::ProviderContext;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use statuspage_core::Error;
use std::fmt;
use tracing::{debug, info};

/// Attribute holding the owning page.
pub const PAGE_ID: &str = "page_id";

/// Attribute holding the owning metrics provider.
pub const METRICS_PROVIDER_ID: &str = "metrics_provider_id";

/// Attribute holding the object identifier.
pub const ID: &str = "id";

/// Resource types exposed by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A status-page component
    Component,
    /// A group of components
    ComponentGroup,
    /// An incident or scheduled maintenance
    Incident,
    /// A metric fed by a metrics provider
    Metric,
    /// An external metrics provider
    MetricsProvider,
    /// A notification subscriber
    Subscriber,
    /// An audience-specific access group
    PageAccessGroup,
    /// An audience-specific page user
    PageAccessUser,
}

impl ResourceKind {
    /// Every resource kind.
    pub const ALL: [Self; 8] = [
        Self::Component,
        Self::ComponentGroup,
        Self::Incident,
        Self::Metric,
        Self::MetricsProvider,
        Self::Subscriber,
        Self::PageAccessGroup,
        Self::PageAccessUser,
    ];

    /// Name the host uses for this resource.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Component => "statuspage_component",
            Self::ComponentGroup => "statuspage_component_group",
            Self::Incident => "statuspage_incident",
            Self::Metric => "statuspage_metric",
            Self::MetricsProvider => "statuspage_metric_provider",
            Self::Subscriber => "statuspage_subscriber",
            Self::PageAccessGroup => "statuspage_page_access_group",
            Self::PageAccessUser => "statuspage_page_access_user",
        }
    }

    /// Collection segment under `pages/{page_id}/`.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Component => "components",
            Self::ComponentGroup => "component-groups",
            Self::Incident => "incidents",
            Self::Metric => "metrics",
            Self::MetricsProvider => "metrics_providers",
            Self::Subscriber => "subscribers",
            Self::PageAccessGroup => "page_access_groups",
            Self::PageAccessUser => "page_access_users",
        }
    }

    /// Key wrapping the request body.
    #[must_use]
    pub const fn envelope(self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::ComponentGroup => "component_group",
            Self::Incident => "incident",
            Self::Metric => "metric",
            Self::MetricsProvider => "metrics_provider",
            Self::Subscriber => "subscriber",
            Self::PageAccessGroup => "page_access_group",
            Self::PageAccessUser => "page_access_user",
        }
    }

    /// Human-readable name used in error messages.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::ComponentGroup => "component group",
            Self::Incident => "incident",
            Self::Metric => "metric",
            Self::MetricsProvider => "metrics provider",
            Self::Subscriber => "subscriber",
            Self::PageAccessGroup => "page access group",
            Self::PageAccessUser => "page access user",
        }
    }

    /// Look a kind up by its host type name.
    #[must_use]
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_name() == name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// State of a single resource instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceData {
    /// Remote identifier, once the object exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Attributes, including parent identifiers
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ResourceData {
    /// Build from an attribute map.
    #[must_use]
    pub const fn new(attributes: Map<String, Value>) -> Self {
        Self {
            id: None,
            attributes,
        }
    }

    /// Set the identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set one attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// String attribute, if present.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Non-empty string attribute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the attribute is missing, empty or
    /// not a string.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.get_str(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(Error::InvalidRequest(format!(
                "attribute `{key}` is required"
            ))),
        }
    }

    /// The identifier, required for existing objects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the object has no identifier.
    pub fn require_id(&self) -> Result<&str> {
        match self.id.as_deref() {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(Error::InvalidRequest(
                "resource has no identifier".to_string(),
            )),
        }
    }
}

/// Lifecycle operations of a resource type.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resource: Send + Sync {
    /// Kind handled by this implementation.
    fn kind(&self) -> ResourceKind;

    /// Create the object and return its state.
    async fn create(&self, ctx: &ProviderContext, data: &ResourceData) -> Result<ResourceData>;

    /// Refresh the object; `None` if it no longer exists.
    async fn read(&self, ctx: &ProviderContext, data: &ResourceData)
        -> Result<Option<ResourceData>>;

    /// Apply the planned attributes to the existing object.
    async fn update(&self, ctx: &ProviderContext, data: &ResourceData) -> Result<ResourceData>;

    /// Delete the object. Deleting an object that is already gone succeeds.
    async fn delete(&self, ctx: &ProviderContext, data: &ResourceData) -> Result<()>;
}

/// [`Resource`] backed by the Statuspage REST collection of its kind.
#[derive(Debug, Clone, Copy)]
pub struct ApiResource {
    kind: ResourceKind,
}

impl ApiResource {
    /// Resource for `kind`.
    #[must_use]
    pub const fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }

    fn collection_path(&self, data: &ResourceData) -> Result<String> {
        let page_id = data.require_str(PAGE_ID)?;
        match self.kind {
            ResourceKind::Metric => {
                let provider_id = data.require_str(METRICS_PROVIDER_ID)?;
                Ok(format!(
                    "pages/{page_id}/metrics_providers/{provider_id}/metrics"
                ))
            }
            kind => Ok(format!("pages/{page_id}/{}", kind.collection())),
        }
    }

    fn item_path(&self, data: &ResourceData) -> Result<String> {
        let page_id = data.require_str(PAGE_ID)?;
        let id = data.require_id()?;
        Ok(format!("pages/{page_id}/{}/{id}", self.kind.collection()))
    }

    /// Request body: attributes minus addressing keys, under the envelope key.
    fn payload(&self, data: &ResourceData) -> Value {
        let fields: Map<String, Value> = data
            .attributes
            .iter()
            .filter(|(key, value)| {
                !matches!(key.as_str(), PAGE_ID | METRICS_PROVIDER_ID | ID) && !value.is_null()
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut body = Map::new();
        body.insert(self.kind.envelope().to_string(), Value::Object(fields));
        Value::Object(body)
    }

    /// New state from an API answer, keeping the parent identifiers.
    fn merge(&self, data: &ResourceData, response: Value) -> Result<ResourceData> {
        let Value::Object(mut attributes) = response else {
            return Err(Error::ParseError(format!(
                "expected a JSON object for {}",
                self.kind.description()
            )));
        };

        let id = match attributes.get(ID) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => data.require_id().map(str::to_string).map_err(|_| {
                Error::ParseError(format!(
                    "{} response carries no identifier",
                    self.kind.description()
                ))
            })?,
        };
        attributes.remove(ID);

        for key in [PAGE_ID, METRICS_PROVIDER_ID] {
            if let Some(value) = data.attributes.get(key) {
                attributes.insert(key.to_string(), value.clone());
            }
        }

        Ok(ResourceData {
            id: Some(id),
            attributes,
        })
    }
}

#[async_trait]
impl Resource for ApiResource {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn create(&self, ctx: &ProviderContext, data: &ResourceData) -> Result<ResourceData> {
        let path = self.collection_path(data)?;
        let response: Value = ctx.client().post_json(&path, &self.payload(data)).await?;
        let created = self.merge(data, response)?;

        info!(
            resource = self.kind.type_name(),
            id = created.id.as_deref().unwrap_or_default(),
            "Created resource"
        );
        Ok(created)
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        data: &ResourceData,
    ) -> Result<Option<ResourceData>> {
        let path = self.item_path(data)?;
        match ctx.client().get_json::<Value>(&path, &[]).await {
            Ok(response) => self.merge(data, response).map(Some),
            Err(Error::NotFound(_)) => {
                debug!(resource = self.kind.type_name(), path = %path, "Resource is gone");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn update(&self, ctx: &ProviderContext, data: &ResourceData) -> Result<ResourceData> {
        let path = self.item_path(data)?;
        let response: Value = ctx.client().patch_json(&path, &self.payload(data)).await?;
        self.merge(data, response)
    }

    async fn delete(&self, ctx: &ProviderContext, data: &ResourceData) -> Result<()> {
        let path = self.item_path(data)?;
        match ctx.client().delete(&path).await {
            Ok(()) => {
                info!(resource = self.kind.type_name(), path = %path, "Deleted resource");
                Ok(())
            }
            Err(Error::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StatuspageClientBuilder;
    use secrecy::SecretString;
    use serde_json::json;
    use statuspage_core::RetryPolicy;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(server: &MockServer) -> ProviderContext {
        let client = StatuspageClientBuilder::new(server.uri())
            .unwrap()
            .with_api_key(&SecretString::from("k".to_string()))
            .unwrap()
            .with_retry_policy(RetryPolicy::no_retry())
            .build()
            .unwrap();
        ProviderContext::new(client)
    }

    fn data(value: Value) -> ResourceData {
        match value {
            Value::Object(map) => ResourceData::new(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn kinds_round_trip_through_type_names() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_type_name(kind.type_name()), Some(kind));
        }
        assert_eq!(ResourceKind::from_type_name("statuspage_page"), None);
    }

    #[test]
    fn payload_strips_addressing_keys() {
        let resource = ApiResource::new(ResourceKind::Metric);
        let state = data(json!({
            "page_id": "p1",
            "metrics_provider_id": "mp1",
            "id": "m1",
            "name": "Latency",
            "suffix": null
        }));

        assert_eq!(
            resource.payload(&state),
            json!({"metric": {"name": "Latency"}})
        );
    }

    #[test]
    fn missing_page_id_is_rejected() {
        let resource = ApiResource::new(ResourceKind::Component);
        let err = resource
            .collection_path(&ResourceData::default())
            .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidRequest("attribute `page_id` is required".to_string())
        );
    }

    #[test]
    fn metric_paths_use_provider_collection_for_create_only() {
        let resource = ApiResource::new(ResourceKind::Metric);
        let state = data(json!({"page_id": "p1", "metrics_provider_id": "mp1"})).with_id("m1");

        assert_eq!(
            resource.collection_path(&state).unwrap(),
            "pages/p1/metrics_providers/mp1/metrics"
        );
        assert_eq!(resource.item_path(&state).unwrap(), "pages/p1/metrics/m1");
    }

    #[tokio::test]
    async fn create_wraps_body_and_keeps_page_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pages/p1/components"))
            .and(body_json(json!({"component": {"name": "API", "status": "operational"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "c1",
                "name": "API",
                "status": "operational",
                "page_id": "p1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resource = ApiResource::new(ResourceKind::Component);
        let created = resource
            .create(
                &context(&server),
                &data(json!({"page_id": "p1", "name": "API", "status": "operational"})),
            )
            .await
            .unwrap();

        assert_eq!(created.id.as_deref(), Some("c1"));
        assert_eq!(created.get_str("page_id"), Some("p1"));
        assert!(!created.attributes.contains_key("id"));
    }

    #[tokio::test]
    async fn read_of_missing_object_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pages/p1/incidents/i1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let resource = ApiResource::new(ResourceKind::Incident);
        let state = data(json!({"page_id": "p1"})).with_id("i1");
        assert_eq!(resource.read(&context(&server), &state).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_tolerates_missing_object() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/pages/p1/page_access_users/u1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let resource = ApiResource::new(ResourceKind::PageAccessUser);
        let state = data(json!({"page_id": "p1"})).with_id("u1");
        resource.delete(&context(&server), &state).await.unwrap();
    }

    #[tokio::test]
    async fn update_without_id_never_reaches_network() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let resource = ApiResource::new(ResourceKind::Subscriber);
        let err = resource
            .update(&context(&server), &data(json!({"page_id": "p1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
