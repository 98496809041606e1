//! Read-only data sources listing collections of a page.

use crate::provider::ProviderContext;
use crate::resources::{ResourceData, ResourceKind, PAGE_ID};
use crate::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use statuspage_core::Error;
use tracing::{debug, warn};

/// Items requested per page of a listing.
pub const PER_PAGE: usize = 100;

/// Upper bound on pages fetched for one listing.
pub const MAX_PAGES: u32 = 50;

/// Query attribute holding an attribute-equality filter.
pub const FILTER: &str = "filter";

/// Attribute recording when the listing was taken.
pub const READ_AT: &str = "read_at";

/// Attribute set when the page limit cut the listing short.
pub const TRUNCATED: &str = "truncated";

/// A read-only data source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Name the host uses for this data source.
    fn type_name(&self) -> &'static str;

    /// Evaluate the data source for `query`.
    async fn read(&self, ctx: &ProviderContext, query: &ResourceData) -> Result<ResourceData>;
}

/// Lists every object of one collection under a page.
#[derive(Debug, Clone, Copy)]
pub struct ListDataSource {
    type_name: &'static str,
    kind: ResourceKind,
    output: &'static str,
    max_pages: u32,
}

impl ListDataSource {
    /// `statuspage_components`
    #[must_use]
    pub const fn components() -> Self {
        Self {
            type_name: "statuspage_components",
            kind: ResourceKind::Component,
            output: "components",
            max_pages: MAX_PAGES,
        }
    }

    /// `statuspage_component_groups`
    #[must_use]
    pub const fn component_groups() -> Self {
        Self {
            type_name: "statuspage_component_groups",
            kind: ResourceKind::ComponentGroup,
            output: "component_groups",
            max_pages: MAX_PAGES,
        }
    }

    /// Stop after `pages` pages instead of [`MAX_PAGES`].
    #[must_use]
    pub const fn with_max_pages(mut self, pages: u32) -> Self {
        self.max_pages = pages;
        self
    }

    /// Every item of the collection, and whether the page limit was hit.
    async fn fetch_all(&self, ctx: &ProviderContext, page_id: &str) -> Result<(Vec<Value>, bool)> {
        let path = format!("pages/{page_id}/{}", self.kind.collection());
        let mut items = Vec::new();

        for page in 1..=self.max_pages {
            let params = [("page", page.to_string()), ("per_page", PER_PAGE.to_string())];
            let batch: Vec<Value> = ctx.client().get_json(&path, &params).await?;
            let fetched = batch.len();
            items.extend(batch);

            debug!(path = %path, page, fetched, "Fetched listing page");

            if fetched < PER_PAGE {
                return Ok((items, false));
            }
        }

        warn!(
            path = %path,
            max_pages = self.max_pages,
            "Listing truncated at page limit"
        );
        Ok((items, true))
    }
}

#[async_trait]
impl DataSource for ListDataSource {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    async fn read(&self, ctx: &ProviderContext, query: &ResourceData) -> Result<ResourceData> {
        let page_id = query.require_str(PAGE_ID)?;
        let filter = match query.attributes.get(FILTER) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(filter)) => filter.clone(),
            Some(_) => {
                return Err(Error::InvalidRequest(format!(
                    "`{FILTER}` must be an object"
                )))
            }
        };

        let (items, truncated) = self.fetch_all(ctx, page_id).await?;
        let items: Vec<Value> = items
            .into_iter()
            .filter(|item| matches_filter(item, &filter))
            .collect();

        let mut attributes = Map::new();
        attributes.insert(PAGE_ID.to_string(), Value::String(page_id.to_string()));
        if !filter.is_empty() {
            attributes.insert(FILTER.to_string(), Value::Object(filter));
        }
        attributes.insert(self.output.to_string(), Value::Array(items));
        attributes.insert(READ_AT.to_string(), Value::String(ctx.now().to_rfc3339()));
        attributes.insert(TRUNCATED.to_string(), Value::Bool(truncated));

        Ok(ResourceData {
            id: Some(page_id.to_string()),
            attributes,
        })
    }
}

fn matches_filter(item: &Value, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(key, expected)| item.get(key) == Some(expected))
}
