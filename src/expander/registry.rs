//! Handler registry.
//!
//! Built once at startup and shared by `Arc`. The schema and default handlers
//! are constructed first so dependent handlers can borrow the catalog.

use super::default::DefaultExpander;
use super::handler::Expander;
use super::resource_types::{ResourceTypeCatalog, ResourceTypeExpander};
use super::storage_blob::StorageBlobExpander;
use crate::azure::client::ManagementClient;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Builder that fixes construction and registration order
pub struct RegistryBuilder {
    client: Arc<dyn ManagementClient>,
    data_plane: reqwest::Client,
    resource_types: Arc<ResourceTypeExpander>,
    default_expander: Arc<DefaultExpander>,
    specific: Vec<Arc<dyn Expander>>,
    expand_timeout: Option<Duration>,
}

impl RegistryBuilder {
    /// Load the embedded catalog and create the two built-in handlers
    pub fn new(client: Arc<dyn ManagementClient>, data_plane: reqwest::Client) -> Result<Self> {
        let catalog = Arc::new(ResourceTypeCatalog::embedded()?);
        Ok(Self::with_catalog(client, data_plane, catalog))
    }

    pub fn with_catalog(
        client: Arc<dyn ManagementClient>,
        data_plane: reqwest::Client,
        catalog: Arc<ResourceTypeCatalog>,
    ) -> Self {
        let resource_types = Arc::new(ResourceTypeExpander::new(client.clone(), catalog.clone()));
        let default_expander = Arc::new(DefaultExpander::new(client.clone(), catalog));

        Self {
            client,
            data_plane,
            resource_types,
            default_expander,
            specific: Vec::new(),
            expand_timeout: None,
        }
    }

    /// Built-in handlers plus blob listing
    pub fn standard(
        client: Arc<dyn ManagementClient>,
        data_plane: reqwest::Client,
    ) -> Result<Self> {
        let builder = Self::new(client, data_plane)?;
        let blobs = StorageBlobExpander::new(
            builder.client.clone(),
            builder.data_plane.clone(),
            &builder.resource_types,
        )?;

        Ok(builder.register(Arc::new(blobs)))
    }

    pub fn client(&self) -> &Arc<dyn ManagementClient> {
        &self.client
    }

    pub fn data_plane(&self) -> &reqwest::Client {
        &self.data_plane
    }

    pub fn resource_types(&self) -> &ResourceTypeExpander {
        &self.resource_types
    }

    /// Append a resource-type specific handler
    pub fn register(mut self, handler: Arc<dyn Expander>) -> Self {
        self.specific.push(handler);
        self
    }

    pub fn expand_timeout(mut self, timeout: Duration) -> Self {
        self.expand_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ExpanderRegistry {
        let mut handlers: Vec<Arc<dyn Expander>> = Vec::with_capacity(self.specific.len() + 2);
        handlers.push(self.default_expander.clone());
        handlers.push(self.resource_types.clone());
        handlers.extend(self.specific);

        for handler in &handlers {
            tracing::debug!("Registered expander {} ({:?})", handler.name(), handler.category());
        }

        ExpanderRegistry {
            handlers: Arc::new(handlers),
            resource_types: self.resource_types,
            default_expander: self.default_expander,
            expand_timeout: self.expand_timeout,
        }
    }
}

/// Ordered set of expansion handlers
#[derive(Clone)]
pub struct ExpanderRegistry {
    handlers: Arc<Vec<Arc<dyn Expander>>>,
    resource_types: Arc<ResourceTypeExpander>,
    default_expander: Arc<DefaultExpander>,
    expand_timeout: Option<Duration>,
}

impl ExpanderRegistry {
    /// Production registry without a deadline
    pub fn standard(
        client: Arc<dyn ManagementClient>,
        data_plane: reqwest::Client,
    ) -> Result<Self> {
        Ok(RegistryBuilder::standard(client, data_plane)?.build())
    }

    /// Handlers in registration order
    pub fn handlers(&self) -> &[Arc<dyn Expander>] {
        &self.handlers
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Expander>> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    pub fn resource_types(&self) -> &Arc<ResourceTypeExpander> {
        &self.resource_types
    }

    pub fn default_expander(&self) -> &Arc<DefaultExpander> {
        &self.default_expander
    }

    pub fn catalog(&self) -> &Arc<ResourceTypeCatalog> {
        self.resource_types.catalog()
    }

    pub fn expand_timeout(&self) -> Option<Duration> {
        self.expand_timeout
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
