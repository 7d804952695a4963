//! Default handler for the structural levels of the tree.
//!
//! Root → tenants → subscriptions → resource groups → resources. Resources
//! whose ARM type is in the catalog are handed the catalog entry so the
//! schema-driven handler takes over below them; other resources are fetched
//! as plain JSON.

use super::arm::{self, ArmResource, Subscription, Tenant};
use super::handler::{
    Expander, ExpanderTestCase, HandlerCategory, MockedRequest, MOCK_SERVER_PLACEHOLDER,
};
use super::node::{ExpanderResponse, ExpanderResult, ItemType, TreeNode};
use super::resource_types::{self, typed_node, ResourceTypeCatalog};
use crate::azure::client::ManagementClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

const TENANTS_API_VERSION: &str = "2020-01-01";
const SUBSCRIPTIONS_API_VERSION: &str = "2020-01-01";
const RESOURCES_API_VERSION: &str = "2021-04-01";

/// Upper bound on `nextLink` pages followed for one listing
const MAX_PAGES: usize = 100;

/// Metadata key (owned by this handler) holding a tenant node's tenant id
pub const TENANT_ID_KEY: &str = "TenantID";

const SOURCE: &str = "DefaultExpander request";

const RESOURCE_GROUP_TEMPLATE: &str =
    "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}";

pub struct DefaultExpander {
    client: Arc<dyn ManagementClient>,
    catalog: Arc<ResourceTypeCatalog>,
}

impl DefaultExpander {
    pub fn new(client: Arc<dyn ManagementClient>, catalog: Arc<ResourceTypeCatalog>) -> Self {
        Self { client, catalog }
    }

    /// Node for an ARM id entered directly rather than reached by expansion.
    ///
    /// Ids matching a catalog template are typed; otherwise the id shape
    /// decides between subscription, resource group and plain resource.
    pub fn node_for_id(&self, id: &str) -> Result<TreeNode> {
        let id = arm::strip_query(id.trim()).trim_end_matches('/');
        anyhow::ensure!(id.starts_with("/subscriptions/"), "{} is not an ARM resource id", id);

        let subscription_id = id.split('/').nth(2).unwrap_or_default().to_string();
        let name = id.rsplit('/').next().unwrap_or_default().to_string();
        let mut node = TreeNode {
            id: id.to_string(),
            name: name.clone(),
            display: name,
            subscription_id,
            ..Default::default()
        };

        let segments = id.trim_matches('/').split('/').count();
        if let Some(def) = self.catalog.lookup_by_path(id) {
            node.item_type = if segments <= 8 {
                ItemType::Resource
            } else {
                ItemType::SubResource
            };
            node.resource_type = Some(def.clone());
            node.expand_url = arm::with_api_version(id, &def.api_version);
            if def.deletable {
                node.delete_url = node.expand_url.clone();
            }
            return Ok(node);
        }

        if segments == 2 {
            node.item_type = ItemType::Subscription;
            node.expand_url = resource_groups_url(id);
        } else if segments == 4
            && resource_types::match_template(RESOURCE_GROUP_TEMPLATE, id).is_some()
        {
            node.item_type = ItemType::ResourceGroup;
            node.expand_url = resources_url(id);
            node.delete_url = arm::with_api_version(id, RESOURCES_API_VERSION);
        } else {
            node.item_type = ItemType::Resource;
            node.expand_url = arm::with_api_version(id, RESOURCES_API_VERSION);
            node.delete_url = node.expand_url.clone();
        }

        Ok(node)
    }

    /// Follow `nextLink` until exhausted; returns the items and a merged body.
    ///
    /// A listing that still has a `nextLink` after `MAX_PAGES` pages fails.
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &str,
    ) -> Result<(Vec<T>, String)> {
        let mut raw: Vec<Value> = Vec::new();
        let mut next = Some(path.to_string());
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                tracing::warn!("Listing {} still had a nextLink after {} pages", what, MAX_PAGES);
                anyhow::bail!(
                    "Stopped listing {} after {} pages; listing incomplete",
                    what,
                    MAX_PAGES
                );
            }

            let body = self
                .client
                .do_request(Method::GET, &url)
                .await
                .with_context(|| format!("Failed to list {} from {}", what, url))?;
            let page = arm::parse_page::<Value>(&body, what)?;
            raw.extend(page.value);
            next = page.next_link.filter(|link| !link.is_empty());
        }

        let items = raw
            .iter()
            .map(|v| serde_json::from_value(v.clone()))
            .collect::<Result<Vec<T>, _>>()
            .with_context(|| format!("Failed to decode {} entries", what))?;

        Ok((items, arm::merge_pages(raw)))
    }

    async fn expand_root(&self, node: &TreeNode) -> Result<(Vec<TreeNode>, String)> {
        let path = arm::with_api_version("/tenants", TENANTS_API_VERSION);
        let (tenants, body) = self.list_all::<Tenant>(&path, "tenant").await?;

        let nodes = tenants
            .into_iter()
            .map(|tenant| {
                let name = tenant.display_name.clone().unwrap_or_else(|| tenant.tenant_id.clone());
                let display = match &tenant.default_domain {
                    Some(domain) => format!("{} ({})", name, domain),
                    None => name.clone(),
                };
                let mut child = TreeNode {
                    id: tenant.id.clone(),
                    parent_id: node.id.clone(),
                    name,
                    display,
                    item_type: ItemType::Tenant,
                    expand_url: arm::with_api_version("/subscriptions", SUBSCRIPTIONS_API_VERSION),
                    ..Default::default()
                };
                child.metadata.insert(TENANT_ID_KEY.to_string(), tenant.tenant_id);
                child
            })
            .collect();

        Ok((nodes, body))
    }

    async fn expand_tenant(&self, node: &TreeNode) -> Result<(Vec<TreeNode>, String)> {
        let (subscriptions, body) = self
            .list_all::<Subscription>(&node.expand_url, "subscription")
            .await?;
        let tenant_id = node.metadata.get(TENANT_ID_KEY);

        let nodes = subscriptions
            .into_iter()
            .filter(|sub| match (tenant_id, &sub.tenant_id) {
                (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
                _ => true,
            })
            .map(|sub| TreeNode {
                id: sub.id.clone(),
                parent_id: node.id.clone(),
                name: sub.display_name.clone(),
                display: sub.display_name.clone(),
                item_type: ItemType::Subscription,
                expand_url: resource_groups_url(&sub.id),
                subscription_id: sub.subscription_id,
                ..Default::default()
            })
            .collect();

        Ok((nodes, body))
    }

    async fn expand_subscription(&self, node: &TreeNode) -> Result<(Vec<TreeNode>, String)> {
        let (groups, body) = self
            .list_all::<ArmResource>(&node.expand_url, "resource group")
            .await?;

        let nodes = groups
            .into_iter()
            .map(|group| TreeNode {
                id: group.id.clone(),
                parent_id: node.id.clone(),
                display: match &group.location {
                    Some(location) => format!("{} ({})", group.name, location),
                    None => group.name.clone(),
                },
                name: group.name,
                item_type: ItemType::ResourceGroup,
                expand_url: resources_url(&group.id),
                delete_url: arm::with_api_version(&group.id, RESOURCES_API_VERSION),
                subscription_id: node.subscription_id.clone(),
                ..Default::default()
            })
            .collect();

        Ok((nodes, body))
    }

    async fn expand_resource_group(&self, node: &TreeNode) -> Result<(Vec<TreeNode>, String)> {
        let (resources, body) = self
            .list_all::<ArmResource>(&node.expand_url, "resource")
            .await?;

        let nodes = resources
            .iter()
            .map(|resource| match self.catalog.lookup_by_arm_type(&resource.resource_type) {
                Some(def) => typed_node(node, def, resource),
                None => TreeNode {
                    id: resource.id.clone(),
                    parent_id: node.id.clone(),
                    name: resource.name.clone(),
                    display: resource.name.clone(),
                    item_type: ItemType::Resource,
                    expand_url: arm::with_api_version(&resource.id, RESOURCES_API_VERSION),
                    delete_url: arm::with_api_version(&resource.id, RESOURCES_API_VERSION),
                    subscription_id: node.subscription_id.clone(),
                    ..Default::default()
                },
            })
            .collect();

        Ok((nodes, body))
    }
}

fn resource_groups_url(subscription_id: &str) -> String {
    arm::with_api_version(&format!("{}/resourceGroups", subscription_id), RESOURCES_API_VERSION)
}

fn resources_url(group_id: &str) -> String {
    arm::with_api_version(&format!("{}/resources", group_id), RESOURCES_API_VERSION)
}

#[async_trait]
impl Expander for DefaultExpander {
    fn name(&self) -> &'static str {
        "DefaultExpander"
    }

    fn category(&self) -> HandlerCategory {
        HandlerCategory::Generic
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(match node.item_type {
            ItemType::Root
            | ItemType::Tenant
            | ItemType::Subscription
            | ItemType::ResourceGroup => true,
            ItemType::Resource => node.resource_type.is_none() && node.is_expandable_by_url(),
            ItemType::SubResource => false,
        })
    }

    async fn expand(&self, node: &TreeNode) -> Result<ExpanderResult> {
        let (nodes, body) = match node.item_type {
            ItemType::Root => self.expand_root(node).await?,
            ItemType::Tenant => self.expand_tenant(node).await?,
            ItemType::Subscription => self.expand_subscription(node).await?,
            ItemType::ResourceGroup => self.expand_resource_group(node).await?,
            ItemType::Resource => {
                // Untyped provider endpoints do not always answer with JSON
                let body = self
                    .client
                    .do_request(Method::GET, &node.expand_url)
                    .await
                    .with_context(|| format!("Failed to fetch {}", node.expand_url))?;
                return Ok(ExpanderResult {
                    response: Some(ExpanderResponse::from_body(body)),
                    nodes: Vec::new(),
                    source_description: SOURCE.to_string(),
                    is_primary_response: true,
                });
            }
            ItemType::SubResource => {
                anyhow::bail!("DefaultExpander does not expand sub-resources")
            }
        };

        Ok(ExpanderResult {
            response: Some(ExpanderResponse::json(body)),
            nodes,
            source_description: SOURCE.to_string(),
            is_primary_response: true,
        })
    }

    async fn delete(&self, node: &TreeNode) -> Result<bool> {
        let owned = match node.item_type {
            ItemType::ResourceGroup => true,
            ItemType::Resource => node.resource_type.is_none(),
            _ => false,
        };
        if !owned || node.delete_url.is_empty() {
            return Ok(false);
        }

        tracing::info!("Deleting {} {}", node.item_type, node.id);
        self.client
            .do_request(Method::DELETE, &node.delete_url)
            .await
            .with_context(|| format!("Failed to delete {}", node.id))?;
        Ok(true)
    }

    fn has_test_cases(&self) -> bool {
        true
    }

    fn test_cases(&self) -> Vec<ExpanderTestCase> {
        const PROVIDERS: &str = "/subscriptions/sub-1/resourceGroups/rg-1/providers";

        let mut tenant = TreeNode {
            id: "/tenants/tenant-a".to_string(),
            parent_id: "root".to_string(),
            name: "Contoso".to_string(),
            item_type: ItemType::Tenant,
            expand_url: arm::with_api_version("/subscriptions", SUBSCRIPTIONS_API_VERSION),
            ..Default::default()
        };
        tenant.metadata.insert(TENANT_ID_KEY.to_string(), "tenant-a".to_string());

        let subscription = TreeNode {
            id: "/subscriptions/sub-1".to_string(),
            name: "Dev".to_string(),
            item_type: ItemType::Subscription,
            subscription_id: "sub-1".to_string(),
            expand_url: resource_groups_url("/subscriptions/sub-1"),
            ..Default::default()
        };

        let group = TreeNode {
            id: "/subscriptions/sub-1/resourceGroups/rg-1".to_string(),
            name: "rg-1".to_string(),
            item_type: ItemType::ResourceGroup,
            subscription_id: "sub-1".to_string(),
            expand_url: resources_url("/subscriptions/sub-1/resourceGroups/rg-1"),
            ..Default::default()
        };

        vec![
            ExpanderTestCase {
                name: "root lists tenants".to_string(),
                node: TreeNode::root(),
                requests: vec![MockedRequest::new(
                    "GET",
                    "/tenants",
                    200,
                    json!({"value": [{
                        "id": "/tenants/tenant-a",
                        "tenantId": "tenant-a",
                        "displayName": "Contoso",
                        "defaultDomain": "contoso.com"
                    }]})
                    .to_string(),
                )],
                check: |result| {
                    anyhow::ensure!(result.nodes.len() == 1, "expected one tenant");
                    let tenant = &result.nodes[0];
                    anyhow::ensure!(tenant.item_type == ItemType::Tenant, "wrong item type");
                    anyhow::ensure!(
                        tenant.display == "Contoso (contoso.com)",
                        "display was {}",
                        tenant.display
                    );
                    anyhow::ensure!(
                        tenant.metadata.get(TENANT_ID_KEY).map(String::as_str) == Some("tenant-a")
                    );
                    Ok(())
                },
            },
            ExpanderTestCase {
                name: "tenant keeps its own subscriptions".to_string(),
                node: tenant,
                requests: vec![MockedRequest::new(
                    "GET",
                    "/subscriptions",
                    200,
                    json!({"value": [
                        {
                            "id": "/subscriptions/sub-1",
                            "subscriptionId": "sub-1",
                            "tenantId": "tenant-a",
                            "displayName": "Dev"
                        },
                        {
                            "id": "/subscriptions/sub-2",
                            "subscriptionId": "sub-2",
                            "tenantId": "tenant-b",
                            "displayName": "Other"
                        }
                    ]})
                    .to_string(),
                )],
                check: |result| {
                    let names: Vec<&str> = result.nodes.iter().map(|n| n.name.as_str()).collect();
                    anyhow::ensure!(names == ["Dev"], "unexpected subscriptions {:?}", names);
                    anyhow::ensure!(result.nodes[0].subscription_id == "sub-1");
                    Ok(())
                },
            },
            ExpanderTestCase {
                name: "subscription follows nextLink".to_string(),
                node: subscription,
                requests: vec![
                    MockedRequest::new(
                        "GET",
                        "/subscriptions/sub-1/resourceGroups",
                        200,
                        json!({
                            "value": [{
                                "id": "/subscriptions/sub-1/resourceGroups/rg-1",
                                "name": "rg-1",
                                "location": "westeurope"
                            }],
                            "nextLink": format!(
                                "{}/subscriptions/sub-1/resourceGroups?{}",
                                MOCK_SERVER_PLACEHOLDER,
                                "api-version=2021-04-01&$skiptoken=page2"
                            )
                        })
                        .to_string(),
                    ),
                    MockedRequest::new(
                        "GET",
                        "/subscriptions/sub-1/resourceGroups",
                        200,
                        json!({"value": [{
                            "id": "/subscriptions/sub-1/resourceGroups/rg-2",
                            "name": "rg-2"
                        }]})
                        .to_string(),
                    ),
                ],
                check: |result| {
                    let names: Vec<&str> = result.nodes.iter().map(|n| n.name.as_str()).collect();
                    anyhow::ensure!(names == ["rg-1", "rg-2"], "unexpected groups {:?}", names);
                    anyhow::ensure!(result.nodes[0].display == "rg-1 (westeurope)");
                    anyhow::ensure!(result.nodes.iter().all(|n| !n.delete_url.is_empty()));
                    Ok(())
                },
            },
            ExpanderTestCase {
                name: "resource group types known resources".to_string(),
                node: group,
                requests: vec![MockedRequest::new(
                    "GET",
                    "/subscriptions/sub-1/resourceGroups/rg-1/resources",
                    200,
                    json!({"value": [
                        {
                            "id": format!("{}/Microsoft.Storage/storageAccounts/acct1", PROVIDERS),
                            "name": "acct1",
                            "type": "Microsoft.Storage/storageAccounts"
                        },
                        {
                            "id": format!("{}/Microsoft.Web/sites/app1", PROVIDERS),
                            "name": "app1",
                            "type": "Microsoft.Web/sites"
                        }
                    ]})
                    .to_string(),
                )],
                check: |result| {
                    anyhow::ensure!(result.nodes.len() == 2, "expected two resources");
                    let account = &result.nodes[0];
                    anyhow::ensure!(
                        account.resource_type.as_ref().is_some_and(|t| t.key == "storage-account"),
                        "storage account should be typed"
                    );
                    anyhow::ensure!(account.expand_url.ends_with("acct1?api-version=2019-06-01"));
                    anyhow::ensure!(
                        result.nodes[1].resource_type.is_none(),
                        "web app is not in the catalog"
                    );
                    anyhow::ensure!(result.nodes.iter().all(|n| n.item_type == ItemType::Resource));
                    Ok(())
                },
            },
        ]
    }
}
