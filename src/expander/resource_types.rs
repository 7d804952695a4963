//! Resource-type catalog and the schema-driven handler.
//!
//! Resource types are loaded from JSON files embedded at compile time, so new
//! ARM types can be browsed without code changes. Each definition names an
//! ARM path template; fixed `children` become synthetic child nodes and an
//! `item_type` turns the type into a collection whose `value` entries become
//! nodes of that item type.

use super::arm::{self, ArmResource};
use super::handler::{Expander, ExpanderTestCase, HandlerCategory, MockedRequest};
use super::node::{ExpanderResponse, ExpanderResult, ItemType, TreeNode};
use crate::azure::client::ManagementClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/storage.json"),
    include_str!("../resources/compute.json"),
];

/// Resource type definition from JSON
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceTypeDef {
    /// Catalog key, filled in from the JSON map key
    #[serde(skip)]
    pub key: String,
    pub display: String,
    /// ARM `type` reported by resource listings, if the type is tracked
    #[serde(default)]
    pub arm_type: Option<String>,
    /// Path template with `{placeholder}` segments
    pub template_url: String,
    pub api_version: String,
    /// Keys of fixed child types
    #[serde(default)]
    pub children: Vec<String>,
    /// Key of the type of each listed item, for collections
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub deletable: bool,
}

/// Root structure of resources/*.json
#[derive(Debug, Deserialize)]
struct ResourceFile {
    #[serde(default)]
    resource_types: HashMap<String, ResourceTypeDef>,
}

/// All known resource types, in key order
#[derive(Debug)]
pub struct ResourceTypeCatalog {
    types: Vec<Arc<ResourceTypeDef>>,
    by_key: HashMap<String, usize>,
}

impl ResourceTypeCatalog {
    /// Load the catalog compiled into the binary
    pub fn embedded() -> Result<Self> {
        Self::from_json_sources(RESOURCE_FILES)
    }

    /// Load and validate a catalog from JSON documents
    pub fn from_json_sources(sources: &[&str]) -> Result<Self> {
        let mut merged = BTreeMap::new();
        for (index, content) in sources.iter().enumerate() {
            let file: ResourceFile = serde_json::from_str(content)
                .with_context(|| format!("Failed to parse resource type file #{}", index))?;
            for (key, mut def) in file.resource_types {
                def.key = key.clone();
                if merged.insert(key.clone(), def).is_some() {
                    anyhow::bail!("Resource type {} is defined twice", key);
                }
            }
        }

        let types: Vec<Arc<ResourceTypeDef>> = merged.into_values().map(Arc::new).collect();
        let by_key = types
            .iter()
            .enumerate()
            .map(|(i, def)| (def.key.clone(), i))
            .collect();
        let catalog = Self { types, by_key };
        catalog.validate()?;

        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        for def in &self.types {
            for child_key in &def.children {
                let child = self
                    .get(child_key)
                    .with_context(|| format!("{} lists unknown child {}", def.key, child_key))?;
                let suffix = child
                    .template_url
                    .strip_prefix(def.template_url.as_str())
                    .with_context(|| {
                        format!("{} does not extend the template of {}", child.key, def.key)
                    })?;
                anyhow::ensure!(
                    !suffix.contains('{'),
                    "Fixed child {} of {} has placeholders in its suffix",
                    child.key,
                    def.key
                );
            }
            if let Some(item_key) = &def.item_type {
                let item = self
                    .get(item_key)
                    .with_context(|| format!("{} lists unknown item type {}", def.key, item_key))?;
                anyhow::ensure!(
                    item.template_url.starts_with(def.template_url.as_str()),
                    "{} does not extend the template of {}",
                    item.key,
                    def.key
                );
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Arc<ResourceTypeDef>> {
        self.by_key.get(key).map(|i| &self.types[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceTypeDef>> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Find the type for an ARM `type` string (case-insensitive)
    pub fn lookup_by_arm_type(&self, arm_type: &str) -> Option<&Arc<ResourceTypeDef>> {
        self.types.iter().find(|def| {
            def.arm_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(arm_type))
        })
    }

    /// Find the type whose template matches an ARM path
    pub fn lookup_by_path(&self, path: &str) -> Option<&Arc<ResourceTypeDef>> {
        let path = arm::strip_query(path);
        self.types
            .iter()
            .find(|def| match_template(&def.template_url, path).is_some())
    }

    pub fn lookup_by_template(&self, template_url: &str) -> Option<&Arc<ResourceTypeDef>> {
        self.types.iter().find(|def| def.template_url == template_url)
    }
}

/// Match an ARM path against a template, returning the placeholder values.
///
/// Literal segments compare case-insensitively, as ARM ids are not
/// consistently cased (`resourceGroups` vs `resourcegroups`).
pub fn match_template(template: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let template_segments: Vec<&str> = template.trim_matches('/').split('/').collect();
    let path_segments: Vec<&str> = arm::strip_query(path).trim_matches('/').split('/').collect();
    if template_segments.len() != path_segments.len() {
        return None;
    }

    let mut values = BTreeMap::new();
    for (t, p) in template_segments.iter().zip(&path_segments) {
        if let Some(name) = t.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if p.is_empty() {
                return None;
            }
            values.insert(name.to_string(), p.to_string());
        } else if !t.eq_ignore_ascii_case(p) {
            return None;
        }
    }

    Some(values)
}

/// Handler for nodes carrying a catalog resource type
pub struct ResourceTypeExpander {
    client: Arc<dyn ManagementClient>,
    catalog: Arc<ResourceTypeCatalog>,
}

impl ResourceTypeExpander {
    pub fn new(client: Arc<dyn ManagementClient>, catalog: Arc<ResourceTypeCatalog>) -> Self {
        Self { client, catalog }
    }

    pub fn catalog(&self) -> &Arc<ResourceTypeCatalog> {
        &self.catalog
    }

    fn fixed_child(
        &self,
        parent: &TreeNode,
        parent_def: &ResourceTypeDef,
        child_def: &Arc<ResourceTypeDef>,
    ) -> TreeNode {
        // validated at load: the child template extends the parent's
        let suffix = &child_def.template_url[parent_def.template_url.len()..];
        let path = format!("{}{}", arm::strip_query(&parent.expand_url), suffix);

        TreeNode {
            id: path.clone(),
            parent_id: parent.id.clone(),
            name: child_def.display.clone(),
            display: child_def.display.clone(),
            item_type: ItemType::SubResource,
            resource_type: Some(child_def.clone()),
            expand_url: arm::with_api_version(&path, &child_def.api_version),
            subscription_id: parent.subscription_id.clone(),
            ..Default::default()
        }
    }
}

/// Node for an ARM resource of a known type
pub(crate) fn typed_node(
    parent: &TreeNode,
    def: &Arc<ResourceTypeDef>,
    resource: &ArmResource,
) -> TreeNode {
    let item_type = if parent.item_type == ItemType::ResourceGroup {
        ItemType::Resource
    } else {
        ItemType::SubResource
    };

    TreeNode {
        id: resource.id.clone(),
        parent_id: parent.id.clone(),
        name: resource.name.clone(),
        display: resource.name.clone(),
        item_type,
        resource_type: Some(def.clone()),
        expand_url: arm::with_api_version(&resource.id, &def.api_version),
        delete_url: if def.deletable {
            arm::with_api_version(&resource.id, &def.api_version)
        } else {
            String::new()
        },
        subscription_id: parent.subscription_id.clone(),
        ..Default::default()
    }
}

#[async_trait]
impl Expander for ResourceTypeExpander {
    fn name(&self) -> &'static str {
        "ResourceTypeExpander"
    }

    fn category(&self) -> HandlerCategory {
        HandlerCategory::Schema
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(node.resource_type.is_some())
    }

    async fn expand(&self, node: &TreeNode) -> Result<ExpanderResult> {
        let def = node
            .resource_type
            .as_ref()
            .with_context(|| format!("Node {} has no resource type", node.id))?;
        anyhow::ensure!(
            node.is_expandable_by_url(),
            "Node {} of type {} has no expand URL",
            node.id,
            def.key
        );

        let body = self
            .client
            .do_request(Method::GET, &node.expand_url)
            .await
            .with_context(|| format!("Failed to fetch {}", node.expand_url))?;

        let mut nodes = Vec::new();
        for child_key in &def.children {
            let child_def = self
                .catalog
                .get(child_key)
                .with_context(|| format!("Unknown resource type {}", child_key))?;
            nodes.push(self.fixed_child(node, def, child_def));
        }

        if let Some(item_key) = &def.item_type {
            let item_def = self
                .catalog
                .get(item_key)
                .with_context(|| format!("Unknown resource type {}", item_key))?;
            let page = arm::parse_page::<ArmResource>(&body, &def.display)?;
            nodes.extend(page.value.iter().map(|item| typed_node(node, item_def, item)));
        }

        Ok(ExpanderResult {
            response: Some(ExpanderResponse::json(body)),
            nodes,
            source_description: "ResourceTypeExpander request".to_string(),
            is_primary_response: true,
        })
    }

    async fn delete(&self, node: &TreeNode) -> Result<bool> {
        let Some(def) = node.resource_type.as_ref() else {
            return Ok(false);
        };
        if !def.deletable || node.delete_url.is_empty() {
            return Ok(false);
        }

        tracing::info!("Deleting {} ({})", node.id, def.key);
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
        let account_id = concat!(
            "/subscriptions/sub-1/resourceGroups/rg-1",
            "/providers/Microsoft.Storage/storageAccounts/acct1"
        );
        let containers_path = format!("{}/blobServices/default/containers", account_id);
        let containers_page: Vec<_> = ["logs", "images"]
            .iter()
            .map(|name| {
                json!({
                    "id": format!("{}/{}", containers_path, name),
                    "name": name,
                    "type": "Microsoft.Storage/storageAccounts/blobServices/containers"
                })
            })
            .collect();

        let account = TreeNode {
            id: account_id.to_string(),
            name: "acct1".to_string(),
            item_type: ItemType::Resource,
            resource_type: self.catalog.get("storage-account").cloned(),
            expand_url: arm::with_api_version(account_id, "2019-06-01"),
            ..Default::default()
        };
        let containers = TreeNode {
            id: containers_path.clone(),
            name: "Containers".to_string(),
            item_type: ItemType::SubResource,
            resource_type: self.catalog.get("storage-containers").cloned(),
            expand_url: arm::with_api_version(&containers_path, "2019-06-01"),
            ..Default::default()
        };

        vec![
            ExpanderTestCase {
                name: "storage account lists containers child".to_string(),
                node: account,
                requests: vec![MockedRequest::new(
                    "GET",
                    account_id,
                    200,
                    json!({"id": account_id, "name": "acct1"}).to_string(),
                )],
                check: |result| {
                    anyhow::ensure!(result.is_primary_response, "result should be primary");
                    anyhow::ensure!(
                        result.nodes.len() == 1,
                        "expected 1 child, got {}",
                        result.nodes.len()
                    );
                    let child = &result.nodes[0];
                    anyhow::ensure!(child.name == "Containers", "unexpected child {}", child.name);
                    anyhow::ensure!(
                        child
                            .expand_url
                            .ends_with("/blobServices/default/containers?api-version=2019-06-01"),
                        "unexpected expand url {}",
                        child.expand_url
                    );
                    Ok(())
                },
            },
            ExpanderTestCase {
                name: "containers collection lists items".to_string(),
                node: containers,
                requests: vec![MockedRequest::new(
                    "GET",
                    containers_path.clone(),
                    200,
                    json!({"value": containers_page}).to_string(),
                )],
                check: |result| {
                    let names: Vec<&str> = result.nodes.iter().map(|n| n.name.as_str()).collect();
                    anyhow::ensure!(names == ["logs", "images"], "unexpected children {:?}", names);
                    let typed = result.nodes.iter().all(|n| {
                        n.resource_type
                            .as_ref()
                            .is_some_and(|t| t.key == "storage-container")
                    });
                    anyhow::ensure!(typed, "children should be typed as containers");
                    Ok(())
                },
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTAINER_TEMPLATE: &str = concat!(
        "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}",
        "/providers/Microsoft.Storage/storageAccounts/{accountName}",
        "/blobServices/default/containers/{containerName}"
    );
    const ACCOUNT_PATH: &str =
        "/subscriptions/s1/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/acct";

    #[test]
    fn test_embedded_catalog_loads() {
        let catalog = ResourceTypeCatalog::embedded().unwrap();
        assert!(!catalog.is_empty());
        let container = catalog.get("storage-container").unwrap();
        assert_eq!(container.key, "storage-container");
        assert_eq!(container.template_url, CONTAINER_TEMPLATE);
    }

    #[test]
    fn test_catalog_iterates_in_key_order() {
        let catalog = ResourceTypeCatalog::embedded().unwrap();
        let keys: Vec<&str> = catalog.iter().map(|d| d.key.as_str()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_lookup_by_arm_type_ignores_case() {
        let catalog = ResourceTypeCatalog::embedded().unwrap();
        let def = catalog.lookup_by_arm_type("microsoft.storage/STORAGEACCOUNTS").unwrap();
        assert_eq!(def.key, "storage-account");
        assert!(catalog.lookup_by_arm_type("Microsoft.Web/sites").is_none());
    }

    #[test]
    fn test_lookup_by_path() {
        let catalog = ResourceTypeCatalog::embedded().unwrap();
        let def = catalog
            .lookup_by_path(concat!(
                "/subscriptions/s/resourcegroups/rg/providers",
                "/Microsoft.Compute/virtualMachines/vm1?api-version=1"
            ))
            .unwrap();
        assert_eq!(def.key, "compute-vm");
    }

    #[test]
    fn test_match_template_extracts_values() {
        let path = format!("{}/blobServices/default/containers/logs", ACCOUNT_PATH);
        let values = match_template(CONTAINER_TEMPLATE, &path).unwrap();
        assert_eq!(values["subscriptionId"], "s1");
        assert_eq!(values["accountName"], "acct");
        assert_eq!(values["containerName"], "logs");
    }

    #[test]
    fn test_match_template_rejects_other_shapes() {
        assert!(match_template(CONTAINER_TEMPLATE, "/subscriptions/s1").is_none());
        let share = format!("{}/fileServices/default/shares/logs", ACCOUNT_PATH);
        assert!(match_template(CONTAINER_TEMPLATE, &share).is_none());
    }

    #[test]
    fn test_unknown_child_is_rejected() {
        let json = r#"{"resource_types":{"a":{
            "display":"A","template_url":"/a/{x}","api_version":"1","children":["missing"]}}}"#;
        let err = ResourceTypeCatalog::from_json_sources(&[json]).unwrap_err();
        assert!(err.to_string().contains("unknown child"));
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let json =
            r#"{"resource_types":{"a":{"display":"A","template_url":"/a","api_version":"1"}}}"#;
        assert!(ResourceTypeCatalog::from_json_sources(&[json, json]).is_err());
    }

    #[test]
    fn test_child_must_extend_parent_template() {
        let json = r#"{"resource_types":{
            "a":{"display":"A","template_url":"/a/{x}","api_version":"1","children":["b"]},
            "b":{"display":"B","template_url":"/b/child","api_version":"1"}}}"#;
        let err = ResourceTypeCatalog::from_json_sources(&[json]).unwrap_err();
        assert!(err.to_string().contains("does not extend"));
    }
}
