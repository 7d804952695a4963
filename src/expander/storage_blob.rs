//! Blob listing for storage containers.
//!
//! Expanding a blob container adds a synthetic `Blobs` node. That node is
//! flagged so the default and schema handlers leave it alone; expanding it
//! resolves the account key and blob endpoint through ARM, then lists the
//! container directly against the storage data plane with a Shared Key
//! signed request.

use super::handler::{Expander, ExpanderTestCase, MockedRequest, MOCK_SERVER_PLACEHOLDER};
use super::node::{
    ExpanderResponse, ExpanderResult, ItemType, ResponseType, Suppression, TreeNode,
    EXPAND_URL_NOT_SUPPORTED,
};
use super::resource_types::{match_template, ResourceTypeDef, ResourceTypeExpander};
use crate::azure::client::ManagementClient;
use crate::azure::http::read_body;
use crate::azure::shared_key::{SharedKeyCredential, MS_VERSION_HEADER};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::{Method, Request};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use url::Url;

/// Namespace tag of nodes owned by this handler
pub const STORAGE_BLOB_NAMESPACE: &str = "storageBlob";

/// Metadata key (owned by this handler) with the ARM id of the listed container
pub const CONTAINER_ID_KEY: &str = "ContainerID";

pub const CONTAINER_TEMPLATE: &str = concat!(
    "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}",
    "/providers/Microsoft.Storage/storageAccounts/{accountName}",
    "/blobServices/default/containers/{containerName}"
);

const STORAGE_API_VERSION: &str = "2019-06-01";
const BLOB_SERVICE_VERSION: &str = "2018-03-28";
const BLOBS_NODE_SUFFIX: &str = "/<blobs>";
const SOURCE: &str = "StorageBlobExpander request";

#[derive(Debug, Deserialize)]
struct ListKeysResponse {
    #[serde(default)]
    keys: Vec<StorageKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageKey {
    key_name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct StorageAccount {
    properties: AccountProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountProperties {
    primary_endpoints: PrimaryEndpoints,
}

#[derive(Debug, Deserialize)]
struct PrimaryEndpoints {
    #[serde(default)]
    blob: Option<String>,
}

pub struct StorageBlobExpander {
    client: Arc<dyn ManagementClient>,
    http: reqwest::Client,
    container_type: Arc<ResourceTypeDef>,
}

impl StorageBlobExpander {
    /// `http` is the transport for direct data-plane calls; the container
    /// resource type is taken from the schema handler's catalog.
    pub fn new(
        client: Arc<dyn ManagementClient>,
        http: reqwest::Client,
        resource_types: &ResourceTypeExpander,
    ) -> Result<Self> {
        let container_type = resource_types
            .catalog()
            .lookup_by_template(CONTAINER_TEMPLATE)
            .cloned()
            .context("Resource type catalog has no blob container type")?;

        Ok(Self {
            client,
            http,
            container_type,
        })
    }

    fn is_container(&self, node: &TreeNode) -> bool {
        node.resource_type
            .as_ref()
            .is_some_and(|t| t.template_url == self.container_type.template_url)
    }

    fn blobs_node(&self, container: &TreeNode) -> TreeNode {
        let mut blobs = container.child(BLOBS_NODE_SUFFIX, "Blobs", ItemType::SubResource);
        blobs.namespace = STORAGE_BLOB_NAMESPACE.to_string();
        blobs.expand_url = EXPAND_URL_NOT_SUPPORTED.to_string();
        blobs.set_suppressed(Suppression::SchemaExpand);
        blobs.set_suppressed(Suppression::GenericExpand);
        blobs
            .metadata
            .insert(CONTAINER_ID_KEY.to_string(), container.id.clone());
        blobs
    }

    // TODO: cache key and endpoint per account, dropping the entry when the
    // data plane answers 403 (rotated key)
    async fn account_key(&self, account_id: &str) -> Result<String> {
        let path = format!("{}/listKeys?api-version={}", account_id, STORAGE_API_VERSION);
        let body = self.client.do_request(Method::POST, &path).await?;
        let response: ListKeysResponse =
            serde_json::from_str(&body).context("Failed to decode listKeys response")?;

        let key = response.keys.first().context("Storage account returned no keys")?;
        tracing::debug!("Using storage key {} for {}", key.key_name, account_id);

        Ok(key.value.clone())
    }

    async fn blob_endpoint(&self, account_id: &str) -> Result<String> {
        let path = format!("{}?api-version={}", account_id, STORAGE_API_VERSION);
        let body = self.client.do_request(Method::GET, &path).await?;
        let account: StorageAccount =
            serde_json::from_str(&body).context("Failed to decode storage account response")?;

        account
            .properties
            .primary_endpoints
            .blob
            .filter(|b| !b.is_empty())
            .context("Storage account has no blob endpoint")
    }

    async fn list_blobs(&self, node: &TreeNode) -> Result<ExpanderResult> {
        let container_id = node
            .metadata
            .get(CONTAINER_ID_KEY)
            .with_context(|| format!("Node {} has no {} metadata", node.id, CONTAINER_ID_KEY))?;
        let values = match_template(CONTAINER_TEMPLATE, container_id)
            .with_context(|| format!("{} is not a blob container id", container_id))?;
        let account_name = &values["accountName"];
        let container_name = &values["containerName"];

        let split = container_id
            .to_ascii_lowercase()
            .find("/blobservices/")
            .with_context(|| format!("{} is not a blob container id", container_id))?;
        let account_id = &container_id[..split];

        let key = self
            .account_key(account_id)
            .await
            .context("Failed to resolve storage account key")?;
        let endpoint = self
            .blob_endpoint(account_id)
            .await
            .context("Failed to resolve blob endpoint")?;
        let credential = SharedKeyCredential::new(account_name, &key)?;

        let url = format!(
            "{}/{}?restype=container&comp=list",
            endpoint.trim_end_matches('/'),
            urlencoding::encode(container_name)
        );
        let parsed = Url::parse(&url).with_context(|| format!("Invalid blob listing URL {}", url))?;

        let mut request = Request::new(Method::GET, parsed);
        request
            .headers_mut()
            .insert(MS_VERSION_HEADER, HeaderValue::from_static(BLOB_SERVICE_VERSION));
        credential
            .sign_request(&mut request)
            .context("Failed to sign blob listing request")?;

        let response = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;
        let body = read_body(Method::GET, &url, response).await?;

        Ok(ExpanderResult {
            response: Some(ExpanderResponse::xml(body)),
            nodes: Vec::new(),
            source_description: SOURCE.to_string(),
            is_primary_response: true,
        })
    }
}

#[async_trait]
impl Expander for StorageBlobExpander {
    fn name(&self) -> &'static str {
        "StorageBlobExpander"
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        if node.item_type == ItemType::SubResource && node.namespace == STORAGE_BLOB_NAMESPACE {
            return Ok(true);
        }
        Ok(self.is_container(node))
    }

    async fn expand(&self, node: &TreeNode) -> Result<ExpanderResult> {
        if node.namespace == STORAGE_BLOB_NAMESPACE {
            return self.list_blobs(node).await;
        }

        // The schema handler supplies the container body itself
        Ok(ExpanderResult {
            response: None,
            nodes: vec![self.blobs_node(node)],
            source_description: SOURCE.to_string(),
            is_primary_response: false,
        })
    }

    fn has_test_cases(&self) -> bool {
        true
    }

    fn test_cases(&self) -> Vec<ExpanderTestCase> {
        let account_id = concat!(
            "/subscriptions/sub-1/resourceGroups/rg-1",
            "/providers/Microsoft.Storage/storageAccounts/acct1"
        );
        let container_id = format!("{}/blobServices/default/containers/container1", account_id);

        let container = TreeNode {
            id: container_id.clone(),
            name: "container1".to_string(),
            display: "container1".to_string(),
            item_type: ItemType::SubResource,
            resource_type: Some(self.container_type.clone()),
            expand_url: format!("{}?api-version={}", container_id, STORAGE_API_VERSION),
            ..Default::default()
        };
        let blobs = self.blobs_node(&container);

        vec![
            ExpanderTestCase {
                name: "container gets a Blobs child".to_string(),
                node: container,
                requests: Vec::new(),
                check: |result| {
                    anyhow::ensure!(
                        !result.is_primary_response,
                        "container result should not be primary"
                    );
                    anyhow::ensure!(result.nodes.len() == 1, "expected one child");
                    let blobs = &result.nodes[0];
                    anyhow::ensure!(blobs.name == "Blobs");
                    anyhow::ensure!(blobs.namespace == STORAGE_BLOB_NAMESPACE);
                    anyhow::ensure!(blobs.expand_url == EXPAND_URL_NOT_SUPPORTED);
                    anyhow::ensure!(blobs.is_suppressed(Suppression::SchemaExpand));
                    anyhow::ensure!(blobs.is_suppressed(Suppression::GenericExpand));
                    Ok(())
                },
            },
            ExpanderTestCase {
                name: "Blobs node lists the container".to_string(),
                node: blobs,
                requests: vec![
                    MockedRequest::new(
                        "POST",
                        format!("{}/listKeys", account_id),
                        200,
                        json!({"keys": [{
                            "keyName": "key1",
                            "value": "dGF6dXJlLXRlc3QtYWNjb3VudC1rZXktMDEyMzQ1Njc4OQ==",
                            "permissions": "FULL"
                        }]})
                        .to_string(),
                    ),
                    MockedRequest::new(
                        "GET",
                        account_id,
                        200,
                        json!({"properties": {"primaryEndpoints": {
                            "blob": format!("{}/", MOCK_SERVER_PLACEHOLDER)
                        }}})
                        .to_string(),
                    ),
                    MockedRequest::new("GET", "/container1", 200, FIXTURE_BLOB_LIST),
                ],
                check: |result| {
                    let response = result.response.as_ref().context("expected a response")?;
                    anyhow::ensure!(response.response_type == ResponseType::Xml, "expected XML");
                    anyhow::ensure!(
                        response.body == FIXTURE_BLOB_LIST,
                        "body was not passed through"
                    );
                    anyhow::ensure!(result.nodes.is_empty(), "blob listing has no child nodes");
                    anyhow::ensure!(result.is_primary_response);
                    Ok(())
                },
            },
        ]
    }
}

/// Blob listing body used by the self-test fixture
pub const FIXTURE_BLOB_LIST: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>"#,
    r#"<EnumerationResults ServiceEndpoint="https://acct1.blob.core.windows.net/" "#,
    r#"ContainerName="container1">"#,
    "<Blobs><Blob><Name>report.csv</Name></Blob></Blobs><NextMarker />",
    "</EnumerationResults>"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expander::resource_types::ResourceTypeCatalog;

    struct NoClient;

    #[async_trait]
    impl ManagementClient for NoClient {
        async fn do_request(&self, _method: Method, path: &str) -> Result<String> {
            anyhow::bail!("unexpected request to {}", path)
        }
    }

    fn expander() -> StorageBlobExpander {
        let client: Arc<dyn ManagementClient> = Arc::new(NoClient);
        let catalog = Arc::new(ResourceTypeCatalog::embedded().unwrap());
        let resource_types = ResourceTypeExpander::new(client.clone(), catalog);
        StorageBlobExpander::new(client, reqwest::Client::new(), &resource_types).unwrap()
    }

    #[test]
    fn test_does_expand_blobs_namespace() {
        let expander = expander();
        let node = TreeNode {
            item_type: ItemType::SubResource,
            namespace: STORAGE_BLOB_NAMESPACE.to_string(),
            ..Default::default()
        };
        assert!(expander.does_expand(&node).unwrap());

        let wrong_type = TreeNode {
            item_type: ItemType::Resource,
            ..node
        };
        assert!(!expander.does_expand(&wrong_type).unwrap());
    }

    #[test]
    fn test_does_not_expand_other_resource_types() {
        let expander = expander();
        let catalog = ResourceTypeCatalog::embedded().unwrap();
        let account = TreeNode {
            item_type: ItemType::Resource,
            resource_type: catalog.get("storage-account").cloned(),
            ..Default::default()
        };
        assert!(!expander.does_expand(&account).unwrap());
    }

    #[tokio::test]
    async fn test_blobs_node_without_container_id_fails() {
        let expander = expander();
        let node = TreeNode {
            id: "x/<blobs>".to_string(),
            item_type: ItemType::SubResource,
            namespace: STORAGE_BLOB_NAMESPACE.to_string(),
            ..Default::default()
        };
        let err = expander.expand(&node).await.unwrap_err();
        assert!(err.to_string().contains(CONTAINER_ID_KEY));
    }

    #[tokio::test]
    async fn test_key_lookup_failure_is_wrapped() {
        let expander = expander();
        let container = TreeNode {
            id: concat!(
                "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage",
                "/storageAccounts/a/blobServices/default/containers/c"
            )
            .to_string(),
            ..Default::default()
        };
        let blobs = expander.blobs_node(&container);
        let err = expander.expand(&blobs).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to resolve storage account key");
    }
}
