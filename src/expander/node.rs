//! Tree node model and the expansion result envelope.

use super::resource_types::ResourceTypeDef;
use std::collections::BTreeMap;
use std::sync::Arc;

/// `expand_url` value for nodes that cannot be fetched by URL on their own
pub const EXPAND_URL_NOT_SUPPORTED: &str = "notsupported";

/// Id of the tree root
pub const ROOT_ID: &str = "root";

/// Structural category of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ItemType {
    #[default]
    Root,
    Tenant,
    Subscription,
    ResourceGroup,
    Resource,
    SubResource,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Tenant => "tenant",
            Self::Subscription => "subscription",
            Self::ResourceGroup => "resourcegroup",
            Self::Resource => "resource",
            Self::SubResource => "subResource",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata flags that tell the engine to skip a handler category for a node.
///
/// Stored in [`TreeNode::metadata`] under [`Suppression::metadata_key`] with
/// the value `"true"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// Skip the resource-type (schema) handler
    SchemaExpand,
    /// Skip the default handler
    GenericExpand,
}

impl Suppression {
    pub fn metadata_key(&self) -> &'static str {
        match self {
            Self::SchemaExpand => "SuppressSchemaExpand",
            Self::GenericExpand => "SuppressGenericExpand",
        }
    }
}

/// A node in the resource tree.
///
/// Nodes are produced by expansion and treated as immutable afterwards.
/// `metadata` is an open side channel between handlers; each key belongs to
/// the handler that writes it (see [`Suppression`] for the engine's own keys).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeNode {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub display: String,
    pub item_type: ItemType,
    /// Handler ownership tag, e.g. `"storageBlob"`
    pub namespace: String,
    /// Catalog entry attached by an earlier expansion
    pub resource_type: Option<Arc<ResourceTypeDef>>,
    pub expand_url: String,
    pub delete_url: String,
    pub subscription_id: String,
    pub metadata: BTreeMap<String, String>,
}

impl TreeNode {
    pub fn root() -> Self {
        Self {
            id: ROOT_ID.to_string(),
            name: "Azure".to_string(),
            display: "Azure".to_string(),
            item_type: ItemType::Root,
            ..Default::default()
        }
    }

    /// New child of `self` with `id = self.id + suffix`
    pub fn child(&self, suffix: &str, name: &str, item_type: ItemType) -> Self {
        Self {
            id: format!("{}{}", self.id, suffix),
            parent_id: self.id.clone(),
            name: name.to_string(),
            display: name.to_string(),
            item_type,
            subscription_id: self.subscription_id.clone(),
            ..Default::default()
        }
    }

    pub fn is_suppressed(&self, flag: Suppression) -> bool {
        self.metadata_flag(flag.metadata_key())
    }

    pub fn set_suppressed(&mut self, flag: Suppression) {
        self.metadata
            .insert(flag.metadata_key().to_string(), "true".to_string());
    }

    /// True when `key` is present with the value `"true"`
    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata.get(key).is_some_and(|v| v == "true")
    }

    /// Whether `expand_url` points at something fetchable
    pub fn is_expandable_by_url(&self) -> bool {
        !self.expand_url.is_empty() && self.expand_url != EXPAND_URL_NOT_SUPPORTED
    }
}

/// Format of a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Json,
    Xml,
    Text,
}

/// Raw body of an expansion call, kept for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpanderResponse {
    pub body: String,
    pub response_type: ResponseType,
}

impl ExpanderResponse {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            response_type: ResponseType::Json,
        }
    }

    pub fn xml(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            response_type: ResponseType::Xml,
        }
    }

    /// Label a body whose format the upstream does not declare
    pub fn from_body(body: impl Into<String>) -> Self {
        let body = body.into();
        let response_type = match body.trim_start().chars().next() {
            Some('{') | Some('[') => ResponseType::Json,
            Some('<') => ResponseType::Xml,
            _ => ResponseType::Text,
        };
        Self {
            body,
            response_type,
        }
    }
}

/// Outcome of one successful expansion.
///
/// An empty `nodes` list means "expandable, no children right now".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpanderResult {
    pub response: Option<ExpanderResponse>,
    pub nodes: Vec<TreeNode>,
    pub source_description: String,
    /// Marks the result whose response should be shown when several
    /// handlers contribute to one node
    pub is_primary_response: bool,
}
