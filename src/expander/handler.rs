//! The contract every expansion handler implements.

use super::node::{ExpanderResult, TreeNode};
use anyhow::Result;
use async_trait::async_trait;

/// Placeholder in fixture bodies replaced with the mock server base URL
pub const MOCK_SERVER_PLACEHOLDER: &str = "{{mock_server}}";

/// Handler families the engine can switch off per node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerCategory {
    /// Structural fallback (tenants, subscriptions, groups, resources)
    Generic,
    /// Driven by the resource-type catalog
    Schema,
    /// Resource-type specific; never suppressed
    Specific,
}

/// Resource-type specific expansion handler.
///
/// Handlers receive the management client through their constructor and must
/// be shareable across concurrent expansions. The engine only calls
/// [`Expander::expand`] for a node after [`Expander::does_expand`] returned
/// `true` for it.
#[async_trait]
pub trait Expander: Send + Sync {
    /// Stable identifier used in logs and test case labels.
    fn name(&self) -> &'static str;

    fn category(&self) -> HandlerCategory {
        HandlerCategory::Specific
    }

    /// Read-only applicability check.
    ///
    /// # Errors
    ///
    /// An error means the check itself failed, which is distinct from
    /// `Ok(false)` (not applicable).
    fn does_expand(&self, node: &TreeNode) -> Result<bool>;

    /// Produce the children and response body for `node`.
    async fn expand(&self, node: &TreeNode) -> Result<ExpanderResult>;

    /// Delete the resource behind `node`.
    ///
    /// `Ok(false)` means this handler does not own deletion for the node.
    async fn delete(&self, _node: &TreeNode) -> Result<bool> {
        Ok(false)
    }

    fn has_test_cases(&self) -> bool {
        false
    }

    /// Deterministic fixtures replayed against a mock transport
    fn test_cases(&self) -> Vec<ExpanderTestCase> {
        Vec::new()
    }
}

/// One HTTP exchange a test case expects
#[derive(Debug, Clone)]
pub struct MockedRequest {
    pub method: &'static str,
    /// Path the mock server must receive (no query string)
    pub path: String,
    pub status: u16,
    /// Response body; may contain [`MOCK_SERVER_PLACEHOLDER`]
    pub body: String,
}

impl MockedRequest {
    pub fn new(
        method: &'static str,
        path: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            status,
            body: body.into(),
        }
    }
}

/// Assertion run on the result of a replayed expansion
pub type ResultChecker = fn(&ExpanderResult) -> Result<()>;

/// A self-test fixture declared by a handler
#[derive(Clone)]
pub struct ExpanderTestCase {
    pub name: String,
    pub node: TreeNode,
    /// Exchanges the handler must perform, each exactly once
    pub requests: Vec<MockedRequest>,
    pub check: ResultChecker,
}

impl std::fmt::Debug for ExpanderTestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpanderTestCase")
            .field("name", &self.name)
            .field("node", &self.node.id)
            .field("requests", &self.requests.len())
            .finish()
    }
}
