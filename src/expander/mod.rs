//! Tree expansion.
//!
//! A node is expanded by every registered handler that claims it; the engine
//! merges their children and picks the response to display.

pub mod arm;
pub mod default;
pub mod engine;
pub mod handler;
pub mod node;
pub mod registry;
pub mod resource_types;
pub mod storage_blob;

pub use engine::ExpandError;
pub use handler::{
    Expander, ExpanderTestCase, HandlerCategory, MockedRequest, MOCK_SERVER_PLACEHOLDER,
};
pub use node::{ExpanderResponse, ExpanderResult, ItemType, ResponseType, Suppression, TreeNode};
pub use registry::{ExpanderRegistry, RegistryBuilder};
pub use resource_types::{ResourceTypeCatalog, ResourceTypeDef, ResourceTypeExpander};
