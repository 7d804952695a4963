//! Expansion engine.
//!
//! Dispatches a node to every applicable handler in registration order and
//! folds their results into one. Any failure aborts the whole expansion so
//! callers never see a partial child list.

use super::handler::{Expander, HandlerCategory};
use super::node::{ExpanderResult, Suppression, TreeNode};
use super::registry::ExpanderRegistry;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("{handler} could not decide whether it expands {node_id}")]
    Applicability {
        handler: &'static str,
        node_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("No expander handles {node_id}")]
    Unhandled { node_id: String },

    #[error("{handler} failed to expand {node_id}")]
    Expansion {
        handler: &'static str,
        node_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{handler} failed to delete {node_id}")]
    Deletion {
        handler: &'static str,
        node_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Expanding {node_id} timed out after {timeout:?}")]
    TimedOut { node_id: String, timeout: Duration },
}

/// Whether node metadata switches off a handler category
fn is_suppressed(node: &TreeNode, category: HandlerCategory) -> bool {
    match category {
        HandlerCategory::Generic => node.is_suppressed(Suppression::GenericExpand),
        HandlerCategory::Schema => node.is_suppressed(Suppression::SchemaExpand),
        HandlerCategory::Specific => false,
    }
}

impl ExpanderRegistry {
    /// Handlers that will expand `node`, in registration order
    pub fn matching_handlers(
        &self,
        node: &TreeNode,
    ) -> Result<Vec<Arc<dyn Expander>>, ExpandError> {
        let mut matched = Vec::new();
        for handler in self.handlers() {
            if is_suppressed(node, handler.category()) {
                tracing::debug!("{} suppressed for {}", handler.name(), node.id);
                continue;
            }

            let applies = handler
                .does_expand(node)
                .map_err(|source| ExpandError::Applicability {
                    handler: handler.name(),
                    node_id: node.id.clone(),
                    source,
                })?;
            if applies {
                tracing::debug!("{} expands {}", handler.name(), node.id);
                matched.push(handler.clone());
            }
        }
        Ok(matched)
    }

    /// Expand `node`, honoring the registry's deadline if one is configured
    pub async fn expand(&self, node: &TreeNode) -> Result<ExpanderResult, ExpandError> {
        match self.expand_timeout() {
            Some(timeout) => self.expand_with_timeout(node, timeout).await,
            None => self.expand_all(node).await,
        }
    }

    pub async fn expand_with_timeout(
        &self,
        node: &TreeNode,
        timeout: Duration,
    ) -> Result<ExpanderResult, ExpandError> {
        tokio::time::timeout(timeout, self.expand_all(node))
            .await
            .map_err(|_| ExpandError::TimedOut {
                node_id: node.id.clone(),
                timeout,
            })?
    }

    async fn expand_all(&self, node: &TreeNode) -> Result<ExpanderResult, ExpandError> {
        let matched = self.matching_handlers(node)?;
        if matched.is_empty() {
            return Err(ExpandError::Unhandled {
                node_id: node.id.clone(),
            });
        }

        let mut results = Vec::with_capacity(matched.len());
        for handler in &matched {
            let result = handler
                .expand(node)
                .await
                .map_err(|source| ExpandError::Expansion {
                    handler: handler.name(),
                    node_id: node.id.clone(),
                    source,
                })?;
            results.push((handler.name(), result));
        }

        Ok(merge_results(node, results))
    }

    /// Ask handlers in order to delete `node`; `Ok(false)` if none owns it
    pub async fn delete(&self, node: &TreeNode) -> Result<bool, ExpandError> {
        for handler in self.handlers() {
            let deleted = handler
                .delete(node)
                .await
                .map_err(|source| ExpandError::Deletion {
                    handler: handler.name(),
                    node_id: node.id.clone(),
                    source,
                })?;
            if deleted {
                tracing::info!("{} deleted {}", handler.name(), node.id);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn merge_results(node: &TreeNode, results: Vec<(&'static str, ExpanderResult)>) -> ExpanderResult {
    let mut merged = ExpanderResult::default();
    let mut primary: Option<&'static str> = None;

    for (handler, result) in results {
        if result.is_primary_response {
            match primary {
                Some(first) => tracing::warn!(
                    "{} also claimed the primary response for {}, keeping {}",
                    handler,
                    node.id,
                    first
                ),
                None => {
                    primary = Some(handler);
                    merged.response = result.response;
                    merged.source_description = result.source_description;
                    merged.is_primary_response = true;
                }
            }
        } else if primary.is_none() && merged.response.is_none() && result.response.is_some() {
            merged.response = result.response;
            merged.source_description = result.source_description;
        } else if merged.source_description.is_empty() {
            merged.source_description = result.source_description;
        }

        merged.nodes.extend(result.nodes.into_iter().map(|mut child| {
            if child.parent_id.is_empty() {
                child.parent_id = node.id.clone();
            }
            child
        }));
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::client::ManagementClient;
    use crate::expander::node::{ExpanderResponse, ItemType};
    use crate::expander::registry::RegistryBuilder;
    use anyhow::Result;
    use async_trait::async_trait;
    use reqwest::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NoClient;

    #[async_trait]
    impl ManagementClient for NoClient {
        async fn do_request(&self, _method: Method, path: &str) -> Result<String> {
            anyhow::bail!("unexpected request to {}", path)
        }
    }

    /// Claims nodes in its namespace and returns canned output
    struct FakeExpander {
        name: &'static str,
        namespace: &'static str,
        result: ExpanderResult,
        fail_check: bool,
        fail_expand: bool,
        delay: Option<Duration>,
        checks: AtomicUsize,
        events: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl FakeExpander {
        fn new(name: &'static str, namespace: &'static str) -> Self {
            Self {
                name,
                namespace,
                result: ExpanderResult::default(),
                fail_check: false,
                fail_expand: false,
                delay: None,
                checks: AtomicUsize::new(0),
                events: None,
            }
        }

        fn with_children(mut self, names: &[&str]) -> Self {
            self.result.nodes = names
                .iter()
                .map(|n| TreeNode {
                    id: format!("{}/{}", self.name, n),
                    name: n.to_string(),
                    ..Default::default()
                })
                .collect();
            self
        }

        fn with_response(mut self, body: &str, primary: bool) -> Self {
            self.result.response = Some(ExpanderResponse::json(body));
            self.result.source_description = format!("{} request", self.name);
            self.result.is_primary_response = primary;
            self
        }

        fn logging_to(mut self, events: &Arc<Mutex<Vec<String>>>, delay_ms: u64) -> Self {
            self.events = Some(events.clone());
            self.delay = Some(Duration::from_millis(delay_ms));
            self
        }

        fn record(&self, phase: &str) {
            if let Some(events) = &self.events {
                events.lock().unwrap().push(format!("{} {}", phase, self.name));
            }
        }
    }

    #[async_trait]
    impl Expander for FakeExpander {
        fn name(&self) -> &'static str {
            self.name
        }

        fn does_expand(&self, node: &TreeNode) -> Result<bool> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if self.fail_check {
                anyhow::bail!("broken applicability check");
            }
            Ok(node.namespace == self.namespace)
        }

        async fn expand(&self, _node: &TreeNode) -> Result<ExpanderResult> {
            self.record("start");
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.record("end");
            if self.fail_expand {
                anyhow::bail!("upstream exploded");
            }
            Ok(self.result.clone())
        }

        async fn delete(&self, node: &TreeNode) -> Result<bool> {
            if self.fail_expand {
                anyhow::bail!("delete refused");
            }
            Ok(node.namespace == self.namespace)
        }
    }

    fn registry(fakes: Vec<Arc<FakeExpander>>) -> ExpanderRegistry {
        let mut builder = RegistryBuilder::new(Arc::new(NoClient), reqwest::Client::new()).unwrap();
        for fake in fakes {
            builder = builder.register(fake);
        }
        builder.build()
    }

    fn node(namespace: &str) -> TreeNode {
        TreeNode {
            id: "parent".to_string(),
            item_type: ItemType::SubResource,
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_children_concatenate_in_registration_order() {
        let registry = registry(vec![
            Arc::new(FakeExpander::new("first", "ns").with_children(&["a", "b"])),
            Arc::new(FakeExpander::new("other", "elsewhere").with_children(&["x"])),
            Arc::new(FakeExpander::new("second", "ns").with_children(&["c"])),
        ]);

        let result = registry.expand(&node("ns")).await.unwrap();
        let names: Vec<&str> = result.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(result.nodes.iter().all(|n| n.parent_id == "parent"));
    }

    #[tokio::test]
    async fn test_handlers_run_one_after_another() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(vec![
            Arc::new(FakeExpander::new("first", "ns").logging_to(&events, 100)),
            Arc::new(FakeExpander::new("second", "ns").logging_to(&events, 1)),
        ]);

        registry.expand(&node("ns")).await.unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            ["start first", "end first", "start second", "end second"]
        );
    }

    #[tokio::test]
    async fn test_failure_stops_later_handlers() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let failing = FakeExpander {
            fail_expand: true,
            ..FakeExpander::new("failing", "ns").logging_to(&events, 1)
        };
        let registry = registry(vec![
            Arc::new(failing),
            Arc::new(FakeExpander::new("after", "ns").logging_to(&events, 1)),
        ]);

        let err = registry.expand(&node("ns")).await.unwrap_err();
        assert!(matches!(err, ExpandError::Expansion { handler: "failing", .. }));
        assert_eq!(*events.lock().unwrap(), ["start failing", "end failing"]);
    }

    #[tokio::test]
    async fn test_first_primary_claim_wins() {
        let registry = registry(vec![
            Arc::new(FakeExpander::new("helper", "ns").with_response("{\"helper\":1}", false)),
            Arc::new(FakeExpander::new("main", "ns").with_response("{\"main\":1}", true)),
            Arc::new(FakeExpander::new("late", "ns").with_response("{\"late\":1}", true)),
        ]);

        let result = registry.expand(&node("ns")).await.unwrap();
        assert!(result.is_primary_response);
        assert_eq!(result.response.unwrap().body, "{\"main\":1}");
        assert_eq!(result.source_description, "main request");
    }

    #[tokio::test]
    async fn test_without_primary_first_response_is_used() {
        let registry = registry(vec![
            Arc::new(FakeExpander::new("empty", "ns").with_children(&["a"])),
            Arc::new(FakeExpander::new("body", "ns").with_response("{}", false)),
        ]);

        let result = registry.expand(&node("ns")).await.unwrap();
        assert!(!result.is_primary_response);
        assert_eq!(result.response.unwrap().body, "{}");
        assert_eq!(result.nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_unclaimed_node_is_unhandled() {
        let registry = registry(vec![Arc::new(FakeExpander::new("only", "ns"))]);

        let err = registry.expand(&node("nobody")).await.unwrap_err();
        assert!(matches!(err, ExpandError::Unhandled { ref node_id } if node_id == "parent"));
    }

    #[tokio::test]
    async fn test_applicability_error_stops_before_later_handlers() {
        let broken = FakeExpander {
            fail_check: true,
            ..FakeExpander::new("broken", "ns")
        };
        let later = Arc::new(FakeExpander::new("later", "ns"));
        let registry = registry(vec![Arc::new(broken), later.clone()]);

        let err = registry.expand(&node("ns")).await.unwrap_err();
        assert!(matches!(err, ExpandError::Applicability { handler: "broken", .. }));
        assert_eq!(later.checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expansion_failure_discards_other_results() {
        let failing = FakeExpander {
            fail_expand: true,
            ..FakeExpander::new("failing", "ns")
        };
        let registry = registry(vec![
            Arc::new(FakeExpander::new("fine", "ns").with_children(&["a"])),
            Arc::new(failing),
        ]);

        let err = registry.expand(&node("ns")).await.unwrap_err();
        assert!(matches!(err, ExpandError::Expansion { handler: "failing", .. }));
        let chain = format!("{:#}", anyhow::Error::from(err));
        assert!(chain.contains("upstream exploded"));
    }

    #[tokio::test]
    async fn test_generic_suppression_skips_default_handler() {
        let registry = registry(Vec::new());
        let mut group = TreeNode {
            id: "/subscriptions/s/resourceGroups/rg".to_string(),
            item_type: ItemType::ResourceGroup,
            ..Default::default()
        };
        assert_eq!(registry.matching_handlers(&group).unwrap().len(), 1);

        group.set_suppressed(Suppression::GenericExpand);
        assert!(registry.matching_handlers(&group).unwrap().is_empty());
        let err = registry.expand(&group).await.unwrap_err();
        assert!(matches!(err, ExpandError::Unhandled { .. }));
    }

    #[tokio::test]
    async fn test_schema_suppression_skips_only_schema_handler() {
        let registry = registry(vec![Arc::new(FakeExpander::new("specific", "ns"))]);
        let mut typed = node("ns");
        typed.resource_type = registry.catalog().get("storage-container").cloned();

        let names = |n: &TreeNode| -> Vec<&'static str> {
            registry.matching_handlers(n).unwrap().iter().map(|h| h.name()).collect()
        };
        assert_eq!(names(&typed), ["ResourceTypeExpander", "specific"]);

        typed.set_suppressed(Suppression::SchemaExpand);
        assert_eq!(names(&typed), ["specific"]);
    }

    #[tokio::test]
    async fn test_deadline_expiry_times_out() {
        let slow = FakeExpander {
            delay: Some(Duration::from_secs(5)),
            ..FakeExpander::new("slow", "ns").with_children(&["late"])
        };
        let registry = registry(vec![Arc::new(slow)]);

        let err = registry
            .expand_with_timeout(&node("ns"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ExpandError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_delete_first_owner_wins() {
        let registry = registry(vec![
            Arc::new(FakeExpander::new("a", "ns")),
            Arc::new(FakeExpander::new("b", "ns")),
        ]);

        tokio_test::assert_ok!(registry.delete(&node("ns")).await);
        assert!(!registry.delete(&node("nobody")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_failure_names_handler() {
        let failing = FakeExpander {
            fail_expand: true,
            ..FakeExpander::new("failing", "ns")
        };
        let registry = registry(vec![Arc::new(failing)]);

        let result = registry.delete(&node("ns")).await;
        let err = tokio_test::assert_err!(result);
        assert!(err.to_string().contains("failing"));
    }
}
