//! ARM response envelopes shared by the management-API handlers.

use serde::Deserialize;
use serde_json::Value;

/// One page of an ARM list operation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmPage<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(default)]
    pub next_link: Option<String>,
}

/// Fields common to every tracked ARM resource
#[derive(Debug, Clone, Deserialize)]
pub struct ArmResource {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub default_domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub subscription_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub display_name: String,
}

/// Decode one list page, naming `what` in the error
pub fn parse_page<T: serde::de::DeserializeOwned>(
    body: &str,
    what: &str,
) -> anyhow::Result<ArmPage<T>> {
    use anyhow::Context;
    serde_json::from_str(body).with_context(|| format!("Failed to decode {} response", what))
}

/// Append an `api-version` query parameter to an ARM path
pub fn with_api_version(path: &str, api_version: &str) -> String {
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}api-version={}", path, separator, api_version)
}

/// ARM path without its query string
pub fn strip_query(url: &str) -> &str {
    url.split_once('?').map(|(path, _)| path).unwrap_or(url)
}

/// Merge the `value` arrays of several pages into one document
pub fn merge_pages(items: Vec<Value>) -> String {
    serde_json::to_string_pretty(&serde_json::json!({ "value": items })).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_api_version() {
        assert_eq!(
            with_api_version("/subscriptions", "2020-01-01"),
            "/subscriptions?api-version=2020-01-01"
        );
        assert_eq!(
            with_api_version("/x?$filter=a", "1"),
            "/x?$filter=a&api-version=1"
        );
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(strip_query("/a/b?api-version=1"), "/a/b");
        assert_eq!(strip_query("/a/b"), "/a/b");
    }

    #[test]
    fn test_page_without_value_is_empty() {
        let page: ArmPage<ArmResource> = parse_page("{}", "test").unwrap();
        assert!(page.value.is_empty());
        assert!(page.next_link.is_none());
    }

    #[test]
    fn test_decode_failure_names_response() {
        let err = parse_page::<ArmResource>("<html>", "resource group").unwrap_err();
        assert!(err.to_string().contains("resource group"));
    }
}
