//! Property-based tests for Shared Key canonicalization and signing
//!
//! These check the invariants the storage service relies on: header and
//! query ordering must not influence the signature, and any change to the
//! signed content must.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use proptest::prelude::*;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::BTreeMap;
use tazure::azure::shared_key::{
    canonicalized_headers, canonicalized_resource, string_to_sign, SharedKeyCredential,
};
use url::Url;

const ACCOUNT_KEY: &str = "dGF6dXJlLXRlc3QtYWNjb3VudC1rZXktMDEyMzQ1Njc4OQ==";

const LISTING_URL: &str = "https://acct.blob.core.windows.net/logs?restype=container&comp=list";

/// Standard headers that occupy a fixed slot in the string-to-sign
const STANDARD_HEADERS: [&str; 10] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

fn credential() -> SharedKeyCredential {
    SharedKeyCredential::new("acct", ACCOUNT_KEY).expect("valid key")
}

/// Distinct `x-ms-*` header names with simple values
fn ms_headers() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("x-ms-[a-z]{1,10}", "[A-Za-z0-9 ,.:-]{1,16}", 1..8)
}

fn signature_of(method: &Method, url: &Url, headers: &HeaderMap) -> String {
    credential().compute_signature(&string_to_sign("acct", method, url, headers))
}

fn header_map<'a>(entries: impl Iterator<Item = (&'a String, &'a String)>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in entries {
        headers.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    headers
}

mod canonicalization_tests {
    use super::*;

    proptest! {
        /// Insertion order of headers does not matter
        #[test]
        fn header_order_is_irrelevant(entries in ms_headers()) {
            let forward = header_map(entries.iter());
            let backward = header_map(entries.iter().rev());
            prop_assert_eq!(canonicalized_headers(&forward), canonicalized_headers(&backward));
        }

        /// Only x-ms- headers are folded in, one line each, sorted
        #[test]
        fn canonical_headers_are_sorted_lines(entries in ms_headers(), other in "[a-w][a-z]{2,8}") {
            let mut headers = header_map(entries.iter());
            headers.insert(
                HeaderName::from_bytes(other.as_bytes()).unwrap(),
                HeaderValue::from_static("ignored"),
            );

            let canonical = canonicalized_headers(&headers);
            let lines: Vec<&str> = canonical.lines().collect();
            prop_assert_eq!(lines.len(), entries.len());
            let mut sorted = lines.clone();
            sorted.sort();
            prop_assert_eq!(&lines, &sorted);
            prop_assert!(lines.iter().all(|l| l.starts_with("x-ms-")));
        }

        /// Query parameter order does not matter
        #[test]
        fn query_order_is_irrelevant(
            params in prop::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{1,6}", 1..6),
        ) {
            let forward: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            let backward: Vec<String> = forward.iter().rev().cloned().collect();
            let container = |query: &[String]| {
                Url::parse(&format!("https://acct.blob.core.windows.net/c?{}", query.join("&")))
                    .unwrap()
            };
            let a = container(&forward);
            let b = container(&backward);

            prop_assert_eq!(canonicalized_resource("acct", &a), canonicalized_resource("acct", &b));
        }
    }
}

mod signature_tests {
    use super::*;

    proptest! {
        /// Same input, same signature; output is a base64 HMAC-SHA256
        #[test]
        fn signature_is_deterministic(input in ".{0,200}") {
            let credential = credential();
            let first = credential.compute_signature(&input);
            prop_assert_eq!(&first, &credential.compute_signature(&input));
            prop_assert_eq!(STANDARD.decode(&first).unwrap().len(), 32);
        }

        /// Changing a signed header changes the signature
        #[test]
        fn header_change_changes_signature(
            entries in ms_headers(),
            replacement in "[A-Za-z0-9]{1,16}",
        ) {
            let url = Url::parse(LISTING_URL).unwrap();
            let headers = header_map(entries.iter());
            let (name, value) = entries.iter().next().unwrap();
            prop_assume!(value != &replacement);

            let mut changed = headers.clone();
            changed.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(&replacement).unwrap(),
            );

            let original = signature_of(&Method::GET, &url, &headers);
            let modified = signature_of(&Method::GET, &url, &changed);
            prop_assert_ne!(original, modified);
        }

        /// Every standard header slot is covered by the signature
        #[test]
        fn standard_header_change_changes_signature(
            index in 0..STANDARD_HEADERS.len(),
            before in "[1-9][0-9A-Za-z]{0,15}",
            after in "[1-9][0-9A-Za-z]{0,15}",
        ) {
            prop_assume!(before != after);
            let url = Url::parse(LISTING_URL).unwrap();
            let name = HeaderName::from_static(STANDARD_HEADERS[index]);

            let mut headers = HeaderMap::new();
            headers.insert("x-ms-version", HeaderValue::from_static("2018-03-28"));
            let mut original = headers.clone();
            original.insert(name.clone(), HeaderValue::from_str(&before).unwrap());
            let mut changed = headers.clone();
            changed.insert(name, HeaderValue::from_str(&after).unwrap());

            prop_assert_ne!(
                signature_of(&Method::GET, &url, &headers),
                signature_of(&Method::GET, &url, &original)
            );
            prop_assert_ne!(
                signature_of(&Method::GET, &url, &original),
                signature_of(&Method::GET, &url, &changed)
            );
        }

        /// The signature depends on the HTTP method
        #[test]
        fn method_is_signed(path in "[a-z]{1,12}") {
            let url = Url::parse(&format!("https://acct.blob.core.windows.net/{}", path)).unwrap();
            let headers = HeaderMap::new();

            let get = signature_of(&Method::GET, &url, &headers);
            let delete = signature_of(&Method::DELETE, &url, &headers);
            prop_assert_ne!(get, delete);
        }
    }
}
