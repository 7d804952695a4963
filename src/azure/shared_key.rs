//! Shared Key request signing for Azure Storage.
//!
//! Storage data-plane endpoints do not accept ARM bearer tokens. Instead each
//! request carries an `Authorization: SharedKey <account>:<signature>` header,
//! where the signature is an HMAC-SHA256 over a canonical description of the
//! request keyed with the (base64 decoded) storage account key.
//!
//! # Example
//!
//! ```no_run
//! use tazure::azure::shared_key::SharedKeyCredential;
//! use reqwest::{Method, Request};
//!
//! let credential = SharedKeyCredential::new("myaccount", "c2VjcmV0LWtleQ==").unwrap();
//! let url = "https://myaccount.blob.core.windows.net/logs?restype=container&comp=list";
//! let mut request = Request::new(Method::GET, url.parse().unwrap());
//! credential.sign_request(&mut request).unwrap();
//! ```

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_LANGUAGE,
    CONTENT_LENGTH, CONTENT_TYPE, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE,
    RANGE,
};
use reqwest::{Method, Request};
use sha2::Sha256;
use std::collections::BTreeMap;
use url::Url;

/// Prefix of the headers folded into the canonicalized header string
pub const MS_HEADER_PREFIX: &str = "x-ms-";

/// Request timestamp header; used instead of `Date`
pub const MS_DATE_HEADER: &str = "x-ms-date";

/// Storage service version header
pub const MS_VERSION_HEADER: &str = "x-ms-version";

/// Authorization scheme name
const SCHEME: &str = "SharedKey";

/// Storage account name and decoded account key
#[derive(Clone)]
pub struct SharedKeyCredential {
    account_name: String,
    account_key: Vec<u8>,
}

impl std::fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account_name", &self.account_name)
            .finish_non_exhaustive()
    }
}

impl SharedKeyCredential {
    /// Create a credential from the base64 key returned by `listKeys`.
    pub fn new(account_name: &str, account_key: &str) -> Result<Self> {
        let account_key = STANDARD
            .decode(account_key.trim())
            .context("Storage account key is not valid base64")?;

        Ok(Self {
            account_name: account_name.to_string(),
            account_key,
        })
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    /// Sign `request` in place.
    ///
    /// Adds `x-ms-date` when the caller did not set it, then sets the
    /// `Authorization` header.
    pub fn sign_request(&self, request: &mut Request) -> Result<()> {
        if !request.headers().contains_key(MS_DATE_HEADER) {
            let now = HeaderValue::from_str(&http_date(Utc::now()))?;
            request.headers_mut().insert(MS_DATE_HEADER, now);
        }

        let string_to_sign = string_to_sign(
            &self.account_name,
            request.method(),
            request.url(),
            request.headers(),
        );
        let signature = self.compute_signature(&string_to_sign);

        let authorization = format!("{} {}:{}", SCHEME, self.account_name, signature);
        let value = HeaderValue::from_str(&authorization)
            .context("Shared Key authorization header is not a valid header value")?;
        request.headers_mut().insert(AUTHORIZATION, value);

        Ok(())
    }

    /// Base64 HMAC-SHA256 of `string_to_sign` keyed with the account key.
    pub fn compute_signature(&self, string_to_sign: &str) -> String {
        STANDARD.encode(hmac_sha256(&self.account_key, string_to_sign.as_bytes()))
    }
}

/// RFC 1123 timestamp in GMT, the format storage expects in `x-ms-date`.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Build the string that gets signed.
///
/// Fields in order: verb, standard headers (with an empty `Date` slot, since
/// `x-ms-date` is canonicalized instead), canonicalized headers and
/// canonicalized resource, joined by newlines.
pub fn string_to_sign(
    account_name: &str,
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
) -> String {
    let content_length = match header_str(headers, &CONTENT_LENGTH) {
        len if len == "0" => String::new(),
        len => len,
    };

    [
        method.as_str().to_string(),
        header_str(headers, &CONTENT_ENCODING),
        header_str(headers, &CONTENT_LANGUAGE),
        content_length,
        header_str(headers, &HeaderName::from_static("content-md5")),
        header_str(headers, &CONTENT_TYPE),
        String::new(),
        header_str(headers, &IF_MODIFIED_SINCE),
        header_str(headers, &IF_MATCH),
        header_str(headers, &IF_NONE_MATCH),
        header_str(headers, &IF_UNMODIFIED_SINCE),
        header_str(headers, &RANGE),
        canonicalized_headers(headers),
        canonicalized_resource(account_name, url),
    ]
    .join("\n")
}

/// `x-ms-*` headers as sorted `name:value` lines; repeated headers have their
/// values joined by commas in insertion order.
pub fn canonicalized_headers(headers: &HeaderMap) -> String {
    let mut entries: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        // HeaderName is always lower-case
        if name.as_str().starts_with(MS_HEADER_PREFIX) {
            entries
                .entry(name.as_str())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
    }

    entries
        .into_iter()
        .map(|(name, values)| format!("{}:{}", name, values.join(",")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `/account/path` followed by one `\nname:values` line per query parameter,
/// sorted by name, with each parameter's values sorted and comma-joined.
pub fn canonicalized_resource(account_name: &str, url: &Url) -> String {
    let mut resource = format!("/{}", account_name);
    match url.path() {
        "" => resource.push('/'),
        path => resource.push_str(path),
    }

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params.entry(name.into_owned()).or_default().push(value.into_owned());
    }

    for (name, mut values) in params {
        values.sort();
        resource.push('\n');
        resource.push_str(&name);
        resource.push(':');
        resource.push_str(&values.join(","));
    }

    resource
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC key of any size is valid");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
