//! Inbound request shape.
//!
//! Token extraction needs three lookups from the host framework: a header,
//! a form field and a query parameter. Absence is `None`; it is never an
//! error. [`BearerRequest`] is an owned snapshot implementing
//! [`RequestParts`] that any host can build.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// The lookups token extraction performs on a request.
pub trait RequestParts: Send + Sync {
    /// Raw value of header `name` (case-insensitive), if present.
    fn header(&self, name: &str) -> Option<&[u8]>;

    /// Value of form field `name` from a urlencoded or multipart body.
    fn form_field(&self, name: &str) -> Option<&str>;

    /// Value of query-string parameter `name`.
    fn query_param(&self, name: &str) -> Option<&str>;
}

/// Owned snapshot of the parts of a request that can carry a token.
///
/// Repeated query or form keys resolve to their first value.
#[derive(Debug, Clone, Default)]
pub struct BearerRequest {
    headers: HeaderMap,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
}

impl BearerRequest {
    /// An empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot from request headers and the raw query string.
    #[must_use]
    pub fn from_parts(headers: HeaderMap, query: Option<&str>) -> Self {
        Self {
            headers,
            query: query.map(parse_pairs).unwrap_or_default(),
            form: Vec::new(),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Add a query-string parameter.
    #[must_use]
    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Replace the query parameters with those parsed from `query`.
    #[must_use]
    pub fn with_query_string(mut self, query: &str) -> Self {
        self.query = parse_pairs(query);
        self
    }

    /// Add a form field.
    #[must_use]
    pub fn with_form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((name.into(), value.into()));
        self
    }

    /// Replace the form fields with those parsed from a urlencoded body.
    #[must_use]
    pub fn with_urlencoded_body(mut self, body: &[u8]) -> Self {
        self.form = url::form_urlencoded::parse(body).into_owned().collect();
        self
    }

    /// The request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

fn parse_pairs(encoded: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(encoded.as_bytes())
        .into_owned()
        .collect()
}

fn first<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

impl RequestParts for BearerRequest {
    fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.get(name).map(HeaderValue::as_bytes)
    }

    fn form_field(&self, name: &str) -> Option<&str> {
        first(&self.form, name)
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        first(&self.query, name)
    }
}
