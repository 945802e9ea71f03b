//! HTTP value types shared by the store and the worker.
//!
//! These are deliberately small: a request is identified by method and URL,
//! a response is a status, headers, and an immutable body. Bodies are
//! `Bytes`, so cloning a response before it is both cached and returned is
//! cheap.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;

/// HTTP request method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Options,
    Post,
    Put,
    Delete,
    Patch,
    Other(String),
}

impl Method {
    /// Parse a method name (case-insensitive).
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "PATCH" => Method::Patch,
            other => Method::Other(other.to_string()),
        }
    }

    /// Uppercase method name.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Other(s) => s,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header map with case-insensitive names (stored lowercased).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any existing value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Get a header value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Iterate over (name, value) pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.set(&name, value);
        }
        headers
    }
}

/// An outbound HTTP request as delivered by the interceptor.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    /// Whether this is a top-level navigation request.
    pub is_navigation: bool,
}

impl Request {
    /// Create a request with the given method.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            is_navigation: false,
        }
    }

    /// Create a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Create a navigation (top-level document) GET request.
    pub fn navigation(url: impl Into<String>) -> Self {
        let mut req = Self::get(url);
        req.is_navigation = true;
        req
    }

    /// Builder-style header setter.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// A copy of this request addressing a different URL.
    pub fn for_url(&self, url: impl Into<String>) -> Self {
        Self {
            method: self.method.clone(),
            url: url.into(),
            headers: self.headers.clone(),
            is_navigation: self.is_navigation,
        }
    }
}

/// An HTTP response. Immutable once constructed; the body is shared.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    /// Create a response with an empty body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Create a 200 response with the given body.
    pub fn ok_with_body(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Builder-style body setter.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builder-style header setter.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Whether the status is in the 2xx range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_case_insensitive() {
        assert_eq!(Method::parse("get"), Method::Get);
        assert_eq!(Method::parse("DELETE"), Method::Delete);
        assert_eq!(Method::parse("propfind"), Method::Other("PROPFIND".to_string()));
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("Cache-Control", "max-age=10");
        assert_eq!(headers.get("cache-control"), Some("max-age=10"));
        assert_eq!(headers.get("CACHE-CONTROL"), Some("max-age=10"));
    }

    #[test]
    fn test_response_ok_range() {
        assert!(Response::new(200).ok());
        assert!(Response::new(204).ok());
        assert!(!Response::new(304).ok());
        assert!(!Response::new(504).ok());
    }

    #[test]
    fn test_response_clone_shares_body() {
        let res = Response::ok_with_body("this is foo");
        let clone = res.clone();
        assert_eq!(clone.body_text(), "this is foo");
        assert_eq!(res.body.as_ptr(), clone.body.as_ptr());
    }
}
