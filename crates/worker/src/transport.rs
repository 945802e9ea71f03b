//! Network transport seam and the reqwest-backed implementation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use larder_core::{Request, Response};

/// The network as the worker sees it.
///
/// HTTP-level failures (4xx, 5xx) come back as unsuccessful responses; an
/// `Err` means the network itself failed (DNS, connection reset, ...).
#[async_trait]
pub trait NetworkTransport: Send + Sync + 'static {
    async fn fetch(&self, req: &Request) -> Result<Response>;
}

/// Transport over a reqwest client, resolving path-relative URLs against a
/// base origin.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Create a transport resolving relative URLs against `base_url`
    /// (e.g. `http://localhost:8080`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{url}", self.base_url.trim_end_matches('/'))
        }
    }
}

#[async_trait]
impl NetworkTransport for ReqwestTransport {
    async fn fetch(&self, req: &Request) -> Result<Response> {
        let url = self.absolute_url(&req.url);
        let method = reqwest::Method::from_bytes(req.method.as_str().as_bytes()).map_err(|e| {
            Error::Network {
                url: url.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut builder = self.client.request(method, &url);
        for (name, value) in req.headers.iter() {
            builder = builder.header(name, value);
        }

        let upstream = builder.send().await.map_err(|e| Error::Network {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let status = upstream.status().as_u16();
        let headers: Vec<(String, String)> = upstream
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = upstream.bytes().await.map_err(|e| Error::Network {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let mut response = Response::new(status).with_body(body);
        for (name, value) in headers {
            response.headers.set(&name, value);
        }
        Ok(response)
    }
}
