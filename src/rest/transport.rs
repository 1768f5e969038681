use async_trait::async_trait;
use reqwest::{Client, Method, header};
use serde_json::Value;
use tracing::trace;

use crate::common::{
    errors::{Result, RiffyError},
    http::HttpClient,
};

/// Issues one authenticated request against a node.
///
/// `path` starts with `/` and already carries the version prefix and any
/// query string. A `204` or empty body comes back as `None`.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>>;
}

pub struct HttpTransport {
    client: Client,
    base_url: String,
    password: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new()?,
            base_url: base_url.into(),
            password: password.into(),
        })
    }
}

#[async_trait]
impl RestTransport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        trace!("{} {}", method, url);

        let mut req = self
            .client
            .request(method, &url)
            .header(header::AUTHORIZATION, &self.password);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;

        if !status.is_success() {
            return Err(RiffyError::from_response(status.as_u16(), path, &text));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }
}
