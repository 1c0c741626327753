use crate::fetch::client::HttpClient;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// The header name and value are validated once at construction, so
/// [`execute`](HttpClient::execute) never fails on them.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    /// Sends `Authorization: Bearer <key>`, the scheme used by
    /// OpenAI-compatible chat endpoints.
    pub fn bearer(inner: C, key: &str) -> Result<Self> {
        Self::header(inner, "Authorization", &format!("Bearer {key}"))
    }

    /// Sends the key verbatim under a provider-specific header, e.g. `api-key`.
    pub fn header(inner: C, header_name: &str, value: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())?;
        let mut value = HeaderValue::from_str(value)?;
        value.set_sensitive(true);
        Ok(Self {
            inner,
            header_name,
            value,
        })
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
        self.inner.execute(req).await
    }
}
