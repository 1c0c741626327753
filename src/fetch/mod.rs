mod client;
mod basic;
pub mod auth;

pub use client::HttpClient;
pub use basic::BasicClient;

use anyhow::Result;
use serde::Serialize;

/// Sends `body` as a JSON `POST` to `url` through `client`.
///
/// The response is returned whatever its status; callers decide which
/// statuses are retryable.
pub async fn post_json<C: HttpClient + ?Sized>(
    client: &C,
    url: &reqwest::Url,
    body: &impl Serialize,
) -> Result<reqwest::Response> {
    let mut req = reqwest::Request::new(reqwest::Method::POST, url.clone());
    req.headers_mut().insert(
        reqwest::header::CONTENT_TYPE,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    *req.body_mut() = Some(serde_json::to_vec(body)?.into());

    Ok(client.execute(req).await?)
}
