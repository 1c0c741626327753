use anyhow::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::io::Write;
use tracing::info;

/// Creates an S3 client from the ambient AWS configuration (env vars,
/// profile, instance role).
pub async fn client_from_env() -> aws_sdk_s3::Client {
    let config = aws_config::load_from_env().await;
    aws_sdk_s3::Client::new(&config)
}

/// Serializes a value to JSON and uploads it with `application/json` content
/// type, gzip-compressed with `Content-Encoding: gzip` when `gzip` is set.
#[tracing::instrument(skip(client, value))]
pub async fn write_json_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    value: &impl Serialize,
    gzip: bool,
) -> Result<()> {
    let json = serde_json::to_vec(value)?;

    let request = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .content_type("application/json");

    let request = if gzip {
        request
            .content_encoding("gzip")
            .body(gzip_bytes(&json)?.into())
    } else {
        request.body(json.into())
    };

    request.send().await?;

    info!("Uploaded report to S3");
    Ok(())
}

/// Object key for a report: `reports/<stem>.json`.
pub fn report_key(prefix: &str, stem: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{stem}.json")
    } else {
        format!("{prefix}/{stem}.json")
    }
}

fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
