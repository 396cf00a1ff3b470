//! Google Cloud Storage blob backend
//!
//! Implements [`BlobStore`] over the GCS JSON API. Authentication is an
//! external concern: the access token either comes pre-issued from the
//! environment or is fetched from the GCE metadata server, which requires no
//! credentials of its own.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::BlobStore;
use crate::error::{ProviderError, Result};

const STORAGE_API: &str = "https://storage.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Blob store backed by a GCS bucket
#[derive(Debug, Clone)]
pub struct GcsBlobStore {
    client: reqwest::Client,
    bucket: String,
    prefix: String,
    token: Option<String>,
}

impl GcsBlobStore {
    /// Creates a store scoped to one bucket and object-name prefix
    ///
    /// # Arguments
    /// * `bucket` - Target bucket name
    /// * `prefix` - Prefix prepended to every object name (no trailing slash)
    /// * `token` - Pre-issued OAuth token; when `None`, the GCE metadata
    ///   server is queried per request
    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            bucket: bucket.into(),
            prefix: prefix.into(),
            token,
        }
    }

    fn object_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }

        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let response = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                ProviderError::Unauthorized(format!("metadata server unreachable: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::Unauthorized(format!(
                "metadata server returned status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unauthorized(format!("bad token response: {e}")))?;

        Ok(token.access_token)
    }
}

/// Percent-encodes an object name for use as a single URL path segment
fn encode_object_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Assembles a multipart/related upload body: object metadata plus payload
///
/// Metadata carries the retention period so bucket lifecycle rules can keep
/// handoff objects for the configured (long) window.
fn multipart_body(metadata_json: &str, bytes: &[u8], boundary: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + metadata_json.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata_json.as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn upload(&self, name: &str, bytes: Vec<u8>, retention: Duration) -> Result<()> {
        let object = self.object_name(name);
        let token = self.access_token().await?;

        debug!("Uploading blob {} ({} bytes)", object, bytes.len());

        let retention_days = retention.as_secs() / 86_400;
        let metadata = serde_json::json!({
            "name": object,
            "metadata": { "retention-days": retention_days.to_string() },
        })
        .to_string();

        let boundary = "statedisk_blob_boundary";
        let body = multipart_body(&metadata, &bytes, boundary);

        let url = format!(
            "{STORAGE_API}/upload/storage/v1/b/{}/o?uploadType=multipart",
            self.bucket
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .header(
                "Content-Type",
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::api_error(status.as_u16(), message));
        }

        debug!("Blob {} uploaded", object);
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let object = self.object_name(name);
        let token = self.access_token().await?;

        let url = format!(
            "{STORAGE_API}/storage/v1/b/{}/o/{}?alt=media",
            self.bucket,
            encode_object_name(&object)
        );
        let response = self.client.get(&url).bearer_auth(&token).send().await?;

        let status = response.status();
        if status.as_u16() == 404 {
            debug!("Blob {} not found", object);
            return Ok(None);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::api_error(status.as_u16(), message));
        }

        let bytes = response.bytes().await?;
        debug!("Blob {} downloaded ({} bytes)", object, bytes.len());
        Ok(Some(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_object_name() {
        assert_eq!(
            encode_object_name("statedisk/runs/42.json"),
            "statedisk%2Fruns%2F42.json"
        );
        assert_eq!(encode_object_name("plain-name_1.0~x"), "plain-name_1.0~x");
    }

    #[test]
    fn test_object_name_prefixing() {
        let store = GcsBlobStore::new("bucket", "handoff/mainnet", None);
        assert_eq!(store.object_name("latest.json"), "handoff/mainnet/latest.json");

        let bare = GcsBlobStore::new("bucket", "", None);
        assert_eq!(bare.object_name("latest.json"), "latest.json");
    }

    #[test]
    fn test_multipart_body_layout() {
        let body = multipart_body(r#"{"name":"x"}"#, b"payload", "bnd");
        let text = String::from_utf8(body).unwrap();

        assert!(text.starts_with("--bnd\r\n"));
        assert!(text.contains(r#"{"name":"x"}"#));
        assert!(text.contains("payload"));
        assert!(text.ends_with("--bnd--\r\n"));
        // Exactly two parts
        assert_eq!(text.matches("--bnd\r\n").count(), 2);
    }
}
