//! S3 transfer client.
//!
//! Requests are presigned with `rusty-s3` and sent with `reqwest`. Bodies are
//! streamed in both directions so memory use does not grow with file size.

use super::progress::ProgressObserver;
use super::progress_stream::ProgressStream;
use super::{BackupObjectDescriptor, TransferClient};
use crate::config::S3Config;
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::StatusCode;
use rusty_s3::actions::{ListObjectsV2, ListObjectsV2Response, S3Action};
use rusty_s3::{Bucket, Credentials, UrlStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Validity of presigned request URLs
const PRESIGN_DURATION: Duration = Duration::from_secs(3600);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct S3TransferClient {
    bucket: Bucket,
    credentials: Credentials,
    http: reqwest::Client,
}

impl S3TransferClient {
    pub fn new(config: &S3Config) -> Result<Self> {
        // A custom endpoint (MinIO, Ceph, ...) gets path-style addressing.
        let (endpoint, url_style) = match &config.endpoint {
            Some(endpoint) => (endpoint.clone(), UrlStyle::Path),
            None => (
                format!("https://s3.{}.amazonaws.com", config.region),
                UrlStyle::VirtualHost,
            ),
        };

        let base_url = endpoint.parse().map_err(|e| {
            BackupError::Config(format!("invalid S3 endpoint URL '{endpoint}': {e}"))
        })?;

        let bucket = Bucket::new(
            base_url,
            url_style,
            config.bucket.clone(),
            config.region.clone(),
        )
        .map_err(|e| BackupError::Config(format!("failed to create S3 bucket handle: {e}")))?;

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.expose().to_string(),
        );

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackupError::transfer("HTTP client setup", e))?;

        Ok(Self {
            bucket,
            credentials,
            http,
        })
    }

    /// Fetch one page of a listing.
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListObjectsV2Response> {
        let operation = format!("LIST {prefix}");

        let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
        if !prefix.is_empty() {
            action.query_mut().insert("prefix", prefix);
        }
        if let Some(token) = continuation_token {
            action.query_mut().insert("continuation-token", token);
        }
        let url = action.sign(PRESIGN_DURATION);

        let resp = self
            .http
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| BackupError::transfer(&operation, e))?;
        let body = ensure_success(resp, &operation)
            .await?
            .bytes()
            .await
            .map_err(|e| BackupError::transfer(&operation, e))?;

        ListObjectsV2::parse_response(&body[..])
            .map_err(|e| BackupError::transfer(&operation, format!("unparseable response: {e}")))
    }
}

#[async_trait]
impl TransferClient for S3TransferClient {
    async fn upload(
        &self,
        local_path: &Path,
        remote_key: &str,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<()> {
        let operation = format!("PUT {remote_key}");
        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| BackupError::from_io(local_path, e))?;
        let size = file.metadata().await?.len();

        let url = self
            .bucket
            .put_object(Some(&self.credentials), remote_key)
            .sign(PRESIGN_DURATION);

        let stream = ProgressStream::new(ReaderStream::new(file), Arc::clone(&observer));
        let body = reqwest::Body::wrap_stream(stream);

        // S3 rejects chunked uploads to presigned URLs; the length must be explicit.
        let resp = self
            .http
            .put(url.as_str())
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| BackupError::transfer(&operation, e))?;
        ensure_success(resp, &operation).await?;

        observer.finish();
        debug!("Uploaded {} bytes to {}", size, self.location(remote_key));
        Ok(())
    }

    async fn download(
        &self,
        remote_key: &str,
        local_path: &Path,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<()> {
        let operation = format!("GET {remote_key}");
        let url = self
            .bucket
            .get_object(Some(&self.credentials), remote_key)
            .sign(PRESIGN_DURATION);

        let resp = self
            .http
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| BackupError::transfer(&operation, e))?;
        let resp = ensure_success(resp, &operation).await?;

        let mut file = tokio::fs::File::create(local_path).await?;
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;

        let copied = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| BackupError::transfer(&operation, e))?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
                observer.on_progress(written);
            }
            file.flush().await?;
            Ok::<(), BackupError>(())
        }
        .await;

        if let Err(e) = copied {
            drop(file);
            if let Err(rm) = tokio::fs::remove_file(local_path).await {
                warn!("Failed to remove partial download {}: {}", local_path.display(), rm);
            }
            return Err(e);
        }

        observer.finish();
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BackupObjectDescriptor>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let page = self.list_page(prefix, continuation_token.as_deref()).await?;

            for obj in page.contents {
                // Skip directory markers
                if obj.key.ends_with('/') {
                    continue;
                }
                let last_modified = parse_last_modified(&obj.last_modified).unwrap_or_else(|| {
                    warn!("Unparseable LastModified '{}' for {}", obj.last_modified, obj.key);
                    DateTime::<Utc>::UNIX_EPOCH
                });
                objects.push(BackupObjectDescriptor::new(obj.key, obj.size, last_modified));
            }

            match page.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        Ok(objects)
    }

    async fn stat(&self, remote_key: &str) -> Result<u64> {
        let operation = format!("HEAD {remote_key}");
        let url = self
            .bucket
            .head_object(Some(&self.credentials), remote_key)
            .sign(PRESIGN_DURATION);

        let resp = self
            .http
            .head(url.as_str())
            .send()
            .await
            .map_err(|e| BackupError::transfer(&operation, e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(BackupError::transfer(&operation, "object does not exist"));
        }
        let resp = ensure_success(resp, &operation).await?;

        // Read the header directly: for HEAD the body length is always zero.
        resp.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| BackupError::transfer(&operation, "missing Content-Length"))
    }

    fn location(&self, remote_key: &str) -> String {
        format!("s3://{}/{}", self.bucket.name(), remote_key)
    }
}

/// Longest slice of an error body carried into a transfer error
const ERROR_BODY_LIMIT: usize = 256;

/// Turn a non-2xx response into a transfer error carrying the status and body.
async fn ensure_success(resp: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackupError::transfer(
        operation,
        format!("HTTP {status}{}", error_detail(&body)),
    ))
}

/// `": <body>"` with whitespace collapsed and long bodies cut, or empty.
fn error_detail(body: &str) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.is_empty() {
        return String::new();
    }
    match flat.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((cut, _)) => format!(": {}...", &flat[..cut]),
        None => format!(": {flat}"),
    }
}

fn parse_last_modified(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use chrono::TimeZone;

    fn s3_config(endpoint: Option<&str>) -> S3Config {
        S3Config {
            bucket: "nightly-logs".to_string(),
            region: "eu-west-1".to_string(),
            endpoint: endpoint.map(str::to_string),
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: Secret::new("secret"),
            prefix: String::new(),
        }
    }

    #[test]
    fn test_location() {
        let client = S3TransferClient::new(&s3_config(None)).unwrap();
        assert_eq!(client.location("a-2025-01-01-0900.log"), "s3://nightly-logs/a-2025-01-01-0900.log");
    }

    #[test]
    fn test_custom_endpoint_uses_path_style() {
        let client = S3TransferClient::new(&s3_config(Some("http://localhost:9000"))).unwrap();
        let url = client
            .bucket
            .get_object(Some(&client.credentials), "a.log")
            .sign(PRESIGN_DURATION);
        assert!(url.as_str().starts_with("http://localhost:9000/nightly-logs/a.log"));
    }

    #[test]
    fn test_default_endpoint_is_regional() {
        let client = S3TransferClient::new(&s3_config(None)).unwrap();
        let url = client
            .bucket
            .head_object(Some(&client.credentials), "a.log")
            .sign(PRESIGN_DURATION);
        assert!(url
            .as_str()
            .starts_with("https://nightly-logs.s3.eu-west-1.amazonaws.com/a.log"));
    }

    #[test]
    fn test_invalid_endpoint_is_config_error() {
        let err = S3TransferClient::new(&s3_config(Some("not a url"))).err().unwrap();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_error_detail() {
        let body = "<?xml version=\"1.0\"?>\n<Error>\n  <Code>NoSuchBucket</Code>\n\
                    <Message>The specified bucket does not exist</Message></Error>";
        let detail = error_detail(body);
        assert!(detail.starts_with(": <?xml"));
        assert!(detail.contains("<Code>NoSuchBucket</Code>"));
        assert!(!detail.contains('\n'));
        assert_eq!(error_detail("  \n "), "");
    }

    #[test]
    fn test_error_detail_truncates_long_bodies() {
        let detail = error_detail(&"x".repeat(1000));
        assert_eq!(detail, format!(": {}...", "x".repeat(ERROR_BODY_LIMIT)));
    }

    #[test]
    fn test_parse_last_modified() {
        assert_eq!(
            parse_last_modified("2025-01-01T09:00:00.000Z"),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap())
        );
        assert_eq!(parse_last_modified("yesterday"), None);
    }
}
