//! S3-compatible storage client
//!
//! Async client using reqwest; file bodies are streamed, never buffered.
//! Requests are signed with SigV4 when credentials are configured and sent
//! anonymously otherwise.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Body, Client, Method, RequestBuilder, StatusCode, Url};
use tracing::{debug, warn};

use super::object_store::{ObjectBody, ObjectInfo, ObjectStore, PutOptions};
use super::sigv4::{self, Credentials, SigningRequest, UNSIGNED_PAYLOAD};
use crate::error::{Result, SyncError};

/// Header selecting the storage tier of a PUT
const STORAGE_CLASS_HEADER: &str = "x-amz-storage-class";

/// User metadata carrying the transfer a part belongs to
const TRANSFER_ID_HEADER: &str = "x-amz-meta-s3sync-transfer-id";

const CONTENT_SHA256_HEADER: &str = "x-amz-content-sha256";
const AMZ_DATE_HEADER: &str = "x-amz-date";

/// Configuration for S3 client
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Access key ID; requests are only signed when both keys are set
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds; 0 disables it
    pub request_timeout_secs: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            bucket: "s3sync".into(),
            region: "us-east-1".into(),
            access_key_id: None,
            secret_access_key: None,
            connect_timeout_secs: 10,
            // Parts can be up to 4 GiB
            request_timeout_secs: 0,
        }
    }
}

impl S3Config {
    /// Signing credentials, if both halves are configured
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(Credentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
            }),
            _ => None,
        }
    }

    /// Read the configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: std::env::var("S3_ENDPOINT").unwrap_or(defaults.endpoint),
            bucket: std::env::var("S3_BUCKET").unwrap_or(defaults.bucket),
            region: std::env::var("S3_REGION").unwrap_or(defaults.region),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID")
                .or(std::env::var("S3_ACCESS_KEY"))
                .ok(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY")
                .or(std::env::var("S3_SECRET_KEY"))
                .ok(),
            ..defaults
        }
    }
}

/// S3-compatible storage client using reqwest
pub struct S3Client {
    client: Client,
    config: S3Config,
    endpoint: Url,
    credentials: Option<Credentials>,
}

impl S3Client {
    /// Create a new S3 client
    pub fn new(config: S3Config) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs));
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(std::time::Duration::from_secs(config.request_timeout_secs));
        }

        let client = builder.build().map_err(|e| SyncError::StorageError {
            message: format!("Failed to create HTTP client: {}", e),
        })?;

        let endpoint = Url::parse(config.endpoint.trim_end_matches('/')).map_err(|e| {
            SyncError::Config {
                reason: format!("Invalid S3 endpoint {}: {}", config.endpoint, e),
            }
        })?;

        let credentials = config.credentials();
        if credentials.is_none() {
            warn!("No S3 credentials configured, sending unsigned requests");
        }

        Ok(Self {
            client,
            config,
            endpoint,
            credentials,
        })
    }

    /// Encoded path of an object: `/<bucket>/<key>`
    fn object_path(&self, key: &str) -> String {
        sigv4::uri_encode_path(&format!("/{}/{}", self.config.bucket, key))
    }

    /// Build URL for an object
    fn object_url(&self, key: &str) -> String {
        format!(
            "{}{}",
            self.config.endpoint.trim_end_matches('/'),
            self.object_path(key)
        )
    }

    /// `host[:port]` of the endpoint as reqwest sends it
    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Start a request for `key` with `headers` set and signed
    fn request(&self, method: Method, key: &str, headers: &[(&str, &str)]) -> Result<RequestBuilder> {
        let mut builder = self.client.request(method.clone(), self.object_url(key));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let Some(credentials) = &self.credentials else {
            return Ok(builder);
        };

        let mut signed: Vec<(&str, &str)> = headers.to_vec();
        signed.push((CONTENT_SHA256_HEADER, UNSIGNED_PAYLOAD));
        let path = self.object_path(key);
        let host = self.host();
        let signature = sigv4::sign(
            credentials,
            &self.config.region,
            &SigningRequest {
                method: method.as_str(),
                host: &host,
                canonical_uri: &path,
                headers: &signed,
                payload_hash: UNSIGNED_PAYLOAD,
            },
            Utc::now(),
        )?;

        Ok(builder
            .header(CONTENT_SHA256_HEADER, UNSIGNED_PAYLOAD)
            .header(AMZ_DATE_HEADER, signature.amz_date)
            .header(AUTHORIZATION, signature.authorization))
    }

    /// Get bucket name
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn put(&self, key: &str, body: ObjectBody, options: &PutOptions) -> Result<()> {
        let len = body.len();
        let class = options.class;

        let mut headers = vec![(STORAGE_CLASS_HEADER, class.as_str())];
        if let Some(transfer_id) = &options.transfer_id {
            headers.push((TRANSFER_ID_HEADER, transfer_id.as_str()));
        }

        let resp = self
            .request(Method::PUT, key, &headers)?
            .header(CONTENT_LENGTH, len)
            .body(Body::from(body.into_file()))
            .send()
            .await
            .map_err(|e| SyncError::StorageError {
                message: format!("Put object failed for {}: {}", key, e),
            })?;

        if !resp.status().is_success() {
            return Err(SyncError::StorageError {
                message: format!("Put object failed for {}: status {}", key, resp.status()),
            });
        }

        let etag = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        debug!("Put {} complete ({} bytes, {}), etag={}", key, len, class.as_str(), etag);
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        let resp = self
            .request(Method::HEAD, key, &[])?
            .send()
            .await
            .map_err(|e| SyncError::StorageError {
                message: format!("Head object failed for {}: {}", key, e),
            })?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !resp.status().is_success() {
            return Err(SyncError::StorageError {
                message: format!("Head object failed for {}: status {}", key, resp.status()),
            });
        }

        let size = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let transfer_id = resp
            .headers()
            .get(TRANSFER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Some(ObjectInfo { size, transfer_id }))
    }
}
