//! AWS Signature Version 4 for S3 requests
//!
//! Bodies are streamed, so requests are signed with `UNSIGNED-PAYLOAD`
//! instead of a hash of the content.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Result, SyncError};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// Payload hash value for streamed bodies
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Access key pair
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Headers to add to a signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub authorization: String,
    /// Value of `x-amz-date`
    pub amz_date: String,
}

/// Request parts covered by the signature
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub method: &'a str,
    /// `host[:port]` as sent in the Host header
    pub host: &'a str,
    /// Already URI-encoded absolute path
    pub canonical_uri: &'a str,
    /// Extra headers to sign besides `host` and `x-amz-date`
    pub headers: &'a [(&'a str, &'a str)],
    pub payload_hash: &'a str,
}

/// Percent-encode a path, leaving `/` and unreserved characters as is
pub fn uri_encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| SyncError::StorageError {
        message: format!("Failed to sign request: {}", e),
    })?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Sign `request` at time `now`
pub fn sign(
    credentials: &Credentials,
    region: &str,
    request: &SigningRequest<'_>,
    now: DateTime<Utc>,
) -> Result<Signature> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    headers.push(("host".into(), request.host.to_string()));
    headers.push(("x-amz-date".into(), amz_date.clone()));
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        request.method, request.canonical_uri, canonical_headers, signed_headers, request.payload_hash
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, SERVICE);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("AWS4{}", credentials.secret_access_key).as_bytes(), &date)?;
    let k_region = hmac(&k_date, region)?;
    let k_service = hmac(&k_region, SERVICE)?;
    let k_signing = hmac(&k_service, "aws4_request")?;
    let signature = hex::encode(hmac(&k_signing, &string_to_sign)?);

    Ok(Signature {
        authorization: format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, credentials.access_key_id, scope, signed_headers, signature
        ),
        amz_date,
    })
}
