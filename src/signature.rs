//! `ACS3-HMAC-SHA256` request signing for the identity service

use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Signature algorithm name, also the `Authorization` scheme
pub const ALGORITHM: &str = "ACS3-HMAC-SHA256";

/// The parts of an HTTP request covered by the signature
#[derive(Debug)]
pub struct CanonicalRequest<'a> {
    /// HTTP method
    pub method: &'a str,
    /// Absolute path
    pub path: &'a str,
    /// Query parameters
    pub query: &'a BTreeMap<String, String>,
    /// Signed headers, names in lowercase
    pub headers: &'a BTreeMap<String, String>,
    /// Hex SHA-256 of the body
    pub payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    /// Signed header names joined by `;`
    pub fn signed_headers(&self) -> String {
        self.headers.keys().map(String::as_str).collect::<Vec<_>>().join(";")
    }

    /// Canonical text the string-to-sign is derived from
    pub fn to_canonical_string(&self) -> String {
        let headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();

        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.path,
            canonical_query(self.query),
            headers,
            self.signed_headers(),
            self.payload_hash
        )
    }
}

/// RFC 3986 percent-encoding (space as `%20`, `*` as `%2A`, `~` kept)
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Query string with encoded keys and values in key order
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", percent_encode(key), percent_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase hex SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute the `Authorization` header value for a request
pub fn authorization(
    access_key_id: &str,
    access_key_secret: &str,
    request: &CanonicalRequest<'_>,
) -> Result<String> {
    let string_to_sign = format!(
        "{}\n{}",
        ALGORITHM,
        sha256_hex(request.to_canonical_string().as_bytes())
    );

    let mut mac = HmacSha256::new_from_slice(access_key_secret.as_bytes())
        .map_err(|e| Error::config(format!("invalid access key secret: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(format!(
        "{} Credential={},SignedHeaders={},Signature={}",
        ALGORITHM,
        access_key_id,
        request.signed_headers(),
        signature
    ))
}
