// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! AWS Signature Version 4 request signing.
//!
//! Only what the JSON protocol needs is covered: a single path, no query
//! string, and a small set of headers that are all signed.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::credentials::Credentials;
use crate::transport::TransportError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// The parts of an HTTP request covered by the signature.
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Header names and values; names are lowercased while signing.
    pub headers: Vec<(String, String)>,
    pub payload: &'a [u8],
}

/// Formats `time` as the `X-Amz-Date` value, e.g. `20150830T123600Z`.
pub fn amz_date(time: OffsetDateTime) -> Result<String, TransportError> {
    time.format(format_description!(
        "[year][month][day]T[hour][minute][second]Z"
    ))
    .map_err(|e| TransportError::Signing(e.to_string()))
}

fn short_date(time: OffsetDateTime) -> Result<String, TransportError> {
    time.format(format_description!("[year][month][day]"))
        .map_err(|e| TransportError::Signing(e.to_string()))
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| TransportError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derives the per-day signing key.
pub fn signing_key(
    secret_access_key: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, TransportError> {
    let k_date = hmac(format!("AWS4{secret_access_key}").as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// Returns the `(canonical request, signed header list)` pair.
fn canonical_request(request: &SigningRequest<'_>) -> (String, String) {
    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_lowercase(), value.trim().to_string()))
        .collect();
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        request.method,
        request.path,
        canonical_headers,
        signed_headers,
        sha256_hex(request.payload)
    );
    (canonical, signed_headers)
}

/// Computes the `Authorization` header value for `request`.
///
/// `request.headers` must already contain `host` and `x-amz-date` (and
/// `x-amz-security-token` when the credentials carry one), with the date
/// matching `time`.
pub fn authorization(
    request: &SigningRequest<'_>,
    credentials: &Credentials,
    region: &str,
    service: &str,
    time: OffsetDateTime,
) -> Result<String, TransportError> {
    let date = short_date(time)?;
    let scope = format!("{date}/{region}/{service}/aws4_request");
    let (canonical, signed_headers) = canonical_request(request);

    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{scope}\n{}",
        amz_date(time)?,
        sha256_hex(canonical.as_bytes())
    );
    let key = signing_key(&credentials.secret_access_key, &date, region, service)?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    Ok(format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id
    ))
}
