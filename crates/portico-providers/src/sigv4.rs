//! Minimal AWS Signature Version 4 for Bedrock invoke calls — HMAC-SHA256
//! chain over a canonical request, no SDK dependency.

use ring::{digest, hmac};

pub struct SigningParams<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub host: &'a str,
    /// Canonical (already URI-encoded) request path.
    pub path: &'a str,
    /// `YYYYMMDD'T'HHMMSS'Z'`.
    pub amz_date: &'a str,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn sha256_hex(data: &[u8]) -> String {
    hex(digest::digest(&digest::SHA256, data).as_ref())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

/// Percent-encode one path segment per the SigV4 canonical URI rules
/// (everything but unreserved characters).
pub fn uri_encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Sign a POST with a JSON body. Returns the `x-amz-date` and
/// `authorization` header values. The signed header set is fixed:
/// `content-type;host;x-amz-date`, with content-type pinned to
/// `application/json` (the only body type the gateway sends).
pub fn sign(params: &SigningParams<'_>, body: &[u8]) -> (String, String) {
    let date = &params.amz_date[..8];
    let payload_hash = sha256_hex(body);

    let canonical_request = format!(
        "POST\n{}\n\ncontent-type:application/json\nhost:{}\nx-amz-date:{}\n\ncontent-type;host;x-amz-date\n{}",
        params.path, params.host, params.amz_date, payload_hash,
    );

    let scope = format!(
        "{date}/{}/{}/aws4_request",
        params.region, params.service
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{scope}\n{}",
        params.amz_date,
        sha256_hex(canonical_request.as_bytes()),
    );

    let k_date = hmac_sha256(
        format!("AWS4{}", params.secret_access_key).as_bytes(),
        date.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, params.region.as_bytes());
    let k_service = hmac_sha256(&k_region, params.service.as_bytes());
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex(&hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders=content-type;host;x-amz-date, Signature={signature}",
        params.access_key_id,
    );
    (params.amz_date.to_string(), authorization)
}
