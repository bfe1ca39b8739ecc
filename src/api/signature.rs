//! Webhook signature verification.
//!
//! The platform signs each delivery with a per-endpoint secret and sends a
//! `Ledger-Signature` header shaped `t=<unix>,v1=<hex>[,v1=<hex>...]`.
//! The signed payload is `"{t}.{raw_body}"` under HMAC-SHA256. Multiple `v1`
//! entries appear during secret rotation; any one matching is sufficient.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Ledger-Signature";

/// Maximum accepted clock skew between the signature timestamp and now.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Verify a raw payload against the signature header using the secret
/// resolved for the path alias. Only that secret is ever tried.
pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;

    let age = (now - parsed.timestamp).abs();
    if age > tolerance_secs {
        return Err(SignatureError::OutsideTolerance { age_secs: age });
    }

    let signed_payload = signed_payload(parsed.timestamp, payload);
    for candidate in &parsed.signatures {
        let Ok(digest) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SignatureError::Malformed("invalid secret length".to_string()))?;
        mac.update(&signed_payload);
        // verify_slice is constant-time.
        if mac.verify_slice(&digest).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::NoMatch)
}

/// Compute the hex `v1` signature for a payload; used to sign test fixtures.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(&signed_payload(timestamp, payload));
    hex::encode(mac.finalize().into_bytes())
}

fn signed_payload(timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    signed
}

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next().map(str::trim), kv.next().map(str::trim)) {
            (Some("t"), Some(value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    SignatureError::Malformed(format!("bad timestamp: {}", value))
                })?);
            }
            (Some("v1"), Some(value)) if !value.is_empty() => {
                signatures.push(value.to_string());
            }
            // Unknown schemes (v0, ...) are ignored.
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| SignatureError::Malformed("missing t= element".to_string()))?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed(
            "missing v1= element".to_string(),
        ));
    }
    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;

    fn header_for(payload: &[u8], secret: &str, ts: i64) -> String {
        format!("t={},v1={}", ts, sign(secret, ts, payload))
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"type":"invoice.paid"}"#;
        let header = header_for(payload, SECRET, NOW);
        assert!(verify(payload, &header, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_ok());
    }

    #[test]
    fn rejects_signature_from_another_accounts_secret() {
        let payload = br#"{"type":"invoice.paid"}"#;
        let header = header_for(payload, "whsec_other_account", NOW);
        assert!(matches!(
            verify(payload, &header, SECRET, DEFAULT_TOLERANCE_SECS, NOW),
            Err(SignatureError::NoMatch)
        ));
    }

    #[test]
    fn rejects_tampered_payload() {
        let payload = br#"{"type":"invoice.paid"}"#;
        let header = header_for(payload, SECRET, NOW);
        assert!(verify(
            br#"{"type":"invoice.voided"}"#,
            &header,
            SECRET,
            DEFAULT_TOLERANCE_SECS,
            NOW
        )
        .is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = b"{}";
        let ts = NOW - DEFAULT_TOLERANCE_SECS - 1;
        let header = header_for(payload, SECRET, ts);
        assert!(matches!(
            verify(payload, &header, SECRET, DEFAULT_TOLERANCE_SECS, NOW),
            Err(SignatureError::OutsideTolerance { .. })
        ));
    }

    #[test]
    fn any_rotated_v1_may_match() {
        let payload = b"{}";
        let good = sign(SECRET, NOW, payload);
        let stale = sign("whsec_retired", NOW, payload);
        let header = format!("t={},v1={},v1={}", NOW, stale, good);
        assert!(verify(payload, &header, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_ok());
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(matches!(
            verify(b"{}", "v1=abc", SECRET, DEFAULT_TOLERANCE_SECS, NOW),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            verify(b"{}", "t=123", SECRET, DEFAULT_TOLERANCE_SECS, NOW),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            verify(b"{}", "t=notanumber,v1=ab", SECRET, DEFAULT_TOLERANCE_SECS, NOW),
            Err(SignatureError::Malformed(_))
        ));
    }
}
