//! Webhook signature verification.
//!
//! All platforms sign the raw request body with HMAC-SHA256 over the
//! channel's shared secret; they differ only in how the digest is encoded:
//!
//! - shopify: base64 digest in `X-Shopify-Hmac-Sha256`
//! - woocommerce: `sha256=<hex>` in `X-WC-Webhook-Signature`
//! - custom: `<hex>` or `sha256=<hex>` in `X-Signature`
//!
//! Digests are compared with `Mac::verify_slice`, which is constant time.
//! Nothing here logs or returns the secret.

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{SyncError, SyncResult};
use crate::models::PlatformKind;

type HmacSha256 = Hmac<Sha256>;

/// Accepted on every platform in addition to the platform's own header.
pub const FALLBACK_SIGNATURE_HEADER: &str = "X-Signature";

const HEX_PREFIX: &str = "sha256=";

pub fn signature_header(kind: PlatformKind) -> &'static str {
    match kind {
        PlatformKind::Shopify => "X-Shopify-Hmac-Sha256",
        PlatformKind::WooCommerce => "X-WC-Webhook-Signature",
        PlatformKind::Custom => FALLBACK_SIGNATURE_HEADER,
    }
}

/// Human-readable description of the expected header value.
pub fn signature_encoding(kind: PlatformKind) -> &'static str {
    match kind {
        PlatformKind::Shopify => "base64(hmac_sha256(body))",
        PlatformKind::WooCommerce => "sha256=hex(hmac_sha256(body))",
        PlatformKind::Custom => "hex(hmac_sha256(body)), optionally prefixed with sha256=",
    }
}

/// Pull the signature for `kind` out of the request headers.
pub fn extract_signature(headers: &HeaderMap, kind: PlatformKind) -> Option<&str> {
    [signature_header(kind), FALLBACK_SIGNATURE_HEADER]
        .into_iter()
        .find_map(|name| headers.get(name))
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Produce the header value a platform would send for `body`.
pub fn sign(body: &[u8], secret: &str, kind: PlatformKind) -> SyncResult<String> {
    let mut mac = keyed(secret)?;
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    Ok(match kind {
        PlatformKind::Shopify => BASE64.encode(digest),
        PlatformKind::WooCommerce => format!("{HEX_PREFIX}{}", hex::encode(digest)),
        PlatformKind::Custom => hex::encode(digest),
    })
}

/// Verify `signature` against the exact raw bytes of the request body.
///
/// A missing signature or an empty secret never verifies.
pub fn verify(body: &[u8], signature: Option<&str>, secret: &str, kind: PlatformKind) -> bool {
    let Some(signature) = signature.map(str::trim) else {
        return false;
    };
    if secret.is_empty() {
        return false;
    }

    let provided = match kind {
        PlatformKind::Shopify => BASE64.decode(signature).ok(),
        // WooCommerce only ever sends lowercase hex; anything else is not its header.
        PlatformKind::WooCommerce => signature
            .strip_prefix(HEX_PREFIX)
            .filter(|h| !h.bytes().any(|b| b.is_ascii_uppercase()))
            .and_then(|h| hex::decode(h).ok()),
        PlatformKind::Custom => {
            let bare = signature.strip_prefix(HEX_PREFIX).unwrap_or(signature);
            hex::decode(bare).ok()
        }
    };
    let Some(provided) = provided else {
        return false;
    };

    let Ok(mut mac) = keyed(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// [`verify`] with the failure reason as an error.
pub fn check(body: &[u8], signature: Option<&str>, secret: &str, kind: PlatformKind) -> SyncResult<()> {
    if signature.is_none() {
        return Err(SyncError::SignatureMissing);
    }
    if verify(body, signature, secret, kind) {
        Ok(())
    } else {
        Err(SyncError::SignatureInvalid)
    }
}

fn keyed(secret: &str) -> SyncResult<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SyncError::InvalidRequest("webhook secret cannot key HMAC-SHA256".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "s3cret";
    const BODY: &[u8] = br#"{"id":1001,"total_price":"10.00"}"#;

    const ALL: [PlatformKind; 3] = [
        PlatformKind::Shopify,
        PlatformKind::WooCommerce,
        PlatformKind::Custom,
    ];

    #[test]
    fn signed_bodies_verify_on_every_platform() {
        for kind in ALL {
            let sig = sign(BODY, SECRET, kind).unwrap();
            assert!(verify(BODY, Some(&sig), SECRET, kind), "{kind:?}");
        }
    }

    #[test]
    fn flipping_any_byte_breaks_verification() {
        let sig = sign(BODY, SECRET, PlatformKind::Shopify).unwrap();
        for i in 0..BODY.len() {
            let mut tampered = BODY.to_vec();
            tampered[i] ^= 0x01;
            assert!(!verify(&tampered, Some(&sig), SECRET, PlatformKind::Shopify));
        }
    }

    #[test]
    fn wrong_secret_and_garbage_fail() {
        let sig = sign(BODY, SECRET, PlatformKind::Shopify).unwrap();
        assert!(!verify(BODY, Some(&sig), "other", PlatformKind::Shopify));
        assert!(!verify(BODY, Some("deadbeef"), SECRET, PlatformKind::Shopify));
        assert!(!verify(BODY, Some("deadbeef"), SECRET, PlatformKind::Custom));
        assert!(!verify(BODY, Some("not base64!"), SECRET, PlatformKind::Shopify));
        assert!(!verify(BODY, Some(&sig), "", PlatformKind::Shopify));
    }

    #[test]
    fn woocommerce_requires_the_prefix() {
        let sig = sign(BODY, SECRET, PlatformKind::WooCommerce).unwrap();
        let bare = sig.trim_start_matches(HEX_PREFIX);
        assert!(!verify(BODY, Some(bare), SECRET, PlatformKind::WooCommerce));
    }

    #[test]
    fn woocommerce_matches_lowercase_hex_only() {
        let sig = sign(BODY, SECRET, PlatformKind::WooCommerce).unwrap();
        assert!(verify(BODY, Some(&sig), SECRET, PlatformKind::WooCommerce));

        let shouted = format!("{HEX_PREFIX}{}", sig.trim_start_matches(HEX_PREFIX).to_uppercase());
        assert!(!verify(BODY, Some(&shouted), SECRET, PlatformKind::WooCommerce));
    }

    #[test]
    fn custom_accepts_bare_or_prefixed_hex() {
        let bare = sign(BODY, SECRET, PlatformKind::Custom).unwrap();
        let prefixed = format!("sha256={bare}");
        assert!(verify(BODY, Some(&bare), SECRET, PlatformKind::Custom));
        assert!(verify(BODY, Some(&prefixed), SECRET, PlatformKind::Custom));
    }

    #[test]
    fn missing_signature_is_its_own_error() {
        assert!(matches!(
            check(BODY, None, SECRET, PlatformKind::Shopify),
            Err(SyncError::SignatureMissing)
        ));
        assert!(matches!(
            check(BODY, Some("deadbeef"), SECRET, PlatformKind::Shopify),
            Err(SyncError::SignatureInvalid)
        ));
    }

    #[test]
    fn platform_header_wins_over_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-signature", HeaderValue::from_static("fallback"));
        assert_eq!(extract_signature(&headers, PlatformKind::Shopify), Some("fallback"));

        headers.insert("x-shopify-hmac-sha256", HeaderValue::from_static("primary"));
        assert_eq!(extract_signature(&headers, PlatformKind::Shopify), Some("primary"));

        assert_eq!(extract_signature(&HeaderMap::new(), PlatformKind::Custom), None);
    }
}
