//! Advisory JWT claim extraction.
//!
//! Nothing here verifies a signature. The claims drive client-side expiry
//! bookkeeping and optimistic role checks only; the server re-validates every
//! request that matters.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value;

/// Claims read from an access token's payload segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub subject_id: Option<String>,
    pub role: Option<String>,
    /// `exp`, epoch seconds
    pub expiry: Option<i64>,
    /// `iat`, epoch seconds
    pub issued_at: Option<i64>,
}

impl TokenClaims {
    pub fn expiry_ms(&self) -> Option<i64> {
        self.expiry.and_then(|secs| secs.checked_mul(1000))
    }
}

/// Decode the payload of a `header.payload.signature` token.
/// Returns `None` for anything that is not a JWT with a JSON object payload.
pub fn decode(token: &str) -> Option<TokenClaims> {
    let mut parts = token.trim().split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;
    let Value::Object(claims) = serde_json::from_slice::<Value>(&bytes).ok()? else {
        return None;
    };

    let subject_id = ["sub", "id", "userId"]
        .iter()
        .find_map(|name| claims.get(*name).and_then(value_as_string));

    Some(TokenClaims {
        subject_id,
        role: claims.get("role").and_then(Value::as_str).map(str::to_string),
        expiry: claims.get("exp").and_then(value_as_seconds),
        issued_at: claims.get("iat").and_then(value_as_seconds),
    })
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_seconds(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an unsigned token carrying `claims`.
    pub(crate) fn make_token(claims: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn test_decode_standard_claims() {
        let token = make_token(serde_json::json!({
            "sub": "42", "role": "admin", "exp": 1_700_000_000, "iat": 1_699_990_000
        }));
        let claims = decode(&token).expect("token should decode");
        assert_eq!(claims.subject_id.as_deref(), Some("42"));
        assert_eq!(claims.role.as_deref(), Some("admin"));
        assert_eq!(claims.expiry, Some(1_700_000_000));
        assert_eq!(claims.expiry_ms(), Some(1_700_000_000_000));
        assert_eq!(claims.issued_at, Some(1_699_990_000));
    }

    #[test]
    fn test_decode_numeric_id_claim() {
        let token = make_token(serde_json::json!({"id": 7, "role": "member"}));
        let claims = decode(&token).unwrap();
        assert_eq!(claims.subject_id.as_deref(), Some("7"));
        assert_eq!(claims.expiry, None);
    }

    #[test]
    fn test_decode_malformed_is_none() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("opaque-token"), None);
        assert_eq!(decode("a.b"), None);
        assert_eq!(decode("a.!!!.c"), None);
        assert_eq!(decode("a.b.c.d"), None);

        // Valid base64 but not a JSON object
        let array = URL_SAFE_NO_PAD.encode("[1,2,3]");
        assert_eq!(decode(&format!("h.{}.s", array)), None);
    }
}
