//! C1 — Token Codec.
//!
//! Tokens are a two-segment string `<payloadB64>.<sigB64>`, both segments
//! URL-safe base64 without padding. The signature is HMAC-SHA256 of
//! `payloadB64` under a process-wide shared secret, following the
//! sign/verify shape of a webhook-signing helper: compute the MAC, compare
//! in constant time.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::TokenError;
use crate::ids::{Jti, PeerId, RoomId, SessionId};

type HmacSha256 = Hmac<Sha256>;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Clock-skew tolerance for `iat`, in seconds.
const IAT_SKEW_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    #[serde(rename = "peerId")]
    pub peer_id: PeerId,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<SessionId>,
    pub jti: Jti,
    pub iat: i64,
    pub exp: i64,
}

/// Optional equality checks applied during verification when the caller
/// already knows what it expects to find (e.g. re-validating a resume).
#[derive(Debug, Default, Clone)]
pub struct Expected {
    pub room_id: Option<RoomId>,
    pub peer_id: Option<PeerId>,
    pub session_id: Option<SessionId>,
}

pub struct TokenCodec {
    secret: Vec<u8>,
    /// jti -> exp, reaped opportunistically on every verify.
    nonces: Mutex<HashMap<Jti, i64>>,
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            nonces: Mutex::new(HashMap::new()),
        }
    }

    fn mac(&self, payload_b64: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key size");
        mac.update(payload_b64.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Sign `payload`, returning `<payloadB64>.<sigB64>`.
    pub fn sign(&self, payload: &TokenPayload) -> String {
        let payload_json = serde_json::to_vec(payload).expect("TokenPayload always serializes");
        let payload_b64 = B64.encode(payload_json);
        let sig_b64 = B64.encode(self.mac(&payload_b64));
        format!("{payload_b64}.{sig_b64}")
    }

    /// Verify `token` against `now` (unix seconds) and `expected` bindings.
    /// When `consume_jti` is true, a successful verification records the
    /// nonce so it cannot be accepted again until past its `exp`.
    pub fn verify(
        &self,
        token: &str,
        now: i64,
        expected: &Expected,
        consume_jti: bool,
    ) -> Result<TokenPayload, TokenError> {
        let mut parts = token.split('.');
        let payload_b64 = parts.next().ok_or(TokenError::BadFormat)?;
        let sig_b64 = parts.next().ok_or(TokenError::BadFormat)?;
        if parts.next().is_some() {
            return Err(TokenError::BadFormat);
        }

        let given_sig = B64.decode(sig_b64).map_err(|_| TokenError::BadFormat)?;
        let expected_sig = self.mac(payload_b64);
        if !constant_time_eq(&expected_sig, &given_sig) {
            return Err(TokenError::BadSig);
        }

        let payload_json = B64.decode(payload_b64).map_err(|_| TokenError::BadFormat)?;
        let payload = parse_payload(&payload_json)?;

        if payload.exp <= now {
            return Err(TokenError::Expired);
        }
        if payload.iat > now + IAT_SKEW_SECS {
            return Err(TokenError::IatInFuture);
        }
        if let Some(room_id) = &expected.room_id {
            if room_id != &payload.room_id {
                return Err(TokenError::RoomIdMismatch);
            }
        }
        if let Some(peer_id) = &expected.peer_id {
            if peer_id != &payload.peer_id {
                return Err(TokenError::PeerIdMismatch);
            }
        }
        if let Some(session_id) = &expected.session_id {
            if Some(session_id) != payload.session_id.as_ref() {
                return Err(TokenError::SessionIdMismatch);
            }
        }

        if consume_jti {
            let mut nonces = self.nonces.lock().unwrap();
            nonces.retain(|_, exp| *exp > now);
            if nonces.contains_key(&payload.jti) {
                return Err(TokenError::Replayed);
            }
            nonces.insert(payload.jti.clone(), payload.exp);
        }

        Ok(payload)
    }
}

/// Parse a decoded token payload, distinguishing a missing required field
/// (`no_<field>`) from a payload that isn't even a valid mapping
/// (`bad_format`).
fn parse_payload(payload_json: &[u8]) -> Result<TokenPayload, TokenError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload_json).map_err(|_| TokenError::BadFormat)?;
    let obj = value.as_object().ok_or(TokenError::BadFormat)?;

    fn field<T: serde::de::DeserializeOwned>(
        obj: &serde_json::Map<String, serde_json::Value>,
        name: &'static str,
    ) -> Result<T, TokenError> {
        let raw = obj.get(name).ok_or(TokenError::MissingField(name))?;
        serde_json::from_value(raw.clone()).map_err(|_| TokenError::MissingField(name))
    }

    Ok(TokenPayload {
        room_id: field(obj, "roomId")?,
        peer_id: field(obj, "peerId")?,
        session_id: obj.get("sessionId").cloned().and_then(|v| serde_json::from_value(v).ok()),
        jti: field(obj, "jti")?,
        iat: field(obj, "iat")?,
        exp: field(obj, "exp")?,
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(jti: &str, iat: i64, exp: i64) -> TokenPayload {
        TokenPayload {
            room_id: RoomId("r1".into()),
            peer_id: PeerId("p1".into()),
            session_id: Some(SessionId("s1".into())),
            jti: Jti(jti.into()),
            iat,
            exp,
        }
    }

    #[test]
    fn round_trip() {
        let codec = TokenCodec::new("secret");
        let p = payload("j1", 1000, 1060);
        let token = codec.sign(&p);
        let verified = codec
            .verify(&token, 1005, &Expected::default(), false)
            .unwrap();
        assert_eq!(verified, p);
    }

    #[test]
    fn bad_signature_rejected() {
        let codec = TokenCodec::new("secret");
        let other = TokenCodec::new("different");
        let token = other.sign(&payload("j1", 1000, 1060));
        assert_eq!(
            codec.verify(&token, 1005, &Expected::default(), false),
            Err(TokenError::BadSig)
        );
    }

    #[test]
    fn missing_field_rejected() {
        let codec = TokenCodec::new("secret");
        let payload_b64 = B64.encode(serde_json::to_vec(&serde_json::json!({
            "peerId": "p1",
            "jti": "j1",
            "iat": 1000,
            "exp": 1060,
        })).unwrap());
        let sig_b64 = B64.encode(codec.mac(&payload_b64));
        let token = format!("{payload_b64}.{sig_b64}");
        assert_eq!(
            codec.verify(&token, 1005, &Expected::default(), false),
            Err(TokenError::MissingField("roomId"))
        );
    }

    #[test]
    fn malformed_token_rejected() {
        let codec = TokenCodec::new("secret");
        assert_eq!(
            codec.verify("not-a-token", 1005, &Expected::default(), false),
            Err(TokenError::BadFormat)
        );
        assert_eq!(
            codec.verify("a.b.c", 1005, &Expected::default(), false),
            Err(TokenError::BadFormat)
        );
    }

    #[test]
    fn exp_boundary() {
        let codec = TokenCodec::new("secret");
        let token = codec.sign(&payload("j1", 1000, 1060));
        // exp == now is rejected
        assert_eq!(
            codec.verify(&token, 1060, &Expected::default(), false),
            Err(TokenError::Expired)
        );
        assert!(codec
            .verify(&token, 1059, &Expected::default(), false)
            .is_ok());
    }

    #[test]
    fn iat_skew_boundary() {
        let codec = TokenCodec::new("secret");
        let exact = codec.sign(&payload("j1", 1030, 2000));
        assert!(codec
            .verify(&exact, 1000, &Expected::default(), false)
            .is_ok());
        let over = codec.sign(&payload("j2", 1031, 2000));
        assert_eq!(
            codec.verify(&over, 1000, &Expected::default(), false),
            Err(TokenError::IatInFuture)
        );
    }

    #[test]
    fn binding_mismatches() {
        let codec = TokenCodec::new("secret");
        let token = codec.sign(&payload("j1", 1000, 1060));
        let expected = Expected {
            room_id: Some(RoomId("other".into())),
            ..Default::default()
        };
        assert_eq!(
            codec.verify(&token, 1005, &expected, false),
            Err(TokenError::RoomIdMismatch)
        );
    }

    #[test]
    fn replay_rejected_until_expiry() {
        let codec = TokenCodec::new("secret");
        let token = codec.sign(&payload("j1", 1000, 1060));
        assert!(codec
            .verify(&token, 1005, &Expected::default(), true)
            .is_ok());
        assert_eq!(
            codec.verify(&token, 1006, &Expected::default(), true),
            Err(TokenError::Replayed)
        );
    }
}
