//! Room-scoped session tokens: HMAC-SHA256 signed claims, URL-safe base64.

use crate::error::GameError;
use crate::types::{now_ms, PlayerId, RoomId, SessionId};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime: 24 hours.
pub const TOKEN_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Remaining lifetime below which a refresh re-issues the token: 5 minutes.
pub const REFRESH_WINDOW_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: PlayerId,
    pub room_id: RoomId,
    pub session_id: SessionId,
    /// Expiry, wall-clock milliseconds.
    pub exp: i64,
}

/// Issues and verifies session tokens with a process-wide symmetric key.
#[derive(Clone)]
pub struct TokenService {
    key: [u8; 32],
}

impl TokenService {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Issue a token binding (player, room, session) for 24 hours.
    pub fn issue(&self, player_id: &str, room_id: &str, session_id: &str) -> String {
        let claims = Claims {
            sub: player_id.to_string(),
            room_id: room_id.to_string(),
            session_id: session_id.to_string(),
            exp: now_ms() + TOKEN_TTL_MS,
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> String {
        // Claims are a closed struct; serialization cannot fail.
        let payload = serde_json::to_vec(claims).unwrap_or_default();
        let sig = self.mac(&payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(sig)
        )
    }

    fn mac(&self, data: &[u8]) -> [u8; 32] {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    /// Verify signature and expiry, returning the embedded claims.
    pub fn verify(&self, token: &str) -> Result<Claims, GameError> {
        let mut parts = token.split('.');
        let (payload_b64, sig_b64) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(s), None) => (p, s),
            _ => return Err(GameError::Unauthorized("malformed token".into())),
        };

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| GameError::Unauthorized("malformed token".into()))?;
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| GameError::Unauthorized("malformed token".into()))?;

        let expected = self.mac(&payload);
        if !constant_time_eq(&sig, &expected) {
            return Err(GameError::Unauthorized("bad token signature".into()));
        }

        let claims: Claims = serde_json::from_slice(&payload)
            .map_err(|_| GameError::Unauthorized("malformed token claims".into()))?;

        if claims.exp <= now_ms() {
            return Err(GameError::Unauthorized("token expired".into()));
        }
        Ok(claims)
    }

    /// Verify and additionally pin the token to a specific room.
    pub fn verify_for_room(&self, token: &str, room_id: &str) -> Result<Claims, GameError> {
        let claims = self.verify(token)?;
        if claims.room_id != room_id {
            return Err(GameError::Unauthorized("token issued for another room".into()));
        }
        Ok(claims)
    }

    /// Re-issue when the remaining lifetime is inside the refresh window.
    pub fn refresh_if_needed(&self, claims: &Claims) -> Option<String> {
        if claims.exp - now_ms() <= REFRESH_WINDOW_MS {
            Some(self.issue(&claims.sub, &claims.room_id, &claims.session_id))
        } else {
            None
        }
    }
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
