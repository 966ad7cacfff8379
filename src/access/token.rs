//! Signed, stateless video tokens.
//!
//! Format: `base64url(payload_json).hex(hmac_sha256(secret, payload_b64))`.
//! A token names one video and one user. Entitlement is not carried; it is
//! re-derived from the user row on every request.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use gatehouse_common::{Error, Result, UserId, VideoId};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Claims {
    video_id: VideoId,
    user_id: UserId,
    /// Expiry, unix seconds.
    exp: i64,
}

/// HMAC key for signing tokens.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signer from the configured hex secret, or a random one.
    pub fn from_config(secret: Option<&str>) -> Result<Self> {
        match secret {
            Some(hex_secret) => {
                let bytes = hex::decode(hex_secret)
                    .map_err(|e| Error::validation(format!("token secret is not hex: {e}")))?;
                Ok(Self::new(bytes))
            }
            None => {
                tracing::warn!("No token_secret configured; signed video tokens will not survive a restart");
                Ok(Self::new(rand::random::<[u8; 32]>().to_vec()))
            }
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::internal(format!("invalid HMAC key: {e}")))
    }

    /// Issue a token for `user_id` to stream `video_id` until `expires_at`.
    pub fn issue(&self, video_id: VideoId, user_id: UserId, expires_at: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            video_id,
            user_id,
            exp: expires_at.timestamp(),
        };
        let json = serde_json::to_vec(&claims).map_err(|e| Error::internal(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{payload}.{signature}"))
    }

    /// Verify a token for `video_id` and return the user it was issued to.
    pub fn verify(&self, token: &str, video_id: VideoId, now: DateTime<Utc>) -> Result<UserId> {
        let invalid = || Error::Unauthorized("invalid video token".to_string());

        let (payload, signature) = token.split_once('.').ok_or_else(invalid)?;
        let signature = hex::decode(signature).map_err(|_| invalid())?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid())?;

        let json = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| invalid())?;

        if claims.video_id != video_id {
            return Err(invalid());
        }
        if claims.exp <= now.timestamp() {
            return Err(Error::Unauthorized("video token expired".to_string()));
        }
        Ok(claims.user_id)
    }
}
