use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_TTL_SECS: i64 = 30 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid email or password")]
    BadCredentials,

    #[error("malformed token")]
    Malformed,

    #[error("bad signature")]
    BadSignature,

    #[error("bad issuer")]
    BadIssuer,

    #[error("token expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    iat: i64,
    exp: i64,
}

/// Single-admin token authority. Mints and verifies HMAC-SHA256 signed
/// bearer tokens; the core never sees any of this, it only receives the
/// authenticated principal identifier for audit logging.
pub struct TokenAuthority {
    secret: String,
    issuer: String,
    admin_email: String,
    admin_password: String,
}

impl TokenAuthority {
    pub fn new(
        secret: impl Into<String>,
        issuer: impl Into<String>,
        admin_email: impl Into<String>,
        admin_password: impl Into<String>,
    ) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.into(),
            admin_email: admin_email.into(),
            admin_password: admin_password.into(),
        }
    }

    pub fn login(&self, email: &str, password: &str) -> Result<String, AuthError> {
        if email.trim().to_lowercase() != self.admin_email.to_lowercase()
            || password != self.admin_password
        {
            return Err(AuthError::BadCredentials);
        }
        Ok(self.mint(email.trim()))
    }

    fn mint(&self, subject: &str) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
        let signature = URL_SAFE_NO_PAD.encode(self.sign(payload.as_bytes()));
        format!("{payload}.{signature}")
    }

    /// Returns the authenticated principal identifier.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::Malformed)?;

        let presented = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::Malformed)?;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        // Constant-time comparison.
        mac.verify_slice(&presented)
            .map_err(|_| AuthError::BadSignature)?;

        let raw = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&raw).map_err(|_| AuthError::Malformed)?;

        if claims.iss != self.issuer {
            return Err(AuthError::BadIssuer);
        }
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }

        Ok(claims.sub)
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}
