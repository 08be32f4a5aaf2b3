use std::fs;
use std::sync::Mutex;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Credentials;
use crate::error::FetchError;

const AUDIENCE: &str = "appstoreconnect-v1";

/// App Store Connect rejects tokens valid for longer than 20 minutes
const TOKEN_LIFETIME_SECS: i64 = 20 * 60;

/// Re-sign when the cached token is this close to expiring
const REFRESH_MARGIN_SECS: i64 = 60;

/// Source of bearer credentials for API requests
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> Result<String, FetchError>;
}

/// A token issued elsewhere, used as-is
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn bearer_token(&self) -> Result<String, FetchError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    iat: i64,
    exp: i64,
    aud: String,
}

/// Signs ES256 JWTs from an App Store Connect API key
pub struct JwtTokenProvider {
    issuer_id: String,
    header: Header,
    key: EncodingKey,
    cached: Mutex<Option<(String, i64)>>,
}

impl JwtTokenProvider {
    /// Build a provider from a PKCS#8 PEM private key. Signs the first token
    /// immediately so a bad key fails before any request is made.
    pub fn new(
        key_id: impl Into<String>,
        issuer_id: impl Into<String>,
        private_key_pem: &[u8],
    ) -> Result<Self, FetchError> {
        let key = EncodingKey::from_ec_pem(private_key_pem)
            .map_err(|e| FetchError::Auth(format!("invalid private key: {}", e)))?;

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(key_id.into());

        let provider = Self {
            issuer_id: issuer_id.into(),
            header,
            key,
            cached: Mutex::new(None),
        };
        provider.bearer_token()?;

        Ok(provider)
    }

    /// Read the key file named in the credentials
    pub fn from_credentials(credentials: &Credentials) -> Result<Self, FetchError> {
        let pem = fs::read(&credentials.api_key_path).map_err(|e| {
            FetchError::Auth(format!(
                "failed to read {}: {}",
                credentials.api_key_path.display(),
                e
            ))
        })?;

        info!(key_id = %credentials.api_key_id, "Loaded App Store Connect API key");

        Self::new(&credentials.api_key_id, &credentials.issuer_id, &pem)
    }

    fn sign(&self, now: i64) -> Result<(String, i64), FetchError> {
        let claims = Claims {
            iss: self.issuer_id.clone(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
            aud: AUDIENCE.to_string(),
        };

        let token = encode(&self.header, &claims, &self.key)
            .map_err(|e| FetchError::Auth(format!("failed to sign token: {}", e)))?;

        debug!(exp = claims.exp, "Signed App Store Connect token");

        Ok((token, claims.exp))
    }
}

impl TokenProvider for JwtTokenProvider {
    fn bearer_token(&self) -> Result<String, FetchError> {
        let now = Utc::now().timestamp();
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| FetchError::Auth("token cache poisoned".to_string()))?;

        if let Some((token, exp)) = cached.as_ref() {
            if now < exp - REFRESH_MARGIN_SECS {
                return Ok(token.clone());
            }
        }

        let (token, exp) = self.sign(now)?;
        *cached = Some((token.clone(), exp));

        Ok(token)
    }
}
