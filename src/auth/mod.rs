// Auth Module
// Password hashing, RS256 tokens and a static API key bypass

pub mod config;
pub mod error;
pub mod jwt;
pub mod keys;
pub mod password;

pub use config::AuthConfig;
pub use error::AuthError;
pub use jwt::Claims;
pub use keys::KeyMaterial;

use chrono::{Duration, Utc};
use jwt::{TokenSigner, EXPIRY_CLAIM};
use serde_json::Value;
use std::path::PathBuf;
use subtle::ConstantTimeEq;
use tracing::debug;

/// Authentication helper bound to one set of key material
pub struct Auth {
    config: AuthConfig,
    keys: KeyMaterial,
    signer: TokenSigner,
}

impl Auth {
    /// Load the keys under `config.root_path`, creating them on first use
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let keys = KeyMaterial::load_or_create(&config.root_path)?;
        let signer = TokenSigner::new(&keys)?;
        Ok(Self {
            config,
            keys,
            signer,
        })
    }

    pub fn with_root(root_path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        Self::new(AuthConfig::new(root_path))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn public_key_pem(&self) -> &str {
        &self.keys.public_pem
    }

    pub fn certificate_pem(&self) -> &str {
        &self.keys.certificate_pem
    }

    pub fn hash_password(&self, plain: &str) -> Result<String, AuthError> {
        password::hash_password(plain, self.config.bcrypt_cost)
    }

    pub fn check_password(&self, hash: &str, plain: &str) -> bool {
        password::check_password(hash, plain)
    }

    /// Sign `claims`. Without an `exp` claim the configured token lifetime applies, if any.
    pub fn get_token(&self, mut claims: Claims) -> Result<String, AuthError> {
        if let Some(minutes) = self.config.token_lifetime_minutes {
            if !claims.contains_key(EXPIRY_CLAIM) {
                let exp = (Utc::now() + Duration::minutes(minutes)).timestamp();
                claims.insert(EXPIRY_CLAIM.to_string(), Value::from(exp));
            }
        }
        self.signer.sign(&claims)
    }

    /// Sign `claims` with `exp` set to now + `lifetime`
    pub fn get_token_with_expiry(&self, mut claims: Claims, lifetime: Duration) -> Result<String, AuthError> {
        let exp = (Utc::now() + lifetime).timestamp();
        claims.insert(EXPIRY_CLAIM.to_string(), Value::from(exp));
        self.signer.sign(&claims)
    }

    /// Verify the signature and return the claims. Expiry is not checked here.
    pub fn get_payload(&self, token: &str) -> Result<Claims, AuthError> {
        self.signer.decode(token)
    }

    /// Verify the signature and reject expired claims
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.get_payload(token)?;
        if jwt::is_expired(&claims, Utc::now().timestamp()) {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }

    fn matches_api_key(&self, token: &str) -> bool {
        self.config
            .api_key
            .as_deref()
            .is_some_and(|key| bool::from(token.as_bytes().ct_eq(key.as_bytes())))
    }

    /// True for the configured API key or a correctly signed, unexpired token
    pub fn validate(&self, token: &str) -> bool {
        if self.matches_api_key(token) {
            return true;
        }
        match self.verify(token) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Token rejected");
                false
            }
        }
    }

    pub fn valid(&self, token: &str) -> bool {
        self.validate(token)
    }
}
