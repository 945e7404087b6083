// Tokens
// RS256 signing and verification of claim maps

use crate::auth::error::AuthError;
use crate::auth::keys::KeyMaterial;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};

/// Token claims; any JSON object
pub type Claims = Map<String, Value>;

pub const EXPIRY_CLAIM: &str = "exp";

/// Signs with the private key, verifies with the public key
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenSigner {
    pub fn new(keys: &KeyMaterial) -> Result<Self, AuthError> {
        let encoding = EncodingKey::from_rsa_pem(keys.private_pem.as_bytes())
            .map_err(|e| AuthError::Key(e.to_string()))?;
        let decoding = DecodingKey::from_rsa_pem(keys.public_pem.as_bytes())
            .map_err(|e| AuthError::Key(e.to_string()))?;

        // expiry is checked by the caller so expired tokens still decode
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Ok(Self {
            encoding,
            decoding,
            validation,
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::RS256), claims, &self.encoding)
            .map_err(|e| AuthError::Encode(e.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::Decode(e.to_string()),
            })
    }
}

/// `exp` at or before `now` (unix seconds). A non-numeric `exp` counts as expired.
pub fn is_expired(claims: &Claims, now: i64) -> bool {
    match claims.get(EXPIRY_CLAIM) {
        None => false,
        Some(exp) => match exp.as_f64() {
            Some(exp) => exp <= now as f64,
            None => true,
        },
    }
}
