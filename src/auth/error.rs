// Auth Errors
// Failures from key bootstrap, password hashing and token handling

/// Authentication error type
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Token encoding error: {0}")]
    Encode(String),

    #[error("Token decode error: {0}")]
    Decode(String),

    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,
}
