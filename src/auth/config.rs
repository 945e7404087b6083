// Auth Configuration
// Where key material lives, the API key bypass and hashing/token defaults

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const API_KEY_ENV: &str = "API_KEY";
pub const TOKEN_LIMIT_ENV: &str = "TINA4_TOKEN_LIMIT";
pub const SECRETS_DIR: &str = "secrets";

/// Settings for an [`Auth`](crate::auth::Auth) instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Key material is kept under `<root_path>/secrets`
    pub root_path: PathBuf,
    /// Static token accepted by `validate` without signature checks
    pub api_key: Option<String>,
    pub bcrypt_cost: u32,
    /// Expiry stamped on tokens issued without an `exp` claim
    pub token_lifetime_minutes: Option<i64>,
}

impl AuthConfig {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            api_key: None,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            token_lifetime_minutes: None,
        }
    }

    /// Read `API_KEY` and `TINA4_TOKEN_LIMIT`, loading a `.env` file first if one exists
    pub fn from_env(root_path: impl Into<PathBuf>) -> Self {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "Loaded environment file"),
            Err(e) if e.not_found() => {}
            Err(e) => warn!(error = %e, "Could not load environment file"),
        }
        Self::from_lookup(root_path, |name| std::env::var(name).ok())
    }

    fn from_lookup(root_path: impl Into<PathBuf>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_key = lookup(API_KEY_ENV).filter(|key| !key.is_empty());
        let token_lifetime_minutes = lookup(TOKEN_LIMIT_ENV).and_then(|raw| match raw.trim().parse::<i64>() {
            Ok(minutes) if minutes > 0 => Some(minutes),
            _ => {
                warn!(value = %raw, "Ignoring invalid {}", TOKEN_LIMIT_ENV);
                None
            }
        });

        Self {
            api_key,
            token_lifetime_minutes,
            ..Self::new(root_path)
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub fn with_token_lifetime_minutes(mut self, minutes: i64) -> Self {
        self.token_lifetime_minutes = Some(minutes);
        self
    }

    pub fn secrets_dir(&self) -> PathBuf {
        secrets_dir(&self.root_path)
    }
}

pub fn secrets_dir(root_path: &Path) -> PathBuf {
    root_path.join(SECRETS_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthConfig::new("/srv/app");
        assert_eq!(config.api_key, None);
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert_eq!(config.secrets_dir(), PathBuf::from("/srv/app/secrets"));
    }

    #[test]
    fn test_from_lookup() {
        let config = AuthConfig::from_lookup("/srv/app", |name| match name {
            API_KEY_ENV => Some("test_api_key".to_string()),
            TOKEN_LIMIT_ENV => Some("15".to_string()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("test_api_key"));
        assert_eq!(config.token_lifetime_minutes, Some(15));
    }

    #[test]
    fn test_from_lookup_ignores_blank_and_invalid_values() {
        let config = AuthConfig::from_lookup("/srv/app", |name| match name {
            API_KEY_ENV => Some(String::new()),
            TOKEN_LIMIT_ENV => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(config.api_key, None);
        assert_eq!(config.token_lifetime_minutes, None);
    }
}
