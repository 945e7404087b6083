// Key Material
// RSA keypair and self-signed certificate, generated once and reused from disk

use crate::auth::config::secrets_dir;
use crate::auth::error::AuthError;
use rcgen::{CertificateParams, KeyPair};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PRIVATE_KEY_FILE: &str = "private.key";
pub const PUBLIC_KEY_FILE: &str = "public.key";
pub const CERTIFICATE_FILE: &str = "domain.cert";

const RSA_BITS: usize = 2048;
const CERTIFICATE_HOST: &str = "localhost";

/// PEM encoded signing material
#[derive(Clone)]
pub struct KeyMaterial {
    /// PKCS#8 private key
    pub private_pem: String,
    /// SPKI public key
    pub public_pem: String,
    pub certificate_pem: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_pem", &self.public_pem)
            .finish_non_exhaustive()
    }
}

struct KeyPaths {
    private: PathBuf,
    public: PathBuf,
    certificate: PathBuf,
}

impl KeyPaths {
    fn new(dir: &Path) -> Self {
        Self {
            private: dir.join(PRIVATE_KEY_FILE),
            public: dir.join(PUBLIC_KEY_FILE),
            certificate: dir.join(CERTIFICATE_FILE),
        }
    }

    fn all_exist(&self) -> bool {
        self.private.is_file() && self.public.is_file() && self.certificate.is_file()
    }
}

impl KeyMaterial {
    /// Load `<root>/secrets/*`, generating all three files if any is missing.
    ///
    /// Concurrent first runs against the same root are not coordinated.
    pub fn load_or_create(root_path: &Path) -> Result<Self, AuthError> {
        let dir = secrets_dir(root_path);
        fs::create_dir_all(&dir)?;
        let paths = KeyPaths::new(&dir);

        if paths.all_exist() {
            debug!(dir = %dir.display(), "Loading key material");
            return Ok(Self {
                private_pem: fs::read_to_string(&paths.private)?,
                public_pem: fs::read_to_string(&paths.public)?,
                certificate_pem: fs::read_to_string(&paths.certificate)?,
            });
        }

        let material = Self::generate()?;
        fs::write(&paths.private, &material.private_pem)?;
        fs::write(&paths.public, &material.public_pem)?;
        fs::write(&paths.certificate, &material.certificate_pem)?;
        info!(dir = %dir.display(), "Generated new key material");
        Ok(material)
    }

    pub fn generate() -> Result<Self, AuthError> {
        let mut rng = rand::rngs::OsRng;
        let private_key =
            RsaPrivateKey::new(&mut rng, RSA_BITS).map_err(|e| AuthError::Key(e.to_string()))?;

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::Key(e.to_string()))?
            .as_str()
            .to_owned();
        let public_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::Key(e.to_string()))?;

        let key_pair =
            KeyPair::from_pem(&private_pem).map_err(|e| AuthError::Certificate(e.to_string()))?;
        let certificate = CertificateParams::new(vec![CERTIFICATE_HOST.to_string()])
            .and_then(|params| params.self_signed(&key_pair))
            .map_err(|e| AuthError::Certificate(e.to_string()))?;

        Ok(Self {
            private_pem,
            public_pem,
            certificate_pem: certificate.pem(),
        })
    }
}
