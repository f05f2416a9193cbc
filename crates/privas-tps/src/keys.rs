//! TPS keypair on disk.

use privas_core::{CryptoError, Encryptor, PrivateKey, PublicKey};
use std::io;
use std::path::Path;

pub const PUBLIC_KEY_FILE: &str = "tps.pub.pem";
pub const PRIVATE_KEY_FILE: &str = "tps.key.pem";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key file: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The TPS's RSA keypair. Clients wrap their payload key with the public half.
#[derive(Debug, Clone)]
pub struct TpsKeys {
    public: PublicKey,
    private: PrivateKey,
}

impl TpsKeys {
    pub fn new(public: PublicKey, private: PrivateKey) -> Self {
        Self { public, private }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    pub async fn load(dir: &Path) -> io::Result<Self> {
        let public = tokio::fs::read_to_string(dir.join(PUBLIC_KEY_FILE)).await?;
        let private = tokio::fs::read_to_string(dir.join(PRIVATE_KEY_FILE)).await?;
        Ok(Self::new(PublicKey::from_pem(public), PrivateKey::from_pem(private)))
    }

    pub async fn generate(enc: &dyn Encryptor, dir: &Path) -> Result<Self, KeyError> {
        let (public, private) = enc.generate_rsa_keypair()?;
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(PUBLIC_KEY_FILE), public.as_pem()).await?;
        tokio::fs::write(dir.join(PRIVATE_KEY_FILE), private.as_pem()).await?;
        restrict_permissions(&dir.join(PRIVATE_KEY_FILE)).await?;
        tracing::info!(dir = %dir.display(), "generated TPS keypair");
        Ok(Self::new(public, private))
    }

    pub async fn load_or_generate(enc: &dyn Encryptor, dir: &Path) -> Result<Self, KeyError> {
        match Self::load(dir).await {
            Ok(keys) => Ok(keys),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::generate(enc, dir).await,
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
