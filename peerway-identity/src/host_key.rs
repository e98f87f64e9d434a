use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::EncodePrivateKey as _;
use rsa::pkcs8::EncodePublicKey as _;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::errors::{IdentityError, Result};
use crate::peer_id::PeerId;

// Wire tags for the key envelope. Values follow the canonical
// peer-to-peer key registry so envelopes stay portable.
const TAG_RSA: u8 = 0;
const TAG_ED25519: u8 = 1;
const TAG_ECDSA: u8 = 3;

const RSA_KEY_BITS: usize = 2048;
const ENVELOPE_VERSION: u8 = 1;

/// The kind of a long-lived host key pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyKind {
    Rsa,
    Ed25519,
    /// P-256. Representable, but the transport refuses to build a TLS
    /// configuration from it.
    Ecdsa,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::Rsa => write!(f, "rsa"),
            KeyKind::Ed25519 => write!(f, "ed25519"),
            KeyKind::Ecdsa => write!(f, "ecdsa"),
        }
    }
}

/// A peer's long-lived asymmetric key pair.
///
/// The host key authenticates the per-transport ephemeral TLS key via
/// the identity certificate chain; it is touched only when the chain is
/// built, never during steady-state dials. The peer's network name is
/// [`HostKey::peer_id`], a pure function of the public half.
///
/// # Example
///
/// ```rust
/// use peerway_identity::{HostKey, KeyKind};
///
/// let key = HostKey::generate(KeyKind::Ed25519).unwrap();
/// let bytes = key.to_bytes().unwrap();
/// let restored = HostKey::from_bytes(&bytes).unwrap();
/// assert_eq!(key.peer_id(), restored.peer_id());
/// ```
#[derive(Debug)]
pub enum HostKey {
    Rsa {
        key: RsaPrivateKey,
        public_der: Vec<u8>,
    },
    Ed25519(SigningKey),
    Ecdsa {
        pkcs8_der: Vec<u8>,
        public_der: Vec<u8>,
    },
}

/// The public half of a [`HostKey`], as recovered from a certificate
/// chain or derived locally.
#[derive(Clone, Debug)]
pub enum HostPublicKey {
    Rsa { key: RsaPublicKey, der: Vec<u8> },
    Ed25519(VerifyingKey),
    Ecdsa { der: Vec<u8> },
}

impl HostKey {
    /// Generates a fresh key pair of the given kind.
    pub fn generate(kind: KeyKind) -> Result<Self> {
        match kind {
            KeyKind::Rsa => {
                let key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
                    .map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;
                let public_der = key
                    .to_public_key()
                    .to_public_key_der()
                    .map_err(|e| IdentityError::KeyGeneration(e.to_string()))?
                    .into_vec();
                Ok(HostKey::Rsa { key, public_der })
            }
            KeyKind::Ed25519 => Ok(HostKey::Ed25519(SigningKey::generate(&mut OsRng))),
            KeyKind::Ecdsa => {
                let pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
                    .map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;
                Ok(HostKey::Ecdsa {
                    pkcs8_der: pair.serialize_der(),
                    public_der: pair.public_key_der(),
                })
            }
        }
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            HostKey::Rsa { .. } => KeyKind::Rsa,
            HostKey::Ed25519(_) => KeyKind::Ed25519,
            HostKey::Ecdsa { .. } => KeyKind::Ecdsa,
        }
    }

    /// Returns the public half.
    pub fn public(&self) -> HostPublicKey {
        match self {
            HostKey::Rsa { key, public_der } => HostPublicKey::Rsa {
                key: key.to_public_key(),
                der: public_der.clone(),
            },
            HostKey::Ed25519(key) => HostPublicKey::Ed25519(key.verifying_key()),
            HostKey::Ecdsa { public_der, .. } => HostPublicKey::Ecdsa {
                der: public_der.clone(),
            },
        }
    }

    /// The peer ID derived from the public half.
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public())
    }

    /// Signs a message with the private half.
    ///
    /// Ed25519 signs the message directly; RSA signs a SHA-256 digest
    /// with PKCS#1 v1.5 padding. ECDSA host keys cannot sign.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match self {
            HostKey::Rsa { key, .. } => {
                let digest = Sha256::digest(message);
                key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|_| IdentityError::SignatureVerification)
            }
            HostKey::Ed25519(key) => Ok(key.sign(message).to_bytes().to_vec()),
            HostKey::Ecdsa { .. } => Err(IdentityError::UnsupportedKeyType("ecdsa")),
        }
    }

    /// The PKCS#8 DER encoding of the private key, for certificate
    /// generation. ECDSA host keys are refused here: they may not
    /// anchor an identity chain.
    pub(crate) fn signing_key_der(&self) -> Result<Vec<u8>> {
        match self {
            HostKey::Rsa { key, .. } => Ok(key
                .to_pkcs8_der()
                .map_err(|e| IdentityError::Serialization(e.to_string()))?
                .as_bytes()
                .to_vec()),
            HostKey::Ed25519(key) => {
                use ed25519_dalek::pkcs8::EncodePrivateKey as _;
                Ok(key
                    .to_pkcs8_der()
                    .map_err(|e| IdentityError::Serialization(e.to_string()))?
                    .as_bytes()
                    .to_vec())
            }
            HostKey::Ecdsa { .. } => Err(IdentityError::UnsupportedKeyType("ecdsa")),
        }
    }

    /// Serializes the key pair into its typed byte envelope.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let (kind, key) = match self {
            HostKey::Rsa { key, .. } => (
                TAG_RSA,
                key.to_pkcs1_der()
                    .map_err(|e| IdentityError::Serialization(e.to_string()))?
                    .as_bytes()
                    .to_vec(),
            ),
            HostKey::Ed25519(key) => (TAG_ED25519, key.to_bytes().to_vec()),
            HostKey::Ecdsa { pkcs8_der, .. } => (TAG_ECDSA, pkcs8_der.clone()),
        };

        let mut envelope = KeyEnvelope {
            version: ENVELOPE_VERSION,
            kind,
            key,
        };
        let bytes = bincode::serialize(&envelope)
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;
        envelope.zeroize();
        Ok(bytes)
    }

    /// Restores a key pair from its typed byte envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut envelope: KeyEnvelope = bincode::deserialize(bytes)
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;
        if envelope.version != ENVELOPE_VERSION {
            let version = envelope.version;
            envelope.zeroize();
            return Err(IdentityError::InvalidKeyFormat(format!(
                "Unsupported key envelope version: {}",
                version
            )));
        }

        let key = match envelope.kind {
            TAG_RSA => {
                let key = RsaPrivateKey::from_pkcs1_der(&envelope.key)
                    .map_err(|e| IdentityError::InvalidKeyFormat(e.to_string()))?;
                let public_der = key
                    .to_public_key()
                    .to_public_key_der()
                    .map_err(|e| IdentityError::InvalidKeyFormat(e.to_string()))?
                    .into_vec();
                Ok(HostKey::Rsa { key, public_der })
            }
            TAG_ED25519 => {
                let seed: [u8; 32] = envelope.key.as_slice().try_into().map_err(|_| {
                    IdentityError::InvalidKeyFormat(
                        "Ed25519 key must be 32 bytes".to_string(),
                    )
                })?;
                Ok(HostKey::Ed25519(SigningKey::from_bytes(&seed)))
            }
            TAG_ECDSA => {
                let pair = rcgen::KeyPair::try_from(envelope.key.as_slice())
                    .map_err(|e| IdentityError::InvalidKeyFormat(e.to_string()))?;
                Ok(HostKey::Ecdsa {
                    pkcs8_der: envelope.key.clone(),
                    public_der: pair.public_key_der(),
                })
            }
            tag => Err(IdentityError::InvalidKeyFormat(format!(
                "Unknown key kind tag: {}",
                tag
            ))),
        };
        envelope.zeroize();
        key
    }

    /// Get the default storage directory for keys
    pub fn default_storage_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            IdentityError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Home directory not found",
            ))
        })?;
        Ok(home.join(".peerway").join("keys"))
    }

    fn storage_path(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(p.to_path_buf()),
            None => Ok(Self::default_storage_dir()?.join("host.key")),
        }
    }

    /// Save the key pair to disk.
    pub async fn save(&self, path: Option<&Path>) -> Result<()> {
        let storage_path = Self::storage_path(path)?;

        if let Some(parent) = storage_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut data = self.to_bytes()?;

        // Write to a temporary file first, then atomically rename.
        let temp_path = storage_path.with_extension("tmp");
        fs::write(&temp_path, &data).await?;
        data.zeroize();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = fs::metadata(&temp_path).await?;
            let mut permissions = metadata.permissions();
            permissions.set_mode(0o600);
            fs::set_permissions(&temp_path, permissions).await?;
        }

        fs::rename(&temp_path, &storage_path).await?;
        info!("Host key saved");

        Ok(())
    }

    /// Load a key pair from disk.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let storage_path = Self::storage_path(path)?;

        if !storage_path.exists() {
            return Err(IdentityError::KeyNotFound(
                storage_path.display().to_string(),
            ));
        }

        let mut data = fs::read(&storage_path).await?;
        let key = Self::from_bytes(&data);
        data.zeroize();

        debug!("Host key loaded from {:?}", storage_path);
        key
    }

    /// Loads the key from the default location, generating and saving a
    /// fresh one of the given kind if none exists yet.
    pub async fn load_or_generate(kind: KeyKind) -> Result<Self> {
        match Self::load(None).await {
            Ok(key) => {
                info!("Loaded existing host key: {}", key.peer_id());
                Ok(key)
            }
            Err(IdentityError::KeyNotFound(_)) => {
                info!("No existing host key found, generating new one");
                let key = Self::generate(kind)?;
                key.save(None).await?;
                info!("Generated new host key: {}", key.peer_id());
                Ok(key)
            }
            Err(e) => Err(e),
        }
    }
}

impl HostPublicKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            HostPublicKey::Rsa { .. } => KeyKind::Rsa,
            HostPublicKey::Ed25519(_) => KeyKind::Ed25519,
            HostPublicKey::Ecdsa { .. } => KeyKind::Ecdsa,
        }
    }

    /// The canonical encoding hashed into a [`PeerId`]: raw bytes for
    /// Ed25519, PKIX (SPKI) DER otherwise.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            HostPublicKey::Rsa { der, .. } => der.clone(),
            HostPublicKey::Ed25519(key) => key.to_bytes().to_vec(),
            HostPublicKey::Ecdsa { der } => der.clone(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(self)
    }

    /// Verifies a signature produced by [`HostKey::sign`].
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            HostPublicKey::Rsa { key, .. } => {
                let digest = Sha256::digest(message);
                key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
                    .map_err(|_| IdentityError::SignatureVerification)
            }
            HostPublicKey::Ed25519(key) => {
                let signature = Signature::from_slice(signature)
                    .map_err(|_| IdentityError::SignatureVerification)?;
                key.verify(message, &signature)
                    .map_err(|_| IdentityError::SignatureVerification)
            }
            HostPublicKey::Ecdsa { .. } => Err(IdentityError::UnsupportedKeyType("ecdsa")),
        }
    }
}

#[derive(Serialize, Deserialize, Zeroize)]
struct KeyEnvelope {
    version: u8,
    kind: u8,
    key: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generate_all_kinds() {
        for kind in [KeyKind::Rsa, KeyKind::Ed25519, KeyKind::Ecdsa] {
            let key = HostKey::generate(kind).unwrap();
            assert_eq!(key.kind(), kind);
            assert_eq!(key.public().kind(), kind);
        }
    }

    #[test]
    fn test_envelope_roundtrip_ed25519() {
        let key = HostKey::generate(KeyKind::Ed25519).unwrap();
        let restored = HostKey::from_bytes(&key.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.kind(), KeyKind::Ed25519);
        assert_eq!(restored.peer_id(), key.peer_id());
    }

    #[test]
    fn test_envelope_roundtrip_rsa() {
        let key = HostKey::generate(KeyKind::Rsa).unwrap();
        let restored = HostKey::from_bytes(&key.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.kind(), KeyKind::Rsa);
        assert_eq!(restored.peer_id(), key.peer_id());
    }

    #[test]
    fn test_envelope_rejects_garbage() {
        assert!(HostKey::from_bytes(b"not an envelope").is_err());
    }

    #[test]
    fn test_envelope_rejects_unknown_tag() {
        let envelope = KeyEnvelope {
            version: ENVELOPE_VERSION,
            kind: 42,
            key: vec![0u8; 32],
        };
        let bytes = bincode::serialize(&envelope).unwrap();
        let result = HostKey::from_bytes(&bytes);
        assert!(matches!(
            result.unwrap_err(),
            IdentityError::InvalidKeyFormat(_)
        ));
    }

    #[test]
    fn test_envelope_rejects_bad_version() {
        let envelope = KeyEnvelope {
            version: 99,
            kind: TAG_ED25519,
            key: vec![0u8; 32],
        };
        let bytes = bincode::serialize(&envelope).unwrap();
        let result = HostKey::from_bytes(&bytes);
        assert!(matches!(
            result.unwrap_err(),
            IdentityError::InvalidKeyFormat(_)
        ));
    }

    #[test]
    fn test_sign_and_verify_ed25519() {
        let key = HostKey::generate(KeyKind::Ed25519).unwrap();
        let message = b"hello peerway";
        let signature = key.sign(message).unwrap();
        key.public().verify(message, &signature).unwrap();
        assert!(key.public().verify(b"other message", &signature).is_err());
    }

    #[test]
    fn test_sign_and_verify_rsa() {
        let key = HostKey::generate(KeyKind::Rsa).unwrap();
        let message = b"hello peerway";
        let signature = key.sign(message).unwrap();
        key.public().verify(message, &signature).unwrap();
        assert!(key.public().verify(b"other message", &signature).is_err());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let a = HostKey::generate(KeyKind::Ed25519).unwrap();
        let b = HostKey::generate(KeyKind::Ed25519).unwrap();
        let signature = a.sign(b"message").unwrap();
        assert!(matches!(
            b.public().verify(b"message", &signature).unwrap_err(),
            IdentityError::SignatureVerification
        ));
    }

    #[test]
    fn test_ecdsa_cannot_sign() {
        let key = HostKey::generate(KeyKind::Ecdsa).unwrap();
        assert!(matches!(
            key.sign(b"message").unwrap_err(),
            IdentityError::UnsupportedKeyType(_)
        ));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let key_path = dir.path().join("test.key");

        let key = HostKey::generate(KeyKind::Ed25519).unwrap();
        key.save(Some(&key_path)).await.unwrap();

        let loaded = HostKey::load(Some(&key_path)).await.unwrap();
        assert_eq!(loaded.peer_id(), key.peer_id());
    }

    #[tokio::test]
    async fn test_load_nonexistent_key() {
        let dir = tempdir().unwrap();
        let result = HostKey::load(Some(&dir.path().join("missing.key"))).await;
        assert!(matches!(
            result.unwrap_err(),
            IdentityError::KeyNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_load_corrupted_key_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupted.key");
        tokio::fs::write(&path, b"not a valid key file")
            .await
            .unwrap();

        let result = HostKey::load(Some(&path)).await;
        assert!(matches!(
            result.unwrap_err(),
            IdentityError::Serialization(_)
        ));
    }
}
