use serde::{Deserialize, Serialize};

use crate::errors::{IdentityError, Result};
use crate::host_key::HostPublicKey;

/// A peer's name on the network, derived from its public key.
///
/// A `PeerId` is the Blake3 hash of the canonical encoding of the
/// peer's long-lived public key (raw bytes for Ed25519, PKIX DER for
/// RSA). Equality and ordering are byte-level, so peer IDs can be used
/// as map keys and compared across processes.
///
/// # Example
///
/// ```rust
/// use peerway_identity::{HostKey, KeyKind};
///
/// let key = HostKey::generate(KeyKind::Ed25519).unwrap();
/// let peer_id = key.peer_id();
/// println!("Peer: {}", peer_id); // colon-grouped fingerprint
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Derives the peer ID from a public key.
    pub fn from_public_key(key: &HostPublicKey) -> Self {
        let hash = blake3::hash(&key.canonical_bytes());
        PeerId(*hash.as_bytes())
    }

    /// Creates a PeerId from raw hash bytes.
    ///
    /// Returns `IdentityError::InvalidKeyFormat` if the input is not
    /// exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(IdentityError::InvalidKeyFormat(
                "Peer ID must be 32 bytes".to_string(),
            ));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(bytes);
        Ok(PeerId(id))
    }

    /// Returns the raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the peer ID as a hex string (for file names, etc.)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True iff this ID was derived from `key`.
    ///
    /// This is the dial-time identity check: the key extracted from a
    /// remote certificate chain must match the peer the caller asked
    /// to reach.
    pub fn matches(&self, key: &HostPublicKey) -> bool {
        *self == PeerId::from_public_key(key)
    }

    /// Generates a human-readable fingerprint for manual verification.
    ///
    /// The first 16 bytes of the ID formatted as colon-separated hex
    /// groups, short enough to read out loud when comparing peers.
    pub fn fingerprint(&self) -> String {
        self.0[..16]
            .chunks(2)
            .map(|chunk| format!("{:02x}{:02x}", chunk[0], chunk[1]))
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

impl std::str::FromStr for PeerId {
    type Err = IdentityError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() == 64 {
            let bytes = hex::decode(s)
                .map_err(|e| IdentityError::InvalidKeyFormat(format!("Invalid hex string: {}", e)))?;
            Self::from_bytes(&bytes)
        } else {
            Err(IdentityError::InvalidKeyFormat(format!(
                "Invalid PeerId string length: {} (expected 64 hex characters)",
                s.len()
            )))
        }
    }
}
