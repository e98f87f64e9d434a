use rand::Rng;
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, IsCa, KeyPair, SerialNumber};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;
use tracing::debug;
use x509_parser::oid_registry::{OID_KEY_TYPE_EC_PUBLIC_KEY, OID_PKCS1_RSAENCRYPTION, OID_SIG_ED25519};
use x509_parser::prelude::*;

use crate::errors::{IdentityError, Result};
use crate::host_key::{HostKey, HostPublicKey};
use crate::verifier::{DialVerification, IdentityCertVerifier, IdentityClientCertVerifier};

/// Placeholder SNI used on both sides of every handshake.
///
/// The TLS library selects certificates by server name, so a name has
/// to exist; it is never resolved or matched against a certificate
/// subject. Both peers must use the same value.
pub const TLS_SERVER_NAME: &str = "peerway.quic";

const CERT_VALIDITY_DAYS: i64 = 180;

/// The two-certificate identity chain `[ephemeral, host]`.
///
/// The host certificate is self-signed by the long-lived host key and
/// acts as the only trust root for the chain; the ephemeral
/// certificate carries a freshly generated P-256 key that does the
/// actual TLS handshaking. The host key signs the ephemeral exactly
/// once, here, so steady-state connections never touch it.
#[derive(Debug)]
pub struct IdentityChain {
    /// DER certificates in presentation order: `[ephemeral, host]`.
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// PKCS#8 private key for the ephemeral certificate.
    pub ephemeral_key: PrivateKeyDer<'static>,
}

impl IdentityChain {
    /// Builds the chain for `host_key`.
    ///
    /// Fails with `UnsupportedKeyType` for ECDSA host keys before any
    /// key material is generated.
    pub fn generate(host_key: &HostKey) -> Result<Self> {
        let host_signer = KeyPair::try_from(host_key.signing_key_der()?.as_slice())
            .map_err(|e| IdentityError::CertificateGeneration(e.to_string()))?;

        let now = ::time::OffsetDateTime::now_utc();
        let not_before = now - ::time::Duration::hours(24);
        let not_after = now + ::time::Duration::days(CERT_VALIDITY_DAYS);

        // Self-signed CA certificate for the host key. No names: the
        // chain is matched by key, not by subject.
        let mut host_params = CertificateParams::default();
        host_params.serial_number = Some(SerialNumber::from(random_serial()));
        host_params.not_before = not_before;
        host_params.not_after = not_after;
        host_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        host_params.distinguished_name = DistinguishedName::new();
        let host_cert = host_params
            .self_signed(&host_signer)
            .map_err(|e| IdentityError::CertificateGeneration(e.to_string()))?;

        // Ephemeral P-256 leaf, signed by the host key.
        let ephemeral_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;
        let mut leaf_params = CertificateParams::new(vec![TLS_SERVER_NAME.to_string()])
            .map_err(|e| IdentityError::CertificateGeneration(e.to_string()))?;
        leaf_params.serial_number = Some(SerialNumber::from(1u64));
        leaf_params.not_before = not_before;
        leaf_params.not_after = not_after;
        leaf_params.distinguished_name = DistinguishedName::new();
        let leaf_cert = leaf_params
            .signed_by(&ephemeral_key, &host_cert, &host_signer)
            .map_err(|e| IdentityError::CertificateGeneration(e.to_string()))?;

        let ephemeral_key = PrivateKeyDer::try_from(ephemeral_key.serialize_der())
            .map_err(|e| IdentityError::CertificateGeneration(format!("{:?}", e)))?;

        debug!(peer = %host_key.peer_id(), "Generated identity certificate chain");

        Ok(Self {
            cert_chain: vec![
                CertificateDer::from(leaf_cert.der().to_vec()),
                CertificateDer::from(host_cert.der().to_vec()),
            ],
            ephemeral_key,
        })
    }
}

fn random_serial() -> u64 {
    // Uniform in [0, 2^62).
    rand::rngs::OsRng.gen::<u64>() >> 2
}

/// Extracts and authenticates the host public key from a presented
/// certificate chain.
///
/// The chain must be exactly `[ephemeral, host]`; the ephemeral must
/// verify under a trust root containing only the host certificate.
/// Pure: used verbatim by the dial-side verifier (which additionally
/// matches the result against the expected peer), the listener-side
/// verifier, and post-handshake identity extraction.
pub fn verify_chain(certs: &[CertificateDer<'_>]) -> Result<HostPublicKey> {
    if certs.len() != 2 {
        return Err(IdentityError::ChainLength(certs.len()));
    }

    let (_, ephemeral) = X509Certificate::from_der(certs[0].as_ref())
        .map_err(|e| IdentityError::ChainVerification(e.to_string()))?;
    let (_, host) = X509Certificate::from_der(certs[1].as_ref())
        .map_err(|e| IdentityError::ChainVerification(e.to_string()))?;

    if !ephemeral.validity().is_valid() || !host.validity().is_valid() {
        return Err(IdentityError::ChainVerification(
            "certificate outside its validity window".to_string(),
        ));
    }

    let host_is_ca = host
        .basic_constraints()
        .ok()
        .flatten()
        .map(|bc| bc.value.ca)
        .unwrap_or(false);
    if !host_is_ca {
        return Err(IdentityError::ChainVerification(
            "host certificate is not a CA".to_string(),
        ));
    }

    ephemeral
        .verify_signature(Some(host.public_key()))
        .map_err(|e| IdentityError::ChainVerification(e.to_string()))?;

    host_public_key(host.public_key())
}

fn host_public_key(spki: &SubjectPublicKeyInfo<'_>) -> Result<HostPublicKey> {
    let algorithm = &spki.algorithm.algorithm;
    if *algorithm == OID_PKCS1_RSAENCRYPTION {
        use rsa::pkcs8::DecodePublicKey as _;
        let key = rsa::RsaPublicKey::from_public_key_der(spki.raw)
            .map_err(|e| IdentityError::InvalidKeyFormat(e.to_string()))?;
        Ok(HostPublicKey::Rsa {
            key,
            der: spki.raw.to_vec(),
        })
    } else if *algorithm == OID_SIG_ED25519 {
        let bytes: [u8; 32] = spki
            .subject_public_key
            .data
            .as_ref()
            .try_into()
            .map_err(|_| {
                IdentityError::InvalidKeyFormat("Ed25519 public key must be 32 bytes".to_string())
            })?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|e| IdentityError::InvalidKeyFormat(e.to_string()))?;
        Ok(HostPublicKey::Ed25519(key))
    } else if *algorithm == OID_KEY_TYPE_EC_PUBLIC_KEY {
        Err(IdentityError::UnsupportedKeyType("ecdsa"))
    } else {
        Err(IdentityError::UnsupportedKeyType("unknown"))
    }
}

/// The shared TLS material a transport is built around.
///
/// Holds the identity chain and the ephemeral private key; produces a
/// server configuration once per listener and an independent client
/// configuration per dial (each dial's verifier captures that dial's
/// expected peer, so configurations cannot be shared between
/// concurrent dials).
#[derive(Debug)]
pub struct TlsTemplate {
    cert_chain: Vec<CertificateDer<'static>>,
    ephemeral_key: PrivateKeyDer<'static>,
}

impl TlsTemplate {
    pub fn new(host_key: &HostKey) -> Result<Self> {
        let chain = IdentityChain::generate(host_key)?;
        Ok(Self {
            cert_chain: chain.cert_chain,
            ephemeral_key: chain.ephemeral_key,
        })
    }

    /// Server-side TLS configuration: present the identity chain,
    /// require a client certificate, verify it with `verify_chain`.
    /// The remote peer is recorded, not required in advance.
    pub fn server_config(&self) -> Result<rustls::ServerConfig> {
        let verifier = Arc::new(IdentityClientCertVerifier::new());
        let config = rustls::ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.cert_chain.clone(), self.ephemeral_key.clone_key())
            .map_err(|e| IdentityError::CertificateGeneration(e.to_string()))?;
        Ok(config)
    }

    /// Client-side TLS configuration for one dial.
    ///
    /// Built-in verification is replaced by the identity verifier;
    /// `verification` carries the expected peer and records what the
    /// remote actually presented.
    pub fn client_config(
        &self,
        verification: Arc<DialVerification>,
    ) -> Result<rustls::ClientConfig> {
        let verifier = Arc::new(IdentityCertVerifier::new(verification));
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_client_auth_cert(self.cert_chain.clone(), self.ephemeral_key.clone_key())
            .map_err(|e| IdentityError::CertificateGeneration(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_key::KeyKind;

    #[test]
    fn test_chain_roundtrip_ed25519() {
        let key = HostKey::generate(KeyKind::Ed25519).unwrap();
        let chain = IdentityChain::generate(&key).unwrap();
        let public = verify_chain(&chain.cert_chain).unwrap();
        assert_eq!(public.peer_id(), key.peer_id());
    }

    #[test]
    fn test_chain_roundtrip_rsa() {
        let key = HostKey::generate(KeyKind::Rsa).unwrap();
        let chain = IdentityChain::generate(&key).unwrap();
        let public = verify_chain(&chain.cert_chain).unwrap();
        assert_eq!(public.peer_id(), key.peer_id());
    }

    #[test]
    fn test_chain_rejects_ecdsa_host_key() {
        let key = HostKey::generate(KeyKind::Ecdsa).unwrap();
        assert!(matches!(
            IdentityChain::generate(&key).unwrap_err(),
            IdentityError::UnsupportedKeyType(_)
        ));
        assert!(matches!(
            TlsTemplate::new(&key).unwrap_err(),
            IdentityError::UnsupportedKeyType(_)
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_length() {
        let key = HostKey::generate(KeyKind::Ed25519).unwrap();
        let chain = IdentityChain::generate(&key).unwrap();

        assert!(matches!(
            verify_chain(&[]).unwrap_err(),
            IdentityError::ChainLength(0)
        ));
        assert!(matches!(
            verify_chain(&chain.cert_chain[..1]).unwrap_err(),
            IdentityError::ChainLength(1)
        ));
        let three = vec![
            chain.cert_chain[0].clone(),
            chain.cert_chain[1].clone(),
            chain.cert_chain[1].clone(),
        ];
        assert!(matches!(
            verify_chain(&three).unwrap_err(),
            IdentityError::ChainLength(3)
        ));
    }

    #[test]
    fn test_verify_rejects_foreign_root() {
        let a = HostKey::generate(KeyKind::Ed25519).unwrap();
        let b = HostKey::generate(KeyKind::Ed25519).unwrap();
        let chain_a = IdentityChain::generate(&a).unwrap();
        let chain_b = IdentityChain::generate(&b).unwrap();

        // A's ephemeral presented under B's host certificate.
        let mixed = vec![chain_a.cert_chain[0].clone(), chain_b.cert_chain[1].clone()];
        assert!(matches!(
            verify_chain(&mixed).unwrap_err(),
            IdentityError::ChainVerification(_)
        ));
    }

    #[test]
    fn test_verify_rejects_swapped_order() {
        let key = HostKey::generate(KeyKind::Ed25519).unwrap();
        let chain = IdentityChain::generate(&key).unwrap();
        let swapped = vec![chain.cert_chain[1].clone(), chain.cert_chain[0].clone()];
        assert!(verify_chain(&swapped).is_err());
    }

    #[test]
    fn test_fresh_chains_differ() {
        let key = HostKey::generate(KeyKind::Ed25519).unwrap();
        let one = IdentityChain::generate(&key).unwrap();
        let two = IdentityChain::generate(&key).unwrap();
        // Fresh ephemeral key and random host serial each time.
        assert_ne!(one.cert_chain[0].as_ref(), two.cert_chain[0].as_ref());
        assert_ne!(one.cert_chain[1].as_ref(), two.cert_chain[1].as_ref());
        // Both still authenticate the same peer.
        assert_eq!(
            verify_chain(&one.cert_chain).unwrap().peer_id(),
            verify_chain(&two.cert_chain).unwrap().peer_id()
        );
    }
}
