use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::certificate::verify_chain;
use crate::errors::IdentityError;
use crate::peer_id::PeerId;

/// Per-dial verification state.
///
/// The TLS library calls the certificate verifier mid-handshake with
/// no way to pass per-dial context, so every dial builds its own
/// client configuration around one of these: `expected` is captured by
/// value, and the peer the remote actually proved is recorded in
/// `observed` for the dialer to inspect after a failed handshake.
#[derive(Debug)]
pub struct DialVerification {
    expected: PeerId,
    observed: OnceLock<PeerId>,
}

impl DialVerification {
    pub fn new(expected: PeerId) -> Self {
        Self {
            expected,
            observed: OnceLock::new(),
        }
    }

    pub fn expected(&self) -> PeerId {
        self.expected
    }

    /// The peer ID the remote authenticated as, if the handshake got
    /// far enough to check.
    pub fn observed(&self) -> Option<PeerId> {
        self.observed.get().copied()
    }

    /// True iff the remote proved a different identity than expected.
    pub fn mismatched(&self) -> bool {
        self.observed().map(|seen| seen != self.expected).unwrap_or(false)
    }
}

fn reject(err: IdentityError) -> rustls::Error {
    rustls::Error::InvalidCertificate(rustls::CertificateError::Other(rustls::OtherError(
        Arc::new(err),
    )))
}

fn chain_of<'a>(
    end_entity: &CertificateDer<'a>,
    intermediates: &[CertificateDer<'a>],
) -> Vec<CertificateDer<'a>> {
    let mut chain = Vec::with_capacity(1 + intermediates.len());
    chain.push(end_entity.clone());
    chain.extend(intermediates.iter().cloned());
    chain
}

/// Dial-side certificate verifier: authenticates the remote's identity
/// chain and requires it to match the peer the caller asked to reach.
#[derive(Debug)]
pub struct IdentityCertVerifier {
    verification: Arc<DialVerification>,
}

impl IdentityCertVerifier {
    pub fn new(verification: Arc<DialVerification>) -> Self {
        Self { verification }
    }
}

impl rustls::client::danger::ServerCertVerifier for IdentityCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        let chain = chain_of(end_entity, intermediates);
        let public_key = verify_chain(&chain).map_err(reject)?;
        let peer_id = public_key.peer_id();
        let _ = self.verification.observed.set(peer_id);

        if peer_id != self.verification.expected {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ));
        }

        debug!(peer = %peer_id, "Server identity verified");
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        supported_schemes()
    }
}

/// Listener-side certificate verifier: authenticates the client's
/// identity chain without requiring a particular peer. The identity is
/// read back out of the connection once the handshake completes.
#[derive(Debug)]
pub struct IdentityClientCertVerifier;

impl IdentityClientCertVerifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IdentityClientCertVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl rustls::server::danger::ClientCertVerifier for IdentityClientCertVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        // Every peer is its own root; there are no subjects to hint.
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<rustls::server::danger::ClientCertVerified, rustls::Error> {
        let chain = chain_of(end_entity, intermediates);
        let public_key = verify_chain(&chain).map_err(reject)?;

        debug!(peer = %public_key.peer_id(), "Client identity verified");
        Ok(rustls::server::danger::ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        supported_schemes()
    }
}

fn supported_schemes() -> Vec<rustls::SignatureScheme> {
    vec![
        rustls::SignatureScheme::ED25519,
        rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
        rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
        rustls::SignatureScheme::RSA_PSS_SHA256,
        rustls::SignatureScheme::RSA_PSS_SHA384,
        rustls::SignatureScheme::RSA_PSS_SHA512,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_key::{HostKey, KeyKind};

    #[test]
    fn test_dial_verification_records_observed() {
        let a = HostKey::generate(KeyKind::Ed25519).unwrap();
        let b = HostKey::generate(KeyKind::Ed25519).unwrap();

        let verification = DialVerification::new(a.peer_id());
        assert!(!verification.mismatched());
        assert_eq!(verification.observed(), None);

        verification.observed.set(b.peer_id()).unwrap();
        assert!(verification.mismatched());
        assert_eq!(verification.observed(), Some(b.peer_id()));
    }

    #[test]
    fn test_dial_verification_match_is_not_mismatch() {
        let a = HostKey::generate(KeyKind::Ed25519).unwrap();
        let verification = DialVerification::new(a.peer_id());
        verification.observed.set(a.peer_id()).unwrap();
        assert!(!verification.mismatched());
    }
}
