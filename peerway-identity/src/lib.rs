//! # Peerway identity
//!
//! Peer identities and identity-bound TLS for the Peerway QUIC
//! transport. This crate handles:
//!
//! - Long-lived host keys (RSA, Ed25519) and peer IDs derived from
//!   their public halves
//! - The two-certificate identity chain that lets a short-lived TLS
//!   key prove it speaks for a host key without the host key ever
//!   appearing on the wire
//! - rustls verifiers that authenticate that chain inside the
//!   handshake, on both the dialing and the listening side
//! - Secure key storage with restricted file permissions
//!
//! ## Key components
//!
//! - [`HostKey`]: long-lived identity key pair
//! - [`PeerId`]: Blake3-derived peer name
//! - [`TlsTemplate`]: per-transport TLS material; clones out one
//!   client configuration per dial
//! - [`verify_chain`]: the pure chain check shared by every
//!   verification path

pub mod certificate;
pub mod errors;
pub mod host_key;
pub mod peer_id;
pub mod verifier;

pub use certificate::{verify_chain, IdentityChain, TlsTemplate, TLS_SERVER_NAME};
pub use errors::{IdentityError, Result};
pub use host_key::{HostKey, HostPublicKey, KeyKind};
pub use peer_id::PeerId;
pub use verifier::{DialVerification, IdentityCertVerifier, IdentityClientCertVerifier};
