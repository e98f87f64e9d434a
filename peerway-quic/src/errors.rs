use peerway_identity::PeerId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuicError {
    #[error("Invalid composite address: {0}")]
    Address(String),

    #[error("Failed to bind UDP socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    #[error("Socket registry closed")]
    RegistryClosed,

    #[error("Connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("Connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Identity error: {0}")]
    Identity(#[from] peerway_identity::IdentityError),

    #[error("Peer identity mismatch: expected {expected}, found {found}")]
    PeerMismatch { expected: PeerId, found: PeerId },

    #[error("Dial canceled")]
    Canceled,

    #[error("Listener closed")]
    ListenerClosed,
}

pub type Result<T> = std::result::Result<T, QuicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = QuicError::Address("/ip4/oops".to_string());
        assert_eq!(err.to_string(), "Invalid composite address: /ip4/oops");

        assert_eq!(QuicError::Canceled.to_string(), "Dial canceled");
        assert_eq!(QuicError::ListenerClosed.to_string(), "Listener closed");
    }

    #[test]
    fn test_identity_error_converts() {
        let err: QuicError = peerway_identity::IdentityError::ChainLength(3).into();
        assert!(matches!(err, QuicError::Identity(_)));
    }
}
