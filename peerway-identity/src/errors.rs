use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Unsupported host key type: {0}")]
    UnsupportedKeyType(&'static str),

    #[error("Certificate generation failed: {0}")]
    CertificateGeneration(String),

    #[error("Expected 2 certificates in the chain, got {0}")]
    ChainLength(usize),

    #[error("Certificate chain verification failed: {0}")]
    ChainVerification(String),

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Key not found at path: {0}")]
    KeyNotFound(String),
}

pub type Result<T> = std::result::Result<T, IdentityError>;
