#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] rustls::Error),
    #[error("TLS record decryption failed: {0}")]
    Decrypt(#[source] rustls::Error),
    #[error("failed to load certificate material: {0}")]
    Material(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
