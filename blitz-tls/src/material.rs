//! TLS certificate/key loading. Performs blocking filesystem I/O (spec §5:
//! "the TLS certificate loader may perform blocking filesystem I/O, and are
//! therefore called only during startup or from a dedicated task separate
//! from the fast path").

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::TlsError;

pub fn load_server_config(
    cert_path: &str,
    key_path: &str,
    alpn_protocols: &[&str],
) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Material(e.to_string()))?;
    config.alpn_protocols = alpn_protocols.iter().map(|p| p.as_bytes().to_vec()).collect();
    config.max_early_data_size = 16 * 1024;
    Ok(Arc::new(config))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::Material(format!("{path}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Material(format!("{path}: {e}")))
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::Material(format!("{path}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::Material(format!("{path}: {e}")))?
        .ok_or_else(|| TlsError::Material(format!("{path}: no private key found")))
}
