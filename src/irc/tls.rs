/// TLS acceptor from a PEM certificate chain and private key.
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::error::StartupError;

fn read(path: &Path) -> Result<Vec<u8>, StartupError> {
    std::fs::read(path).map_err(|source| StartupError::TlsFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Build an acceptor from `cert_path` (chain) and `key_path` (key).
///
/// Both may name the same file holding certificate and key together.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, StartupError> {
    let cert_pem = read(cert_path)?;
    let key_pem = read(key_path)?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<_, _>>()
        .map_err(|source| StartupError::TlsFile {
            path: cert_path.to_path_buf(),
            source,
        })?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|source| StartupError::TlsFile {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| StartupError::MissingKey(key_path.to_path_buf()))?;

    let chain = certs.len();
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    info!(cert = %cert_path.display(), chain, "loaded TLS certificate");
    Ok(TlsAcceptor::from(Arc::new(config)))
}
