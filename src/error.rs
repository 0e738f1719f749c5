/// Errors that abort the process before it starts serving.
///
/// Everything after startup degrades to a numeric reply, a dropped
/// connection or a `warn!` line; only these reach `main`.
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("can not bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("no listener configured (--tlsonly without --tlsbind)")]
    NoListener,

    #[error("--tlsbind requires --tlspem")]
    MissingCertificate,

    #[error("can not read {path}: {source}")]
    TlsFile { path: PathBuf, source: io::Error },

    #[error("no private key found in {0}")]
    MissingKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error("can not read state directory {path}: {source}")]
    StateDir { path: PathBuf, source: io::Error },

    #[error("can not read passwords file {path}: {source}")]
    Passwords { path: PathBuf, source: io::Error },

    #[error("{path}:{line}: expected `nickname:password`")]
    PasswordsFormat { path: PathBuf, line: usize },

    #[error("can not install metrics recorder: {0}")]
    Metrics(String),
}
