//! Command-line and environment configuration.
//!
//! Every flag can also be given as a `TARN_*` environment variable.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// IRC relay server with optional TLS, transcripts and room state.
#[derive(Parser, Debug, Clone)]
#[command(name = "tarn")]
#[command(version)]
pub struct Config {
    /// Server name used as the prefix of server replies (default: system hostname)
    #[arg(long, env = "TARN_HOSTNAME")]
    pub hostname: Option<String>,

    /// Plain TCP listen address
    #[arg(long, env = "TARN_BIND", default_value = "0.0.0.0:6667")]
    pub bind: SocketAddr,

    /// Message of the day file
    #[arg(long, env = "TARN_MOTD")]
    pub motd: Option<PathBuf>,

    /// Directory for per-room and per-nick transcripts
    #[arg(long, env = "TARN_LOGDIR")]
    pub logdir: Option<PathBuf>,

    /// Directory for persisted room topics and keys
    #[arg(long, env = "TARN_STATEDIR")]
    pub statedir: Option<PathBuf>,

    /// File of `nickname:password` lines
    #[arg(long, env = "TARN_PASSWORDS")]
    pub passwords: Option<PathBuf>,

    /// TLS listen address
    #[arg(long, env = "TARN_TLSBIND")]
    pub tlsbind: Option<SocketAddr>,

    /// PEM certificate chain (may also hold the key)
    #[arg(long, env = "TARN_TLSPEM")]
    pub tlspem: Option<PathBuf>,

    /// PEM private key (default: --tlspem)
    #[arg(long, env = "TARN_TLSKEY")]
    pub tlskey: Option<PathBuf>,

    /// Do not listen on the plain TCP address
    #[arg(long, env = "TARN_TLSONLY")]
    pub tlsonly: bool,

    /// Require a PROXY protocol v1 header on every connection
    #[arg(long, env = "TARN_PROXY")]
    pub proxy: bool,

    /// Seconds to wait for the PROXY header
    #[arg(long, env = "TARN_PROXY_TIMEOUT", default_value_t = 5)]
    pub proxy_timeout: u64,

    /// Serve Prometheus metrics
    #[arg(long, env = "TARN_METRICS")]
    pub metrics: bool,

    #[arg(long, env = "TARN_METRICS_BIND", default_value = "0.0.0.0:8080")]
    pub metrics_bind: SocketAddr,

    /// Serve a health check endpoint
    #[arg(long, env = "TARN_HEALTHCHECK")]
    pub healthcheck: bool,

    #[arg(long, env = "TARN_HEALTH_BIND", default_value = "0.0.0.0:8086")]
    pub health_bind: SocketAddr,

    /// Capacity of the coordinator's inbound event queue
    #[arg(long, env = "TARN_EVENT_QUEUE", default_value_t = 256)]
    pub event_queue: usize,

    /// Idle seconds before the server sends PING
    #[arg(long, env = "TARN_PING_THRESHOLD", default_value_t = 90)]
    pub ping_threshold: u64,

    /// Idle seconds before the connection is dropped
    #[arg(long, env = "TARN_PING_TIMEOUT", default_value_t = 180)]
    pub ping_timeout: u64,

    /// Debug logging
    #[arg(short, long, env = "TARN_VERBOSE")]
    pub verbose: bool,
}

impl Config {
    /// The configured server name, else the system hostname, else `localhost`.
    pub fn server_name(&self) -> String {
        self.hostname
            .clone()
            .filter(|h| !h.is_empty())
            .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".into())
    }

    /// Key file, falling back to the certificate file.
    pub fn tls_key(&self) -> Option<&PathBuf> {
        self.tlskey.as_ref().or(self.tlspem.as_ref())
    }

    pub fn proxy_timeout(&self) -> Option<Duration> {
        self.proxy.then(|| Duration::from_secs(self.proxy_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("tarn").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]);
        assert_eq!(config.bind, "0.0.0.0:6667".parse().unwrap());
        assert_eq!(config.event_queue, 256);
        assert_eq!(config.ping_threshold, 90);
        assert_eq!(config.ping_timeout, 180);
        assert_eq!(config.proxy_timeout(), None);
        assert!(!config.tlsonly);
        assert!(!config.server_name().is_empty());
    }

    #[test]
    fn tls_key_defaults_to_certificate() {
        let config = parse(&["--tlsbind", "127.0.0.1:6697", "--tlspem", "/etc/tarn/both.pem"]);
        assert_eq!(config.tls_key(), Some(&PathBuf::from("/etc/tarn/both.pem")));

        let config = parse(&["--tlspem", "cert.pem", "--tlskey", "key.pem"]);
        assert_eq!(config.tls_key(), Some(&PathBuf::from("key.pem")));
    }

    #[test]
    fn explicit_hostname_and_proxy() {
        let config = parse(&["--hostname", "irc.example.org", "--proxy", "--proxy-timeout", "2"]);
        assert_eq!(config.server_name(), "irc.example.org");
        assert_eq!(config.proxy_timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn rejects_bad_address() {
        assert!(Config::try_parse_from(["tarn", "--bind", "not-an-address"]).is_err());
    }
}
