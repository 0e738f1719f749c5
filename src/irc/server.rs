/// Process wiring: load startup state, bind listeners, spawn every task.
///
/// Startup is all-or-nothing. Passwords, room state and TLS material are
/// read and every socket is bound before the first connection is accepted;
/// any failure here is a [`StartupError`] and nothing is left running.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::coordinator::{Coordinator, CoordinatorConfig};
use super::ident::casefold;
use super::listener::{AcceptContext, accept_loop};
use super::{metrics, state, tls, transcript};
use crate::config::Config;
use crate::error::StartupError;
use crate::http;

/// How long shutdown waits for sessions, coordinator and sinks to drain.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Handle to a running server.
pub struct Server {
    plain_addr: Option<SocketAddr>,
    tls_addr: Option<SocketAddr>,
    metrics_addr: Option<SocketAddr>,
    health_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    listeners: Vec<JoinHandle<()>>,
    coordinator: JoinHandle<()>,
    sinks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Bound plain IRC address (`None` with `--tlsonly`).
    pub fn irc_addr(&self) -> Option<SocketAddr> {
        self.plain_addr
    }

    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.tls_addr
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.health_addr
    }

    /// Stop accepting, close every session, then let the coordinator and
    /// the sinks drain, bounded by [`SHUTDOWN_GRACE`].
    pub async fn shutdown(self) {
        let Server {
            shutdown,
            listeners,
            coordinator,
            sinks,
            ..
        } = self;
        info!("shutting down");
        shutdown.cancel();

        let drain = async move {
            for task in listeners {
                let _ = task.await;
            }
            // Finishes once the last session drops its event sender.
            let _ = coordinator.await;
            for sink in sinks {
                let _ = sink.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(grace = ?SHUTDOWN_GRACE, "shutdown did not finish in time");
        } else {
            info!("shutdown complete");
        }
    }
}

async fn bind(addr: SocketAddr) -> Result<(TcpListener, SocketAddr), StartupError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    let local = listener
        .local_addr()
        .map_err(|source| StartupError::Bind { addr, source })?;
    Ok((listener, local))
}

/// Parse `nickname:password` lines. Blank lines and `#` comments are skipped.
fn parse_passwords(path: &Path, contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let mut passwords = HashMap::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((nick, password)) = line.split_once(':') else {
            return Err(StartupError::PasswordsFormat {
                path: path.to_path_buf(),
                line: index + 1,
            });
        };
        passwords.insert(casefold(nick.trim()), password.to_owned());
    }
    Ok(passwords)
}

fn load_passwords(path: &Path) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|source| StartupError::Passwords {
        path: path.to_path_buf(),
        source,
    })?;
    let passwords = parse_passwords(path, &contents)?;
    info!(path = %path.display(), count = passwords.len(), "loaded passwords");
    Ok(passwords)
}

/// An unreadable MOTD is not fatal; clients get 422 instead.
fn load_motd(path: &Path) -> Option<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text.lines().map(str::to_owned).collect()),
        Err(e) => {
            warn!(path = %path.display(), "can not read MOTD: {e}");
            None
        }
    }
}

/// Start the server described by `config`.
pub async fn start(config: &Config) -> Result<Server, StartupError> {
    let server_name = config.server_name();

    let passwords = match &config.passwords {
        Some(path) => load_passwords(path)?,
        None => HashMap::new(),
    };
    let motd = config.motd.as_deref().and_then(load_motd);
    let restored = match &config.statedir {
        Some(dir) => state::load(dir)?,
        None => Vec::new(),
    };

    let tls = match config.tlsbind {
        Some(addr) => {
            let cert = config.tlspem.as_deref().ok_or(StartupError::MissingCertificate)?;
            let key = config.tls_key().map(|p| p.as_path()).unwrap_or(cert);
            Some((addr, tls::load_acceptor(cert, key)?))
        }
        None => None,
    };
    if config.tlsonly && tls.is_none() {
        return Err(StartupError::NoListener);
    }

    // Bind everything before accepting anything.
    let plain = if config.tlsonly {
        None
    } else {
        Some(bind(config.bind).await?)
    };
    let tls = match tls {
        Some((addr, acceptor)) => Some((bind(addr).await?, acceptor)),
        None => None,
    };
    let metrics_http = if config.metrics {
        Some((bind(config.metrics_bind).await?, http::install_recorder()?))
    } else {
        None
    };
    let health_http = if config.healthcheck {
        Some(bind(config.health_bind).await?)
    } else {
        None
    };
    metrics::describe();

    let (state_tx, state_rx) = mpsc::unbounded_channel();
    let (log_tx, log_rx) = mpsc::unbounded_channel();
    let sinks = vec![
        match &config.statedir {
            Some(dir) => tokio::spawn(state::keep(dir.clone(), state_rx)),
            None => tokio::spawn(state::discard(state_rx)),
        },
        match &config.logdir {
            Some(dir) => tokio::spawn(transcript::write(dir.clone(), log_rx)),
            None => tokio::spawn(state::discard(log_rx)),
        },
    ];

    let coordinator = Coordinator::new(
        CoordinatorConfig {
            server_name: server_name.clone(),
            motd,
            passwords,
            ping_threshold: Duration::from_secs(config.ping_threshold),
            ping_timeout: Duration::from_secs(config.ping_timeout),
        },
        restored,
        state_tx,
        log_tx,
    );
    let (events_tx, events_rx) = mpsc::channel(config.event_queue.max(1));
    let coordinator = tokio::spawn(coordinator.run(events_rx));

    let shutdown = CancellationToken::new();
    let ctx = AcceptContext {
        server_name: Arc::from(server_name.as_str()),
        events: events_tx,
        proxy: config.proxy_timeout(),
        shutdown: shutdown.clone(),
    };

    let mut listeners = Vec::new();
    let mut plain_addr = None;
    let mut tls_addr = None;
    if let Some((listener, addr)) = plain {
        plain_addr = Some(addr);
        listeners.push(tokio::spawn(accept_loop(listener, None, ctx.clone())));
    }
    if let Some(((listener, addr), acceptor)) = tls {
        tls_addr = Some(addr);
        listeners.push(tokio::spawn(accept_loop(listener, Some(acceptor), ctx.clone())));
    }
    // Only accept loops and sessions may keep the event queue open.
    drop(ctx);

    let mut metrics_addr = None;
    if let Some(((listener, addr), handle)) = metrics_http {
        metrics_addr = Some(addr);
        listeners.push(tokio::spawn(http::serve(
            listener,
            http::metrics_router(handle),
            shutdown.clone(),
        )));
    }
    let mut health_addr = None;
    if let Some((listener, addr)) = health_http {
        health_addr = Some(addr);
        listeners.push(tokio::spawn(http::serve(
            listener,
            http::health_router(),
            shutdown.clone(),
        )));
    }

    info!(
        server = %server_name,
        plain = ?plain_addr,
        tls = ?tls_addr,
        proxy = config.proxy,
        "server started"
    );

    Ok(Server {
        plain_addr,
        tls_addr,
        metrics_addr,
        health_addr,
        shutdown,
        listeners,
        coordinator,
        sinks,
    })
}
