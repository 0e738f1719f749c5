/// Accept loops for the plain and TLS listeners.
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event::Event;
use super::metrics::CONNECTIONS_ACCEPTED;
use super::{proxy, session};

/// Time allowed for a client to finish the TLS handshake.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a freshly accepted connection needs.
#[derive(Clone)]
pub struct AcceptContext {
    pub server_name: Arc<str>,
    pub events: mpsc::Sender<Event>,
    /// PROXY header deadline; `None` disables the protocol.
    pub proxy: Option<Duration>,
    pub shutdown: CancellationToken,
}

/// Accept connections until shutdown, one session task per connection.
pub async fn accept_loop(listener: TcpListener, tls: Option<TlsAcceptor>, ctx: AcceptContext) {
    let local = listener.local_addr().ok();
    info!(addr = ?local, tls = tls.is_some(), "listening");

    loop {
        let (socket, addr) = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(addr = ?local, "accept failed: {e}");
                    continue;
                }
            },
        };
        counter!(CONNECTIONS_ACCEPTED).increment(1);
        debug!(%addr, "accepted connection");

        let tls = tls.clone();
        let ctx = ctx.clone();
        tokio::spawn(connection(socket, addr, tls, ctx));
    }

    info!(addr = ?local, "listener stopped");
}

/// `None` if `step` took longer than `limit` or the server began shutting down.
async fn guarded<F>(step: F, limit: Duration, shutdown: &CancellationToken) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        _ = shutdown.cancelled() => None,
        done = tokio::time::timeout(limit, step) => done.ok(),
    }
}

async fn connection(
    mut socket: TcpStream,
    addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    ctx: AcceptContext,
) {
    let addr = match ctx.proxy {
        None => addr,
        Some(limit) => {
            let header = tokio::select! {
                _ = ctx.shutdown.cancelled() => return,
                header = proxy::read_header(&mut socket, limit) => header,
            };
            match header {
                Ok(Some(real)) => real,
                Ok(None) => addr,
                Err(e) => {
                    warn!(%addr, "dropping connection: {e}");
                    return;
                }
            }
        }
    };

    let AcceptContext {
        server_name,
        events,
        shutdown,
        ..
    } = ctx;
    match tls {
        None => session::run(socket, addr, false, server_name, events, shutdown).await,
        Some(acceptor) => {
            let handshake = guarded(acceptor.accept(socket), TLS_HANDSHAKE_TIMEOUT, &shutdown);
            match handshake.await {
                Some(Ok(stream)) => {
                    session::run(stream, addr, true, server_name, events, shutdown).await
                }
                Some(Err(e)) => debug!(%addr, "TLS handshake failed: {e}"),
                None => debug!(%addr, "TLS handshake abandoned"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn stalled_step_times_out() {
        let shutdown = CancellationToken::new();
        let step = std::future::pending::<()>();
        assert_eq!(guarded(step, TLS_HANDSHAKE_TIMEOUT, &shutdown).await, None);
    }

    #[tokio::test]
    async fn stalled_step_ends_at_shutdown() {
        let shutdown = CancellationToken::new();
        let waiting = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let step = std::future::pending::<()>();
                guarded(step, Duration::from_secs(3600), &shutdown).await
            }
        });
        shutdown.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(3), waiting)
            .await
            .expect("step outlived shutdown")
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn finished_step_passes_through() {
        let shutdown = CancellationToken::new();
        assert_eq!(guarded(async { 7 }, TLS_HANDSHAKE_TIMEOUT, &shutdown).await, Some(7));
    }

    #[tokio::test]
    async fn silent_client_releases_the_event_queue_at_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events, mut events_rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let ctx = AcceptContext {
            server_name: Arc::from("irc.test"),
            events,
            proxy: Some(Duration::from_secs(3600)),
            shutdown: shutdown.clone(),
        };
        let accepting = tokio::spawn(accept_loop(listener, None, ctx));

        // Connects but never sends its PROXY header.
        let _silent = TcpStream::connect(addr).await.unwrap();
        tokio::task::yield_now().await;
        shutdown.cancel();
        accepting.await.unwrap();

        // Every sender is gone once the pending connection gives up.
        let closed = tokio::time::timeout(Duration::from_secs(3), events_rx.recv())
            .await
            .expect("event queue still held open");
        assert!(closed.is_none());
    }
}
