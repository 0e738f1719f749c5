/// Types that cross the session/coordinator boundary.
///
/// Sessions talk to the coordinator only through [`Event`]s on one bounded
/// queue; the coordinator answers each session through its own unbounded
/// [`Reply`] queue, so it never blocks on a slow client.
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use super::command::Command;
use super::message::Message;

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// What the coordinator needs to address a freshly accepted session.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub addr: SocketAddr,
    pub tls: bool,
    pub tx: mpsc::UnboundedSender<Reply>,
}

/// Session → coordinator.
#[derive(Debug)]
pub enum Event {
    Connected(SessionHandle),
    Disconnected(SessionId),
    Line(SessionId, Command),
}

/// Coordinator → session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A line to write to the client.
    Message(Message),
    /// The session's nickname is now this.
    Nick(String),
    /// Registration completed.
    Registered,
    /// Flush pending lines and close the connection.
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert!(b > a);
        assert_ne!(a.to_string(), b.to_string());
    }
}
