/// Client session, one task per connection.
///
/// Frames the byte stream into lines, validates them into [`Command`]s,
/// answers what it can locally (parse errors, the pre-registration gate) and
/// forwards the rest to the coordinator. Replies come back on the session's
/// own unbounded queue and are written in order.
///
/// The session holds no shared state. It only mirrors what the coordinator
/// tells it (current nick, registration, close) so locally generated numerics
/// are addressed correctly.
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use metrics::gauge;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::codec::{LineCodec, LineError};
use super::command::Command;
use super::error::Rejection;
use super::event::{Event, Reply, SessionHandle, SessionId};
use super::message::{Message, ParseError};
use super::metrics::CLIENTS_CONNECTED;

/// A client that accepts no bytes for this long is disconnected.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for the shutdown notice; the connection closes either way.
const FAREWELL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unregistered,
    Registered,
    Closing,
}

/// What to do with one decoded line.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// Hand to the coordinator.
    Forward(Command),
    /// Answer locally and keep reading.
    Reply(Message),
    /// Write this line, then close.
    Close(Message),
    Ignore,
}

#[derive(Debug)]
pub struct Session {
    server_name: Arc<str>,
    nick: Option<String>,
    phase: Phase,
    sent_nick: bool,
    sent_user: bool,
}

impl Session {
    pub fn new(server_name: Arc<str>) -> Self {
        Self {
            server_name,
            nick: None,
            phase: Phase::Unregistered,
            sent_nick: false,
            sent_user: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn reject(&self, rejection: &Rejection) -> Message {
        rejection.to_message(&self.server_name, self.nick.as_deref().unwrap_or("*"))
    }

    /// Decide what to do with one frame from the codec.
    pub fn accept(&mut self, frame: Result<Message, LineError>) -> Action {
        let registered = self.phase == Phase::Registered;
        let msg = match frame {
            Ok(msg) => msg,
            Err(LineError::Parse(ParseError::Empty)) => return Action::Ignore,
            Err(e) if !registered => {
                return Action::Close(Message::new(
                    None,
                    "ERROR",
                    vec![format!("Closing Link: {e}")],
                ));
            }
            Err(LineError::TooLong) => return Action::Reply(self.reject(&Rejection::InputTooLong)),
            Err(LineError::Parse(_)) => {
                return Action::Reply(self.reject(&Rejection::UnknownCommand("*".to_owned())));
            }
        };

        let command = match Command::parse(msg) {
            Ok(command) => command,
            Err(rejection) => return Action::Reply(self.reject(&rejection)),
        };
        match command {
            Command::Nick(_) => self.sent_nick = true,
            Command::User { .. } => self.sent_user = true,
            _ => {}
        }

        // Once NICK and USER are both out, the coordinator decides.
        let pending = !(self.sent_nick && self.sent_user);
        if !registered && pending && !command.allowed_before_registration() {
            return Action::Reply(self.reject(&Rejection::NotRegistered));
        }
        Action::Forward(command)
    }

    /// Track a coordinator reply; returns the line to write, if any.
    pub fn observe(&mut self, reply: Reply) -> Option<Message> {
        match reply {
            Reply::Message(msg) => Some(msg),
            Reply::Nick(nick) => {
                self.nick = Some(nick);
                None
            }
            Reply::Registered => {
                self.phase = Phase::Registered;
                None
            }
            Reply::Close => {
                self.phase = Phase::Closing;
                None
            }
        }
    }
}

/// Run one connection until it closes, the coordinator drops it or the
/// server shuts down. Always reports `Disconnected` on the way out.
pub async fn run<S>(
    stream: S,
    addr: SocketAddr,
    tls: bool,
    server_name: Arc<str>,
    events: mpsc::Sender<Event>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = SessionId::next();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = SessionHandle { id, addr, tls, tx };
    if events.send(Event::Connected(handle)).await.is_err() {
        return;
    }
    gauge!(CLIENTS_CONNECTED).increment(1.0);
    debug!(session = %id, %addr, tls, "session started");

    let mut session = Session::new(server_name);
    let mut framed = Framed::new(stream, LineCodec::default());
    if let Err(e) = serve(id, &mut session, &mut framed, &mut rx, &events, &shutdown).await {
        debug!(session = %id, %addr, "connection error: {e}");
    }

    let _ = events.send(Event::Disconnected(id)).await;
    gauge!(CLIENTS_CONNECTED).decrement(1.0);
    debug!(session = %id, %addr, "session ended");
}

/// Write one line. A stalled peer or a shutdown while blocked counts as a
/// write error.
async fn write<S>(
    framed: &mut Framed<S, LineCodec>,
    msg: Message,
    shutdown: &CancellationToken,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::select! {
        _ = shutdown.cancelled() => {
            Err(io::Error::new(io::ErrorKind::Interrupted, "shutdown during write"))
        }
        sent = tokio::time::timeout(WRITE_TIMEOUT, framed.send(msg)) => match sent {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        },
    }
}

async fn serve<S>(
    id: SessionId,
    session: &mut Session,
    framed: &mut Framed<S, LineCodec>,
    rx: &mut mpsc::UnboundedReceiver<Reply>,
    events: &mpsc::Sender<Event>,
    shutdown: &CancellationToken,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let farewell = Message::new(None, "ERROR", vec!["Server shutting down".into()]);
                if tokio::time::timeout(FAREWELL_TIMEOUT, framed.send(farewell)).await.is_err() {
                    debug!(session = %id, "shutdown notice not delivered");
                }
                return Ok(());
            }

            // Incoming line from the client.
            frame = framed.next() => {
                let Some(frame) = frame else {
                    return Ok(());
                };
                match session.accept(frame?) {
                    Action::Forward(command) => {
                        // Blocks only this session when the coordinator is backed up.
                        if events.send(Event::Line(id, command)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Action::Reply(msg) => write(framed, msg, shutdown).await?,
                    Action::Close(msg) => {
                        write(framed, msg, shutdown).await?;
                        return Ok(());
                    }
                    Action::Ignore => {}
                }
            }

            // Outgoing reply from the coordinator.
            reply = rx.recv() => {
                let Some(reply) = reply else {
                    return Ok(());
                };
                if let Some(msg) = session.observe(reply) {
                    write(framed, msg, shutdown).await?;
                }
                if session.phase() == Phase::Closing {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn session() -> Session {
        Session::new(Arc::from("irc.test"))
    }

    fn line(text: &str) -> Result<Message, LineError> {
        Ok(Message::parse(text).unwrap())
    }

    fn wire(action: Action) -> String {
        match action {
            Action::Reply(msg) | Action::Close(msg) => msg.to_wire(),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    // ── Local handling ───────────────────────────────────────────

    #[test]
    fn gate_rejects_commands_before_nick_and_user() {
        let mut s = session();
        assert_eq!(
            wire(s.accept(line("PRIVMSG bob :hi"))),
            ":irc.test 451 * :You have not registered"
        );
        assert_eq!(
            s.accept(line("NICK alice")),
            Action::Forward(Command::Nick("alice".into()))
        );
        assert_eq!(
            wire(s.accept(line("JOIN #a"))),
            ":irc.test 451 * :You have not registered"
        );
    }

    #[test]
    fn pipelined_registration_is_forwarded() {
        let mut s = session();
        s.accept(line("NICK alice"));
        s.accept(line("USER alice 0 * :Alice"));
        assert_eq!(
            s.accept(line("JOIN #a")),
            Action::Forward(Command::Join(vec![("#a".into(), None)]))
        );
    }

    #[test]
    fn bad_lines_close_before_registration() {
        let mut s = session();
        let action = s.accept(Err(LineError::TooLong));
        assert!(matches!(action, Action::Close(ref m) if m.command == "ERROR"));
        assert!(wire(action).starts_with("ERROR :Closing Link: line exceeds"));

        let mut s = session();
        assert!(matches!(
            s.accept(Err(LineError::Parse(ParseError::MissingCommand))),
            Action::Close(_)
        ));
        assert_eq!(s.accept(Err(LineError::Parse(ParseError::Empty))), Action::Ignore);
    }

    #[test]
    fn bad_lines_are_answered_after_registration() {
        let mut s = session();
        s.observe(Reply::Nick("alice".into()));
        s.observe(Reply::Registered);

        assert_eq!(
            wire(s.accept(Err(LineError::TooLong))),
            ":irc.test 417 alice :Input line was too long"
        );
        assert_eq!(
            wire(s.accept(Err(LineError::Parse(ParseError::MissingCommand)))),
            ":irc.test 421 alice * :Unknown command"
        );
        assert_eq!(
            wire(s.accept(line("TOPIC"))),
            ":irc.test 461 alice TOPIC :Not enough parameters"
        );
    }

    #[test]
    fn observe_tracks_phase() {
        let mut s = session();
        assert_eq!(s.phase(), Phase::Unregistered);
        assert_eq!(s.observe(Reply::Registered), None);
        assert_eq!(s.phase(), Phase::Registered);
        let msg = Message::new(None, "PING", vec!["irc.test".into()]);
        assert_eq!(s.observe(Reply::Message(msg.clone())), Some(msg));
        s.observe(Reply::Close);
        assert_eq!(s.phase(), Phase::Closing);
    }

    // ── Over a stream ────────────────────────────────────────────

    async fn spawn_session() -> (
        tokio::io::DuplexStream,
        mpsc::Receiver<Event>,
        SessionHandle,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        spawn_session_with_buffer(4096).await
    }

    async fn spawn_session_with_buffer(
        buffer: usize,
    ) -> (
        tokio::io::DuplexStream,
        mpsc::Receiver<Event>,
        SessionHandle,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let (client, server) = tokio::io::duplex(buffer);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(
            server,
            "127.0.0.1:4000".parse().unwrap(),
            false,
            Arc::from("irc.test"),
            events_tx,
            shutdown.clone(),
        ));
        let Some(Event::Connected(handle)) = events_rx.recv().await else {
            panic!("expected Connected");
        };
        (client, events_rx, handle, shutdown, task)
    }

    #[tokio::test]
    async fn forwards_lines_and_writes_replies() {
        let (client, mut events, handle, shutdown, task) = spawn_session().await;
        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();

        write.write_all(b"NICK alice\r\nJOIN #a\n").await.unwrap();
        match events.recv().await {
            Some(Event::Line(id, Command::Nick(nick))) => {
                assert_eq!(id, handle.id);
                assert_eq!(nick, "alice");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            ":irc.test 451 * :You have not registered"
        );

        handle
            .tx
            .send(Reply::Message(Message::new(
                Some("irc.test".into()),
                "NOTICE",
                vec!["*".into(), "hello".into()],
            )))
            .unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), ":irc.test NOTICE * :hello");

        shutdown.cancel();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "ERROR :Server shutting down"
        );
        task.await.unwrap();
        assert!(matches!(events.recv().await, Some(Event::Disconnected(id)) if id == handle.id));
    }

    #[tokio::test]
    async fn close_reply_ends_the_connection() {
        let (client, mut events, handle, _shutdown, task) = spawn_session().await;
        let mut lines = BufReader::new(client).lines();

        handle
            .tx
            .send(Reply::Message(Message::new(
                None,
                "ERROR",
                vec!["Closing Link: 127.0.0.1 (bye)".into()],
            )))
            .unwrap();
        handle.tx.send(Reply::Close).unwrap();

        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "ERROR :Closing Link: 127.0.0.1 (bye)"
        );
        task.await.unwrap();
        assert_eq!(lines.next_line().await.unwrap(), None);
        assert!(matches!(events.recv().await, Some(Event::Disconnected(_))));
    }

    #[tokio::test]
    async fn peer_hangup_reports_disconnected() {
        let (client, mut events, handle, _shutdown, task) = spawn_session().await;
        drop(client);
        task.await.unwrap();
        assert!(matches!(events.recv().await, Some(Event::Disconnected(id)) if id == handle.id));
    }

    fn flood(handle: &SessionHandle, count: usize) {
        for n in 0..count {
            let text = format!("line {n} padded out to fill the peer's buffer quickly");
            handle
                .tx
                .send(Reply::Message(Message::new(
                    Some("irc.test".into()),
                    "NOTICE",
                    vec!["*".into(), text],
                )))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn shutdown_releases_session_blocked_on_write() {
        let (_client, mut events, handle, shutdown, task) = spawn_session_with_buffer(64).await;

        flood(&handle, 50);
        handle.tx.send(Reply::Close).unwrap();
        tokio::task::yield_now().await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("session did not finish")
            .unwrap();
        assert!(matches!(events.recv().await, Some(Event::Disconnected(id)) if id == handle.id));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_reader_is_disconnected() {
        let (_client, mut events, handle, _shutdown, task) = spawn_session_with_buffer(64).await;

        flood(&handle, 50);

        tokio::time::timeout(WRITE_TIMEOUT * 2, task)
            .await
            .expect("session did not finish")
            .unwrap();
        assert!(matches!(events.recv().await, Some(Event::Disconnected(id)) if id == handle.id));
    }
}
