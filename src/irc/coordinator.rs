/// Event coordinator: the single owner of all mutable relay state.
///
/// Every session feeds [`Event`]s into one bounded queue. The coordinator
/// drains it on one task and applies each event to completion before looking
/// at the next, so the dequeue order is the server's history: two NICKs for
/// the same name resolve to whichever was dequeued first, and no command ever
/// observes another half-applied.
///
/// The identity registry (nick → session) and the room registry live here
/// and nowhere else. Nothing in this module awaits: replies go out on each
/// session's unbounded queue, room state and transcript entries go to their
/// own tasks fire-and-forget. A failing command becomes a numeric reply to
/// its sender; it never stops the loop.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::command::Command;
use super::error::Rejection;
use super::event::{Event, Reply, SessionHandle, SessionId};
use super::ident::{casefold, is_room_name, valid_nickname, valid_room_name};
use super::message::{Message, middle};
use super::metrics::{CLIENTS_REGISTERED, COMMANDS, COMMANDS_REJECTED, ROOM_JOINS};
use super::room::Room;
use super::state::{RoomState, StateSender};
use super::transcript::{LogEntry, LogSender};

/// How often idle sessions are checked for liveness.
pub const ALIVENESS_CHECK: Duration = Duration::from_secs(10);

/// Software version reported by 002/004/351.
pub const VERSION: &str = concat!("tarn-", env!("CARGO_PKG_VERSION"));

/// Nicknames per 353 line, keeping replies well under 512 bytes.
const NAMES_PER_LINE: usize = 16;

/// Static coordinator settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name used as the prefix of server-originated lines.
    pub server_name: String,
    /// Message of the day, one entry per line. `None` answers 422.
    pub motd: Option<Vec<String>>,
    /// Casefolded nick → required PASS.
    pub passwords: HashMap<String, String>,
    /// Idle time after which the server sends PING.
    pub ping_threshold: Duration,
    /// Idle time after which the session is dropped.
    pub ping_timeout: Duration,
}

impl CoordinatorConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            motd: None,
            passwords: HashMap::new(),
            ping_threshold: Duration::from_secs(90),
            ping_timeout: Duration::from_secs(180),
        }
    }
}

/// Coordinator-side record of one session.
#[derive(Debug)]
struct Client {
    tx: mpsc::UnboundedSender<Reply>,
    host: String,
    tls: bool,
    nick: Option<String>,
    username: Option<String>,
    realname: String,
    password: Option<String>,
    away: Option<String>,
    registered: bool,
    last_activity: Instant,
    ping_sent: bool,
}

impl Client {
    fn send(&self, msg: Message) {
        // The session may already be gone; its Disconnected event follows.
        let _ = self.tx.send(Reply::Message(msg));
    }

    fn signal(&self, reply: Reply) {
        let _ = self.tx.send(reply);
    }

    fn nick(&self) -> &str {
        self.nick.as_deref().unwrap_or("*")
    }

    fn prefix(&self) -> String {
        format!(
            "{}!{}@{}",
            self.nick(),
            self.username.as_deref().unwrap_or("*"),
            self.host
        )
    }
}

/// Identity of the session issuing the current command.
struct Sender {
    nick: String,
    key: String,
    prefix: String,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    clients: HashMap<SessionId, Client>,
    /// Identity registry: casefolded nick → owning session.
    nicks: HashMap<String, SessionId>,
    /// Room registry: casefolded name → room. Rooms are never evicted.
    rooms: BTreeMap<String, Room>,
    state_tx: StateSender,
    log_tx: LogSender,
}

impl Coordinator {
    /// Build a coordinator with rooms restored from persisted state.
    pub fn new(
        config: CoordinatorConfig,
        restored: Vec<RoomState>,
        state_tx: StateSender,
        log_tx: LogSender,
    ) -> Self {
        let rooms = restored
            .into_iter()
            .map(|state| (casefold(&state.name), Room::restore(state)))
            .collect();
        Self {
            config,
            clients: HashMap::new(),
            nicks: HashMap::new(),
            rooms,
            state_tx,
            log_tx,
        }
    }

    /// Consume events until every sender is gone, then return.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        let mut aliveness = tokio::time::interval(ALIVENESS_CHECK);
        aliveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(rooms = self.rooms.len(), "coordinator started");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
                _ = aliveness.tick() => self.check_aliveness(Instant::now()),
            }
        }

        info!(clients = self.clients.len(), "coordinator stopped");
    }

    /// Apply one event to completion.
    pub fn apply(&mut self, event: Event) {
        match event {
            Event::Connected(handle) => self.connect(handle),
            Event::Disconnected(id) => self.quit(id, "Connection closed"),
            Event::Line(id, command) => self.command(id, command),
        }
    }

    /// PING sessions idle past the threshold; drop those idle past the timeout.
    pub fn check_aliveness(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for (id, client) in &mut self.clients {
            let idle = now.saturating_duration_since(client.last_activity);
            if idle >= self.config.ping_timeout {
                expired.push(*id);
            } else if idle >= self.config.ping_threshold && !client.ping_sent {
                client.send(Message::new(
                    None,
                    "PING",
                    vec![self.config.server_name.clone()],
                ));
                client.ping_sent = true;
            }
        }
        for id in expired {
            info!(session = %id, "ping timeout");
            self.quit(id, "Ping timeout");
        }
    }

    /// Look up a room by any casing of its name.
    pub fn room(&self, name: &str) -> Option<&Room> {
        self.rooms.get(&casefold(name))
    }

    /// The session currently holding `nick`, if any.
    pub fn nick_owner(&self, nick: &str) -> Option<SessionId> {
        self.nicks.get(&casefold(nick)).copied()
    }

    // ── Dispatch ─────────────────────────────────────────────────

    fn connect(&mut self, handle: SessionHandle) {
        debug!(session = %handle.id, addr = %handle.addr, tls = handle.tls, "session connected");
        self.clients.insert(
            handle.id,
            Client {
                tx: handle.tx,
                host: handle.addr.ip().to_string(),
                tls: handle.tls,
                nick: None,
                username: None,
                realname: String::new(),
                password: None,
                away: None,
                registered: false,
                last_activity: Instant::now(),
                ping_sent: false,
            },
        );
    }

    fn command(&mut self, id: SessionId, command: Command) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        client.last_activity = Instant::now();
        client.ping_sent = false;
        let registered = client.registered;

        counter!(COMMANDS, "verb" => command.verb()).increment(1);
        let silent = matches!(command, Command::Notice { .. });

        let result = if registered || command.allowed_before_registration() {
            self.dispatch(id, command)
        } else {
            Err(Rejection::NotRegistered)
        };
        if let Err(rejection) = result {
            // NOTICE never triggers automatic replies.
            if !silent {
                self.reject(id, &rejection);
            }
        }
    }

    fn dispatch(&mut self, id: SessionId, command: Command) -> Result<(), Rejection> {
        match command {
            Command::Cap { subcommand, args } => self.cap(id, &subcommand, &args),
            Command::Pass(password) => self.pass(id, password),
            Command::Nick(nick) => self.nick(id, nick),
            Command::User { username, realname } => self.user(id, username, realname),
            Command::Join(rooms) => {
                for (room, key) in rooms {
                    if let Err(rejection) = self.join(id, &room, key.as_deref()) {
                        self.reject(id, &rejection);
                    }
                }
                Ok(())
            }
            Command::Part { rooms, reason } => {
                for room in rooms {
                    if let Err(rejection) = self.part(id, &room, reason.as_deref()) {
                        self.reject(id, &rejection);
                    }
                }
                Ok(())
            }
            Command::Privmsg { target, text } => self.message(id, "PRIVMSG", &target, &text),
            Command::Notice { target, text } => self.message(id, "NOTICE", &target, &text),
            Command::Topic { room, topic } => self.topic(id, &room, topic),
            Command::Mode { target, args } => self.mode(id, &target, &args),
            Command::Who(mask) => self.who(id, mask.as_deref()),
            Command::Whois(nick) => self.whois(id, &nick),
            Command::List(filter) => self.list(id, &filter),
            Command::Names(rooms) => self.names(id, &rooms),
            Command::Ison(nicks) => self.ison(id, &nicks),
            Command::Ping(token) => self.pong(id, token),
            Command::Pong(_) => Ok(()),
            Command::Away(reason) => self.away(id, reason),
            Command::Motd => {
                self.motd(id);
                Ok(())
            }
            Command::Lusers => {
                self.lusers(id);
                Ok(())
            }
            Command::Version => {
                let server = self.config.server_name.clone();
                self.numeric(id, "351", &[VERSION, &server, ""]);
                Ok(())
            }
            Command::Quit(reason) => {
                self.quit(id, reason.as_deref().unwrap_or("Client quit"));
                Ok(())
            }
            Command::Unknown(verb) => Err(Rejection::UnknownCommand(verb)),
        }
    }

    // ── Output helpers ───────────────────────────────────────────

    fn reject(&self, id: SessionId, rejection: &Rejection) {
        counter!(COMMANDS_REJECTED, "class" => rejection.class().as_str()).increment(1);
        if let Some(client) = self.clients.get(&id) {
            client.send(rejection.to_message(&self.config.server_name, client.nick()));
        }
    }

    /// Send a server numeric addressed to the session's current nick.
    fn numeric(&self, id: SessionId, code: &str, params: &[&str]) {
        if let Some(client) = self.clients.get(&id) {
            let mut all = Vec::with_capacity(params.len() + 1);
            all.push(client.nick().to_owned());
            if let Some((last, rest)) = params.split_last() {
                all.extend(rest.iter().map(|p| middle(p).to_owned()));
                all.push((*last).to_owned());
            }
            client.send(Message::new(
                Some(self.config.server_name.clone()),
                code,
                all,
            ));
        }
    }

    /// Resolve a casefolded nick through the identity registry.
    fn session_of(&self, nick_key: &str) -> Option<&Client> {
        self.nicks
            .get(nick_key)
            .and_then(|id| self.clients.get(id))
    }

    fn broadcast<'a>(&self, nick_keys: impl IntoIterator<Item = &'a String>, msg: &Message) {
        for key in nick_keys {
            if let Some(client) = self.session_of(key) {
                client.send(msg.clone());
            }
        }
    }

    fn sender(&self, id: SessionId) -> Option<Sender> {
        let client = self.clients.get(&id)?;
        let nick = client.nick.clone()?;
        Some(Sender {
            key: casefold(&nick),
            prefix: client.prefix(),
            nick,
        })
    }

    fn persist(&self, room_key: &str) {
        if let Some(room) = self.rooms.get(room_key) {
            // The keeper outlives the coordinator; a closed queue means shutdown.
            let _ = self.state_tx.send(room.state());
        }
    }

    fn log(&self, target: &str, who: &str, text: &str, meta: bool) {
        let _ = self.log_tx.send(LogEntry {
            target: target.to_owned(),
            who: who.to_owned(),
            text: text.to_owned(),
            meta,
        });
    }

    // ── Registration ─────────────────────────────────────────────

    fn cap(&self, id: SessionId, subcommand: &str, args: &[String]) -> Result<(), Rejection> {
        let Some(client) = self.clients.get(&id) else {
            return Ok(());
        };
        let params = match subcommand {
            "LS" | "LIST" => vec![client.nick().to_owned(), subcommand.to_owned(), String::new()],
            "REQ" => vec![client.nick().to_owned(), "NAK".to_owned(), args.join(" ")],
            _ => return Ok(()),
        };
        client.send(Message::new(
            Some(self.config.server_name.clone()),
            "CAP",
            params,
        ));
        Ok(())
    }

    fn pass(&mut self, id: SessionId, password: String) -> Result<(), Rejection> {
        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(());
        };
        if client.registered {
            return Err(Rejection::AlreadyRegistered);
        }
        client.password = Some(password);
        Ok(())
    }

    fn user(&mut self, id: SessionId, username: String, realname: String) -> Result<(), Rejection> {
        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(());
        };
        if client.registered {
            return Err(Rejection::AlreadyRegistered);
        }
        client.username = Some(username);
        client.realname = realname;
        self.try_register(id)
    }

    fn nick(&mut self, id: SessionId, nick: String) -> Result<(), Rejection> {
        if !valid_nickname(&nick) {
            return Err(Rejection::ErroneousNickname(nick));
        }
        let key = casefold(&nick);
        if self.nicks.get(&key).is_some_and(|owner| *owner != id) {
            return Err(Rejection::NicknameInUse(nick));
        }

        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(());
        };
        if client.nick.as_deref() == Some(nick.as_str()) {
            return Ok(());
        }
        let old_prefix = client.prefix();
        let old_key = client.nick.as_deref().map(casefold);
        let registered = client.registered;
        client.nick = Some(nick.clone());
        client.signal(Reply::Nick(nick.clone()));

        if let Some(old_key) = old_key.as_deref().filter(|old| *old != key) {
            self.nicks.remove(old_key);
        }
        self.nicks.insert(key.clone(), id);

        if !registered {
            return self.try_register(id);
        }

        // Everyone sharing a room with the old nick, plus the renamer.
        let old_key = old_key.unwrap_or_else(|| key.clone());
        let mut notify = BTreeSet::new();
        for room in self.rooms.values_mut() {
            if room.contains(&old_key) {
                notify.extend(room.members().cloned());
                room.rename(&old_key, &key);
            }
        }
        notify.remove(&old_key);
        notify.insert(key);

        let msg = Message::new(Some(old_prefix), "NICK", vec![nick.clone()]);
        self.broadcast(&notify, &msg);
        info!(session = %id, nick = %nick, "nick changed");
        Ok(())
    }

    /// Complete registration once NICK and USER are both in.
    fn try_register(&mut self, id: SessionId) -> Result<(), Rejection> {
        let Some(client) = self.clients.get(&id) else {
            return Ok(());
        };
        if client.registered || client.username.is_none() {
            return Ok(());
        }
        let Some(nick) = client.nick.clone() else {
            return Ok(());
        };

        let password_ok = match self.config.passwords.get(&casefold(&nick)) {
            None => true,
            Some(expected) => client.password.as_deref() == Some(expected.as_str()),
        };
        if !password_ok {
            warn!(session = %id, nick = %nick, "password mismatch");
            self.reject(id, &Rejection::PasswordMismatch);
            self.quit(id, "Password incorrect");
            return Ok(());
        }

        if let Some(client) = self.clients.get_mut(&id) {
            client.registered = true;
            client.signal(Reply::Registered);
        }
        counter!(CLIENTS_REGISTERED).increment(1);
        info!(session = %id, nick = %nick, "registered");
        self.welcome(id, &nick);
        Ok(())
    }

    fn welcome(&self, id: SessionId, nick: &str) {
        let server = &self.config.server_name;
        self.numeric(id, "001", &[&format!("Welcome to {server}, {nick}")]);
        self.numeric(
            id,
            "002",
            &[&format!("Your host is {server}, running version {VERSION}")],
        );
        self.numeric(id, "003", &["This server was created sometime"]);
        self.numeric(id, "004", &[server, VERSION, "o", "k"]);
        self.lusers(id);
        self.motd(id);
    }

    fn lusers(&self, id: SessionId) {
        let users = self.clients.values().filter(|c| c.registered).count();
        self.numeric(
            id,
            "251",
            &[&format!("There are {users} users and 0 invisible on 1 servers")],
        );
        self.numeric(id, "254", &[&self.rooms.len().to_string(), "channels formed"]);
    }

    fn motd(&self, id: SessionId) {
        let Some(lines) = &self.config.motd else {
            self.numeric(id, "422", &["MOTD File is missing"]);
            return;
        };
        let server = &self.config.server_name;
        self.numeric(id, "375", &[&format!("- {server} Message of the Day -")]);
        for line in lines {
            self.numeric(id, "372", &[&format!("- {line}")]);
        }
        self.numeric(id, "376", &["End of /MOTD command"]);
    }

    // ── Rooms ────────────────────────────────────────────────────

    fn join(&mut self, id: SessionId, name: &str, key: Option<&str>) -> Result<(), Rejection> {
        let Some(me) = self.sender(id) else {
            return Ok(());
        };
        if !valid_room_name(name) {
            return Err(Rejection::NoSuchChannel(name.to_owned()));
        }

        let room_key = casefold(name);
        let created = !self.rooms.contains_key(&room_key);
        let room = self
            .rooms
            .entry(room_key.clone())
            .or_insert_with(|| Room::new(name));
        if room.contains(&me.key) {
            return Ok(());
        }
        if !room.admits(key) {
            return Err(Rejection::BadChannelKey(room.name.clone()));
        }
        room.join(&me.key);
        let room_name = room.name.clone();
        let topic = room.topic.clone();

        if created {
            self.persist(&room_key);
        }
        counter!(ROOM_JOINS, "room" => room_key.clone()).increment(1);

        let msg = Message::new(Some(me.prefix), "JOIN", vec![room_name.clone()]);
        if let Some(room) = self.rooms.get(&room_key) {
            self.broadcast(room.members(), &msg);
        }
        match topic {
            Some(topic) => self.numeric(id, "332", &[&room_name, &topic]),
            None => self.numeric(id, "331", &[&room_name, "No topic is set"]),
        }
        self.send_names(id, &room_key);
        self.log(&room_name, &me.nick, "joined", true);
        debug!(session = %id, room = %room_name, "joined");
        Ok(())
    }

    fn part(&mut self, id: SessionId, name: &str, reason: Option<&str>) -> Result<(), Rejection> {
        let Some(me) = self.sender(id) else {
            return Ok(());
        };
        let room_key = casefold(name);
        let Some(room) = self.rooms.get(&room_key) else {
            return Err(Rejection::NoSuchChannel(name.to_owned()));
        };
        if !room.contains(&me.key) {
            return Err(Rejection::NotOnChannel(room.name.clone()));
        }

        let room_name = room.name.clone();
        let mut params = vec![room_name.clone()];
        params.extend(reason.map(str::to_owned));
        self.broadcast(room.members(), &Message::new(Some(me.prefix), "PART", params));

        if let Some(room) = self.rooms.get_mut(&room_key) {
            room.part(&me.key);
        }
        let text = match reason {
            Some(reason) => format!("left: {reason}"),
            None => "left".to_owned(),
        };
        self.log(&room_name, &me.nick, &text, true);
        debug!(session = %id, room = %room_name, "parted");
        Ok(())
    }

    /// Remove a session entirely: rooms, identity registry, connection.
    ///
    /// Used for QUIT, dropped connections, ping timeouts and failed PASS.
    fn quit(&mut self, id: SessionId, reason: &str) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };

        if let Some(nick) = &client.nick {
            let key = casefold(nick);
            if self.nicks.get(&key) == Some(&id) {
                self.nicks.remove(&key);
            }

            if client.registered {
                let mut peers = BTreeSet::new();
                let mut left = Vec::new();
                for room in self.rooms.values_mut() {
                    if room.part(&key) {
                        peers.extend(room.members().cloned());
                        left.push(room.name.clone());
                    }
                }
                let msg = Message::new(Some(client.prefix()), "QUIT", vec![reason.to_owned()]);
                self.broadcast(&peers, &msg);
                for room in left {
                    self.log(&room, nick, &format!("quit: {reason}"), true);
                }
            }
        }

        client.send(Message::new(
            None,
            "ERROR",
            vec![format!("Closing Link: {} ({reason})", client.host)],
        ));
        client.signal(Reply::Close);
        info!(session = %id, nick = client.nick(), reason, "session closed");
    }

    // ── Messaging ────────────────────────────────────────────────

    fn message(
        &self,
        id: SessionId,
        verb: &str,
        target: &str,
        text: &str,
    ) -> Result<(), Rejection> {
        let Some(me) = self.sender(id) else {
            return Ok(());
        };
        let msg = Message::new(
            Some(me.prefix.clone()),
            verb,
            vec![target.to_owned(), text.to_owned()],
        );

        if is_room_name(target) {
            let Some(room) = self.rooms.get(&casefold(target)) else {
                return Err(Rejection::NoSuchNick(target.to_owned()));
            };
            if !room.contains(&me.key) {
                return Err(Rejection::CannotSendToChannel(room.name.clone()));
            }
            self.broadcast(room.members().filter(|key| **key != me.key), &msg);
            self.log(&room.name, &me.nick, text, false);
            return Ok(());
        }

        let Some(recipient) = self.session_of(&casefold(target)).filter(|c| c.registered) else {
            return Err(Rejection::NoSuchNick(target.to_owned()));
        };
        recipient.send(msg);
        if verb == "PRIVMSG" {
            if let Some(away) = &recipient.away {
                self.numeric(id, "301", &[recipient.nick(), away]);
            }
        }
        self.log(recipient.nick(), &me.nick, text, false);
        Ok(())
    }

    fn topic(&mut self, id: SessionId, name: &str, topic: Option<String>) -> Result<(), Rejection> {
        let Some(me) = self.sender(id) else {
            return Ok(());
        };
        let room_key = casefold(name);
        let Some(room) = self.rooms.get(&room_key) else {
            return Err(Rejection::NoSuchChannel(name.to_owned()));
        };
        let room_name = room.name.clone();

        let Some(topic) = topic else {
            match &room.topic {
                Some(current) => self.numeric(id, "332", &[&room_name, current]),
                None => self.numeric(id, "331", &[&room_name, "No topic is set"]),
            }
            return Ok(());
        };
        if !room.contains(&me.key) {
            return Err(Rejection::NotOnChannel(room_name));
        }

        if let Some(room) = self.rooms.get_mut(&room_key) {
            room.topic = (!topic.is_empty()).then(|| topic.clone());
        }
        let msg = Message::new(
            Some(me.prefix),
            "TOPIC",
            vec![room_name.clone(), topic.clone()],
        );
        if let Some(room) = self.rooms.get(&room_key) {
            self.broadcast(room.members(), &msg);
        }
        self.persist(&room_key);
        self.log(&room_name, &me.nick, &format!("set topic: {topic}"), true);
        Ok(())
    }

    /// Minimal MODE: room key (`+k`/`-k`), mode and ban list queries.
    fn mode(&mut self, id: SessionId, target: &str, args: &[String]) -> Result<(), Rejection> {
        let Some(me) = self.sender(id) else {
            return Ok(());
        };

        if !is_room_name(target) {
            let key = casefold(target);
            if key == me.key {
                self.numeric(id, "221", &["+"]);
                return Ok(());
            }
            if self.session_of(&key).is_none() {
                return Err(Rejection::NoSuchNick(target.to_owned()));
            }
            return Err(Rejection::UsersDontMatch);
        }

        let room_key = casefold(target);
        let Some(room) = self.rooms.get(&room_key) else {
            return Err(Rejection::NoSuchChannel(target.to_owned()));
        };
        let room_name = room.name.clone();

        let Some(flag) = args.first() else {
            let modes = if room.key.is_some() { "+k" } else { "+" };
            self.numeric(id, "324", &[&room_name, modes]);
            return Ok(());
        };

        match flag.as_str() {
            "b" | "+b" if args.len() == 1 => {
                self.numeric(id, "368", &[&room_name, "End of channel ban list"]);
                Ok(())
            }
            "+k" | "-k" => {
                if !room.contains(&me.key) {
                    return Err(Rejection::NotOnChannel(room_name));
                }
                let new_key = if flag == "+k" {
                    let key = args
                        .get(1)
                        .filter(|k| !k.is_empty())
                        .ok_or(Rejection::NeedMoreParams("MODE"))?;
                    Some(key.clone())
                } else {
                    None
                };

                let mut params = vec![room_name.clone(), flag.clone()];
                params.extend(new_key.clone());
                if let Some(room) = self.rooms.get_mut(&room_key) {
                    room.key = new_key;
                }
                let msg = Message::new(Some(me.prefix), "MODE", params);
                if let Some(room) = self.rooms.get(&room_key) {
                    self.broadcast(room.members(), &msg);
                }
                self.persist(&room_key);
                self.log(&room_name, &me.nick, &format!("set mode {flag}"), true);
                Ok(())
            }
            other => Err(Rejection::UnknownMode(other.to_owned())),
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    fn send_names(&self, id: SessionId, room_key: &str) {
        let Some(room) = self.rooms.get(room_key) else {
            return;
        };
        let names: Vec<&str> = room
            .members()
            .filter_map(|key| self.session_of(key).and_then(|c| c.nick.as_deref()))
            .collect();
        for chunk in names.chunks(NAMES_PER_LINE) {
            self.numeric(id, "353", &["=", &room.name, &chunk.join(" ")]);
        }
        self.numeric(id, "366", &[&room.name, "End of /NAMES list"]);
    }

    fn who_entry(&self, id: SessionId, room: &str, client: &Client) {
        let flags = if client.away.is_some() { "G" } else { "H" };
        self.numeric(
            id,
            "352",
            &[
                room,
                client.username.as_deref().unwrap_or("*"),
                &client.host,
                &self.config.server_name,
                client.nick(),
                flags,
                &format!("0 {}", client.realname),
            ],
        );
    }

    fn who(&self, id: SessionId, mask: Option<&str>) -> Result<(), Rejection> {
        let Some(mask) = mask else {
            self.numeric(id, "315", &["*", "End of /WHO list"]);
            return Ok(());
        };
        if is_room_name(mask) {
            if let Some(room) = self.rooms.get(&casefold(mask)) {
                for key in room.members() {
                    if let Some(client) = self.session_of(key) {
                        self.who_entry(id, &room.name, client);
                    }
                }
            }
        } else if let Some(client) = self.session_of(&casefold(mask)).filter(|c| c.registered) {
            self.who_entry(id, "*", client);
        }
        self.numeric(id, "315", &[mask, "End of /WHO list"]);
        Ok(())
    }

    fn whois(&self, id: SessionId, nick: &str) -> Result<(), Rejection> {
        let key = casefold(nick);
        let Some(client) = self.session_of(&key).filter(|c| c.registered) else {
            self.reject(id, &Rejection::NoSuchNick(nick.to_owned()));
            self.numeric(id, "318", &[nick, "End of /WHOIS list"]);
            return Ok(());
        };

        let name = client.nick();
        self.numeric(
            id,
            "311",
            &[
                name,
                client.username.as_deref().unwrap_or("*"),
                &client.host,
                "*",
                &client.realname,
            ],
        );
        self.numeric(id, "312", &[name, &self.config.server_name, VERSION]);
        if client.tls {
            self.numeric(id, "671", &[name, "is using a secure connection"]);
        }
        if let Some(away) = &client.away {
            self.numeric(id, "301", &[name, away]);
        }
        let rooms: Vec<&str> = self
            .rooms
            .values()
            .filter(|room| room.contains(&key))
            .map(|room| room.name.as_str())
            .collect();
        if !rooms.is_empty() {
            self.numeric(id, "319", &[name, &rooms.join(" ")]);
        }
        self.numeric(id, "318", &[name, "End of /WHOIS list"]);
        Ok(())
    }

    fn list(&self, id: SessionId, filter: &[String]) -> Result<(), Rejection> {
        let wanted: BTreeSet<String> = filter.iter().map(|name| casefold(name)).collect();
        self.numeric(id, "321", &["Channel", "Users  Name"]);
        for (key, room) in &self.rooms {
            if !wanted.is_empty() && !wanted.contains(key) {
                continue;
            }
            self.numeric(
                id,
                "322",
                &[
                    &room.name,
                    &room.len().to_string(),
                    room.topic.as_deref().unwrap_or_default(),
                ],
            );
        }
        self.numeric(id, "323", &["End of /LIST"]);
        Ok(())
    }

    fn names(&self, id: SessionId, rooms: &[String]) -> Result<(), Rejection> {
        if rooms.is_empty() {
            self.numeric(id, "366", &["*", "End of /NAMES list"]);
        }
        for name in rooms {
            let key = casefold(name);
            if self.rooms.contains_key(&key) {
                self.send_names(id, &key);
            } else {
                self.numeric(id, "366", &[name, "End of /NAMES list"]);
            }
        }
        Ok(())
    }

    fn ison(&self, id: SessionId, nicks: &[String]) -> Result<(), Rejection> {
        let online: Vec<&str> = nicks
            .iter()
            .filter_map(|nick| self.session_of(&casefold(nick)))
            .filter(|c| c.registered)
            .map(Client::nick)
            .collect();
        self.numeric(id, "303", &[&online.join(" ")]);
        Ok(())
    }

    // ── Session state ────────────────────────────────────────────

    fn pong(&self, id: SessionId, token: String) -> Result<(), Rejection> {
        if let Some(client) = self.clients.get(&id) {
            let server = self.config.server_name.clone();
            client.send(Message::new(Some(server.clone()), "PONG", vec![server, token]));
        }
        Ok(())
    }

    fn away(&mut self, id: SessionId, reason: Option<String>) -> Result<(), Rejection> {
        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(());
        };
        let away = reason.is_some();
        client.away = reason;
        if away {
            self.numeric(id, "306", &["You have been marked as being away"]);
        } else {
            self.numeric(id, "305", &["You are no longer marked as being away"]);
        }
        Ok(())
    }
}
