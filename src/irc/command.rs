/// Structured client commands.
///
/// A [`Message`] from the wire is checked for shape here, in the session,
/// so the coordinator only ever sees well-formed [`Command`] values.
use super::error::Rejection;
use super::message::Message;

/// A client command with its parameters validated for count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `CAP <subcommand> [args]`: capability negotiation, none offered.
    Cap { subcommand: String, args: Vec<String> },
    Pass(String),
    Nick(String),
    User { username: String, realname: String },
    /// `JOIN <room>{,<room>} [<key>{,<key>}]`
    Join(Vec<(String, Option<String>)>),
    /// `PART <room>{,<room>} [:reason]`
    Part { rooms: Vec<String>, reason: Option<String> },
    Privmsg { target: String, text: String },
    Notice { target: String, text: String },
    Topic { room: String, topic: Option<String> },
    Mode { target: String, args: Vec<String> },
    Who(Option<String>),
    Whois(String),
    List(Vec<String>),
    Names(Vec<String>),
    Ison(Vec<String>),
    Ping(String),
    Pong(Option<String>),
    Away(Option<String>),
    Motd,
    Lusers,
    Version,
    Quit(Option<String>),
    /// Any verb this server does not implement.
    Unknown(String),
}

fn split_list(param: &str) -> Vec<String> {
    param
        .split(',')
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn non_empty(param: Option<String>) -> Option<String> {
    param.filter(|p| !p.is_empty())
}

impl Command {
    /// Validate the shape of `msg` and turn it into a command.
    pub fn parse(msg: Message) -> Result<Self, Rejection> {
        let verb = msg.command.to_ascii_uppercase();
        let mut params = msg.params.into_iter();

        let command = match verb.as_str() {
            "CAP" => Command::Cap {
                subcommand: params.next().unwrap_or_default().to_ascii_uppercase(),
                args: params.collect(),
            },
            "PASS" => Command::Pass(params.next().ok_or(Rejection::NeedMoreParams("PASS"))?),
            "NICK" => match non_empty(params.next()) {
                Some(nick) => Command::Nick(nick),
                None => return Err(Rejection::NoNicknameGiven),
            },
            "USER" => {
                let args: Vec<String> = params.collect();
                if args.len() < 4 {
                    return Err(Rejection::NeedMoreParams("USER"));
                }
                let mut args = args.into_iter();
                let username = args.next().unwrap_or_default();
                let realname = args.nth(2).unwrap_or_default();
                Command::User { username, realname }
            }
            "JOIN" => {
                let rooms = non_empty(params.next()).ok_or(Rejection::NeedMoreParams("JOIN"))?;
                let mut keys = params
                    .next()
                    .map(|k| k.split(',').map(str::to_owned).collect::<Vec<_>>())
                    .unwrap_or_default()
                    .into_iter();
                Command::Join(
                    split_list(&rooms)
                        .into_iter()
                        .map(|room| (room, non_empty(keys.next())))
                        .collect(),
                )
            }
            "PART" => {
                let rooms = non_empty(params.next()).ok_or(Rejection::NeedMoreParams("PART"))?;
                Command::Part {
                    rooms: split_list(&rooms),
                    reason: non_empty(params.next()),
                }
            }
            "PRIVMSG" | "NOTICE" => {
                let target = non_empty(params.next()).ok_or(Rejection::NoRecipient(
                    if verb == "PRIVMSG" { "PRIVMSG" } else { "NOTICE" },
                ))?;
                let text = non_empty(params.next()).ok_or(Rejection::NoTextToSend)?;
                if verb == "PRIVMSG" {
                    Command::Privmsg { target, text }
                } else {
                    Command::Notice { target, text }
                }
            }
            "TOPIC" => Command::Topic {
                room: non_empty(params.next()).ok_or(Rejection::NeedMoreParams("TOPIC"))?,
                topic: params.next(),
            },
            "MODE" => Command::Mode {
                target: non_empty(params.next()).ok_or(Rejection::NeedMoreParams("MODE"))?,
                args: params.collect(),
            },
            "WHO" => Command::Who(non_empty(params.next())),
            "WHOIS" => {
                // `WHOIS [server] nick`: the nick is always last.
                let nick = params.last().filter(|n| !n.is_empty());
                Command::Whois(nick.ok_or(Rejection::NoNicknameGiven)?)
            }
            "LIST" => Command::List(params.next().map(|p| split_list(&p)).unwrap_or_default()),
            "NAMES" => Command::Names(params.next().map(|p| split_list(&p)).unwrap_or_default()),
            "ISON" => {
                let nicks: Vec<String> = params
                    .flat_map(|p| p.split(' ').map(str::to_owned).collect::<Vec<_>>())
                    .filter(|n| !n.is_empty())
                    .collect();
                if nicks.is_empty() {
                    return Err(Rejection::NeedMoreParams("ISON"));
                }
                Command::Ison(nicks)
            }
            "PING" => Command::Ping(non_empty(params.next()).ok_or(Rejection::NoOrigin)?),
            "PONG" => Command::Pong(params.next()),
            "AWAY" => Command::Away(non_empty(params.next())),
            "MOTD" => Command::Motd,
            "LUSERS" => Command::Lusers,
            "VERSION" => Command::Version,
            "QUIT" => Command::Quit(non_empty(params.next())),
            _ => Command::Unknown(verb),
        };
        Ok(command)
    }

    /// Commands a session may send before registration completes.
    pub fn allowed_before_registration(&self) -> bool {
        matches!(
            self,
            Command::Cap { .. }
                | Command::Pass(_)
                | Command::Nick(_)
                | Command::User { .. }
                | Command::Ping(_)
                | Command::Pong(_)
                | Command::Quit(_)
        )
    }

    /// The verb, for metrics and logs.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Cap { .. } => "CAP",
            Command::Pass(_) => "PASS",
            Command::Nick(_) => "NICK",
            Command::User { .. } => "USER",
            Command::Join(_) => "JOIN",
            Command::Part { .. } => "PART",
            Command::Privmsg { .. } => "PRIVMSG",
            Command::Notice { .. } => "NOTICE",
            Command::Topic { .. } => "TOPIC",
            Command::Mode { .. } => "MODE",
            Command::Who(_) => "WHO",
            Command::Whois(_) => "WHOIS",
            Command::List(_) => "LIST",
            Command::Names(_) => "NAMES",
            Command::Ison(_) => "ISON",
            Command::Ping(_) => "PING",
            Command::Pong(_) => "PONG",
            Command::Away(_) => "AWAY",
            Command::Motd => "MOTD",
            Command::Lusers => "LUSERS",
            Command::Version => "VERSION",
            Command::Quit(_) => "QUIT",
            Command::Unknown(_) => "UNKNOWN",
        }
    }
}
