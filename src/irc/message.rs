/// IRC message model.
///
/// Wire format (RFC 2812):
///   [`:`prefix SPACE] command [SPACE middle]* [SPACE `:` trailing]
///
/// Parsing works on a single line with its terminator already stripped
/// by the codec.
use std::fmt;

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional prefix (server name or `nick!user@host`).
    pub prefix: Option<String>,
    /// The command verb or three-digit numeric, as received.
    pub command: String,
    /// Parameters; the last one may have been a trailing param (with spaces).
    pub params: Vec<String>,
}

/// Errors that can occur while parsing a line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix present but missing command")]
    MissingCommand,
}

impl Message {
    /// Build a message from its parts.
    pub fn new(prefix: Option<String>, command: &str, params: Vec<String>) -> Self {
        Self {
            prefix,
            command: command.to_owned(),
            params,
        }
    }

    /// Parse one IRC line (terminator optional).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches(['\r', '\n']).trim_start_matches(' ');
        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = match input.strip_prefix(':') {
            Some(tail) => match tail.split_once(' ') {
                Some((prefix, rest)) if !prefix.is_empty() => {
                    (Some(prefix.to_owned()), rest.trim_start_matches(' '))
                }
                _ => return Err(ParseError::MissingCommand),
            },
            None => (None, input),
        };

        let (command, mut remaining) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        loop {
            remaining = remaining.trim_start_matches(' ');
            if remaining.is_empty() {
                break;
            }
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_owned());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, tail)) => {
                    params.push(param.to_owned());
                    remaining = tail;
                }
                None => {
                    params.push(remaining.to_owned());
                    break;
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_owned(),
            params,
        })
    }

    /// Serialize to the IRC wire format (without the trailing `\r\n`).
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if let Some(ref prefix) = self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                out.push(' ');
                out.push_str(param);
            }
            // The last parameter is always sent as trailing; valid for every
            // value including empty strings and text with spaces.
            out.push_str(" :");
            out.push_str(last);
        }

        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// `param` if it can travel as a middle parameter, `*` otherwise.
///
/// Client-supplied names echoed back in numerics can come from a trailing
/// parameter and so contain spaces or start with `:`.
pub fn middle(param: &str) -> &str {
    if param.is_empty() || param.starts_with(':') || param.contains(' ') {
        "*"
    } else {
        param
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ── Parsing ──────────────────────────────────────────────────

    #[test]
    fn parse_bare_command() {
        let msg = Message::parse("LIST").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "LIST");
        assert_eq!(msg.params, Vec::<String>::new());
    }

    #[test]
    fn parse_join_with_key() {
        let msg = Message::parse("JOIN #secret pw").unwrap();
        assert_eq!(msg.command, "JOIN");
        assert_eq!(msg.params, vec!["#secret", "pw"]);
    }

    #[test]
    fn parse_trailing_keeps_spaces() {
        let msg = Message::parse("PRIVMSG #a :hi there  all").unwrap();
        assert_eq!(msg.params, vec!["#a", "hi there  all"]);
    }

    #[test]
    fn parse_prefix() {
        let msg = Message::parse(":alice!al@10.0.0.1 PART #a :bye").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("alice!al@10.0.0.1"));
        assert_eq!(msg.command, "PART");
        assert_eq!(msg.params, vec!["#a", "bye"]);
    }

    #[test]
    fn parse_user_four_params() {
        let msg = Message::parse("USER al 0 * :Alice Liddell").unwrap();
        assert_eq!(msg.params, vec!["al", "0", "*", "Alice Liddell"]);
    }

    #[test]
    fn parse_collapses_repeated_spaces() {
        let msg = Message::parse("MODE   #a  +k   pw").unwrap();
        assert_eq!(msg.command, "MODE");
        assert_eq!(msg.params, vec!["#a", "+k", "pw"]);
    }

    #[test]
    fn parse_strips_any_terminator() {
        assert_eq!(Message::parse("PING :x\r\n").unwrap().params, vec!["x"]);
        assert_eq!(Message::parse("PING :x\n").unwrap().params, vec!["x"]);
        assert_eq!(Message::parse("PING :x\r").unwrap().params, vec!["x"]);
    }

    #[test]
    fn parse_empty_trailing() {
        let msg = Message::parse("TOPIC #a :").unwrap();
        assert_eq!(msg.params, vec!["#a", ""]);
    }

    #[test]
    fn parse_trailing_starting_with_colon() {
        let msg = Message::parse("PRIVMSG bob ::)").unwrap();
        assert_eq!(msg.params, vec!["bob", ":)"]);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
        assert_eq!(Message::parse("   "), Err(ParseError::Empty));
        assert_eq!(Message::parse(":lonely"), Err(ParseError::MissingCommand));
        assert_eq!(Message::parse(": NICK a"), Err(ParseError::MissingCommand));
    }

    // ── Serialization ────────────────────────────────────────────

    #[test]
    fn serialize_numeric() {
        let msg = Message::new(
            Some("irc.example.org".into()),
            "001",
            vec!["alice".into(), "Welcome to irc.example.org, alice".into()],
        );
        assert_eq!(
            msg.to_wire(),
            ":irc.example.org 001 alice :Welcome to irc.example.org, alice"
        );
    }

    #[test]
    fn serialize_without_params() {
        let msg = Message::new(None, "QUIT", vec![]);
        assert_eq!(msg.to_wire(), "QUIT");
    }

    #[test]
    fn serialize_empty_last_param() {
        let msg = Message::new(None, "CAP", vec!["*".into(), "LS".into(), String::new()]);
        assert_eq!(msg.to_wire(), "CAP * LS :");
    }

    #[test]
    fn reparse_of_serialized_form_is_identical() {
        let msg = Message::parse(":bob!b@h MODE #a +k pw").unwrap();
        assert_eq!(msg.to_wire(), ":bob!b@h MODE #a +k :pw");
        assert_eq!(Message::parse(&msg.to_wire()).unwrap(), msg);
    }

    #[test]
    fn middle_param_guard() {
        assert_eq!(middle("#room"), "#room");
        assert_eq!(middle("#a b"), "*");
        assert_eq!(middle(":x"), "*");
        assert_eq!(middle(""), "*");
    }
}
