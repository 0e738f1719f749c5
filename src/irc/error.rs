/// Per-command failures and their IRC numerics.
///
/// A [`Rejection`] never escapes a session or the coordinator: it is always
/// rendered back to the originating client as a numeric reply.
use super::message::{Message, middle};

/// Failure class of a rejected command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// Malformed command or wrong parameter count.
    Protocol,
    /// Nickname in use, wrong key or password.
    Auth,
    /// Unknown nickname or room.
    NotFound,
}

impl Class {
    /// Metric label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Auth => "auth",
            Self::NotFound => "not_found",
        }
    }
}

/// A command that could not be applied.
///
/// The `Display` text becomes the trailing parameter of the numeric.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("No such nick/channel")]
    NoSuchNick(String),
    #[error("No such channel")]
    NoSuchChannel(String),
    #[error("Cannot send to channel")]
    CannotSendToChannel(String),
    #[error("No origin specified")]
    NoOrigin,
    #[error("No recipient given ({0})")]
    NoRecipient(&'static str),
    #[error("No text to send")]
    NoTextToSend,
    #[error("Input line was too long")]
    InputTooLong,
    #[error("Unknown command")]
    UnknownCommand(String),
    #[error("No nickname given")]
    NoNicknameGiven,
    #[error("Erroneous nickname")]
    ErroneousNickname(String),
    #[error("Nickname is already in use")]
    NicknameInUse(String),
    #[error("You're not on that channel")]
    NotOnChannel(String),
    #[error("You have not registered")]
    NotRegistered,
    #[error("Not enough parameters")]
    NeedMoreParams(&'static str),
    #[error("You may not reregister")]
    AlreadyRegistered,
    #[error("Password incorrect")]
    PasswordMismatch,
    #[error("is unknown mode char to me")]
    UnknownMode(String),
    #[error("Cannot join channel (+k) - bad key")]
    BadChannelKey(String),
    #[error("Cant change mode for other users")]
    UsersDontMatch,
}

impl Rejection {
    /// The three-digit numeric for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchNick(_) => "401",
            Self::NoSuchChannel(_) => "403",
            Self::CannotSendToChannel(_) => "404",
            Self::NoOrigin => "409",
            Self::NoRecipient(_) => "411",
            Self::NoTextToSend => "412",
            Self::InputTooLong => "417",
            Self::UnknownCommand(_) => "421",
            Self::NoNicknameGiven => "431",
            Self::ErroneousNickname(_) => "432",
            Self::NicknameInUse(_) => "433",
            Self::NotOnChannel(_) => "442",
            Self::NotRegistered => "451",
            Self::NeedMoreParams(_) => "461",
            Self::AlreadyRegistered => "462",
            Self::PasswordMismatch => "464",
            Self::UnknownMode(_) => "472",
            Self::BadChannelKey(_) => "475",
            Self::UsersDontMatch => "502",
        }
    }

    pub fn class(&self) -> Class {
        match self {
            Self::NicknameInUse(_) | Self::BadChannelKey(_) | Self::PasswordMismatch => Class::Auth,
            Self::NoSuchNick(_) | Self::NoSuchChannel(_) => Class::NotFound,
            _ => Class::Protocol,
        }
    }

    /// The parameter between the client's nick and the text, if any.
    fn subject(&self) -> Option<&str> {
        match self {
            Self::NoSuchNick(s)
            | Self::NoSuchChannel(s)
            | Self::CannotSendToChannel(s)
            | Self::UnknownCommand(s)
            | Self::ErroneousNickname(s)
            | Self::NicknameInUse(s)
            | Self::NotOnChannel(s)
            | Self::UnknownMode(s)
            | Self::BadChannelKey(s) => Some(s),
            Self::NeedMoreParams(verb) => Some(verb),
            _ => None,
        }
    }

    /// Render as a numeric from `server` addressed to `nick` (`*` before registration).
    pub fn to_message(&self, server: &str, nick: &str) -> Message {
        let mut params = vec![nick.to_owned()];
        if let Some(subject) = self.subject() {
            params.push(middle(subject).to_owned());
        }
        params.push(self.to_string());
        Message::new(Some(server.to_owned()), self.code(), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_subject_between_nick_and_text() {
        let msg = Rejection::NicknameInUse("alice".into()).to_message("irc.test", "*");
        assert_eq!(
            msg.to_wire(),
            ":irc.test 433 * alice :Nickname is already in use"
        );
    }

    #[test]
    fn renders_without_subject() {
        let msg = Rejection::NotRegistered.to_message("irc.test", "*");
        assert_eq!(msg.to_wire(), ":irc.test 451 * :You have not registered");
    }

    #[test]
    fn need_more_params_names_the_verb() {
        let msg = Rejection::NeedMoreParams("JOIN").to_message("irc.test", "bob");
        assert_eq!(msg.to_wire(), ":irc.test 461 bob JOIN :Not enough parameters");
    }

    #[test]
    fn unsafe_subject_is_replaced() {
        let msg = Rejection::NoSuchChannel("#a b".into()).to_message("irc.test", "bob");
        assert_eq!(msg.to_wire(), ":irc.test 403 bob * :No such channel");
    }

    #[test]
    fn classes() {
        assert_eq!(Rejection::BadChannelKey("#s".into()).class(), Class::Auth);
        assert_eq!(Rejection::NoSuchNick("zed".into()).class(), Class::NotFound);
        assert_eq!(Rejection::NeedMoreParams("TOPIC").class(), Class::Protocol);
        assert_eq!(Class::NotFound.as_str(), "not_found");
    }
}
