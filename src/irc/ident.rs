//! Nickname and room name rules.
//!
//! Comparisons are case-insensitive with ASCII case mapping
//! (`CASEMAPPING=ascii`); registries are keyed by [`casefold`]ed names.

/// Longest nickname accepted.
pub const NICK_MAX: usize = 24;

/// Longest room name accepted, sigil excluded.
pub const ROOM_MAX: usize = 200;

/// Normalize a nickname or room name for registry lookups.
pub fn casefold(s: &str) -> String {
    s.to_ascii_lowercase()
}

/// Nicknames are 1 to 24 ASCII letters, digits or `-`.
pub fn valid_nickname(nick: &str) -> bool {
    !nick.is_empty()
        && nick.len() <= NICK_MAX
        && nick.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Whether a message target names a room rather than a nickname.
pub fn is_room_name(target: &str) -> bool {
    target.starts_with(['#', '&'])
}

/// A room name is a sigil followed by 1 to 200 characters, none of which
/// are NUL, BEL, CR, LF, space, comma, colon or slash.
pub fn valid_room_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(['#', '&']) else {
        return false;
    };
    let len = rest.chars().count();
    (1..=ROOM_MAX).contains(&len)
        && !rest
            .chars()
            .any(|c| matches!(c, '\0' | '\x07' | '\n' | '\r' | ' ' | ',' | ':' | '/'))
}
