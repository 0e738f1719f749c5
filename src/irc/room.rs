/// In-memory room: topic, optional join key and member set.
///
/// Members are casefolded nicknames; the coordinator resolves them through
/// its identity registry. A room is never evicted once created.
use std::collections::BTreeSet;

use super::state::RoomState;

#[derive(Debug, Clone)]
pub struct Room {
    /// Display name as first seen (or as restored from disk).
    pub name: String,
    pub topic: Option<String>,
    pub key: Option<String>,
    members: BTreeSet<String>,
}

impl Room {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            topic: None,
            key: None,
            members: BTreeSet::new(),
        }
    }

    /// Restore a room from its persisted record, with no members.
    pub fn restore(state: RoomState) -> Self {
        Self {
            name: state.name,
            topic: state.topic,
            key: state.key,
            members: BTreeSet::new(),
        }
    }

    /// Snapshot for the state persister.
    pub fn state(&self) -> RoomState {
        RoomState {
            name: self.name.clone(),
            topic: self.topic.clone(),
            key: self.key.clone(),
        }
    }

    /// Whether `supplied` opens this room.
    pub fn admits(&self, supplied: Option<&str>) -> bool {
        match self.key.as_deref() {
            None => true,
            Some(key) => supplied == Some(key),
        }
    }

    /// Add a member; `false` if already present.
    pub fn join(&mut self, nick_key: &str) -> bool {
        self.members.insert(nick_key.to_owned())
    }

    /// Remove a member; `false` if absent.
    pub fn part(&mut self, nick_key: &str) -> bool {
        self.members.remove(nick_key)
    }

    pub fn contains(&self, nick_key: &str) -> bool {
        self.members.contains(nick_key)
    }

    /// Move a member to a new nickname key (NICK change).
    pub fn rename(&mut self, old: &str, new: &str) {
        if self.members.remove(old) {
            self.members.insert(new.to_owned());
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &String> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_gate() {
        let mut room = Room::new("#secret");
        assert!(room.admits(None));
        room.key = Some("pw".into());
        assert!(!room.admits(None));
        assert!(!room.admits(Some("nope")));
        assert!(room.admits(Some("pw")));
    }

    #[test]
    fn membership_changes_report_effect() {
        let mut room = Room::new("#a");
        assert!(room.join("x"));
        assert!(!room.join("x"));
        assert!(room.part("x"));
        assert!(!room.part("x"));
        assert!(room.is_empty());
    }

    #[test]
    fn rename_only_touches_members() {
        let mut room = Room::new("#a");
        room.join("old");
        room.rename("old", "new");
        room.rename("ghost", "other");
        assert_eq!(room.members().cloned().collect::<Vec<_>>(), vec!["new"]);
    }

    #[test]
    fn restore_carries_topic_and_key() {
        let room = Room::restore(RoomState {
            name: "#a".into(),
            topic: Some("t".into()),
            key: Some("k".into()),
        });
        assert_eq!(room.state().topic.as_deref(), Some("t"));
        assert!(room.admits(Some("k")));
        assert_eq!(room.len(), 0);
    }
}
