/// Room state persistence: topic and key survive restarts.
///
/// One file per room under the state directory, named after the casefolded
/// room name. Line 1 is the topic, line 2 the key; an empty line means unset.
/// The coordinator sends [`RoomState`] records fire-and-forget; this task owns
/// all disk I/O so the coordinator never waits on it.
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ident::{casefold, is_room_name};
use crate::error::StartupError;

/// Durable view of a room: everything that must survive a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub name: String,
    pub topic: Option<String>,
    pub key: Option<String>,
}

/// Sending half of the persister queue.
pub type StateSender = mpsc::UnboundedSender<RoomState>;

impl RoomState {
    /// File contents for this record.
    pub fn to_record(&self) -> String {
        format!(
            "{}\n{}\n",
            self.topic.as_deref().unwrap_or_default(),
            self.key.as_deref().unwrap_or_default()
        )
    }

    /// Parse a record. `None` when it has fewer than two lines.
    pub fn from_record(name: &str, contents: &str) -> Option<Self> {
        let mut lines = contents.split('\n');
        let topic = lines.next()?;
        let key = lines.next()?;
        let unset = |s: &str| (!s.is_empty()).then(|| s.to_owned());
        Some(Self {
            name: name.to_owned(),
            topic: unset(topic),
            key: unset(key),
        })
    }
}

/// Load every persisted room from `dir`.
///
/// Runs once at startup, before any listener accepts a connection.
pub fn load(dir: &Path) -> Result<Vec<RoomState>, StartupError> {
    let unreadable = |source| StartupError::StateDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut rooms = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if !is_room_name(&name) || name.ends_with(".tmp") {
            continue;
        }
        let contents = std::fs::read_to_string(entry.path()).map_err(unreadable)?;
        match RoomState::from_record(&name, &contents) {
            Some(state) => {
                info!(room = %name, "loaded room state");
                rooms.push(state);
            }
            None => {
                warn!(room = %name, contents = ?contents, "room state corrupted");
                rooms.push(RoomState {
                    name,
                    topic: None,
                    key: None,
                });
            }
        }
    }
    Ok(rooms)
}

/// Write one record atomically (tmp + rename).
async fn save(dir: &Path, state: &RoomState) -> std::io::Result<()> {
    let file = casefold(&state.name);
    let path = dir.join(&file);
    let tmp = dir.join(format!("{file}.tmp"));
    tokio::fs::write(&tmp, state.to_record()).await?;
    tokio::fs::rename(&tmp, &path).await
}

/// State keeper task: persist records until the coordinator hangs up.
pub async fn keep(dir: PathBuf, mut rx: mpsc::UnboundedReceiver<RoomState>) {
    while let Some(state) = rx.recv().await {
        match save(&dir, &state).await {
            Ok(()) => debug!(room = %state.name, "room state saved"),
            Err(e) => warn!(room = %state.name, "can not save room state: {e}"),
        }
    }
    debug!("state keeper stopped");
}

/// No-op sink used when a durable sink is not configured.
pub async fn discard<T>(mut rx: mpsc::UnboundedReceiver<T>) {
    while rx.recv().await.is_some() {}
}
