/// Append-only transcript of delivered messages.
///
/// One file per target (room or nickname) under the log directory. Entries
/// arrive fire-and-forget from the coordinator after delivery; a failed write
/// is logged and dropped, never reported back to the protocol.
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ident::casefold;

/// A delivered message or a room event worth keeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Room name or recipient nickname.
    pub target: String,
    /// Nickname of the author.
    pub who: String,
    pub text: String,
    /// Join/part/topic style events rather than chat text.
    pub meta: bool,
}

/// Sending half of the transcript queue.
pub type LogSender = mpsc::UnboundedSender<LogEntry>;

impl LogEntry {
    /// Render one transcript line stamped with `when`.
    pub fn render(&self, when: chrono::DateTime<chrono::Local>) -> String {
        let stamp = when.format("%Y/%m/%d %H:%M:%S");
        if self.meta {
            format!("[{stamp}] * {} {}\n", self.who, self.text)
        } else {
            format!("[{stamp}] <{}> {}\n", self.who, self.text)
        }
    }
}

async fn append(dir: &Path, entry: &LogEntry) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(casefold(&entry.target)))
        .await?;
    file.write_all(entry.render(chrono::Local::now()).as_bytes())
        .await?;
    file.flush().await
}

/// Transcript writer task: append entries until the coordinator hangs up.
pub async fn write(dir: PathBuf, mut rx: mpsc::UnboundedReceiver<LogEntry>) {
    while let Some(entry) = rx.recv().await {
        if let Err(e) = append(&dir, &entry).await {
            warn!(to = %entry.target, "can not write transcript: {e}");
        }
    }
    debug!("transcript writer stopped");
}
