//! Inbound message feed adapters
//!
//! The collaborator that watches the source chat system emits one JSON object
//! per line. Two adapters turn that stream into [`InboundMessage`]s on an mpsc
//! channel: a stdin reader for piped operation and a JSONL tail reader for
//! file-based handoff. Malformed lines are logged and skipped; they never stop
//! the feed.

use crate::router::types::InboundMessage;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{stdin, AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parse one feed line, logging and discarding garbage
fn parse_feed_line(line: &str) -> Option<InboundMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<InboundMessage>(trimmed) {
        Ok(message) => Some(message),
        Err(e) => {
            log::warn!("⚠️  Skipping malformed feed line: {}", e);
            None
        }
    }
}

/// Forward stdin JSONL to the relay channel until EOF
pub async fn run_stdin_feed(tx: mpsc::Sender<InboundMessage>) -> std::io::Result<()> {
    let mut lines = BufReader::new(stdin()).lines();
    log::info!("📖 Reading feed from stdin");

    while let Some(line) = lines.next_line().await? {
        if let Some(message) = parse_feed_line(&line) {
            if tx.send(message).await.is_err() {
                log::warn!("📪 Relay channel closed, stopping stdin feed");
                break;
            }
        }
    }
    Ok(())
}

/// Tailing JSONL feed that yields parsed messages as they are appended
///
/// Only content appended after `open` is delivered. The feed survives log
/// rotation: when the file at `path` is replaced (new inode) or truncated
/// below the consumed offset, it reopens from the start of the new file.
pub struct TailFeed {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    inode: Option<u64>,
    /// Bytes consumed from the current file, for truncation detection
    offset: u64,
}

impl TailFeed {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            reader: None,
            inode: None,
            offset: 0,
        }
    }

    /// Open the feed file and skip everything already in it
    pub async fn open(&mut self) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;
        let metadata = file.metadata().await?;

        #[cfg(unix)]
        {
            self.inode = Some(metadata.ino());
        }

        let mut reader = BufReader::new(file);
        self.offset = reader.seek(SeekFrom::End(0)).await?;
        self.reader = Some(reader);

        log::info!(
            "📖 Tailing feed {} from byte {}",
            self.path.display(),
            self.offset
        );
        Ok(())
    }

    async fn reopen_from_start(&mut self) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;

        #[cfg(unix)]
        {
            self.inode = Some(file.metadata().await?.ino());
        }

        self.reader = Some(BufReader::new(file));
        self.offset = 0;
        log::info!("🔄 Feed file replaced, reading {} from start", self.path.display());
        Ok(())
    }

    /// True when the path now points at a different or truncated file
    async fn rotated(&self) -> std::io::Result<bool> {
        let metadata = tokio::fs::metadata(&self.path).await?;

        #[cfg(unix)]
        if self.inode.map_or(false, |old| old != metadata.ino()) {
            return Ok(true);
        }

        Ok(metadata.len() < self.offset)
    }

    /// Next parsed message appended to the feed; waits for new data
    pub async fn next_message(&mut self) -> std::io::Result<InboundMessage> {
        loop {
            let reader = self.reader.as_mut().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotConnected, "feed not opened")
            })?;

            let mut line = String::new();
            let read = reader.read_line(&mut line).await?;
            if read == 0 {
                if self.rotated().await? {
                    self.reopen_from_start().await?;
                } else {
                    sleep(TAIL_POLL_INTERVAL).await;
                }
                continue;
            }

            self.offset += read as u64;
            if let Some(message) = parse_feed_line(&line) {
                return Ok(message);
            }
        }
    }
}

/// Tail a JSONL file and forward parsed messages to the relay channel
pub async fn run_tail_feed(
    path: PathBuf,
    tx: mpsc::Sender<InboundMessage>,
) -> std::io::Result<()> {
    let mut feed = TailFeed::new(path);
    feed.open().await?;

    loop {
        let message = feed.next_message().await?;
        if tx.send(message).await.is_err() {
            log::warn!("📪 Relay channel closed, stopping tail feed");
            return Ok(());
        }
    }
}
