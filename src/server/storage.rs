//! Shared append-only log backed by a single file

use crate::{AesdError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// State guarded by the log lock. Holding the guard is what grants access
/// to the backing file.
#[derive(Debug, Default)]
struct LogState {
    appended: u64,
    removed: bool,
}

/// The one log every connection and the timestamp producer write into.
///
/// Each `append` and `read_all` holds the lock only across its own
/// open/write/close (or open/read/close), so a slow client never blocks
/// other writers for longer than a single write event.
#[derive(Debug)]
pub struct SharedLog {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl SharedLog {
    /// Create the backing file, truncating anything left by a previous run
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;
        debug!(path = %path.display(), "Shared log created");

        Ok(Self {
            path,
            state: Mutex::new(LogState::default()),
        })
    }

    /// Append `bytes` to the end of the log as one uninterrupted write
    pub async fn append(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.removed {
            return Err(AesdError::LogClosed);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        state.appended += bytes.len() as u64;
        Ok(())
    }

    /// Whole content of the log as of this call
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        if state.removed {
            return Err(AesdError::LogClosed);
        }
        Ok(tokio::fs::read(&self.path).await?)
    }

    /// Close the log for good and delete its backing file.
    ///
    /// Later appends fail with [`AesdError::LogClosed`]. Calling this more
    /// than once, or after the file vanished on its own, is a no-op.
    pub async fn remove(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.removed {
            return Ok(());
        }
        state.removed = true;

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Shared log removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended through this handle since creation
    pub async fn len(&self) -> u64 {
        self.state.lock().await.appended
    }

    /// True when nothing has been appended yet
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    pub(crate) async fn is_removed(&self) -> bool {
        self.state.lock().await.removed
    }
}
