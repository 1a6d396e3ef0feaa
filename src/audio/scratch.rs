//! Scoped scratch space for external-tool calls.
//!
//! ffmpeg/ffprobe need real files. Each call gets its own temporary
//! directory that is deleted when the [`ScratchDir`] drops, so success,
//! tool failure and early `?` returns all clean up the same way.

use std::io;
use std::path::PathBuf;
use tempfile::TempDir;

pub(crate) struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub(crate) fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("prosody-").tempdir()?;
        Ok(Self { dir })
    }

    /// Path for a file inside the scratch directory.
    pub(crate) fn path(&self, file_name: &str) -> PathBuf {
        self.dir.path().join(file_name)
    }

    /// Write `bytes` to `file_name` and return its path.
    pub(crate) async fn write(&self, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.path(file_name);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}
