//! Scratch directory for derived artifacts.
//!
//! Artifacts are written to a uniquely named temporary file next to their
//! final location and atomically renamed into place once complete. Readers
//! therefore only ever see whole files, and a failed or abandoned write
//! leaves nothing behind: the temporary file is deleted when the
//! [`PendingArtifact`] is dropped without being committed.

use crate::CacheKey;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::create_dir_all as sync_create_dir;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tempfile::TempPath;
use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Scratch directory holding derived artifacts, named by cache key.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Use `dir` as the scratch directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if the path is not
    /// absolute or exists but isn't a directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(dir));
        }
        if dir.exists() {
            if !dir.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(dir));
            }
        } else {
            // Once, at startup.
            sync_create_dir(&dir).or_raise(|| ErrorKind::Io)?;
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final location of the artifact for `key`.
    pub fn location(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.to_hex())
    }

    /// Start writing the artifact for `key`.
    pub async fn create(&self, key: &CacheKey) -> Result<PendingArtifact> {
        let dir = self.dir.clone();
        let prefix = format!(".{}.", key.to_hex());
        let temp = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).suffix(".tmp").tempfile_in(&dir)
        })
        .await
        .or_raise(|| ErrorKind::Io)?
        .or_raise(|| ErrorKind::Io)?;
        let (file, path) = temp.into_parts();
        Ok(PendingArtifact {
            file: File::from_std(file),
            temp: path,
            location: self.location(key),
            written: 0,
        })
    }

    /// Open a committed artifact for reading.
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) if it has been removed from
    /// the scratch directory since it was cached.
    pub async fn open(&self, location: &Path) -> Result<File> {
        match File::open(location).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(location.to_path_buf())),
            Err(e) => Err(e).or_raise(|| ErrorKind::Io),
        }
    }

    /// Delete every artifact and leftover temporary file in the scratch
    /// directory. Returns the number of files removed.
    pub async fn purge(&self) -> Result<usize> {
        let mut entries = fs::read_dir(&self.dir).await.or_raise(|| ErrorKind::Io)?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::Io)? {
            let file_type = entry.file_type().await.or_raise(|| ErrorKind::Io)?;
            if file_type.is_file() {
                fs::remove_file(entry.path()).await.or_raise(|| ErrorKind::Io)?;
                removed += 1;
            }
        }
        tracing::info!(dir = %self.dir.display(), removed, "Purged scratch directory");
        Ok(removed)
    }
}

/// An artifact being written.
///
/// Implements [`AsyncWrite`]; bytes go to a temporary file until
/// [`commit()`](Self::commit) renames it to its final location. Dropping it
/// uncommitted removes the temporary file.
#[derive(Debug)]
pub struct PendingArtifact {
    file: File,
    temp: TempPath,
    location: PathBuf,
    written: u64,
}

impl PendingArtifact {
    /// Where the artifact will live once committed.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush, sync and atomically move the artifact into place. Returns its
    /// final location.
    pub async fn commit(mut self) -> Result<PathBuf> {
        self.file.flush().await.or_raise(|| ErrorKind::Io)?;
        self.file.sync_all().await.or_raise(|| ErrorKind::Io)?;
        let Self { file, temp, location, written } = self;
        drop(file);
        let target = location.clone();
        // On failure the TempPath comes back inside the error and is dropped
        // there, removing the temporary file.
        tokio::task::spawn_blocking(move || temp.persist(&target))
            .await
            .or_raise(|| ErrorKind::Io)?
            .or_raise(|| ErrorKind::Io)?;
        tracing::debug!(location = %location.display(), bytes = written, "Artifact committed");
        Ok(location)
    }
}

impl AsyncWrite for PendingArtifact {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let poll = Pin::new(&mut this.file).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.written += *n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}
