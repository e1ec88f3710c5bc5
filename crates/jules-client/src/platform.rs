//! Filesystem, environment, time, and encoding primitives, abstracted behind
//! a trait so stores and the transport's sleep/retry logic can be exercised
//! against an in-memory fake instead of the real filesystem and clock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

#[async_trait]
pub trait Platform: Send + Sync {
    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Write-then-rename so a concurrent reader never observes a partial
    /// write (session upserts rely on this for file-level atomicity).
    async fn write_file_atomic(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Append raw bytes to `path`, creating it (and parent dirs) if absent.
    /// Returns the byte offset at which the write began.
    async fn append_file(&self, path: &Path, contents: &[u8]) -> Result<u64>;

    async fn file_len(&self, path: &Path) -> Result<Option<u64>>;

    /// Reads `len` bytes starting at `offset`.
    async fn read_at(&self, path: &Path, offset: u64, len: u64) -> Result<Vec<u8>>;

    async fn remove_file(&self, path: &Path) -> Result<()>;
    async fn remove_dir_all(&self, path: &Path) -> Result<()>;

    fn env_var(&self, key: &str) -> Option<String>;

    fn base64_encode(&self, data: &[u8]) -> String;
    fn base64_decode(&self, data: &str) -> Result<Vec<u8>>;

    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

/// Production implementation backed by `tokio::fs` and the system clock.
#[derive(Debug, Default, Clone)]
pub struct RealPlatform;

#[async_trait]
impl Platform for RealPlatform {
    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    async fn write_file_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| Error::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::io(path, e))
    }

    async fn append_file(&self, path: &Path, contents: &[u8]) -> Result<u64> {
        use tokio::io::AsyncWriteExt;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        let offset = file.metadata().await.map_err(|e| Error::io(path, e))?.len();
        file.write_all(contents)
            .await
            .map_err(|e| Error::io(path, e))?;
        file.flush().await.map_err(|e| Error::io(path, e))?;
        Ok(offset)
    }

    async fn file_len(&self, path: &Path) -> Result<Option<u64>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    async fn read_at(&self, path: &Path, offset: u64, len: u64) -> Result<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::io(path, e))?;
        let mut buf = vec![0u8; len as usize];
        let read = file.read(&mut buf).await.map_err(|e| Error::io(path, e))?;
        buf.truncate(read);
        Ok(buf)
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) | Err(_) if !path.exists() => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn env_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn base64_encode(&self, data: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    fn base64_decode(&self, data: &str) -> Result<Vec<u8>> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::InvalidQuery {
                message: format!("invalid base64: {e}"),
            })
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// In-memory fake for tests: files live in a `Mutex<HashMap>`, the clock is
/// caller-controlled, and `sleep` resolves immediately.
#[derive(Default)]
pub struct FakePlatform {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    env: Mutex<HashMap<String, String>>,
    clock: Mutex<Option<DateTime<Utc>>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_env(&self, key: &str, value: &str) {
        self.env
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_clock(&self, instant: DateTime<Utc>) {
        *self.clock.lock().unwrap() = Some(instant);
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    async fn write_file_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    async fn append_file(&self, path: &Path, contents: &[u8]) -> Result<u64> {
        let mut files = self.files.lock().unwrap();
        let entry = files.entry(path.to_path_buf()).or_default();
        let offset = entry.len() as u64;
        entry.extend_from_slice(contents);
        Ok(offset)
    }

    async fn file_len(&self, path: &Path) -> Result<Option<u64>> {
        Ok(self.files.lock().unwrap().get(path).map(|b| b.len() as u64))
    }

    async fn read_at(&self, path: &Path, offset: u64, len: u64) -> Result<Vec<u8>> {
        let files = self.files.lock().unwrap();
        let Some(bytes) = files.get(path) else {
            return Ok(Vec::new());
        };
        let start = (offset as usize).min(bytes.len());
        let end = (start + len as usize).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    fn env_var(&self, key: &str) -> Option<String> {
        self.env.lock().unwrap().get(key).cloned()
    }

    fn base64_encode(&self, data: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    fn base64_decode(&self, data: &str) -> Result<Vec<u8>> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::InvalidQuery {
                message: format!("invalid base64: {e}"),
            })
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.lock().unwrap().unwrap_or_else(Utc::now)
    }

    async fn sleep(&self, _duration: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_platform_append_then_read_at() {
        let platform = FakePlatform::new();
        let path = PathBuf::from("/cache/a/activities.jsonl");
        let off1 = platform.append_file(&path, b"line1\n").await.unwrap();
        let off2 = platform.append_file(&path, b"line2\n").await.unwrap();
        assert_eq!(off1, 0);
        assert_eq!(off2, 6);
        let read = platform.read_at(&path, off2, 6).await.unwrap();
        assert_eq!(read, b"line2\n");
    }

    #[tokio::test]
    async fn fake_platform_write_atomic_then_read() {
        let platform = FakePlatform::new();
        let path = PathBuf::from("/cache/a/session.json");
        platform.write_file_atomic(&path, b"{}").await.unwrap();
        assert_eq!(platform.read_file(&path).await.unwrap(), Some(b"{}".to_vec()));
    }
}
