//! Storage for the opaque cookie a paged or sync search resumes from.

use crate::error::Result;
use arc_swap::ArcSwapOption;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Holds the latest cookie issued by the server for one search session.
pub trait CookieManager: Send + Sync {
    fn read(&self) -> Result<Option<Vec<u8>>>;

    fn write(&self, cookie: &[u8]) -> Result<()>;
}

impl<T: CookieManager + ?Sized> CookieManager for Arc<T> {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        (**self).read()
    }

    fn write(&self, cookie: &[u8]) -> Result<()> {
        (**self).write(cookie)
    }
}

/// Single in-memory slot.
#[derive(Debug, Default)]
pub struct InMemoryCookieManager {
    cookie: ArcSwapOption<Vec<u8>>,
}

impl InMemoryCookieManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(cookie: impl Into<Vec<u8>>) -> Self {
        Self {
            cookie: ArcSwapOption::from_pointee(cookie.into()),
        }
    }
}

impl CookieManager for InMemoryCookieManager {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.cookie.load_full().map(|c| c.as_ref().clone()))
    }

    fn write(&self, cookie: &[u8]) -> Result<()> {
        self.cookie.store(Some(Arc::new(cookie.to_vec())));
        Ok(())
    }
}

/// Cookie persisted in a file so a sync session survives a restart.
///
/// Writes go to a sibling temp file which is then renamed over the target.
#[derive(Debug, Clone)]
pub struct FileCookieManager {
    path: PathBuf,
}

impl FileCookieManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CookieManager for FileCookieManager {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, cookie: &[u8]) -> Result<()> {
        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(cookie)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!("Stored {} byte cookie in {}", cookie.len(), self.path.display());
        Ok(())
    }
}
