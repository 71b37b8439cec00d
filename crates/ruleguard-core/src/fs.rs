//! File system abstraction
//!
//! TigerStyle: All disk access goes through one narrow trait.
//!
//! The rule store only talks to a `FileSystem`. Production wires in
//! `StdFileSystem`; simulation wires in `MemFileSystem`, usually wrapped in a
//! fault-injecting decorator.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        DiskRuleStore         │
//! └──────────────┬───────────────┘
//!                │ FileSystem
//!       ┌────────┴─────────┐
//! ┌─────▼──────┐   ┌───────▼────────┐
//! │StdFileSystem│  │FaultyFileSystem│
//! └────────────┘   └───────┬────────┘
//!                  ┌───────▼────────┐
//!                  │ MemFileSystem  │
//!                  └────────────────┘
//! ```

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Metadata returned by `FileSystem::stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size_bytes: u64,
    pub mode: u32,
    pub is_dir: bool,
}

/// Minimal file system surface used by the rule store
pub trait FileSystem: Send + Sync {
    /// Read the whole file
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create or truncate the file and write `data`
    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()>;

    /// Atomically replace `to` with `from`
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Create a directory and all missing parents
    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()>;

    /// Remove a file
    fn remove(&self, path: &Path) -> Result<()>;

    /// Fetch metadata
    fn stat(&self, path: &Path) -> Result<FileInfo>;
}

impl<F: FileSystem + ?Sized> FileSystem for Arc<F> {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        (**self).read_file(path)
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        (**self).write_file(path, data, mode)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        (**self).rename(from, to)
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        (**self).mkdir_all(path, mode)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        (**self).remove(path)
    }

    fn stat(&self, path: &Path) -> Result<FileInfo> {
        (**self).stat(path)
    }
}

// ============================================================================
// In-memory file system
// ============================================================================

#[derive(Debug, Default)]
struct MemState {
    files: BTreeMap<PathBuf, (Vec<u8>, u32)>,
    dirs: BTreeMap<PathBuf, u32>,
}

/// In-memory file system
///
/// Contents live outside any process state so they survive a simulated
/// crash. Reads return copies; callers can never alias stored bytes.
#[derive(Debug, Default)]
pub struct MemFileSystem {
    state: Mutex<MemState>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a file exists at `path`
    pub fn exists(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

impl FileSystem for MemFileSystem {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.lock()
            .files
            .get(path)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| Error::file_not_found(display(path)))
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        self.lock()
            .files
            .insert(path.to_path_buf(), (data.to_vec(), mode));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .files
            .remove(from)
            .ok_or_else(|| Error::file_not_found(display(from)))?;
        state.files.insert(to.to_path_buf(), entry);
        Ok(())
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        let mut state = self.lock();
        let missing: BTreeSet<PathBuf> = path
            .ancestors()
            .filter(|p| !p.as_os_str().is_empty() && !state.dirs.contains_key(*p))
            .map(Path::to_path_buf)
            .collect();
        for dir in missing {
            state.dirs.insert(dir, mode);
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::file_not_found(display(path)))
    }

    fn stat(&self, path: &Path) -> Result<FileInfo> {
        let state = self.lock();
        if let Some((data, mode)) = state.files.get(path) {
            return Ok(FileInfo {
                size_bytes: data.len() as u64,
                mode: *mode,
                is_dir: false,
            });
        }
        state
            .dirs
            .get(path)
            .map(|mode| FileInfo {
                size_bytes: 0,
                mode: *mode,
                is_dir: true,
            })
            .ok_or_else(|| Error::file_not_found(display(path)))
    }
}

// ============================================================================
// Host file system
// ============================================================================

/// Production file system backed by `std::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl StdFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn map_io(path: &Path, err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => Error::file_not_found(display(path)),
        _ => Error::internal(format!("{}: {}", display(path), err)),
    }
}

impl FileSystem for StdFileSystem {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| map_io(path, e))
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        std::fs::write(path, data).map_err(|e| map_io(path, e))?;
        set_mode(path, mode)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to).map_err(|e| map_io(from, e))
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|e| map_io(path, e))?;
        set_mode(path, mode)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(|e| map_io(path, e))
    }

    fn stat(&self, path: &Path) -> Result<FileInfo> {
        let meta = std::fs::metadata(path).map_err(|e| map_io(path, e))?;
        Ok(FileInfo {
            size_bytes: meta.len(),
            mode: mode_of(&meta),
            is_dir: meta.is_dir(),
        })
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| map_io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(_meta: &std::fs::Metadata) -> u32 {
    0
}
