// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session persistence: load/save to JSON file with atomic writes.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::session::Session;

/// Load a persisted session. A missing file means no session.
pub fn load(path: &Path) -> anyhow::Result<Option<Session>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let session: Session = serde_json::from_str(&contents)?;
    Ok(Some(session))
}

/// Save a session atomically (write tmp + rename).
///
/// The temp filename is unique per process and call so that concurrent
/// saves never interleave in one file. On unix the file is owner-only.
pub fn save(path: &Path, session: &Session) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let json = serde_json::to_string_pretty(session)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Exclusive lock over one persisted session, released on drop.
///
/// Every process sharing a state dir takes it before reading a session it is
/// about to refresh and holds it until the result is saved.
pub struct SessionLock {
    _file: Flock<File>,
}

/// Sidecar lock file; `save` replaces the session file itself by rename.
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Block until the lock for the session at `path` is held.
pub fn lock(path: &Path) -> anyhow::Result<SessionLock> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file =
        OpenOptions::new().create(true).write(true).truncate(false).open(lock_path(path))?;
    let file = Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_file, errno)| anyhow::anyhow!("flock failed: {errno}"))?;
    Ok(SessionLock { _file: file })
}

/// [`lock`] on the blocking pool.
pub async fn lock_async(path: PathBuf) -> anyhow::Result<SessionLock> {
    tokio::task::spawn_blocking(move || lock(&path)).await?
}

/// Remove the persisted session. Returns whether a file was removed.
pub fn remove(path: &Path) -> anyhow::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
