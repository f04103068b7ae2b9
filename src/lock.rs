//! Single-session lock.
//!
//! One orchestration run per tmux session name at a time. The lock is a
//! plain file with an exclusive advisory lock; dropping the guard unlocks
//! and removes the file.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

/// Session-scoped lock guard that removes the lock file on drop.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        // Best-effort unlock; ignore errors
        let _ = self.file.unlock();

        // Try removal with brief retries (avoid background threads to keep tests leak-free)
        let path = self.path.clone();
        for _ in 0..10 {
            if !path.exists() {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
    }
}

fn sanitize_session_key(session_name: &str) -> String {
    let mut key = String::with_capacity(session_name.len());
    for c in session_name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            key.push(c);
        } else {
            key.push('-');
        }
    }
    if key.is_empty() {
        key.push_str("default");
    }
    key
}

/// Lock file location for a session. `PANEFORGE_LOCK_FILE` overrides the
/// computed path, which tests rely on.
pub fn lock_path_for_session(session_name: &str) -> PathBuf {
    if let Ok(explicit) = env::var("PANEFORGE_LOCK_FILE") {
        if !explicit.is_empty() {
            return PathBuf::from(explicit);
        }
    }
    let base = env::var("XDG_RUNTIME_DIR")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir);
    base.join(format!("paneforge.{}.lock", sanitize_session_key(session_name)))
}

/// Acquire a non-blocking exclusive lock for a session name.
pub fn acquire_session_lock(session_name: &str) -> io::Result<SessionLock> {
    acquire_lock_at(&lock_path_for_session(session_name))
}

/// Acquire a lock at a specific path (helper for tests).
pub fn acquire_lock_at(p: &Path) -> io::Result<SessionLock> {
    if let Some(parent) = p.parent() {
        let _ = fs::create_dir_all(parent);
    }
    match OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(p)
    {
        Ok(f) => match f.try_lock_exclusive() {
            Ok(_) => {
                debug!(path = %p.display(), "acquired session lock");
                Ok(SessionLock {
                    file: f,
                    path: p.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(io::Error::other(
                "Another session run is already in progress (lock held). Please try again later.",
            )),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_and_removed_on_drop() {
        let td = tempfile::tempdir().expect("tmpdir");
        let path = td.path().join("paneforge.test.lock");

        let guard = acquire_lock_at(&path).expect("first lock");
        let second = acquire_lock_at(&path);
        assert!(second.is_err(), "second lock should be rejected");

        drop(guard);
        assert!(!path.exists(), "lock file should be removed on drop");
        // Re-acquisition works after release.
        let again = acquire_lock_at(&path).expect("relock");
        drop(again);
    }

    #[test]
    fn session_key_is_sanitized() {
        assert_eq!(sanitize_session_key("dev session!"), "dev-session-");
        assert_eq!(sanitize_session_key(""), "default");
        assert!(lock_path_for_session("work")
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("paneforge.work.lock"));
    }
}
