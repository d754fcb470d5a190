use lazy_static::lazy_static;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct LockTable {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

// Process-wide set of store locations with a `start()` in flight
lazy_static! {
    static ref STORE_LOCKS: LockTable = LockTable {
        held: Mutex::new(HashSet::new()),
        released: Condvar::new(),
    };
}

fn table() -> MutexGuard<'static, HashSet<PathBuf>> {
    // Entries are only inserted and removed whole, so a poisoned set is still consistent.
    STORE_LOCKS
        .held
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive hold on one store location, released on drop.
#[derive(Debug)]
pub(crate) struct StoreLock {
    key: PathBuf,
}

impl StoreLock {
    /// Blocks until no other holder has `path`, or until `timeout` elapses.
    pub(crate) fn acquire(path: &Path, timeout: Option<Duration>) -> Option<StoreLock> {
        let key = lock_key(path);
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut held = table();
        while held.contains(&key) {
            held = match deadline {
                None => STORE_LOCKS
                    .released
                    .wait(held)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    STORE_LOCKS
                        .released
                        .wait_timeout(held, remaining)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
        held.insert(key.clone());
        Some(StoreLock { key })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.key
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        table().remove(&self.key);
        STORE_LOCKS.released.notify_all();
    }
}

/// Two spellings of one location must map to the same key.
fn lock_key(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|dir| dir.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_second_holder_waits_for_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store");

        let first = StoreLock::acquire(&path, None).unwrap();
        assert!(StoreLock::acquire(&path, Some(Duration::from_millis(20))).is_none());

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let path = path.clone();
            let acquired = acquired.clone();
            std::thread::spawn(move || {
                let _lock = StoreLock::acquire(&path, None).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(first);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_equivalent_spellings_share_a_lock() {
        let temp_dir = TempDir::new().unwrap();
        let plain = temp_dir.path().join("store");
        let dotted = temp_dir.path().join(".").join("store");

        let lock = StoreLock::acquire(&plain, None).unwrap();
        assert_eq!(lock.path(), lock_key(&dotted).as_path());
        assert!(StoreLock::acquire(&dotted, Some(Duration::from_millis(10))).is_none());
    }

    #[test]
    fn test_different_locations_do_not_contend() {
        let temp_dir = TempDir::new().unwrap();
        let _a = StoreLock::acquire(&temp_dir.path().join("a"), None).unwrap();
        assert!(StoreLock::acquire(&temp_dir.path().join("b"), Some(Duration::from_millis(10))).is_some());
    }
}
