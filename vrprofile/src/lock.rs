use std::{
    collections::BTreeSet,
    fs::File,
    path::{Path, PathBuf},
    sync::{Condvar, Mutex, PoisonError},
};

use anyhow::Context;

use crate::error::{Error, Result};

/// Key of the backup slot; no profile name can contain a control character
pub const BACKUP_KEY: &str = "\u{0}last_backup";
pub const LOCK_FILE: &str = ".lock";

/// Mutual exclusion keyed by profile
///
/// All keys of one operation are taken together, so two operations never
/// wait on each other while holding a key.
#[derive(Debug, Default)]
pub struct ProfileLocks {
    held: Mutex<BTreeSet<String>>,
    released: Condvar,
}

#[derive(Debug)]
pub struct ProfileGuard<'a> {
    locks: &'a ProfileLocks,
    keys: Vec<String>,
}

pub fn profile_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ProfileLocks {
    /// Blocks until none of `keys` is held by another operation.
    pub fn acquire<I, S>(&self, keys: I) -> ProfileGuard<'_>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<_> = keys
            .into_iter()
            .map(|k| {
                let k = k.as_ref();
                if k == BACKUP_KEY {
                    k.to_string()
                } else {
                    profile_key(k)
                }
            })
            .collect();
        keys.sort();
        keys.dedup();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while keys.iter().any(|k| held.contains(k)) {
            log::debug!("waiting for {keys:?}");
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.extend(keys.iter().cloned());
        ProfileGuard { locks: self, keys }
    }
}

impl Drop for ProfileGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            held.remove(key);
        }
        self.locks.released.notify_all();
    }
}

/// Advisory lock on a data directory, held while the engine is open
#[derive(Debug)]
pub struct DataRootLock {
    path: PathBuf,
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl DataRootLock {
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(LOCK_FILE);
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {path:?}"))
            .map_err(|e| Error::storage("failed to lock the data directory", e))?;
        Self::lock(path, file)
    }

    #[cfg(unix)]
    fn lock(path: PathBuf, file: File) -> Result<Self> {
        use nix::{
            errno::Errno,
            fcntl::{Flock, FlockArg},
        };

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                log::debug!("locked {path:?}");
                Ok(Self { path, _lock: lock })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(Error::Busy {
                path: path.parent().map(Path::to_path_buf).unwrap_or(path),
            }),
            Err((_, errno)) => Err(Error::storage(format!("failed to lock {path:?}"), errno)),
        }
    }

    #[cfg(not(unix))]
    fn lock(path: PathBuf, file: File) -> Result<Self> {
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn same_profile_is_serialized() {
        let locks = Arc::new(ProfileLocks::default());
        let finished = Arc::new(AtomicBool::new(false));
        let guard = locks.acquire(["Work"]);
        let handle = {
            let locks = locks.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                let _guard = locks.acquire(["work", BACKUP_KEY]);
                finished.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!finished.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn different_profiles_do_not_block() {
        let locks = ProfileLocks::default();
        let _a = locks.acquire(["a"]);
        let _b = locks.acquire(["b"]);
    }

    #[cfg(unix)]
    #[test]
    fn second_root_lock_is_busy() {
        let root = tempfile::tempdir().unwrap();
        let _first = DataRootLock::acquire(root.path()).unwrap();
        assert!(matches!(
            DataRootLock::acquire(root.path()),
            Err(Error::Busy { .. })
        ));
    }
}
