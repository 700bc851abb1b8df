use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

// Process-wide registry of per-file write locks
static FILE_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>> {
    FILE_LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Key a file by its canonical parent directory so the key is the same
/// before and after the file itself is created.
fn lock_key(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|dir| dir.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

fn lock_registry() -> std::sync::MutexGuard<'static, HashMap<PathBuf, Arc<AsyncMutex<()>>>> {
    registry()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held for the duration of a read-modify-write cycle. The registry entry is
/// removed when the last holder or waiter lets go.
pub struct FileLock {
    key: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = lock_registry();
        let idle = locks
            .get(&self.key)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        if idle {
            locks.remove(&self.key);
        }
    }
}

/// Serialize read-modify-write cycles on one file across tasks.
pub async fn lock_file(path: &Path) -> FileLock {
    let key = lock_key(path);
    let lock = lock_registry()
        .entry(key.clone())
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone();
    FileLock {
        key,
        guard: Some(lock.lock_owned().await),
    }
}
