//! 账本文件互斥
//!
//! 两层锁：进程内每个规范化路径一把 Mutex（无人持有时从表中移除），跨进程再对旁路文件 `<file>.lock` 加 flock。
//! 追加、轮转、迁移、待办改写都必须在 with_file_lock 内完成。

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

static PATH_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

/// 规范化路径：父目录存在时取其 canonical 形式，保证同一文件的不同写法共享一把锁
pub fn canonical_key(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

fn process_lock(key: &Path) -> Arc<Mutex<()>> {
    let locks = PATH_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = locks.lock().unwrap_or_else(|p| p.into_inner());
    map.entry(key.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// 调用方已丢弃自己的 Arc；表里那份是最后一个引用时移除条目
fn release_process_lock(key: &Path) {
    let Some(locks) = PATH_LOCKS.get() else {
        return;
    };
    let mut map = locks.lock().unwrap_or_else(|p| p.into_inner());
    if map.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
        map.remove(key);
    }
}

/// `<file>.lock`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn open_sidecar(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(sidecar_path(path))
}

/// 在进程内互斥 + 跨进程 flock 下执行 f；同步阻塞，异步调用方应放进 spawn_blocking
pub fn with_file_lock<T, E>(path: &Path, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
where
    E: From<io::Error>,
{
    let key = canonical_key(path);
    let lock = process_lock(&key);
    let out = {
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
        with_sidecar_lock(path, f)
    };
    drop(lock);
    release_process_lock(&key);
    out
}

fn with_sidecar_lock<T, E>(path: &Path, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
where
    E: From<io::Error>,
{
    let sidecar = open_sidecar(path)?;
    fs2::FileExt::lock_exclusive(&sidecar)?;
    let out = f();
    if let Err(e) = fs2::FileExt::unlock(&sidecar) {
        tracing::warn!(path = %path.display(), error = %e, "failed to release ledger lock");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_path() {
        let p = sidecar_path(Path::new("/tmp/audit_trail.csv"));
        assert_eq!(p, PathBuf::from("/tmp/audit_trail.csv.lock"));
    }

    #[test]
    fn test_same_file_same_lock() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("ledger.csv");
        let b = dir.path().join(".").join("ledger.csv");
        let first = process_lock(&canonical_key(&a));
        let second = process_lock(&canonical_key(&b));
        assert!(Arc::ptr_eq(&first, &second));
    }

    fn is_tracked(path: &Path) -> bool {
        PATH_LOCKS
            .get()
            .map_or(false, |locks| locks.lock().unwrap().contains_key(&canonical_key(path)))
    }

    #[test]
    fn test_lock_entry_pruned_after_release() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.csv");
        let v: Result<bool, io::Error> = with_file_lock(&path, || Ok(is_tracked(&path)));
        assert!(v.unwrap());
        assert!(!is_tracked(&path));

        // 其他持有者仍在时条目保留
        let key = canonical_key(&path);
        let held = process_lock(&key);
        let v: Result<(), io::Error> = with_file_lock(&path, || Ok(()));
        v.unwrap();
        assert!(is_tracked(&path));
        drop(held);
        release_process_lock(&key);
        assert!(!is_tracked(&path));
    }

    #[test]
    fn test_many_files_do_not_accumulate() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..50).map(|i| dir.path().join(format!("run_{i}.csv"))).collect();
        for p in &paths {
            let v: Result<(), io::Error> = with_file_lock(p, || Ok(()));
            v.unwrap();
        }
        assert!(paths.iter().all(|p| !is_tracked(p)));
    }

    #[test]
    fn test_with_file_lock_runs_closure() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.csv");
        let v: Result<u32, io::Error> = with_file_lock(&path, || Ok(7));
        assert_eq!(v.unwrap(), 7);
        assert!(sidecar_path(&path).exists());
    }
}
