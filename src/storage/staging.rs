use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BuildError, Result};

/// 同一进程内的并发 build 也不会撞名
static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

const MAX_ATTEMPTS: usize = 16;

fn now_nanos() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

/// 私有 staging 目录：`<root>/TEMP_<nanos>_<pid>_<seq>`
///
/// - 用 `create_dir`（非 `_all`）独占创建，已存在则换名重试
/// - drop 时整棵删除；`keep()` 之后不再删除（发布失败时保留现场）
pub struct StagingArea {
    dir: PathBuf,
    keep: bool,
}

impl StagingArea {
    pub fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| BuildError::staging(root, e))?;

        for _ in 0..MAX_ATTEMPTS {
            let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
            let name = format!("TEMP_{:x}_{}_{}", now_nanos(), std::process::id(), seq);
            let dir = root.join(name);
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    tracing::debug!("Staging directory created: {}", dir.display());
                    return Ok(Self { dir, keep: false });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(BuildError::staging(&dir, e)),
            }
        }

        Err(BuildError::staging(
            root,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                "could not allocate a unique staging directory",
            ),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// staged 数据库在 staging 目录内的位置（沿用目标的文件名）
    pub fn database_path(&self, name: &OsStr) -> PathBuf {
        self.dir.join(name)
    }

    /// 放弃自动清理，返回保留下来的目录
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.dir)
    }

    /// 显式清理，把错误交给调用方
    pub fn remove(mut self) -> io::Result<()> {
        self.keep = true;
        std::fs::remove_dir_all(&self.dir)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    "Failed to remove staging directory {}: {}",
                    self.dir.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_dirs_are_unique_and_cleaned_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let a = StagingArea::create(root.path()).unwrap();
        let b = StagingArea::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path()));

        std::fs::write(a.path().join("junk"), b"x").unwrap();
        drop(a);
        drop(b);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn keep_preserves_directory() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::create(root.path()).unwrap();
        let db = area.database_path(OsStr::new("train.lmdb"));
        std::fs::create_dir(&db).unwrap();

        let kept = area.keep();
        assert!(kept.is_dir());
        assert!(db.is_dir());
    }

    #[test]
    fn missing_root_is_created() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b");
        let area = StagingArea::create(&nested).unwrap();
        assert!(area.path().starts_with(&nested));
        area.remove().unwrap();
        assert!(nested.is_dir());
    }
}
