//! 原子发布（staging -> destination）
//!
//! 流程：
//! - destination 不存在：rename(staged, destination)
//! - destination 已存在（Linux）：renameat2(RENAME_EXCHANGE) 一步互换，再删除换出来的旧库
//! - 不支持 RENAME_EXCHANGE 时退回两次 rename：
//!   1) 旧库 rename 到同目录的 `.<name>.old-<token>`
//!   2) rename(staged, destination)，失败则把旧库 rename 回去
//!   3) 删除旧库
//! - 最后 fsync(parent)
//!
//! destination 要么是旧的完整库，要么是新的完整库，绝不会出现半写状态；
//! 只有退回两次 rename 时才会在两步之间短暂不存在。
//!
//! 跨卷（EXDEV）时 rename 不可能原子：先把 staged 复制到 destination 同目录的
//! `.<name>.incoming-<token>`，逐文件 xxh3 校验，再按上面的流程 swap。

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use xxhash_rust::xxh3::Xxh3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishMethod {
    /// 同卷 rename
    Rename,
    /// 跨卷：复制 + 校验 + rename
    Copy,
}

impl PublishMethod {
    pub fn name(self) -> &'static str {
        match self {
            PublishMethod::Rename => "rename",
            PublishMethod::Copy => "copy+verify",
        }
    }
}

/// 把 `staged` 发布到 `destination`，替换已有内容
///
/// 成功后 `staged` 在 Rename 模式下已不存在；Copy 模式下原样保留，由调用方清理。
pub fn publish(staged: &Path, destination: &Path) -> io::Result<PublishMethod> {
    match swap_into_place(staged, destination) {
        Ok(()) => {
            sync_parent(destination);
            Ok(PublishMethod::Rename)
        }
        Err(e) if is_cross_device(&e) => {
            tracing::warn!(
                "{} and {} are on different volumes, publishing by copy",
                staged.display(),
                destination.display()
            );
            publish_by_copy(staged, destination)?;
            Ok(PublishMethod::Copy)
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn publish_by_copy(staged: &Path, destination: &Path) -> io::Result<()> {
    let incoming = sibling(destination, "incoming")?;

    let prepared = copy_tree(staged, &incoming).and_then(|()| verify_tree(staged, &incoming));
    if let Err(e) = prepared {
        let _ = remove_path(&incoming);
        return Err(e);
    }

    if let Err(e) = swap_into_place(&incoming, destination) {
        let _ = remove_path(&incoming);
        return Err(e);
    }
    sync_parent(destination);
    Ok(())
}

fn swap_into_place(incoming: &Path, destination: &Path) -> io::Result<()> {
    if destination.symlink_metadata().is_ok() {
        match exchange(incoming, destination) {
            Ok(()) => {
                // incoming 处现在是旧库
                if let Err(e) = remove_path(incoming) {
                    tracing::warn!(
                        "Failed to remove previous database {}: {}",
                        incoming.display(),
                        e
                    );
                }
                return Ok(());
            }
            Err(e) if exchange_unsupported(&e) => {
                tracing::debug!(
                    "Atomic exchange unavailable for {} ({}), renaming aside",
                    destination.display(),
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }
    swap_by_rename(incoming, destination)
}

fn swap_by_rename(incoming: &Path, destination: &Path) -> io::Result<()> {
    let displaced = if destination.symlink_metadata().is_ok() {
        let aside = sibling(destination, "old")?;
        std::fs::rename(destination, &aside)?;
        Some(aside)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(incoming, destination) {
        if let Some(aside) = &displaced {
            if let Err(restore) = std::fs::rename(aside, destination) {
                tracing::error!(
                    "Failed to restore previous database {} -> {}: {}",
                    aside.display(),
                    destination.display(),
                    restore
                );
            }
        }
        return Err(e);
    }

    if let Some(aside) = displaced {
        // 新库已经就位，旧库删不掉只影响磁盘占用
        if let Err(e) = remove_path(&aside) {
            tracing::warn!(
                "Failed to remove previous database {}: {}",
                aside.display(),
                e
            );
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn exchange(a: &Path, b: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let a = CString::new(a.as_os_str().as_bytes())?;
    let b = CString::new(b.as_os_str().as_bytes())?;
    let rc = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            a.as_ptr(),
            libc::AT_FDCWD,
            b.as_ptr(),
            libc::RENAME_EXCHANGE,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn exchange(_a: &Path, _b: &Path) -> io::Result<()> {
    Err(io::ErrorKind::Unsupported.into())
}

/// 内核或文件系统不支持 RENAME_EXCHANGE
fn exchange_unsupported(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::Unsupported
        || matches!(
            e.raw_os_error(),
            Some(libc::EINVAL) | Some(libc::ENOSYS) | Some(libc::EOPNOTSUPP)
        )
}

fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

/// destination 同目录下的隐藏临时名：`.<name>.<tag>-<nanos>_<pid>`
fn sibling(destination: &Path, tag: &str) -> io::Result<PathBuf> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let name = destination.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("destination {} has no file name", destination.display()),
        )
    })?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut sib = std::ffi::OsString::from(".");
    sib.push(name);
    sib.push(format!(".{}-{:x}_{}", tag, nanos, std::process::id()));
    Ok(destination.with_file_name(sib))
}

fn remove_path(path: &Path) -> io::Result<()> {
    let md = path.symlink_metadata()?;
    if md.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let md = src.symlink_metadata()?;
    if md.is_dir() {
        std::fs::create_dir(dst)?;
        for ent in std::fs::read_dir(src)? {
            let ent = ent?;
            copy_tree(&ent.path(), &dst.join(ent.file_name()))?;
        }
        if let Ok(dir) = File::open(dst) {
            let _ = dir.sync_all();
        }
    } else {
        std::fs::copy(src, dst)?;
        File::open(dst)?.sync_all()?;
    }
    Ok(())
}

/// 逐文件比对长度与 xxh3
fn verify_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let md = src.symlink_metadata()?;
    if md.is_dir() {
        for ent in std::fs::read_dir(src)? {
            let ent = ent?;
            verify_tree(&ent.path(), &dst.join(ent.file_name()))?;
        }
        return Ok(());
    }

    let (src_len, src_hash) = file_digest(src)?;
    let (dst_len, dst_hash) = file_digest(dst)?;
    if src_len != dst_len || src_hash != dst_hash {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "copy verification failed for {}: {} bytes/{:016x} != {} bytes/{:016x}",
                dst.display(),
                dst_len,
                dst_hash,
                src_len,
                src_hash
            ),
        ));
    }
    Ok(())
}

fn file_digest(path: &Path) -> io::Result<(u64, u64)> {
    let mut f = File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; 1 << 20];
    let mut total = 0u64;
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, hasher.digest()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db(dir: &Path, payload: &[u8]) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("data.mdb"), payload).unwrap();
        std::fs::write(dir.join("lock.mdb"), b"lock").unwrap();
    }

    fn leftovers(parent: &Path) -> Vec<String> {
        std::fs::read_dir(parent)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect()
    }

    #[test]
    fn publish_into_fresh_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let staged = tmp.path().join("stage/db");
        make_db(&staged, b"new");
        let dest = tmp.path().join("out/db");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();

        assert_eq!(publish(&staged, &dest).unwrap(), PublishMethod::Rename);
        assert!(!staged.exists());
        assert_eq!(std::fs::read(dest.join("data.mdb")).unwrap(), b"new");
    }

    #[test]
    fn publish_replaces_existing_directory_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("db");
        make_db(&dest, b"old");
        std::fs::write(dest.join("stale.extra"), b"x").unwrap();

        let staged = tmp.path().join("stage/db");
        make_db(&staged, b"new");
        publish(&staged, &dest).unwrap();

        assert_eq!(std::fs::read(dest.join("data.mdb")).unwrap(), b"new");
        assert!(!dest.join("stale.extra").exists());
        assert!(leftovers(tmp.path()).is_empty());

        // 目标是普通文件
        let file_dest = tmp.path().join("plain");
        std::fs::write(&file_dest, b"not a db").unwrap();
        let staged = tmp.path().join("stage/db");
        make_db(&staged, b"newer");
        publish(&staged, &file_dest).unwrap();
        assert!(file_dest.is_dir());
    }

    #[test]
    fn failed_publish_restores_previous_database() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("db");
        make_db(&dest, b"old");

        let missing = tmp.path().join("stage/does-not-exist");
        assert!(publish(&missing, &dest).is_err());

        assert_eq!(std::fs::read(dest.join("data.mdb")).unwrap(), b"old");
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[test]
    fn replacing_swaps_without_leaving_the_staged_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("db");
        make_db(&dest, b"old");
        let staged = tmp.path().join("stage/db");
        make_db(&staged, b"new");

        swap_into_place(&staged, &dest).unwrap();

        // 交换后旧库落在 staged 处，随即被删除
        assert!(!staged.exists());
        assert_eq!(std::fs::read(dest.join("data.mdb")).unwrap(), b"new");
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[test]
    fn rename_fallback_restores_previous_database() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("db");
        make_db(&dest, b"old");
        let staged = tmp.path().join("stage/db");
        make_db(&staged, b"new");

        swap_by_rename(&staged, &dest).unwrap();
        assert_eq!(std::fs::read(dest.join("data.mdb")).unwrap(), b"new");
        assert!(leftovers(tmp.path()).is_empty());

        // staged 不存在：第二次 rename 失败，旧库挪回原位
        let missing = tmp.path().join("stage/gone");
        assert!(swap_by_rename(&missing, &dest).is_err());
        assert_eq!(std::fs::read(dest.join("data.mdb")).unwrap(), b"new");
        assert!(leftovers(tmp.path()).is_empty());

        // `.<name>.old-<token>` 超过 NAME_MAX：旧库挪不开，原样保留
        let long = tmp.path().join("d".repeat(240));
        make_db(&long, b"old");
        make_db(&staged, b"new");
        assert!(swap_by_rename(&staged, &long).is_err());
        assert_eq!(std::fs::read(long.join("data.mdb")).unwrap(), b"old");
        assert!(staged.join("data.mdb").is_file());
    }

    #[test]
    fn exchange_failure_classification() {
        assert!(exchange_unsupported(&io::Error::from_raw_os_error(libc::EINVAL)));
        assert!(exchange_unsupported(&io::Error::from(io::ErrorKind::Unsupported)));
        assert!(!exchange_unsupported(&io::Error::from_raw_os_error(libc::EXDEV)));
        assert!(!exchange_unsupported(&io::Error::from_raw_os_error(libc::ENOENT)));
    }

    #[test]
    fn cross_volume_publish_falls_back_to_copy() {
        use std::os::unix::fs::MetadataExt;

        // /dev/shm 通常是 tmpfs；与临时目录同卷时无从触发 EXDEV
        let Ok(shm) = tempfile::tempdir_in("/dev/shm") else {
            return;
        };
        let tmp = tempfile::tempdir().unwrap();
        let shm_dev = std::fs::metadata(shm.path()).unwrap().dev();
        if shm_dev == std::fs::metadata(tmp.path()).unwrap().dev() {
            return;
        }

        let staged = shm.path().join("db");
        make_db(&staged, b"new");
        let dest = tmp.path().join("db");
        make_db(&dest, b"old");

        assert_eq!(publish(&staged, &dest).unwrap(), PublishMethod::Copy);
        assert_eq!(std::fs::read(dest.join("data.mdb")).unwrap(), b"new");
        assert!(staged.exists());
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[test]
    fn copy_publish_verifies_and_swaps() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("db");
        make_db(&dest, b"old");
        let staged = tmp.path().join("stage/db");
        make_db(&staged, &vec![42u8; 3 << 20]);

        publish_by_copy(&staged, &dest).unwrap();

        assert_eq!(
            file_digest(&dest.join("data.mdb")).unwrap(),
            file_digest(&staged.join("data.mdb")).unwrap()
        );
        assert!(staged.exists());
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[test]
    fn verify_detects_divergent_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        make_db(&a, b"same-len-1");
        make_db(&b, b"same-len-2");
        let err = verify_tree(&a, &b).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
