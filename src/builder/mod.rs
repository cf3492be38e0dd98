//! 数据库构建：staging -> populate -> publish
//!
//! 保证：
//! - 成功返回后 destination 是完整的新库，staging 无残留
//! - publish 之前的任何失败都不触碰 destination，并清理 staging
//! - publish 失败时 destination 保持原状，staging 保留（路径见 `BuildError::Publish`）
//! - 相同输入（与输入顺序无关）产生逐条相同的记录

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use crate::config::BuildConfig;
use crate::core::RecordSet;
use crate::error::{BuildError, Result};
use crate::stats::{BuildReport, WriteStats};
use crate::storage::codec::{self, DTYPE_RECORD, KEYS_RECORD, SHAPE_RECORD};
use crate::storage::{publish, PublishMethod, StagedEnv, StagingArea};

/// staged 数据库 -> destination
type Publisher = fn(&Path, &Path) -> io::Result<PublishMethod>;

pub struct DatabaseBuilder {
    config: BuildConfig,
    publisher: Publisher,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new(BuildConfig::default())
    }
}

impl DatabaseBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            publisher: publish,
        }
    }

    #[cfg(test)]
    fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// 把 `records` 写成 `destination` 处的 LMDB 数据库，替换已有内容（破坏性覆盖，不合并）
    pub fn build(&self, records: &RecordSet, destination: &Path) -> Result<BuildReport> {
        let started = Instant::now();

        if records.is_empty() {
            return Err(BuildError::EmptyInput);
        }
        let map_size = self
            .config
            .map_size_bytes()
            .map_err(|e| BuildError::staging(&self.config.staging_root, invalid_input(e)))?;

        let name = destination.file_name().ok_or_else(|| {
            BuildError::staging(destination, invalid_input("destination has no file name"))
        })?;
        let parent = parent_dir(destination);
        std::fs::create_dir_all(parent).map_err(|e| BuildError::staging(parent, e))?;
        self.check_staging_root(destination)?;

        tracing::info!(
            "Building {} records into {}",
            records.len(),
            destination.display()
        );

        let staging = StagingArea::create(&self.config.staging_root)?;
        let staged = staging.database_path(name);

        // 出错时 staging 在 drop 中整体删除
        let (header, data) = populate(records, &staged, map_size)?;

        let method = match (self.publisher)(&staged, destination) {
            Ok(m) => m,
            Err(source) => {
                let kept = staging.keep();
                tracing::error!(
                    "Publish to {} failed, staged database kept in {}",
                    destination.display(),
                    kept.display()
                );
                return Err(BuildError::Publish {
                    staged: kept.join(name),
                    destination: destination.to_path_buf(),
                    source,
                });
            }
        };

        let staging_dir = staging.path().to_path_buf();
        if let Err(e) = staging.remove() {
            tracing::warn!(
                "Failed to remove staging directory {}: {}",
                staging_dir.display(),
                e
            );
        }

        let report = BuildReport {
            destination: destination.to_path_buf(),
            schema: records.schema().cloned(),
            header,
            data,
            publish: method,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Published {} ({} records, {}) in {:.3}s",
            destination.display(),
            report.data_records(),
            method.name(),
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// staging 必须在 destination 之外，半成品才不会出现在目标路径下
    fn check_staging_root(&self, destination: &Path) -> Result<()> {
        let root = &self.config.staging_root;
        let root_abs = resolve(root).map_err(|e| BuildError::staging(root, e))?;
        let dest_abs = resolve(destination).map_err(|e| BuildError::staging(destination, e))?;
        if root_abs.starts_with(&dest_abs) {
            return Err(BuildError::staging(
                root,
                invalid_input(format!(
                    "staging root lies inside destination {}",
                    destination.display()
                )),
            ));
        }
        Ok(())
    }
}

/// 写入顺序：protocol -> keys -> shape/dtype（数组库）-> 数据记录（key 升序）
fn populate(records: &RecordSet, staged: &Path, map_size: usize) -> Result<(WriteStats, WriteStats)> {
    let env = StagedEnv::create(staged, map_size)?;

    let header = env.write(|w| {
        w.put(codec::PROTOCOL_KEY, &codec::protocol_value())?;
        w.put(
            &codec::meta_key(KEYS_RECORD)?,
            &codec::encode_keys(records.keys())?,
        )?;
        if let Some(schema) = records.schema() {
            w.put(
                &codec::meta_key(SHAPE_RECORD)?,
                &codec::encode_shape(&schema.shape)?,
            )?;
            w.put(
                &codec::meta_key(DTYPE_RECORD)?,
                &codec::encode_dtype(schema.dtype)?,
            )?;
        }
        Ok(())
    })?;
    tracing::debug!("Header committed: {} records", header.records);

    let data = env.write(|w| {
        for (key, value) in records.iter() {
            w.put(&codec::encode_key(key)?, &codec::encode_value(value)?)?;
        }
        Ok(())
    })?;
    tracing::debug!(
        "Data committed: {} records, {} bytes",
        data.records,
        data.total_bytes()
    );

    env.close()?;
    Ok((header, data))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// 已存在的前缀逐级 canonicalize（跟随符号链接），不存在的部分按字面处理 `..`
fn resolve(path: &Path) -> io::Result<PathBuf> {
    let mut resolved = PathBuf::new();
    for comp in absolute(path)?.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => {
                resolved.push(other);
                if let Ok(real) = resolved.canonicalize() {
                    resolved = real;
                }
            }
        }
    }
    Ok(resolved)
}

fn invalid_input<E>(e: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidInput, e)
}
