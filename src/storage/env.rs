use std::io;
use std::path::{Path, PathBuf};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, MdbError, PutFlags, RwTxn};

use crate::error::{BuildError, Result};
use crate::stats::WriteStats;
use crate::storage::codec;

/// staging 中的 LMDB 环境（只写、一次性）
///
/// 所有写入走 NO_OVERWRITE：key 已存在即失败，绝不静默覆盖。
pub struct StagedEnv {
    env: Env,
    db: Database<Bytes, Bytes>,
    path: PathBuf,
}

impl StagedEnv {
    /// 在 `path` 创建全新的环境目录；`map_size` 只是地址空间预留
    pub fn create(path: &Path, map_size: usize) -> Result<Self> {
        std::fs::create_dir(path).map_err(|e| BuildError::staging(path, e))?;

        let lmdb_err = |e: heed::Error| BuildError::staging(path, io::Error::other(e));

        // SAFETY: 目录是刚独占创建的 staging 目录，本进程内不存在其它句柄。
        let env = unsafe { EnvOpenOptions::new().map_size(map_size).open(path) }
            .map_err(lmdb_err)?;

        let mut wtxn = env.write_txn().map_err(lmdb_err)?;
        let db = env
            .create_database::<Bytes, Bytes>(&mut wtxn, None)
            .map_err(lmdb_err)?;
        wtxn.commit().map_err(lmdb_err)?;

        Ok(Self {
            env,
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 在一个写事务内执行 `f`；`f` 返回错误时事务被丢弃（abort），否则提交
    pub fn write<F>(&self, f: F) -> Result<WriteStats>
    where
        F: FnOnce(&mut TxnWriter<'_, '_>) -> Result<()>,
    {
        let mut txn = self.env.write_txn().map_err(BuildError::Storage)?;
        let stats = {
            let mut writer = TxnWriter {
                txn: &mut txn,
                db: self.db,
                stats: WriteStats::default(),
            };
            f(&mut writer)?;
            writer.stats
        };
        txn.commit().map_err(BuildError::Storage)?;
        Ok(stats)
    }

    /// fsync 后关闭；返回前所有事务均已落盘
    pub fn close(self) -> Result<()> {
        self.env.force_sync().map_err(BuildError::Storage)?;
        self.env.prepare_for_closing().wait();
        Ok(())
    }
}

pub struct TxnWriter<'a, 'p> {
    txn: &'a mut RwTxn<'p>,
    db: Database<Bytes, Bytes>,
    stats: WriteStats,
}

impl TxnWriter<'_, '_> {
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match self
            .db
            .put_with_flags(self.txn, PutFlags::NO_OVERWRITE, key, value)
        {
            Ok(()) => {
                self.stats.records += 1;
                self.stats.key_bytes += key.len() as u64;
                self.stats.value_bytes += value.len() as u64;
                Ok(())
            }
            Err(heed::Error::Mdb(MdbError::KeyExist)) => {
                Err(BuildError::DuplicateKey(describe_key(key)))
            }
            Err(e) => Err(BuildError::Storage(e)),
        }
    }
}

/// 把编码后的 key 还原成可读形式（用于错误信息）
fn describe_key(raw: &[u8]) -> String {
    if raw == codec::PROTOCOL_KEY {
        return "protocol".to_string();
    }
    match codec::decode_key(raw) {
        Ok(k) => k.to_string(),
        Err(_) => format!("{:02x?}", raw),
    }
}
