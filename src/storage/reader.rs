use std::path::{Path, PathBuf};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::core::{ArraySchema, DType, Key, Value};
use crate::error::{ReadError, ReadResult};
use crate::storage::codec;

/// 已发布数据库的只读视图
///
/// 打开时先校验 `protocol`，版本不符直接拒绝，不尝试解码其它记录。
pub struct DatabaseReader {
    env: Env,
    db: Database<Bytes, Bytes>,
    path: PathBuf,
}

impl DatabaseReader {
    pub fn open(path: &Path) -> ReadResult<Self> {
        let open_err = |source: heed::Error| ReadError::Open {
            path: path.to_path_buf(),
            source,
        };

        // SAFETY: 发布后的数据库不会再被写入；同一路径在本进程内只打开一次。
        let env = unsafe { EnvOpenOptions::new().open(path) }.map_err(open_err)?;
        let db = {
            let rtxn = env.read_txn()?;
            env.open_database::<Bytes, Bytes>(&rtxn, None)?
                .ok_or(ReadError::MissingRecord("protocol"))?
        };

        let reader = Self {
            env,
            db,
            path: path.to_path_buf(),
        };
        let found = reader.protocol()?;
        if found != codec::FORMAT_VERSION {
            return Err(ReadError::UnsupportedProtocol {
                found,
                expected: codec::FORMAT_VERSION,
            });
        }
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn protocol(&self) -> ReadResult<u32> {
        let raw = self
            .raw_get(codec::PROTOCOL_KEY)?
            .ok_or(ReadError::MissingRecord("protocol"))?;
        codec::decode_protocol(&raw).ok_or(ReadError::MissingRecord("protocol"))
    }

    /// 升序 key 索引
    pub fn keys(&self) -> ReadResult<Vec<Key>> {
        let raw = self
            .meta(codec::KEYS_RECORD)?
            .ok_or(ReadError::MissingRecord("keys"))?;
        Ok(codec::decode_keys(&raw)?)
    }

    /// 数组库返回 Some；标签库没有 shape/dtype，返回 None
    pub fn schema(&self) -> ReadResult<Option<ArraySchema>> {
        let shape = self.meta(codec::SHAPE_RECORD)?;
        let dtype = self.meta(codec::DTYPE_RECORD)?;
        match (shape, dtype) {
            (None, None) => Ok(None),
            (Some(_), None) => Err(ReadError::MissingRecord("dtype")),
            (None, Some(_)) => Err(ReadError::MissingRecord("shape")),
            (Some(shape), Some(dtype)) => {
                let tag = codec::decode_dtype_tag(&dtype)?;
                let dtype = DType::from_name(&tag).ok_or(ReadError::UnknownDtype(tag))?;
                Ok(Some(ArraySchema {
                    shape: codec::decode_shape(&shape)?,
                    dtype,
                }))
            }
        }
    }

    pub fn get(&self, key: &Key) -> ReadResult<Option<Value>> {
        let raw = self.raw_get(&codec::encode_key(key)?)?;
        match raw {
            Some(bytes) => Ok(Some(codec::decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 全部数据记录（按 key 索引顺序）
    pub fn entries(&self) -> ReadResult<Vec<(Key, Value)>> {
        let mut out = Vec::new();
        for key in self.keys()? {
            let value = self
                .get(&key)?
                .ok_or(ReadError::MissingRecord("data record listed in keys"))?;
            out.push((key, value));
        }
        Ok(out)
    }

    /// LMDB 中的条目总数（含元数据记录）
    pub fn len(&self) -> ReadResult<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.len(&rtxn)?)
    }

    pub fn is_empty(&self) -> ReadResult<bool> {
        Ok(self.len()? == 0)
    }

    /// 原始字节对（LMDB 的 key 顺序），用于逐字节比较两次 build 的结果
    pub fn raw_entries(&self) -> ReadResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.db.iter(&rtxn)? {
            let (k, v) = item?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    pub fn close(self) {
        self.env.prepare_for_closing().wait();
    }

    fn meta(&self, name: &str) -> ReadResult<Option<Vec<u8>>> {
        self.raw_get(&codec::meta_key(name)?)
    }

    fn raw_get(&self, key: &[u8]) -> ReadResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.get(&rtxn, key)?.map(|v| v.to_vec()))
    }
}
