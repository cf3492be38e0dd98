//! 错误类型
//!
//! - `BuildError`：一次 build 的全部失败原因，均为终止性错误（不重试、不降级）
//! - `SourceError`：外部数据源（.npz / JSON）解析失败，包装进 `BuildError::SourceLoad`
//! - `ReadError`：读取已发布数据库时的错误

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::{ArraySchema, DType, Key};

#[derive(Error, Debug)]
pub enum BuildError {
    /// 数据源无法定位或解析；build 尚未开始
    #[error("Failed to load source '{path}'")]
    SourceLoad {
        path: PathBuf,
        #[source]
        source: SourceError,
    },

    /// 记录集为空（没有代表元素可推导 shape/dtype）
    #[error("No records to write")]
    EmptyInput,

    /// 严格模式下某条数组记录与代表元素的 shape/dtype 不一致
    #[error("Schema mismatch at key {key}: expected {expected}, found {found}")]
    SchemaMismatch {
        key: Key,
        expected: ArraySchema,
        found: ArraySchema,
    },

    /// staging 目录 / LMDB 环境 / 目标父目录无法创建
    #[error("Failed to stage build at '{path}'")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 同一个 key 出现两次（输入中，或与元数据 key 冲突）
    #[error("Duplicate key {0}")]
    DuplicateKey(String),

    /// 写入 staged 数据库失败（map 满、磁盘满等）
    #[error("Staged database write failed")]
    Storage(#[source] heed::Error),

    #[error("Failed to encode record")]
    Encode(#[from] bincode::Error),

    /// 发布失败：目标保持原状，staged 数据库保留在 `staged` 供检查或重试
    #[error("Failed to publish '{staged}' to '{destination}' (staged database kept)")]
    Publish {
        staged: PathBuf,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub(crate) fn staging(path: &Path, source: impl Into<std::io::Error>) -> Self {
        BuildError::Staging {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    /// 发布失败时保留下来的 staged 数据库路径
    pub fn staged_path(&self) -> Option<&Path> {
        match self {
            BuildError::Publish { staged, .. } => Some(staged),
            _ => None,
        }
    }
}

/// 外部数据源错误
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Archive error")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("Archive has no '{0}' array")]
    MissingArray(String),

    #[error("Malformed npy '{name}': {reason}")]
    MalformedNpy { name: String, reason: String },

    #[error("Unsupported dtype '{descr}' in '{name}'")]
    UnsupportedDtype { name: String, descr: String },

    #[error("'keys' has {keys} entries but 'values' has {values}")]
    LengthMismatch { keys: usize, values: usize },

    #[error("Expected a JSON array of records, found {0}")]
    NotASequence(&'static str),

    #[error(transparent)]
    Array(#[from] ArrayError),
}

/// 数组数据长度与 shape/dtype 不符
#[derive(Error, Debug, Clone)]
#[error("Array of shape {shape:?} and dtype {dtype} needs {expected} bytes, got {actual}")]
pub struct ArrayError {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub expected: usize,
    pub actual: usize,
}

/// 读取已发布数据库的错误
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Failed to open database '{path}'")]
    Open {
        path: PathBuf,
        #[source]
        source: heed::Error,
    },

    #[error("LMDB error")]
    Lmdb(#[from] heed::Error),

    #[error("Database has no '{0}' record")]
    MissingRecord(&'static str),

    #[error("Unsupported protocol version {found} (expected {expected})")]
    UnsupportedProtocol { found: u32, expected: u32 },

    #[error("Unknown dtype tag '{0}'")]
    UnknownDtype(String),

    #[error("Failed to decode record")]
    Decode(#[from] bincode::Error),
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid map size '{0}': must be a positive byte count addressable on this platform")]
    InvalidMapSize(String),

    #[error("Staging root must not be empty")]
    EmptyStagingRoot,
}

pub type Result<T> = std::result::Result<T, BuildError>;

pub type SourceResult<T> = std::result::Result<T, SourceError>;

pub type ReadResult<T> = std::result::Result<T, ReadError>;
