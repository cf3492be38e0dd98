//! Build 配置
//!
//! 优先级（后者覆盖前者）：默认值 -> `KVFORGE_CONFIG` 指向的 TOML -> 单项环境变量。
//! CLI 只接收两个路径参数，其余一律走这里。

use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "KVFORGE_CONFIG";
pub const STAGING_ROOT_ENV: &str = "KVFORGE_STAGING_ROOT";
pub const MAP_SIZE_ENV: &str = "KVFORGE_MAP_SIZE";

/// LMDB map 默认预留 1 TiB 地址空间（不是实际占用）
pub const DEFAULT_MAP_SIZE: u64 = 1 << 40;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// staging 目录的父目录；不得位于 destination 之内
    pub staging_root: PathBuf,
    /// LMDB map_size（字节）
    pub map_size: u64,
    /// 逐条校验数组 shape/dtype；false 时只看代表元素
    pub strict_schema: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            staging_root: std::env::temp_dir(),
            map_size: DEFAULT_MAP_SIZE,
            strict_schema: true,
        }
    }
}

impl BuildConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 从进程环境变量构建
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    /// `lookup` 注入环境变量来源，测试不必改动全局环境
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut cfg = match lookup(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(root) = lookup(STAGING_ROOT_ENV) {
            cfg.staging_root = PathBuf::from(root);
        }
        if let Some(raw) = lookup(MAP_SIZE_ENV) {
            let text = raw.to_string_lossy();
            cfg.map_size = text
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidMapSize(text.to_string()))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    pub fn with_map_size(mut self, map_size: u64) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn with_strict_schema(mut self, strict: bool) -> Self {
        self.strict_schema = strict;
        self
    }

    /// map_size 转成本平台的 usize
    pub fn map_size_bytes(&self) -> Result<usize, ConfigError> {
        usize::try_from(self.map_size)
            .map_err(|_| ConfigError::InvalidMapSize(self.map_size.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.map_size == 0 {
            return Err(ConfigError::InvalidMapSize("0".to_string()));
        }
        self.map_size_bytes()?;
        if self.staging_root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyStagingRoot);
        }
        Ok(())
    }
}
