use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::ArraySchema;
use crate::storage::PublishMethod;

/// 单个写事务的写入量
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// 写入条目数
    pub records: usize,
    /// 编码后 key 总字节
    pub key_bytes: u64,
    /// 编码后 value 总字节
    pub value_bytes: u64,
}

impl WriteStats {
    pub fn total_bytes(&self) -> u64 {
        self.key_bytes + self.value_bytes
    }
}

/// 一次成功 build 的结果
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub destination: PathBuf,
    /// 数组库的 shape/dtype；标签库为 None
    pub schema: Option<ArraySchema>,
    /// protocol / keys / shape / dtype
    pub header: WriteStats,
    /// 数据记录
    pub data: WriteStats,
    pub publish: PublishMethod,
    pub elapsed: Duration,
}

impl BuildReport {
    pub fn data_records(&self) -> usize {
        self.data.records
    }

    pub fn total_bytes(&self) -> u64 {
        self.header.total_bytes() + self.data.total_bytes()
    }
}

fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "database:   {}", self.destination.display())?;
        match &self.schema {
            Some(s) => writeln!(f, "layout:     array {}", s)?,
            None => writeln!(f, "layout:     labels")?,
        }
        writeln!(
            f,
            "records:    {} ({} keys, {} values)",
            self.data.records,
            human_bytes(self.data.key_bytes),
            human_bytes(self.data.value_bytes)
        )?;
        writeln!(f, "header:     {} records", self.header.records)?;
        writeln!(f, "total:      {}", human_bytes(self.total_bytes()))?;
        writeln!(f, "publish:    {}", self.publish.name())?;
        write!(f, "elapsed:    {:.3}s", self.elapsed.as_secs_f64())
    }
}
