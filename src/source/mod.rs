pub mod labels;
pub mod npz;

use std::path::Path;

use crate::core::RecordSet;
use crate::error::{BuildError, Result, SourceError};

pub use labels::LabelSource;
pub use npz::ArraySource;

/// 外部数据源：把某种文件格式整理成 RecordSet
///
/// 格式本身不影响 builder，只有结果的 key/value 形状重要。
pub trait RecordSource {
    /// 源文件路径
    fn path(&self) -> &Path;

    /// 解析失败统一包装为 `BuildError::SourceLoad`
    fn records(&self) -> Result<RecordSet>;
}

pub(crate) fn load_error(path: &Path) -> impl FnOnce(SourceError) -> BuildError + '_ {
    move |source| BuildError::SourceLoad {
        path: path.to_path_buf(),
        source,
    }
}
