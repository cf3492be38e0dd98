//! tracing 初始化（两个 CLI 共用）

use tracing_subscriber::EnvFilter;

/// 库和两个 CLI 各自是独立的 target
const DEFAULT_FILTER: &str = "kvforge=info,write_array_database=info,write_label_database=info,warn";

/// `RUST_LOG` 优先，否则用 `DEFAULT_FILTER`
///
/// 重复调用不会 panic：只有第一次生效。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .try_init();
}
