#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod builder;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod source;
pub mod stats;
pub mod storage;

pub use builder::DatabaseBuilder;
pub use config::BuildConfig;
pub use core::{ArraySchema, DType, Key, Layout, NdArray, RecordSet, Value};
pub use error::{BuildError, ReadError, SourceError};
pub use source::{ArraySource, LabelSource, RecordSource};
pub use stats::BuildReport;
pub use storage::{DatabaseReader, PublishMethod};
