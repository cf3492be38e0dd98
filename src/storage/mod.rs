pub mod codec;
pub mod env;
pub mod publish;
pub mod reader;
pub mod staging;

pub use env::{StagedEnv, TxnWriter};
pub use publish::{publish, PublishMethod};
pub use reader::DatabaseReader;
pub use staging::StagingArea;
