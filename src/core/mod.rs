pub mod key;
pub mod record;
pub mod value;

pub use key::Key;
pub use record::{ArraySchema, Layout, RecordSet};
pub use value::{DType, Element, NdArray, Value};
