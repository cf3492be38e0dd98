//! 记录编码（format version 1）
//!
//! bincode 1.x 默认配置：小端、定长整数、u64 长度前缀、u32 枚举 tag。
//! 除 `protocol` 外的所有 key/value 都经过这里；`protocol` 的 key 是裸 ASCII，
//! 读者在选定解码器之前就能找到它。
//!
//! 元数据 key（`keys` / `shape` / `dtype`）与数据 key 共用同一编码，
//! 所以数据 key 恰好是字符串 "keys" 时会在写入阶段以 DuplicateKey 失败。

use crate::core::{DType, Key, Value};

pub const PROTOCOL_KEY: &[u8] = b"protocol";
pub const FORMAT_VERSION: u32 = 1;

pub const KEYS_RECORD: &str = "keys";
pub const SHAPE_RECORD: &str = "shape";
pub const DTYPE_RECORD: &str = "dtype";

/// `protocol` 记录的值（与 `bincode::serialize(&FORMAT_VERSION)` 字节一致）
pub fn protocol_value() -> [u8; 4] {
    FORMAT_VERSION.to_le_bytes()
}

pub fn decode_protocol(bytes: &[u8]) -> Option<u32> {
    let raw: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_le_bytes(raw))
}

pub fn encode_key(key: &Key) -> bincode::Result<Vec<u8>> {
    bincode::serialize(key)
}

pub fn decode_key(bytes: &[u8]) -> bincode::Result<Key> {
    bincode::deserialize(bytes)
}

/// 元数据记录的 key
pub fn meta_key(name: &str) -> bincode::Result<Vec<u8>> {
    encode_key(&Key::Str(name.to_string()))
}

pub fn encode_value(value: &Value) -> bincode::Result<Vec<u8>> {
    bincode::serialize(value)
}

pub fn decode_value(bytes: &[u8]) -> bincode::Result<Value> {
    bincode::deserialize(bytes)
}

pub fn encode_keys<'a, I>(keys: I) -> bincode::Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a Key>,
{
    let keys: Vec<&Key> = keys.into_iter().collect();
    bincode::serialize(&keys)
}

pub fn decode_keys(bytes: &[u8]) -> bincode::Result<Vec<Key>> {
    bincode::deserialize(bytes)
}

pub fn encode_shape(shape: &[usize]) -> bincode::Result<Vec<u8>> {
    let shape: Vec<u64> = shape.iter().map(|&d| d as u64).collect();
    bincode::serialize(&shape)
}

pub fn decode_shape(bytes: &[u8]) -> bincode::Result<Vec<usize>> {
    let shape: Vec<u64> = bincode::deserialize(bytes)?;
    Ok(shape.into_iter().map(|d| d as usize).collect())
}

/// dtype 以名字存储（"int64"），不依赖枚举序号
pub fn encode_dtype(dtype: DType) -> bincode::Result<Vec<u8>> {
    bincode::serialize(dtype.name())
}

pub fn decode_dtype_tag(bytes: &[u8]) -> bincode::Result<String> {
    bincode::deserialize(bytes)
}
