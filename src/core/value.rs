use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::record::ArraySchema;
use crate::error::ArrayError;

/// 元素类型（numpy 风格命名，作为 `dtype` 记录的 tag）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let d = match name {
            "bool" => DType::Bool,
            "int8" => DType::Int8,
            "int16" => DType::Int16,
            "int32" => DType::Int32,
            "int64" => DType::Int64,
            "uint8" => DType::UInt8,
            "uint16" => DType::UInt16,
            "uint32" => DType::UInt32,
            "uint64" => DType::UInt64,
            "float32" => DType::Float32,
            "float64" => DType::Float64,
            _ => return None,
        };
        Some(d)
    }

    /// 单个元素字节数
    pub fn item_size(self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 => 8,
        }
    }

    /// npy descr 的类型字符 + 字节宽度（如 `i8` -> Int64）
    pub fn from_npy_kind(kind: char, size: usize) -> Option<Self> {
        let d = match (kind, size) {
            ('b', 1) => DType::Bool,
            ('i', 1) => DType::Int8,
            ('i', 2) => DType::Int16,
            ('i', 4) => DType::Int32,
            ('i', 8) => DType::Int64,
            ('u', 1) => DType::UInt8,
            ('u', 2) => DType::UInt16,
            ('u', 4) => DType::UInt32,
            ('u', 8) => DType::UInt64,
            ('f', 4) => DType::Float32,
            ('f', 8) => DType::Float64,
            _ => return None,
        };
        Some(d)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 可直接存入 NdArray 的标量类型
pub trait Element: Copy {
    const DTYPE: DType;

    fn put_le(self, out: &mut Vec<u8>);

    /// `bytes.len()` 恒等于 `DTYPE.item_size()`
    fn get_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $d:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = DType::$d;

                fn put_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn get_le(bytes: &[u8]) -> Self {
                    <$t>::from_le_bytes(bytes.try_into().expect("chunk len checked"))
                }
            }
        )*
    };
}

impl_element!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn put_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn get_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// 定长、同构的 N 维数组（行优先，小端）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl NdArray {
    pub fn from_raw(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self, ArrayError> {
        let expected = shape.iter().product::<usize>() * dtype.item_size();
        if data.len() != expected {
            return Err(ArrayError {
                dtype,
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    pub fn from_slice<T: Element>(shape: Vec<usize>, values: &[T]) -> Result<Self, ArrayError> {
        let mut data = Vec::with_capacity(values.len() * T::DTYPE.item_size());
        for v in values {
            v.put_le(&mut data);
        }
        Self::from_raw(T::DTYPE, shape, data)
    }

    /// 一维数组
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        let shape = vec![values.len()];
        let mut data = Vec::with_capacity(values.len() * T::DTYPE.item_size());
        for v in values {
            v.put_le(&mut data);
        }
        Self {
            dtype: T::DTYPE,
            shape,
            data,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// 元素个数
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn schema(&self) -> ArraySchema {
        ArraySchema {
            shape: self.shape.clone(),
            dtype: self.dtype,
        }
    }

    /// dtype 不匹配时返回 None
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        if T::DTYPE != self.dtype {
            return None;
        }
        Some(
            self.data
                .chunks_exact(self.dtype.item_size())
                .map(T::get_le)
                .collect(),
        )
    }
}

/// 数据记录的值
///
/// 数组库中每条记录都是 `Array`；标签库可以是任意结构化值。
/// `Map` 使用 BTreeMap，保证编码结果与插入顺序无关。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Array(NdArray),
}

impl Value {
    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<NdArray> for Value {
    fn from(a: NdArray) -> Self {
        Value::Array(a)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Seq(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Map(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
