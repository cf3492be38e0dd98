use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use crate::core::key::Key;
use crate::core::value::{DType, NdArray, Value};
use crate::error::{BuildError, Result};

/// 数组库的全局 schema：所有值共享同一 shape 与 dtype
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArraySchema {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl ArraySchema {
    fn matches(&self, a: &NdArray) -> bool {
        self.dtype == a.dtype() && self.shape.as_slice() == a.shape()
    }
}

impl fmt::Display for ArraySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 与 numpy 的 tuple 写法一致：(2,) / (2, 3) / ()
        f.write_str("(")?;
        for (i, d) in self.shape.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", d)?;
        }
        if self.shape.len() == 1 {
            f.write_str(",")?;
        }
        write!(f, ") {}", self.dtype)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Layout {
    /// 写入 `shape` / `dtype` 元数据
    Array(ArraySchema),
    /// 无 schema 记录
    Labels,
}

/// 待写入的完整记录集
///
/// 构造时完成全部前置校验（非空、key 唯一、数组 schema 一致），
/// builder 拿到的 RecordSet 一定可以直接落盘。
/// 迭代顺序恒为 key 升序，与输入顺序无关。
#[derive(Clone, Debug)]
pub struct RecordSet {
    layout: Layout,
    entries: BTreeMap<Key, Value>,
}

impl RecordSet {
    /// 数组记录集
    ///
    /// `strict = true` 时逐条校验 shape/dtype；
    /// `strict = false` 只取代表元素（key 最小的一条），不检查其余记录。
    pub fn arrays<I>(records: I, strict: bool) -> Result<Self>
    where
        I: IntoIterator<Item = (Key, NdArray)>,
    {
        let entries = collect_unique(records.into_iter().map(|(k, a)| (k, Value::Array(a))))?;

        let schema = match entries.values().next() {
            Some(Value::Array(a)) => a.schema(),
            _ => return Err(BuildError::EmptyInput),
        };

        if strict {
            for (key, value) in &entries {
                if let Value::Array(a) = value {
                    if !schema.matches(a) {
                        return Err(BuildError::SchemaMismatch {
                            key: key.clone(),
                            expected: schema,
                            found: a.schema(),
                        });
                    }
                }
            }
        }

        Ok(Self {
            layout: Layout::Array(schema),
            entries,
        })
    }

    /// 标签记录集（任意结构化值）
    pub fn labels<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Key, Value)>,
    {
        let entries = collect_unique(records)?;
        if entries.is_empty() {
            return Err(BuildError::EmptyInput);
        }
        Ok(Self {
            layout: Layout::Labels,
            entries,
        })
    }

    /// 按位置编号：第 i 条记录的 key 为 `Int(i)`
    pub fn from_sequence<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = Value>,
    {
        Self::labels(
            records
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Key::Int(i as i64), v)),
        )
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn schema(&self) -> Option<&ArraySchema> {
        match &self.layout {
            Layout::Array(s) => Some(s),
            Layout::Labels => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.get(key)
    }

    /// 升序 key
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.keys()
    }

    /// 按 key 升序迭代
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter()
    }
}

fn collect_unique<I>(records: I) -> Result<BTreeMap<Key, Value>>
where
    I: IntoIterator<Item = (Key, Value)>,
{
    let mut entries = BTreeMap::new();
    for (key, value) in records {
        match entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(slot) => {
                return Err(BuildError::DuplicateKey(slot.key().to_string()));
            }
        }
    }
    Ok(entries)
}
