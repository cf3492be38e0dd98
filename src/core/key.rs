use serde::{Deserialize, Serialize};
use std::fmt;

/// 记录主键
///
/// 排序规则：先按变体（Int < Str < Bytes），再按值。
/// 数组库的 key 来自归档里的 `keys` 数组；标签库的 key 是记录在源序列中的下标。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Str(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Str(v)
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Key::Bytes(v)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{}", v),
            Key::Str(s) => write!(f, "{:?}", s),
            Key::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_groups_by_variant_then_value() {
        let mut keys = vec![
            Key::from("b"),
            Key::from(b"z".to_vec()),
            Key::from(10),
            Key::from("a"),
            Key::from(-3),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::Int(-3),
                Key::Int(10),
                Key::Str("a".into()),
                Key::Str("b".into()),
                Key::Bytes(b"z".to_vec()),
            ]
        );
    }

    #[test]
    fn display_quotes_strings() {
        assert_eq!(Key::from(7).to_string(), "7");
        assert_eq!(Key::from("keys").to_string(), "\"keys\"");
    }
}
