//! `.npz` 数组归档（numpy `savez` / `savez_compressed`）
//!
//! 归档内需要两个成员：
//! - `keys.npy`：一维，整数 / unicode(`U`) / 字节串(`S`)
//! - `values.npy`：`shape[0] == len(keys)`，第 i 行即第 i 条记录的值
//!
//! 只支持 C 顺序；大端数据读入时转成小端。

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::core::{DType, Element, Key, NdArray, RecordSet};
use crate::error::{Result, SourceError, SourceResult};
use crate::source::{load_error, RecordSource};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// zip 头里声明的大小不可信，预分配上限 64 MiB
const MAX_PREALLOC: u64 = 64 << 20;

static DESCR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]descr['"]\s*:\s*['"]([^'"]+)['"]"#).expect("Invalid descr regex")
});
static FORTRAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]fortran_order['"]\s*:\s*(True|False)"#).expect("Invalid fortran_order regex")
});
static SHAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]shape['"]\s*:\s*\(([^)]*)\)"#).expect("Invalid shape regex")
});

pub struct ArraySource {
    path: PathBuf,
    strict_schema: bool,
}

impl ArraySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            strict_schema: true,
        }
    }

    pub fn with_strict_schema(mut self, strict: bool) -> Self {
        self.strict_schema = strict;
        self
    }

    /// (key, value) 对，顺序与归档一致
    pub fn read_pairs(&self) -> SourceResult<Vec<(Key, NdArray)>> {
        let file = File::open(&self.path)?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;

        let keys = read_member(&mut archive, "keys")?;
        let values = read_member(&mut archive, "values")?;

        let keys = keys.into_keys()?;
        let values = values.into_rows(keys.len())?;
        tracing::debug!(
            "Loaded {} arrays from {}",
            keys.len(),
            self.path.display()
        );
        Ok(keys.into_iter().zip(values).collect())
    }
}

impl RecordSource for ArraySource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn records(&self) -> Result<RecordSet> {
        let pairs = self.read_pairs().map_err(load_error(&self.path))?;
        RecordSet::arrays(pairs, self.strict_schema)
    }
}

fn read_member<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> SourceResult<NpyArray> {
    let entry = format!("{name}.npy");
    let mut file = match archive.by_name(&entry) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Err(SourceError::MissingArray(name.to_string())),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::with_capacity(file.size().min(MAX_PREALLOC) as usize);
    file.read_to_end(&mut buf)?;
    NpyArray::parse(name, &buf)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Descr {
    Numeric(DType),
    /// 定长 UTF-32，字符数
    Unicode(usize),
    /// 定长字节串，字节数
    Bytes(usize),
}

impl Descr {
    fn item_size(self) -> usize {
        match self {
            Descr::Numeric(d) => d.item_size(),
            Descr::Unicode(n) => n * 4,
            Descr::Bytes(n) => n,
        }
    }

    /// 需要按多少字节为一组做字节序翻转
    fn swap_unit(self) -> usize {
        match self {
            Descr::Numeric(d) => d.item_size(),
            Descr::Unicode(_) => 4,
            Descr::Bytes(_) => 1,
        }
    }
}

#[derive(Debug)]
struct NpyArray {
    name: String,
    descr: Descr,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl NpyArray {
    fn parse(name: &str, bytes: &[u8]) -> SourceResult<Self> {
        let malformed = |reason: &str| SourceError::MalformedNpy {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
            return Err(malformed("missing NUMPY magic"));
        }
        let (header_len, header_start): (usize, usize) = match bytes[6] {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 if bytes.len() >= 12 => (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            ),
            _ => return Err(malformed("unsupported format version")),
        };
        let body_start = header_start
            .checked_add(header_len)
            .ok_or_else(|| malformed("header length overflows"))?;
        let header = bytes
            .get(header_start..body_start)
            .ok_or_else(|| malformed("truncated header"))?;
        let header = std::str::from_utf8(header).map_err(|_| malformed("header is not text"))?;

        let descr_raw = DESCR_RE
            .captures(header)
            .map(|c| c[1].to_string())
            .ok_or_else(|| SourceError::UnsupportedDtype {
                name: name.to_string(),
                descr: "structured or missing descr".to_string(),
            })?;
        let fortran = FORTRAN_RE
            .captures(header)
            .map(|c| &c[1] == "True")
            .ok_or_else(|| malformed("missing fortran_order"))?;
        if fortran {
            return Err(malformed("fortran-ordered arrays are not supported"));
        }
        let shape = SHAPE_RE
            .captures(header)
            .ok_or_else(|| malformed("missing shape"))?[1]
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<usize>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| malformed("shape is not a tuple of integers"))?;

        let (descr, big_endian) = parse_descr(name, &descr_raw)?;
        let expected = byte_len(&shape, descr.item_size())
            .ok_or_else(|| malformed("shape is too large"))?;
        let body_end = body_start
            .checked_add(expected)
            .ok_or_else(|| malformed("shape is too large"))?;
        let mut data = bytes
            .get(body_start..body_end)
            .ok_or_else(|| malformed("truncated data"))?
            .to_vec();

        let unit = descr.swap_unit();
        if big_endian && unit > 1 {
            for chunk in data.chunks_exact_mut(unit) {
                chunk.reverse();
            }
        }

        Ok(Self {
            name: name.to_string(),
            descr,
            shape,
            data,
        })
    }

    fn malformed(&self, reason: impl Into<String>) -> SourceError {
        SourceError::MalformedNpy {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn into_keys(self) -> SourceResult<Vec<Key>> {
        if self.shape.len() != 1 {
            return Err(self.malformed("keys must be one-dimensional"));
        }
        // `<U0` / `|S0`：没有数据可以界定条数
        let size = self.descr.item_size();
        if size == 0 {
            return Err(self.malformed("zero-width key dtype"));
        }

        let mut keys = Vec::with_capacity(self.shape[0]);
        for item in self.data.chunks_exact(size) {
            let key = match self.descr {
                Descr::Numeric(dtype) => numeric_key(dtype, item).ok_or_else(|| {
                    SourceError::UnsupportedDtype {
                        name: self.name.clone(),
                        descr: format!("{} key out of range", dtype),
                    }
                })?,
                Descr::Unicode(_) => Key::Str(decode_utf32(item).ok_or_else(|| {
                    self.malformed("invalid unicode code point in key")
                })?),
                Descr::Bytes(_) => {
                    let end = item.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                    Key::Bytes(item[..end].to_vec())
                }
            };
            keys.push(key);
        }
        Ok(keys)
    }

    fn into_rows(self, expected_rows: usize) -> SourceResult<Vec<NdArray>> {
        let Descr::Numeric(dtype) = self.descr else {
            return Err(SourceError::UnsupportedDtype {
                name: self.name,
                descr: "string values".to_string(),
            });
        };
        let Some((&rows, row_shape)) = self.shape.split_first() else {
            return Err(self.malformed("values must have at least one dimension"));
        };
        if rows != expected_rows {
            return Err(SourceError::LengthMismatch {
                keys: expected_rows,
                values: rows,
            });
        }

        // rows == 0 时总长为 0，单行长度仍可能溢出
        let row_bytes = byte_len(row_shape, dtype.item_size())
            .ok_or_else(|| self.malformed("row shape is too large"))?;
        if row_bytes == 0 {
            return (0..rows)
                .map(|_| NdArray::from_raw(dtype, row_shape.to_vec(), Vec::new()).map_err(SourceError::from))
                .collect();
        }
        self.data
            .chunks_exact(row_bytes)
            .map(|row| NdArray::from_raw(dtype, row_shape.to_vec(), row.to_vec()).map_err(SourceError::from))
            .collect()
    }
}

/// `<i8` / `>f4` / `|u1` / `<U5` / `|S3`
fn parse_descr(name: &str, descr: &str) -> SourceResult<(Descr, bool)> {
    let unsupported = || SourceError::UnsupportedDtype {
        name: name.to_string(),
        descr: descr.to_string(),
    };

    let mut chars = descr.chars();
    let big_endian = match chars.next() {
        Some('>') => true,
        Some('<') | Some('|') | Some('=') => false,
        _ => return Err(unsupported()),
    };
    let kind = chars.next().ok_or_else(unsupported)?;
    let size: usize = chars.as_str().parse().map_err(|_| unsupported())?;

    let parsed = match kind {
        'U' if size.checked_mul(4).is_some() => Descr::Unicode(size),
        'U' => return Err(unsupported()),
        'S' => Descr::Bytes(size),
        _ => Descr::Numeric(DType::from_npy_kind(kind, size).ok_or_else(unsupported)?),
    };
    Ok((parsed, big_endian))
}

/// `item_size * prod(dims)`，溢出返回 None
fn byte_len(dims: &[usize], item_size: usize) -> Option<usize> {
    dims.iter().try_fold(item_size, |acc, &d| acc.checked_mul(d))
}

/// 浮点不能作为 key；超出 i64 的无符号整数返回 None
fn numeric_key(dtype: DType, item: &[u8]) -> Option<Key> {
    let v = match dtype {
        DType::Bool => bool::get_le(item) as i64,
        DType::Int8 => i8::get_le(item) as i64,
        DType::Int16 => i16::get_le(item) as i64,
        DType::Int32 => i32::get_le(item) as i64,
        DType::Int64 => i64::get_le(item),
        DType::UInt8 => u8::get_le(item) as i64,
        DType::UInt16 => u16::get_le(item) as i64,
        DType::UInt32 => u32::get_le(item) as i64,
        DType::UInt64 => i64::try_from(u64::get_le(item)).ok()?,
        DType::Float32 | DType::Float64 => return None,
    };
    Some(Key::Int(v))
}

/// numpy 的 `U` 类型：UTF-32LE，尾部以 NUL 补齐
fn decode_utf32(item: &[u8]) -> Option<String> {
    let mut s = String::with_capacity(item.len() / 4);
    for cp in item.chunks_exact(4) {
        let cp = u32::from_le_bytes([cp[0], cp[1], cp[2], cp[3]]);
        s.push(char::from_u32(cp)?);
    }
    let trimmed = s.trim_end_matches('\0').len();
    s.truncate(trimmed);
    Some(s)
}
