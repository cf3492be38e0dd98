use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::core::{RecordSet, Value};
use crate::error::{Result, SourceError, SourceResult};
use crate::source::{load_error, RecordSource};

/// JSON 数组形式的标签文件；第 i 个元素写入 key `Int(i)`
pub struct LabelSource {
    path: PathBuf,
}

impl LabelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn read_items(&self) -> SourceResult<Vec<serde_json::Value>> {
        let file = File::open(&self.path)?;
        let doc: serde_json::Value = serde_json::from_reader(BufReader::new(file))?;
        match doc {
            serde_json::Value::Array(items) => Ok(items),
            other => Err(SourceError::NotASequence(json_kind(&other))),
        }
    }
}

impl RecordSource for LabelSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn records(&self) -> Result<RecordSet> {
        let items = self.read_items().map_err(load_error(&self.path))?;
        tracing::debug!("Loaded {} labels from {}", items.len(), self.path.display());
        RecordSet::from_sequence(items.into_iter().map(Value::from))
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Key, Layout};
    use crate::error::BuildError;

    fn write(dir: &tempfile::TempDir, text: &str) -> PathBuf {
        let path = dir.path().join("labels.json");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn positional_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"[{"label": "cat"}, {"label": "dog"}]"#);

        let set = LabelSource::new(&path).records().unwrap();
        assert_eq!(set.layout(), &Layout::Labels);
        assert_eq!(set.keys().cloned().collect::<Vec<_>>(), vec![Key::Int(0), Key::Int(1)]);
        match set.get(&Key::Int(1)).unwrap() {
            Value::Map(m) => assert_eq!(m.get("label").and_then(Value::as_str), Some("dog")),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn mixed_scalar_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"["a", 3, null, [1.5, true]]"#);

        let set = LabelSource::new(&path).records().unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(set.get(&Key::Int(1)), Some(&Value::Int(3)));
        assert_eq!(set.get(&Key::Int(2)), Some(&Value::Null));
    }

    #[test]
    fn object_document_is_not_a_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"0": "a"}"#);
        assert!(matches!(
            LabelSource::new(&path).read_items(),
            Err(SourceError::NotASequence("an object"))
        ));
    }

    #[test]
    fn load_failures_carry_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[1, 2,");
        match LabelSource::new(&path).records().unwrap_err() {
            BuildError::SourceLoad { path: p, source } => {
                assert_eq!(p, path);
                assert!(matches!(source, SourceError::Json(_)));
            }
            other => panic!("unexpected error: {other}"),
        }

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            LabelSource::new(&missing).records(),
            Err(BuildError::SourceLoad { .. })
        ));
    }

    #[test]
    fn empty_array_is_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[]");
        assert!(matches!(
            LabelSource::new(&path).records(),
            Err(BuildError::EmptyInput)
        ));
    }
}
