use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};

use kvforge::{DatabaseReader, Key};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const ARRAY_BIN: &str = env!("CARGO_BIN_EXE_write-array-database");
const LABEL_BIN: &str = env!("CARGO_BIN_EXE_write-label-database");

/// 环境隔离：staging 指向临时目录，不读外部配置和 RUST_LOG
fn run(bin: &str, tmp: &TempDir, args: &[&dyn AsRef<std::ffi::OsStr>]) -> Output {
    let mut cmd = Command::new(bin);
    for arg in args {
        cmd.arg(arg.as_ref());
    }
    cmd.env("KVFORGE_STAGING_ROOT", tmp.path().join("staging"))
        .env("KVFORGE_MAP_SIZE", (1u64 << 30).to_string())
        .env_remove("KVFORGE_CONFIG")
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn cli")
}

fn npy(descr: &str, shape: &str, data: &[u8]) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        descr, shape
    );
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');
    let mut out = b"\x93NUMPY\x01\x00".to_vec();
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);
    out
}

fn write_npz(path: &Path) {
    let keys: Vec<u8> = [10i64, 20].iter().flat_map(|v| v.to_le_bytes()).collect();
    let values: Vec<u8> = [1.0f64, 2.0, 3.0, 4.0]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();

    let mut zip = ZipWriter::new(std::fs::File::create(path).unwrap());
    let options = SimpleFileOptions::default();
    zip.start_file("keys.npy", options).unwrap();
    zip.write_all(&npy("<i8", "(2,)", &keys)).unwrap();
    zip.start_file("values.npy", options).unwrap();
    zip.write_all(&npy("<f8", "(2, 2)", &values)).unwrap();
    zip.finish().unwrap();
}

#[test]
fn label_cli_writes_database_and_reports() {
    let tmp = tempfile::tempdir().unwrap();
    let labels = tmp.path().join("labels.json");
    std::fs::write(&labels, r#"["cat", "dog"]"#).unwrap();
    let dst = tmp.path().join("out/labels.lmdb");

    let out = run(
        LABEL_BIN,
        &tmp,
        &[&"--src_labels", &labels, &"--dst_database", &dst],
    );
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(out.status.code(), Some(0), "{stderr}");
    assert!(stderr.contains("Loaded 2 labels"), "{stderr}");
    assert!(stderr.contains("Build complete"), "{stderr}");
    assert!(stderr.contains("layout:     labels"), "{stderr}");

    let db = DatabaseReader::open(&dst).unwrap();
    assert_eq!(db.keys().unwrap(), vec![Key::Int(0), Key::Int(1)]);
    assert!(db.schema().unwrap().is_none());
    db.close();
}

#[test]
fn array_cli_writes_database() {
    let tmp = tempfile::tempdir().unwrap();
    let npz = tmp.path().join("arrays.npz");
    write_npz(&npz);
    let dst = tmp.path().join("arrays.lmdb");

    let out = run(ARRAY_BIN, &tmp, &[&"--src_npz", &npz, &"--dst_database", &dst]);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(out.status.code(), Some(0), "{stderr}");
    assert!(stderr.contains("array (2,) float64"), "{stderr}");

    let db = DatabaseReader::open(&dst).unwrap();
    assert_eq!(db.keys().unwrap(), vec![Key::Int(10), Key::Int(20)]);
    let schema = db.schema().unwrap().unwrap();
    assert_eq!(schema.shape, vec![2]);
    db.close();
}

#[test]
fn missing_source_exits_nonzero_once() {
    let tmp = tempfile::tempdir().unwrap();
    let dst = tmp.path().join("db");

    let out = run(
        LABEL_BIN,
        &tmp,
        &[&"--src_labels", &tmp.path().join("absent.json"), &"--dst_database", &dst],
    );
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(out.status.code(), Some(1), "{stderr}");
    assert_eq!(stderr.matches("Error:").count(), 1, "{stderr}");
    assert!(!dst.exists());

    let out = run(
        ARRAY_BIN,
        &tmp,
        &[&"--src_npz", &tmp.path().join("absent.npz"), &"--dst_database", &dst],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(!dst.exists());
}

#[test]
fn missing_destination_flag_exits_nonzero() {
    let tmp = tempfile::tempdir().unwrap();
    let labels = tmp.path().join("labels.json");
    std::fs::write(&labels, "[1]").unwrap();

    let out = run(LABEL_BIN, &tmp, &[&"--src_labels", &labels]);
    assert!(!out.status.success());

    let out = run(ARRAY_BIN, &tmp, &[&"--src_npz", &labels]);
    assert!(!out.status.success());
}
