use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// One raw upstream row: loosely-typed values keyed by column name. Rows
/// from the acquisition layer keep JSON numbers; rows loaded from CSV are
/// all strings.
pub type RawRow = BTreeMap<String, Value>;

/// A loaded raw snapshot: the header columns as they appeared in the file
/// plus the data rows. Kept separate so schema validation sees the real
/// header even when the file has no data rows.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
}

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn read_stripped(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(match bytes.strip_prefix(UTF8_BOM) {
        Some(rest) => rest.to_vec(),
        None => bytes,
    })
}

/// Load a headered CSV into raw rows, every value as a string.
pub fn read_raw(path: &Path) -> Result<RawTable> {
    let bytes = read_stripped(path)?;
    let mut rdr = csv::Reader::from_reader(bytes.as_slice());
    let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let row: RawRow = columns
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), Value::String(v.to_string())))
            .collect();
        rows.push(row);
    }
    Ok(RawTable { columns, rows })
}

/// Load a typed CSV written by an earlier stage (e.g. a labeled table).
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes = read_stripped(path)?;
    let mut rdr = csv::Reader::from_reader(bytes.as_slice());
    let mut rows = Vec::new();
    for record in rdr.deserialize() {
        rows.push(record.with_context(|| format!("Bad record in {}", path.display()))?);
    }
    Ok(rows)
}

/// Write serializable rows as CSV, optionally with a UTF-8 BOM (the labeled
/// and engineered outputs carry one). If the destination cannot be written
/// (commonly: held open by a spreadsheet), retry once under a
/// timestamped sibling name and return the path actually used.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T], bom: bool) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    match write_csv_to(path, rows, bom) {
        Ok(()) => Ok(path.to_path_buf()),
        Err(e) => {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
            let alt = path.with_file_name(format!("{}_{}.csv", stem, timestamp()));
            warn!(
                "Could not write {} ({}), retrying as {}",
                path.display(),
                e,
                alt.display()
            );
            write_csv_to(&alt, rows, bom)
                .with_context(|| format!("Failed to write {}", alt.display()))?;
            Ok(alt)
        }
    }
}

fn write_csv_to<T: Serialize>(path: &Path, rows: &[T], bom: bool) -> Result<()> {
    let mut file = fs::File::create(path)?;
    if bom {
        file.write_all(UTF8_BOM)?;
    }
    let mut wtr = csv::Writer::from_writer(file);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write raw rows under a fixed column order (missing keys become empty
/// cells; numbers with no fractional part print as integers so the price
/// parser round-trips them).
pub fn write_raw(path: &Path, columns: &[&str], rows: &[RawRow]) -> Result<PathBuf> {
    let serialized: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(*c).map(value_to_field).unwrap_or_default())
                .collect()
        })
        .collect();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(UTF8_BOM)?;
    let mut wtr = csv::Writer::from_writer(file);
    wtr.write_record(columns)?;
    for row in &serialized {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(path.to_path_buf())
}

fn value_to_field(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    (f as i64).to_string()
                } else {
                    f.to_string()
                }
            } else {
                n.to_string()
            }
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Lexicographically-latest file in `dir` matching `<prefix>*.csv`; with the
/// timestamped naming scheme that is also the most recent one.
pub fn latest_matching(dir: &Path, prefix: &str) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix) && n.ends_with(".csv"))
        })
        .collect();
    candidates.sort();
    candidates
        .pop()
        .with_context(|| format!("No {}*.csv under {}", prefix, dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_roundtrip_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let row: RawRow = BTreeMap::from([
            ("reference_code".to_string(), json!("WT100015")),
            ("price".to_string(), json!(5000.0)),
            ("title".to_string(), json!("Tank Must")),
        ]);
        write_raw(&path, &["reference_code", "price", "title"], &[row]).unwrap();

        let table = read_raw(&path).unwrap();
        assert_eq!(table.columns, ["reference_code", "price", "title"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0]["reference_code"], json!("WT100015"));
        // Integral float was written without the trailing ".0"
        assert_eq!(table.rows[0]["price"], json!("5000"));
    }

    #[test]
    fn read_raw_tolerates_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bom.csv");
        fs::write(&path, b"\xef\xbb\xbfa,b\n1,2\n").unwrap();
        let table = read_raw(&path).unwrap();
        assert_eq!(table.columns, ["a", "b"]);
        assert_eq!(table.rows[0]["a"], json!("1"));
        assert_eq!(table.rows[0]["b"], json!("2"));
    }

    #[test]
    fn read_raw_keeps_header_of_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, "reference_code,price\n").unwrap();
        let table = read_raw(&path).unwrap();
        assert_eq!(table.columns, ["reference_code", "price"]);
        assert!(table.rows.is_empty());
    }

    #[test]
    fn write_csv_emits_bom_when_asked() {
        #[derive(Serialize)]
        struct Row {
            a: u32,
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&path, &[Row { a: 1 }], true).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
    }

    #[test]
    fn write_csv_falls_back_to_timestamped_name() {
        #[derive(Serialize)]
        struct Row {
            a: u32,
        }
        let dir = tempfile::tempdir().unwrap();
        // A directory at the destination path makes File::create fail.
        let blocked = dir.path().join("out.csv");
        fs::create_dir_all(&blocked).unwrap();

        let used = write_csv(&blocked, &[Row { a: 1 }], false).unwrap();
        assert_ne!(used, blocked);
        let name = used.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("out_") && name.ends_with(".csv"), "{name}");
        assert!(used.exists());
    }

    #[test]
    fn latest_matching_picks_newest_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "current_2026_raw_20260211_140133.csv",
            "current_2026_raw_20260212_090000.csv",
            "unrelated.csv",
        ] {
            fs::write(dir.path().join(name), "a\n1\n").unwrap();
        }
        let latest = latest_matching(dir.path(), "current_2026_raw").unwrap();
        assert_eq!(
            latest.file_name().unwrap().to_str().unwrap(),
            "current_2026_raw_20260212_090000.csv"
        );
    }
}
