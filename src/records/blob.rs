use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::api::TickerId;
use crate::error::{AppError, Context, Result};
use crate::extract::{Bar, EntityRecord, ErrorEntry};
use crate::utils::list_json_files;

/// Summary block of a persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub ecode: TickerId,
    pub start: Option<String>,
    pub end: Option<String>,
    pub status: bool,
    pub attempts: u32,
    #[serde(rename = "_error_stack", default)]
    pub error_stack: Vec<ErrorEntry>,
    pub total_bars: usize,
}

/// On-disk shape of one entity's extraction result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBlob {
    pub meta_data: BlobMeta,
    #[serde(default)]
    pub bar_data: Vec<Bar>,
}

impl From<&EntityRecord> for EntityBlob {
    fn from(record: &EntityRecord) -> Self {
        Self {
            meta_data: BlobMeta {
                ecode: record.id,
                start: record.range_start.clone(),
                end: record.range_end.clone(),
                status: record.is_success(),
                attempts: record.attempts,
                error_stack: record.errors.clone(),
                total_bars: record.total_bars(),
            },
            bar_data: record.bars.clone(),
        }
    }
}

pub fn ensure_directory(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    Ok(())
}

/// Write `data` as JSON, creating the parent directory when needed.
pub fn save_blob<T: Serialize>(data: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    let json = serde_json::to_string(data)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;

    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create file {}", path.display()))?;
    file.write_all(json.as_bytes())
        .with_context(|| format!("Failed to write file {}", path.display()))?;
    Ok(())
}

pub fn load_blob<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file {}", path.display()))?;
    let value = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse file {}", path.display()))?;
    Ok(value)
}

/// Entity ids that have a blob in `dir`. Files whose stem is not an id are skipped.
pub fn list_blobs(dir: &Path) -> Vec<TickerId> {
    list_json_files(dir)
        .into_iter()
        .filter_map(|entry| entry.stem.parse().ok())
        .collect()
}

/// Remove a blob. Returns false when it did not exist.
pub fn delete_blob(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(AppError::Other(
            anyhow::Error::new(err).context(format!("Failed to delete file {}", path.display())),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractionStatus, Session};

    fn record() -> EntityRecord {
        EntityRecord {
            id: 1301,
            attempts: 2,
            errors: vec![ErrorEntry {
                code: 162,
                message: "no data".into(),
            }],
            status: ExtractionStatus::Success,
            range_start: Some("20210120 09:00:00".into()),
            range_end: Some("20210120 15:01:00".into()),
            bars: vec![Bar {
                time_stamp: "20210120 09:00:00".into(),
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 10.0,
                average: 1.25,
                count: 4,
                session: Session::Morning,
            }],
        }
    }

    #[test]
    fn blob_uses_persisted_field_names() {
        let blob = EntityBlob::from(&record());
        let value = serde_json::to_value(&blob).unwrap();
        assert_eq!(value["meta_data"]["status"], true);
        assert_eq!(value["meta_data"]["total_bars"], 1);
        assert_eq!(value["meta_data"]["_error_stack"][0]["code"], 162);
        assert_eq!(value["bar_data"][0]["session"], 1);
    }

    #[test]
    fn save_list_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".success").join("1301.json");
        let blob = EntityBlob::from(&record());

        save_blob(&blob, &path).unwrap();
        assert_eq!(list_blobs(&dir.path().join(".success")), vec![1301]);
        let loaded: EntityBlob = load_blob(&path).unwrap();
        assert_eq!(loaded, blob);

        assert!(delete_blob(&path).unwrap());
        assert!(!delete_blob(&path).unwrap());
        assert!(list_blobs(&dir.path().join(".success")).is_empty());
    }
}
