use std::fs;
use std::path::Path;

/// A file found while scanning a storage partition.
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub stem: String,
}

/// Files in `dir` with the given extension, sorted by stem. A missing directory
/// yields an empty list.
pub fn list_files_with_extension(dir: impl AsRef<Path>, extension: &str) -> Vec<FileEntry> {
    let mut entries = Vec::new();
    let dir_path = dir.as_ref();

    if let Ok(read_dir) = fs::read_dir(dir_path) {
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                continue;
            }

            if !entry.metadata().map(|meta| meta.is_file()).unwrap_or(false) {
                continue;
            }

            let Some(stem) = path
                .file_stem()
                .and_then(|segment| segment.to_str())
                .map(|s| s.to_string())
            else {
                continue;
            };

            entries.push(FileEntry { stem });
        }
    }

    entries.sort_by(|a, b| a.stem.cmp(&b.stem));
    entries
}

pub fn list_json_files(dir: impl AsRef<Path>) -> Vec<FileEntry> {
    list_files_with_extension(dir, "json")
}
