use crate::queue::QueuePaths;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

// Events stranded in processing/ by a crash move back to incoming/ with
// names that sort ahead of new arrivals, so recovered events replay first.
pub fn recover_processing_entries(state_root: &Path) -> Result<Vec<PathBuf>, String> {
    let queue_paths = QueuePaths::from_state_root(state_root);
    let mut recovered = Vec::new();
    let mut entries = Vec::new();

    for entry in fs::read_dir(&queue_paths.processing).map_err(|e| e.to_string())? {
        let entry = entry.map_err(|e| e.to_string())?;
        let path = entry.path();
        if path.is_file() {
            entries.push(path);
        }
    }
    entries.sort();

    for (index, processing_path) in entries.into_iter().enumerate() {
        let name = processing_path
            .file_name()
            .and_then(|v| v.to_str())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or("event.json");
        let target = queue_paths
            .incoming
            .join(recovered_processing_filename(index, name));
        fs::rename(&processing_path, &target).map_err(|e| {
            format!(
                "failed to recover processing file {}: {}",
                processing_path.display(),
                e
            )
        })?;
        recovered.push(target);
    }

    Ok(recovered)
}

pub(crate) fn recovered_processing_filename(index: usize, name: &str) -> String {
    let ext = Path::new(name)
        .extension()
        .and_then(|v| v.to_str())
        .unwrap_or("json");
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let hash = digest[..8]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("00000000000000000000_recovered_{index}_{hash}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stranded_processing_files_return_to_incoming() {
        let tmp = tempdir().expect("tempdir");
        let paths = QueuePaths::from_state_root(tmp.path());
        fs::create_dir_all(&paths.incoming).expect("incoming");
        fs::create_dir_all(&paths.processing).expect("processing");

        fs::write(paths.processing.join("b.json"), "{}").expect("write b");
        fs::write(paths.processing.join("a.json"), "{}").expect("write a");

        let recovered = recover_processing_entries(tmp.path()).expect("recover");
        assert_eq!(recovered.len(), 2);
        assert_eq!(fs::read_dir(&paths.processing).expect("read").count(), 0);
        assert_eq!(fs::read_dir(&paths.incoming).expect("read").count(), 2);
        assert!(recovered.iter().all(|p| p.starts_with(&paths.incoming)));
    }

    #[test]
    fn recovered_names_sort_ahead_of_timestamped_arrivals() {
        let name = recovered_processing_filename(0, "00000000001754000000_evt-1.json");
        assert!(name < "00000000001754000000_evt-1.json".to_string());
        assert!(name.ends_with(".json"));
    }
}
