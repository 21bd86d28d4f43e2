use super::RuntimeError;
use crate::queue::QueuePaths;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        let queue = self.queue_paths();
        vec![
            queue.incoming,
            queue.processing,
            queue.outgoing,
            self.root.join("logs"),
        ]
    }

    pub fn queue_paths(&self) -> QueuePaths {
        QueuePaths::from_state_root(&self.root)
    }

    pub fn runtime_log_path(&self) -> PathBuf {
        self.root.join("logs/runtime.log")
    }

    pub fn stop_signal_path(&self) -> PathBuf {
        self.root.join("stop")
    }

    pub fn worklog_db_path(&self) -> PathBuf {
        self.root.join("worklog.sqlite")
    }
}

pub const DEFAULT_STATE_ROOT_DIR: &str = ".sitelog/state";

pub fn default_state_root_path() -> Result<PathBuf, RuntimeError> {
    let home = std::env::var_os("HOME").ok_or(RuntimeError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home).join(DEFAULT_STATE_ROOT_DIR))
}

pub fn bootstrap_state_root(paths: &StatePaths) -> Result<(), RuntimeError> {
    for path in paths.required_directories() {
        fs::create_dir_all(&path).map_err(|source| RuntimeError::CreateDir {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}
