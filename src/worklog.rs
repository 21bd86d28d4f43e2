use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum WorkLogError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create work log parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
}

impl From<rusqlite::Error> for WorkLogError {
    fn from(source: rusqlite::Error) -> Self {
        Self::Sql { source }
    }
}

// One row per completed stage. All rows of a session share the
// date/region/foreman/team/site id fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRecord {
    pub date: String,
    pub region: String,
    pub foreman: String,
    pub team: String,
    pub site_id: String,
    pub stage: u32,
    pub start_time: String,
    pub end_time: String,
    pub duration: String,
}

pub struct WorkLogStore {
    db_path: PathBuf,
}

impl WorkLogStore {
    pub fn open(db_path: &Path) -> Result<Self, WorkLogError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| WorkLogError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.connect()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS work_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                region TEXT NOT NULL,
                foreman TEXT NOT NULL,
                team TEXT NOT NULL,
                site_id TEXT NOT NULL,
                stage INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                duration TEXT NOT NULL
            );
            ",
        )?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, WorkLogError> {
        let connection =
            Connection::open(&self.db_path).map_err(|source| WorkLogError::Open {
                path: self.db_path.display().to_string(),
                source,
            })?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        Ok(connection)
    }

    // All rows of one session land in one transaction: either every stage
    // row is appended or none is. Existing rows are never touched.
    pub fn append_records(&self, records: &[WorkRecord]) -> Result<usize, WorkLogError> {
        let mut connection = self.connect()?;
        let tx = connection.transaction()?;
        for record in records {
            tx.execute(
                "INSERT INTO work_records
                    (date, region, foreman, team, site_id, stage, start_time, end_time, duration)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.date,
                    record.region,
                    record.foreman,
                    record.team,
                    record.site_id,
                    record.stage,
                    record.start_time,
                    record.end_time,
                    record.duration,
                ],
            )?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn recent_records(&self, limit: usize) -> Result<Vec<WorkRecord>, WorkLogError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT date, region, foreman, team, site_id, stage, start_time, end_time, duration
             FROM work_records ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = statement.query_map(params![limit as i64], |row| {
            Ok(WorkRecord {
                date: row.get(0)?,
                region: row.get(1)?,
                foreman: row.get(2)?,
                team: row.get(3)?,
                site_id: row.get(4)?,
                stage: row.get::<_, i64>(5)? as u32,
                start_time: row.get(6)?,
                end_time: row.get(7)?,
                duration: row.get(8)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn record_count(&self) -> Result<usize, WorkLogError> {
        let connection = self.connect()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM work_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(stage: u32, start: &str, end: &str, duration: &str) -> WorkRecord {
        WorkRecord {
            date: "05.08.2026".to_string(),
            region: "Region-A".to_string(),
            foreman: "Lead A".to_string(),
            team: "Crew B, Crew C".to_string(),
            site_id: "VD123456".to_string(),
            stage,
            start_time: start.to_string(),
            end_time: end.to_string(),
            duration: duration.to_string(),
        }
    }

    #[test]
    fn append_is_atomic_per_session_and_preserves_existing_rows() {
        let dir = tempdir().expect("tempdir");
        let store = WorkLogStore::open(&dir.path().join("worklog.sqlite")).expect("open store");

        let first = vec![record(1, "09:00", "11:00", "2:00:00")];
        assert_eq!(store.append_records(&first).expect("append"), 1);

        let second = vec![
            record(2, "11:00", "13:00", "2:00:00"),
            record(3, "13:00", "15:00", "2:00:00"),
        ];
        assert_eq!(store.append_records(&second).expect("append"), 2);
        assert_eq!(store.record_count().expect("count"), 3);

        let recent = store.recent_records(10).expect("recent");
        assert_eq!(recent.len(), 3);
        // Newest first.
        assert_eq!(recent[0].stage, 3);
        assert_eq!(recent[2].stage, 1);
    }

    #[test]
    fn rows_share_session_fields_and_differ_per_stage() {
        let dir = tempdir().expect("tempdir");
        let store = WorkLogStore::open(&dir.path().join("worklog.sqlite")).expect("open store");

        let rows = vec![
            record(1, "09:00", "11:00", "2:00:00"),
            record(2, "11:00", "15:00", "4:00:00"),
        ];
        store.append_records(&rows).expect("append");

        let recent = store.recent_records(10).expect("recent");
        assert!(recent
            .windows(2)
            .all(|pair| pair[0].site_id == pair[1].site_id
                && pair[0].region == pair[1].region
                && pair[0].foreman == pair[1].foreman
                && pair[0].date == pair[1].date));
        assert_ne!(recent[0].stage, recent[1].stage);
    }

    #[test]
    fn open_creates_missing_parent_directories() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("state/log/worklog.sqlite");
        let store = WorkLogStore::open(&nested).expect("open nested store");
        assert_eq!(store.record_count().expect("count"), 0);
    }

    #[test]
    fn empty_append_is_a_no_op() {
        let dir = tempdir().expect("tempdir");
        let store = WorkLogStore::open(&dir.path().join("worklog.sqlite")).expect("open store");
        assert_eq!(store.append_records(&[]).expect("append"), 0);
        assert_eq!(store.record_count().expect("count"), 0);
    }
}
