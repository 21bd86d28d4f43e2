use sitelog::worklog::{WorkLogStore, WorkRecord};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn record(session: usize, stage: u32) -> WorkRecord {
    WorkRecord {
        date: "05.08.2026".to_string(),
        region: "Region-A".to_string(),
        foreman: format!("Lead {session}"),
        team: String::new(),
        site_id: format!("VD{session:06}"),
        stage,
        start_time: "09:00".to_string(),
        end_time: "11:00".to_string(),
        duration: "2:00:00".to_string(),
    }
}

// Many sessions appending at once must not lose rows: the store serializes
// writers instead of the read-all/rewrite-all pattern that drops updates.
#[test]
fn concurrent_appends_lose_nothing() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("worklog.sqlite");
    let store = Arc::new(WorkLogStore::open(&db_path).expect("store"));

    let writers = 4;
    let sessions_per_writer = 10;
    let mut handles = Vec::new();
    for writer in 0..writers {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for session in 0..sessions_per_writer {
                let rows = vec![
                    record(writer * 100 + session, 1),
                    record(writer * 100 + session, 2),
                ];
                store.append_records(&rows).expect("append");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("writer thread");
    }

    assert_eq!(
        store.record_count().expect("count"),
        writers * sessions_per_writer * 2
    );
}

#[test]
fn existing_rows_survive_later_sessions() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("worklog.sqlite");

    {
        let store = WorkLogStore::open(&db_path).expect("store");
        store.append_records(&[record(1, 1)]).expect("append");
    }
    // A separate open, as a second process would do.
    let store = WorkLogStore::open(&db_path).expect("reopen");
    store.append_records(&[record(2, 1)]).expect("append");

    let records = store.recent_records(10).expect("records");
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r.site_id == "VD000001"));
    assert!(records.iter().any(|r| r.site_id == "VD000002"));
}
