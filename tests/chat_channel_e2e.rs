use sitelog::channels::chat::run_local_chat_session;
use sitelog::engine::{DialogEngine, DEFAULT_STAGE_COUNT};
use sitelog::geocode::{RegionResolver, RegionResult};
use sitelog::roster::{Employee, Roster};
use sitelog::runtime::{bootstrap_state_root, StatePaths};
use sitelog::worklog::WorkLogStore;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::tempdir;

struct FixedResolver(RegionResult);

impl RegionResolver for FixedResolver {
    fn resolve_region(&self, _latitude: f64, _longitude: f64) -> RegionResult {
        self.0.clone()
    }
}

// Drives the whole dialog through the stdio channel: every typed line goes
// through the queue, the drain loop and the engine before the reply prints.
#[test]
fn scripted_chat_records_a_full_work_session() {
    let tmp = tempdir().expect("tempdir");
    let paths = StatePaths::new(tmp.path());
    bootstrap_state_root(&paths).expect("bootstrap");

    let roster = Roster::from_employees(vec![
        Employee {
            name: "Lead A".to_string(),
            region: "Region-A".to_string(),
            title: "Foreman".to_string(),
        },
        Employee {
            name: "Lead B".to_string(),
            region: "Region-A".to_string(),
            title: "Foreman".to_string(),
        },
    ])
    .expect("roster");
    let db_path = tmp.path().join("worklog.sqlite");
    let store = WorkLogStore::open(&db_path).expect("store");
    let engine = Arc::new(DialogEngine::new(
        roster,
        Box::new(FixedResolver(RegionResult::Found("Region-A".to_string()))),
        store,
        DEFAULT_STAGE_COUNT,
    ));

    let script = "\
/start
/press start_confirm
/location 55.75 37.61
/press region_confirm
/press foreman_0
vd123456
/press stage_1
09:00
/press next_stage
/press stage_2
11:00
/press complete_work
15:00
/exit
";
    let mut input = Cursor::new(script);
    let mut output = Vec::new();

    let summary = run_local_chat_session(tmp.path(), &engine, &mut input, &mut output)
        .expect("chat session");
    assert!(summary.contains("chat ended"));

    let transcript = String::from_utf8(output).expect("utf8 transcript");
    assert!(transcript.contains("Press Begin"));
    assert!(transcript.contains("Detected region: Region-A"));
    assert!(transcript.contains("Select the supervising foreman"));
    assert!(transcript.contains("[Lead A] (/press foreman_0)"));
    assert!(transcript.contains("continuing without a team"));
    assert!(transcript.contains("Stage 1 started at 09:00"));
    assert!(transcript.contains("Saved 2 stage record(s)"));

    let store = WorkLogStore::open(&db_path).expect("reopen store");
    let records = store.recent_records(10).expect("records");
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.site_id == "VD123456" && r.region == "Region-A" && r.foreman == "Lead A"));
}

#[test]
fn invalid_input_reprompts_and_the_dialog_recovers() {
    let tmp = tempdir().expect("tempdir");
    let paths = StatePaths::new(tmp.path());
    bootstrap_state_root(&paths).expect("bootstrap");

    let roster = Roster::from_employees(vec![Employee {
        name: "Lead A".to_string(),
        region: "Region-A".to_string(),
        title: "Foreman".to_string(),
    }])
    .expect("roster");
    let db_path = tmp.path().join("worklog.sqlite");
    let store = WorkLogStore::open(&db_path).expect("store");
    let engine = Arc::new(DialogEngine::new(
        roster,
        Box::new(FixedResolver(RegionResult::Undetermined)),
        store,
        DEFAULT_STAGE_COUNT,
    ));

    let script = "\
/start
/press start_confirm
Region-A
/press foreman_0
vd12345
VD123456
/press stage_1
9:5
9:05
/press complete_work
12:00
/exit
";
    let mut input = Cursor::new(script);
    let mut output = Vec::new();
    run_local_chat_session(tmp.path(), &engine, &mut input, &mut output).expect("chat session");

    let transcript = String::from_utf8(output).expect("utf8 transcript");
    assert!(transcript.contains("site id must be"));
    assert!(transcript.contains("must use the HH:MM format"));
    assert!(transcript.contains("Stage 1 started at 09:05"));
    assert!(transcript.contains("Saved 1 stage record(s)"));

    let store = WorkLogStore::open(&db_path).expect("reopen store");
    let records = store.recent_records(10).expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].start_time, "09:05");
    assert_eq!(records[0].duration, "2:55:00");
}
