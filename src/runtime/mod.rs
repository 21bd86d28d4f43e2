use crate::engine::DialogEngine;
use crate::queue::{self, ClaimedEvent, OrderingKey, PerKeyScheduler, QueuePaths};
use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod logging;
pub mod recovery;
pub mod state_paths;

pub use logging::{append_log_line, append_runtime_log};
pub use recovery::recover_processing_entries;
pub use state_paths::{
    bootstrap_state_root, default_state_root_path, StatePaths, DEFAULT_STATE_ROOT_DIR,
};

pub const DRAIN_MAX_CONCURRENCY: usize = 4;
const DRAIN_POLL_MS: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to create runtime path {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to resolve home directory for runtime state root")]
    HomeDirectoryUnavailable,
}

#[derive(Debug)]
struct DrainTaskCompletion {
    key: OrderingKey,
    error: Option<String>,
}

// One drain pass: claim everything currently queued, then process it with
// per-session ordering and bounded cross-session concurrency. Returns the
// number of events processed.
pub fn drain_queue_once(
    state_root: &Path,
    engine: &Arc<DialogEngine>,
    max_concurrency: usize,
) -> Result<usize, String> {
    let queue_paths = QueuePaths::from_state_root(state_root);
    let mut scheduler = PerKeyScheduler::default();
    let (result_tx, result_rx) = mpsc::channel::<DrainTaskCompletion>();
    let mut in_flight = 0usize;
    let mut processed = 0usize;

    while let Some(claimed) = queue::claim_oldest(&queue_paths).map_err(|e| e.to_string())? {
        let key = queue::derive_ordering_key(&claimed.payload);
        scheduler.enqueue(key, claimed);
    }

    loop {
        let available = max_concurrency.saturating_sub(in_flight);
        if available > 0 {
            for scheduled in scheduler.dequeue_runnable(available) {
                let tx = result_tx.clone();
                let engine = Arc::clone(engine);
                let paths = queue_paths.clone();
                let _ = thread::spawn(move || {
                    let error = process_claimed_event(&paths, &engine, scheduled.value).err();
                    let _ = tx.send(DrainTaskCompletion {
                        key: scheduled.key,
                        error,
                    });
                });
                in_flight += 1;
            }
        }

        if in_flight == 0 {
            break;
        }

        let completion = match result_rx.recv_timeout(Duration::from_millis(DRAIN_POLL_MS)) {
            Ok(done) => done,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err("drain worker completion channel disconnected".to_string())
            }
        };
        in_flight = in_flight.saturating_sub(1);
        scheduler.complete(&completion.key);
        match completion.error {
            None => processed += 1,
            Some(error) => return Err(error),
        }
    }

    Ok(processed)
}

fn process_claimed_event(
    paths: &QueuePaths,
    engine: &DialogEngine,
    claimed: ClaimedEvent,
) -> Result<(), String> {
    let reply = engine.handle_event(&claimed.payload);
    queue::complete_success(paths, &claimed, &reply).map_err(|e| e.to_string())?;
    Ok(())
}

// The long-running mode behind `sitelog run`: recover stranded events, then
// poll the queue until the stop file appears. Drain failures are logged and
// the loop keeps serving other events.
pub fn run_event_loop(
    state_root: &Path,
    engine: &Arc<DialogEngine>,
    poll_interval: Duration,
) -> Result<usize, String> {
    let paths = StatePaths::new(state_root);
    let recovered = recover_processing_entries(state_root)?;
    if !recovered.is_empty() {
        append_runtime_log(
            &paths,
            "info",
            "queue_recovered",
            &format!("re-queued {} stranded event(s)", recovered.len()),
        );
    }

    let mut total = 0usize;
    loop {
        if paths.stop_signal_path().exists() {
            let _ = fs::remove_file(paths.stop_signal_path());
            append_runtime_log(&paths, "info", "run_stopped", "stop signal received");
            break;
        }

        match drain_queue_once(state_root, engine, DRAIN_MAX_CONCURRENCY) {
            Ok(0) => thread::sleep(poll_interval),
            Ok(count) => {
                total += count;
                append_runtime_log(
                    &paths,
                    "info",
                    "drain_pass",
                    &format!("processed {count} event(s)"),
                );
            }
            Err(error) => {
                append_runtime_log(&paths, "error", "drain_failed", &error);
                thread::sleep(poll_interval);
            }
        }
    }

    Ok(total)
}

pub fn request_stop(state_root: &Path) -> Result<(), String> {
    let paths = StatePaths::new(state_root);
    fs::write(paths.stop_signal_path(), b"stop")
        .map_err(|e| format!("failed to write stop signal: {e}"))
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
