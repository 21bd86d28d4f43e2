use crate::dialog::event::{IncomingEvent, OutgoingReply};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid queue payload in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePaths {
    pub incoming: PathBuf,
    pub processing: PathBuf,
    pub outgoing: PathBuf,
}

impl QueuePaths {
    pub fn from_state_root(state_root: &Path) -> Self {
        Self {
            incoming: state_root.join("queue/incoming"),
            processing: state_root.join("queue/processing"),
            outgoing: state_root.join("queue/outgoing"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClaimedEvent {
    pub incoming_path: PathBuf,
    pub processing_path: PathBuf,
    pub payload: IncomingEvent,
}

// Events for one session must never run concurrently; events for distinct
// sessions may. The key is the session scoped by its channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderingKey {
    channel: String,
    session_id: String,
}

pub fn derive_ordering_key(payload: &IncomingEvent) -> OrderingKey {
    OrderingKey {
        channel: payload.channel.clone(),
        session_id: payload.session_id.clone(),
    }
}

#[derive(Debug)]
pub struct Scheduled<T> {
    pub key: OrderingKey,
    pub value: T,
}

#[derive(Debug)]
pub struct PerKeyScheduler<T> {
    pending: VecDeque<Scheduled<T>>,
    active_keys: HashSet<OrderingKey>,
}

impl<T> Default for PerKeyScheduler<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            active_keys: HashSet::new(),
        }
    }
}

impl<T> PerKeyScheduler<T> {
    pub fn enqueue(&mut self, key: OrderingKey, value: T) {
        self.pending.push_back(Scheduled { key, value });
    }

    // Hands out up to `max_items` entries whose keys are idle, preserving
    // arrival order within each key.
    pub fn dequeue_runnable(&mut self, max_items: usize) -> Vec<Scheduled<T>> {
        if max_items == 0 || self.pending.is_empty() {
            return Vec::new();
        }

        let mut selected = Vec::new();
        let mut selected_keys = HashSet::new();
        let mut remaining = VecDeque::new();

        while let Some(item) = self.pending.pop_front() {
            let key_busy =
                self.active_keys.contains(&item.key) || selected_keys.contains(&item.key);
            if !key_busy && selected.len() < max_items {
                selected_keys.insert(item.key.clone());
                self.active_keys.insert(item.key.clone());
                selected.push(item);
            } else {
                remaining.push_back(item);
            }
        }

        self.pending = remaining;
        selected
    }

    pub fn complete(&mut self, key: &OrderingKey) {
        self.active_keys.remove(key);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active_keys.len()
    }
}

pub fn enqueue_incoming(
    paths: &QueuePaths,
    event: &IncomingEvent,
) -> Result<PathBuf, QueueError> {
    let path = paths.incoming.join(incoming_filename(event));
    let body = serde_json::to_vec_pretty(event).map_err(|e| parse_err(&path, e))?;
    fs::write(&path, body).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

// Timestamp-first names keep the lexicographic fallback ordering aligned
// with arrival order when modification times tie.
pub fn incoming_filename(event: &IncomingEvent) -> String {
    format!(
        "{:020}_{}.json",
        event.timestamp.max(0),
        sanitize_filename_component(&event.event_id)
    )
}

pub fn outgoing_filename(channel: &str, event_id: &str, timestamp: i64) -> String {
    format!(
        "{}_{}_{}.json",
        sanitize_filename_component(channel),
        sanitize_filename_component(event_id),
        timestamp
    )
}

pub fn is_valid_queue_json_filename(filename: &str) -> bool {
    let path = Path::new(filename);
    if path.extension().and_then(|v| v.to_str()) != Some("json") {
        return false;
    }
    if let Some(stem) = path.file_stem().and_then(|v| v.to_str()) {
        return !stem.trim().is_empty();
    }
    false
}

fn sanitize_filename_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn io_err(path: &Path, source: std::io::Error) -> QueueError {
    QueueError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn parse_err(path: &Path, source: serde_json::Error) -> QueueError {
    QueueError::Parse {
        path: path.display().to_string(),
        source,
    }
}

fn sorted_paths(dir: &Path) -> Result<Vec<PathBuf>, QueueError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if !is_valid_queue_json_filename(name) {
                continue;
            }
        }
        let metadata = entry.metadata().map_err(|e| io_err(&path, e))?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((modified, path));
    }

    entries.sort_by(|(a_time, a_path), (b_time, b_path)| {
        a_time
            .cmp(b_time)
            .then_with(|| a_path.file_name().cmp(&b_path.file_name()))
    });

    Ok(entries.into_iter().map(|(_, path)| path).collect())
}

pub fn sorted_outgoing_paths(paths: &QueuePaths) -> Result<Vec<PathBuf>, QueueError> {
    sorted_paths(&paths.outgoing)
}

static REQUEUE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_requeue_name(original_name: &str) -> String {
    let path = Path::new(original_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("event");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
    let counter = REQUEUE_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    format!("{stem}_requeue_{counter}.{ext}")
}

fn requeue_processing_file(
    paths: &QueuePaths,
    processing_path: &Path,
) -> Result<PathBuf, QueueError> {
    let file_name = processing_path.file_name().ok_or_else(|| {
        io_err(
            processing_path,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "processing file missing name",
            ),
        )
    })?;
    let file_name = file_name.to_string_lossy();
    let incoming = paths.incoming.join(unique_requeue_name(&file_name));
    fs::rename(processing_path, &incoming).map_err(|e| io_err(processing_path, e))?;
    Ok(incoming)
}

// Claiming renames the file into processing/ first; a crash between claim
// and completion leaves the event there for startup recovery.
pub fn claim_oldest(paths: &QueuePaths) -> Result<Option<ClaimedEvent>, QueueError> {
    for incoming_path in sorted_paths(&paths.incoming)? {
        let Some(file_name) = incoming_path.file_name() else {
            continue;
        };
        let processing_path = paths.processing.join(file_name);

        match fs::rename(&incoming_path, &processing_path) {
            Ok(_) => {
                let raw = match fs::read_to_string(&processing_path) {
                    Ok(raw) => raw,
                    Err(err) => {
                        requeue_processing_file(paths, &processing_path)?;
                        return Err(io_err(&processing_path, err));
                    }
                };
                let payload: IncomingEvent = match serde_json::from_str(&raw) {
                    Ok(payload) => payload,
                    Err(err) => {
                        requeue_processing_file(paths, &processing_path)?;
                        return Err(parse_err(&processing_path, err));
                    }
                };
                return Ok(Some(ClaimedEvent {
                    incoming_path,
                    processing_path,
                    payload,
                }));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&incoming_path, err)),
        }
    }

    Ok(None)
}

pub fn complete_success(
    paths: &QueuePaths,
    claimed: &ClaimedEvent,
    reply: &OutgoingReply,
) -> Result<PathBuf, QueueError> {
    let filename = outgoing_filename(&reply.channel, &reply.event_id, reply.timestamp);
    let out_path = paths.outgoing.join(filename);
    let body = serde_json::to_string_pretty(reply).map_err(|e| parse_err(&out_path, e))?;

    fs::write(&out_path, body).map_err(|e| io_err(&out_path, e))?;
    fs::remove_file(&claimed.processing_path).map_err(|e| io_err(&claimed.processing_path, e))?;
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::event::EventPayload;
    use tempfile::tempdir;

    fn sample_event(event_id: &str, session_id: &str, timestamp: i64) -> IncomingEvent {
        IncomingEvent {
            channel: "local".to_string(),
            session_id: session_id.to_string(),
            sender: "cli".to_string(),
            timestamp,
            event_id: event_id.to_string(),
            payload: EventPayload::Text {
                text: "hello".to_string(),
            },
        }
    }

    fn queue_dirs(root: &Path) -> QueuePaths {
        let paths = QueuePaths::from_state_root(root);
        fs::create_dir_all(&paths.incoming).expect("incoming");
        fs::create_dir_all(&paths.processing).expect("processing");
        fs::create_dir_all(&paths.outgoing).expect("outgoing");
        paths
    }

    #[test]
    fn claim_returns_events_oldest_first() {
        let tmp = tempdir().expect("tempdir");
        let paths = queue_dirs(tmp.path());

        enqueue_incoming(&paths, &sample_event("a", "s-1", 1)).expect("enqueue a");
        enqueue_incoming(&paths, &sample_event("b", "s-1", 2)).expect("enqueue b");

        let first = claim_oldest(&paths).expect("claim").expect("first");
        assert_eq!(first.payload.event_id, "a");
        let second = claim_oldest(&paths).expect("claim").expect("second");
        assert_eq!(second.payload.event_id, "b");
        assert!(claim_oldest(&paths).expect("claim").is_none());
    }

    #[test]
    fn malformed_payload_is_requeued_and_reported() {
        let tmp = tempdir().expect("tempdir");
        let paths = queue_dirs(tmp.path());
        fs::write(paths.incoming.join("bad.json"), "{not json").expect("write bad");

        let err = claim_oldest(&paths).expect_err("parse failure");
        assert!(matches!(err, QueueError::Parse { .. }));
        // The file is back in incoming, not lost in processing.
        let names: Vec<String> = fs::read_dir(&paths.incoming)
            .expect("read incoming")
            .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].contains("requeue"));
        assert_eq!(fs::read_dir(&paths.processing).expect("read").count(), 0);
    }

    #[test]
    fn complete_success_writes_reply_and_clears_processing() {
        let tmp = tempdir().expect("tempdir");
        let paths = queue_dirs(tmp.path());
        enqueue_incoming(&paths, &sample_event("a", "s-1", 1)).expect("enqueue");

        let claimed = claim_oldest(&paths).expect("claim").expect("claimed");
        let reply = OutgoingReply::to_event(&claimed.payload, "ok".to_string());
        let out_path = complete_success(&paths, &claimed, &reply).expect("complete");

        assert!(out_path.exists());
        assert!(!claimed.processing_path.exists());
        let parsed: OutgoingReply =
            serde_json::from_str(&fs::read_to_string(&out_path).expect("read"))
                .expect("parse reply");
        assert_eq!(parsed.text, "ok");
    }

    #[test]
    fn scheduler_serializes_same_session_and_parallelizes_distinct_ones() {
        let mut scheduler = PerKeyScheduler::default();
        let a1 = sample_event("a1", "s-a", 1);
        let a2 = sample_event("a2", "s-a", 2);
        let b1 = sample_event("b1", "s-b", 3);
        scheduler.enqueue(derive_ordering_key(&a1), a1);
        scheduler.enqueue(derive_ordering_key(&a2), a2);
        scheduler.enqueue(derive_ordering_key(&b1), b1);

        let batch = scheduler.dequeue_runnable(4);
        let ids: Vec<&str> = batch.iter().map(|s| s.value.event_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b1"], "second event for s-a must wait");
        assert_eq!(scheduler.pending_len(), 1);

        // Nothing for s-a is runnable until the first completes.
        assert!(scheduler.dequeue_runnable(4).is_empty());
        scheduler.complete(&batch[0].key);
        let batch = scheduler.dequeue_runnable(4);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].value.event_id, "a2");
    }

    #[test]
    fn filenames_are_sanitized_and_validated() {
        assert_eq!(outgoing_filename("local", "evt/1", 9), "local_evt_1_9.json");
        assert!(is_valid_queue_json_filename("a.json"));
        assert!(!is_valid_queue_json_filename(".json"));
        assert!(!is_valid_queue_json_filename("a.txt"));
    }
}
