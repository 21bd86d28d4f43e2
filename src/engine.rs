use crate::dialog::controller::{self, DialogDeps, Disposition};
use crate::dialog::event::{Command, EventPayload, IncomingEvent, OutgoingReply};
use crate::dialog::session::Session;
use crate::geocode::RegionResolver;
use crate::roster::Roster;
use crate::runtime::logging::append_log_line;
use crate::worklog::WorkLogStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub const DEFAULT_STAGE_COUNT: u32 = 9;

const SESSION_DATE_FORMAT: &str = "%d.%m.%Y";

// Owns every active session and the collaborators the dialog needs. The
// registry lock is held only to check a session out or back in; geocoding
// and persistence run on the calling worker thread without it, so one slow
// external call never stalls other sessions.
pub struct DialogEngine {
    sessions: Mutex<HashMap<String, Session>>,
    roster: Roster,
    geocoder: Box<dyn RegionResolver>,
    store: WorkLogStore,
    stage_count: u32,
    log_path: Option<PathBuf>,
}

impl DialogEngine {
    pub fn new(
        roster: Roster,
        geocoder: Box<dyn RegionResolver>,
        store: WorkLogStore,
        stage_count: u32,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            roster,
            geocoder,
            store,
            stage_count,
            log_path: None,
        }
    }

    pub fn with_log_path(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    pub fn handle_event(&self, event: &IncomingEvent) -> OutgoingReply {
        match &event.payload {
            EventPayload::Command { command } => match Command::parse(command) {
                Some(Command::Start) => self.start_session(event),
                Some(Command::Cancel) => self.cancel_session(event),
                None => OutgoingReply::to_event(
                    event,
                    "Unknown command. Available commands: /start, /cancel.".to_string(),
                ),
            },
            _ => self.dispatch(event),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().map(|map| map.len()).unwrap_or(0)
    }

    // /start always yields a fresh session; a live one is discarded, the
    // original bot's reset-on-start semantics.
    fn start_session(&self, event: &IncomingEvent) -> OutgoingReply {
        let date = chrono::Local::now().format(SESSION_DATE_FORMAT).to_string();
        let session = Session::new(&event.session_id, &date);
        let reply = controller::start_prompt(&session, event);

        let replaced = match self.sessions.lock() {
            Ok(mut sessions) => sessions.insert(event.session_id.clone(), session).is_some(),
            Err(_) => false,
        };
        if replaced {
            self.log(
                "info",
                "session_restarted",
                &format!("session {}: discarded by a new /start", event.session_id),
            );
        }
        reply
    }

    fn cancel_session(&self, event: &IncomingEvent) -> OutgoingReply {
        let removed = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&event.session_id).is_some(),
            Err(_) => false,
        };
        if removed {
            self.log(
                "info",
                "session_cancelled",
                &format!("session {}: cancelled, nothing saved", event.session_id),
            );
            OutgoingReply::to_event(event, "Session cancelled. Nothing was saved.".to_string())
        } else {
            OutgoingReply::to_event(event, "No active session. Send /start to begin.".to_string())
        }
    }

    fn dispatch(&self, event: &IncomingEvent) -> OutgoingReply {
        let checked_out = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&event.session_id),
            Err(_) => None,
        };
        let Some(mut session) = checked_out else {
            return OutgoingReply::to_event(
                event,
                "No active session. Send /start to begin.".to_string(),
            );
        };

        let deps = DialogDeps {
            roster: &self.roster,
            geocoder: self.geocoder.as_ref(),
            store: &self.store,
            stage_count: self.stage_count,
        };
        let result = controller::handle_event(&mut session, event, &deps);
        for note in &result.notes {
            self.log(note.level, note.event, &note.message);
        }
        if result.disposition == Disposition::Keep {
            if let Ok(mut sessions) = self.sessions.lock() {
                sessions.insert(event.session_id.clone(), session);
            }
        }
        result.reply
    }

    fn log(&self, level: &str, event: &str, message: &str) {
        if let Some(path) = &self.log_path {
            append_log_line(path, level, event, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::session::DialogState;
    use crate::geocode::RegionResult;
    use crate::roster::Employee;
    use tempfile::tempdir;

    struct FixedResolver(RegionResult);

    impl RegionResolver for FixedResolver {
        fn resolve_region(&self, _latitude: f64, _longitude: f64) -> RegionResult {
            self.0.clone()
        }
    }

    fn engine(dir: &std::path::Path) -> DialogEngine {
        let roster = Roster::from_employees(vec![Employee {
            name: "Lead A".to_string(),
            region: "Region-A".to_string(),
            title: "Foreman".to_string(),
        }])
        .expect("roster");
        let store = WorkLogStore::open(&dir.join("worklog.sqlite")).expect("store");
        DialogEngine::new(
            roster,
            Box::new(FixedResolver(RegionResult::Undetermined)),
            store,
            DEFAULT_STAGE_COUNT,
        )
    }

    fn command(session_id: &str, command: &str) -> IncomingEvent {
        IncomingEvent {
            channel: "local".to_string(),
            session_id: session_id.to_string(),
            sender: "cli".to_string(),
            timestamp: 1,
            event_id: format!("evt-{command}"),
            payload: EventPayload::Command {
                command: command.to_string(),
            },
        }
    }

    fn text(session_id: &str, text: &str) -> IncomingEvent {
        IncomingEvent {
            channel: "local".to_string(),
            session_id: session_id.to_string(),
            sender: "cli".to_string(),
            timestamp: 1,
            event_id: format!("evt-{text}"),
            payload: EventPayload::Text {
                text: text.to_string(),
            },
        }
    }

    #[test]
    fn start_creates_a_session_and_cancel_discards_it() {
        let dir = tempdir().expect("tempdir");
        let engine = engine(dir.path());

        let reply = engine.handle_event(&command("u-1", "start"));
        assert!(reply.text.contains("Press Begin"));
        assert_eq!(engine.active_sessions(), 1);

        let reply = engine.handle_event(&command("u-1", "cancel"));
        assert!(reply.text.contains("cancelled"));
        assert_eq!(engine.active_sessions(), 0);
    }

    #[test]
    fn events_without_a_session_prompt_for_start() {
        let dir = tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let reply = engine.handle_event(&text("u-1", "hello"));
        assert!(reply.text.contains("No active session"));
    }

    #[test]
    fn sessions_are_isolated_per_user() {
        let dir = tempdir().expect("tempdir");
        let engine = engine(dir.path());
        engine.handle_event(&command("u-1", "start"));
        engine.handle_event(&command("u-2", "start"));
        assert_eq!(engine.active_sessions(), 2);

        engine.handle_event(&command("u-1", "cancel"));
        assert_eq!(engine.active_sessions(), 1);
    }

    #[test]
    fn restart_replaces_the_live_session() {
        let dir = tempdir().expect("tempdir");
        let engine = engine(dir.path());
        engine.handle_event(&command("u-1", "start"));
        // Advance past the first state, then restart.
        engine.handle_event(&IncomingEvent {
            channel: "local".to_string(),
            session_id: "u-1".to_string(),
            sender: "cli".to_string(),
            timestamp: 1,
            event_id: "evt-b".to_string(),
            payload: EventPayload::Button {
                action: "start_confirm".to_string(),
            },
        });
        engine.handle_event(&command("u-1", "start"));

        let sessions = engine.sessions.lock().expect("lock");
        let session = sessions.get("u-1").expect("session");
        assert_eq!(session.state, DialogState::AwaitStartConfirm);
    }

    #[test]
    fn unknown_commands_are_reported() {
        let dir = tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let reply = engine.handle_event(&command("u-1", "export"));
        assert!(reply.text.contains("Unknown command"));
    }
}
