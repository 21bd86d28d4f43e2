use crate::dialog::event::{
    ButtonAction, Command, EventPayload, IncomingEvent, OutgoingReply, ReplyButton,
};
use crate::dialog::session::{normalize_site_id, DialogState, Session, SITE_ID_HINT};
use crate::geocode::{RegionResolver, RegionResult};
use crate::roster::Roster;
use crate::timeline::{TimeOfDay, TimelineError};
use crate::worklog::WorkLogStore;

pub struct DialogDeps<'a> {
    pub roster: &'a Roster,
    pub geocoder: &'a dyn RegionResolver,
    pub store: &'a WorkLogStore,
    pub stage_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Discard,
}

#[derive(Debug, Clone)]
pub struct LogNote {
    pub level: &'static str,
    pub event: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct HandleResult {
    pub reply: OutgoingReply,
    pub disposition: Disposition,
    pub notes: Vec<LogNote>,
}

impl HandleResult {
    fn keep(reply: OutgoingReply) -> Self {
        Self {
            reply,
            disposition: Disposition::Keep,
            notes: Vec::new(),
        }
    }

    fn discard(reply: OutgoingReply) -> Self {
        Self {
            reply,
            disposition: Disposition::Discard,
            notes: Vec::new(),
        }
    }

    fn with_note(mut self, level: &'static str, event: &'static str, message: String) -> Self {
        self.notes.push(LogNote {
            level,
            event,
            message,
        });
        self
    }
}

// One inbound event against one checked-out session. Commands are resolved
// by the engine before this point; everything else dispatches on the current
// state, and anything a state does not expect re-prompts that state's
// instructions without touching committed session fields.
pub fn handle_event(
    session: &mut Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
) -> HandleResult {
    match session.state {
        DialogState::AwaitStartConfirm => handle_start_confirm(session, event),
        DialogState::AwaitRegion => handle_region(session, event, deps),
        DialogState::AwaitForemanSelection => handle_foreman_selection(session, event, deps),
        DialogState::AwaitTeamSelection => handle_team_selection(session, event),
        DialogState::AwaitSiteId => handle_site_id(session, event, deps),
        DialogState::AwaitStageSelection => handle_stage_selection(session, event, deps),
        DialogState::AwaitStageStartTime => handle_stage_start_time(session, event, deps),
        DialogState::AwaitStageAction => handle_stage_action(session, event, deps),
        DialogState::AwaitStageEndTime => handle_stage_end_time(session, event, deps),
        DialogState::Completed | DialogState::Cancelled => HandleResult::discard(
            OutgoingReply::to_event(event, "This session has ended. Send /start to begin again.".to_string()),
        ),
    }
}

fn button(event: &IncomingEvent) -> Option<ButtonAction> {
    match &event.payload {
        EventPayload::Button { action } => ButtonAction::parse(action),
        _ => None,
    }
}

fn text(event: &IncomingEvent) -> Option<&str> {
    match &event.payload {
        EventPayload::Text { text } => {
            let trimmed = text.trim();
            // A typed slash command should never be mistaken for state input.
            if Command::parse(trimmed).is_some() {
                return None;
            }
            Some(trimmed).filter(|t| !t.is_empty())
        }
        _ => None,
    }
}

fn handle_start_confirm(session: &mut Session, event: &IncomingEvent) -> HandleResult {
    if button(event) == Some(ButtonAction::StartConfirm) {
        session.state = DialogState::AwaitRegion;
        return HandleResult::keep(region_prompt(event));
    }
    HandleResult::keep(start_prompt(session, event))
}

fn handle_region(
    session: &mut Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
) -> HandleResult {
    match &event.payload {
        EventPayload::Location {
            latitude,
            longitude,
        } => match deps.geocoder.resolve_region(*latitude, *longitude) {
            RegionResult::Found(name) => {
                session.pending_region = Some(name.clone());
                let reply = OutgoingReply::to_event(
                    event,
                    format!(
                        "Coordinates received: {latitude}, {longitude}.\nDetected region: {name}. Confirm?"
                    ),
                )
                .with_buttons(vec![vec![
                    ReplyButton::new("Confirm", ButtonAction::RegionConfirm),
                    ReplyButton::new("Edit", ButtonAction::RegionEdit),
                ]]);
                HandleResult::keep(reply)
            }
            RegionResult::Undetermined => HandleResult::keep(OutgoingReply::to_event(
                event,
                "Could not determine a region from that location. Type the region name:".to_string(),
            )),
            RegionResult::Error => HandleResult::keep(OutgoingReply::to_event(
                event,
                "Region lookup is unavailable right now. Type the region name:".to_string(),
            ))
            .with_note(
                "warn",
                "geocode_failed",
                format!("session {}: reverse geocoding failed", session.id),
            ),
        },
        _ => {
            if let Some(action) = button(event) {
                match action {
                    ButtonAction::RegionConfirm => {
                        if let Some(region) = session.pending_region.take() {
                            return commit_region(session, event, deps, region);
                        }
                    }
                    ButtonAction::RegionEdit => {
                        session.pending_region = None;
                        return HandleResult::keep(OutgoingReply::to_event(
                            event,
                            "Type the region name:".to_string(),
                        ));
                    }
                    _ => {}
                }
            }
            if let Some(manual) = text(event) {
                let region = manual.to_string();
                return commit_region(session, event, deps, region);
            }
            HandleResult::keep(reprompt(session, event, deps))
        }
    }
}

fn commit_region(
    session: &mut Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
    region: String,
) -> HandleResult {
    let foremen = deps.roster.foremen_in(&region);
    if foremen.is_empty() {
        session.region = None;
        session.pending_region = None;
        let reply = OutgoingReply::to_event(
            event,
            format!(
                "No foremen are registered for `{region}`. Share another location or type a different region."
            ),
        )
        .with_buttons(vec![vec![ReplyButton::request_location("Share location")]]);
        return HandleResult::keep(reply);
    }

    session.foreman_candidates = foremen.into_iter().map(|e| e.name).collect();
    session.region = Some(region);
    session.pending_region = None;
    session.state = DialogState::AwaitForemanSelection;
    HandleResult::keep(foreman_prompt(session, event))
}

fn handle_foreman_selection(
    session: &mut Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
) -> HandleResult {
    if let Some(ButtonAction::Foreman(index)) = button(event) {
        if let Some(name) = session.foreman_candidates.get(index).cloned() {
            session.foreman = Some(name.clone());
            let region = session.region.clone().unwrap_or_default();
            let crew = deps.roster.crew_in(&region);
            if crew.is_empty() {
                // Empty crew roster skips team selection entirely.
                session.state = DialogState::AwaitSiteId;
                return HandleResult::keep(OutgoingReply::to_event(
                    event,
                    format!(
                        "Foreman: {name}. No crew is registered for {region}; continuing without a team.\nEnter the site id ({SITE_ID_HINT}):"
                    ),
                ));
            }
            session.crew_candidates = crew.into_iter().map(|e| e.name).collect();
            session.state = DialogState::AwaitTeamSelection;
            return HandleResult::keep(team_prompt(session, event));
        }
    }
    HandleResult::keep(reprompt(session, event, deps))
}

fn handle_team_selection(session: &mut Session, event: &IncomingEvent) -> HandleResult {
    match button(event) {
        Some(ButtonAction::Member(index)) => {
            if let Some(name) = session.crew_candidates.get(index).cloned() {
                if !session.team.remove(&name) {
                    session.team.insert(name);
                }
            }
            HandleResult::keep(team_prompt(session, event))
        }
        Some(ButtonAction::TeamDone) => {
            session.state = DialogState::AwaitSiteId;
            HandleResult::keep(site_id_prompt(session, event))
        }
        _ => HandleResult::keep(team_prompt(session, event)),
    }
}

fn handle_site_id(
    session: &mut Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
) -> HandleResult {
    if let Some(raw) = text(event) {
        return match normalize_site_id(raw) {
            Ok(site_id) => {
                session.site_id = Some(site_id);
                session.state = DialogState::AwaitStageSelection;
                HandleResult::keep(stage_selection_prompt(session, event, deps))
            }
            Err(message) => HandleResult::keep(OutgoingReply::to_event(
                event,
                format!("{message}. Enter the site id again:"),
            )),
        };
    }
    HandleResult::keep(reprompt(session, event, deps))
}

fn handle_stage_selection(
    session: &mut Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
) -> HandleResult {
    if let Some(ButtonAction::Stage(stage)) = button(event) {
        if stage >= 1 && stage <= deps.stage_count {
            if session.timeline.contains(stage) {
                let mut reply = stage_selection_prompt(session, event, deps);
                reply.text = format!("Stage {stage} is already recorded.\n{}", reply.text);
                return HandleResult::keep(reply);
            }
            session.current_stage = Some(stage);
            session.state = DialogState::AwaitStageStartTime;
            return HandleResult::keep(stage_start_prompt(session, event));
        }
    }
    HandleResult::keep(reprompt(session, event, deps))
}

fn handle_stage_start_time(
    session: &mut Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
) -> HandleResult {
    match button(event) {
        Some(ButtonAction::StartTimeConfirm) => {
            return open_stage_at(session, event, deps, TimeOfDay::now_local());
        }
        Some(ButtonAction::StartTimeEdit) => {
            return HandleResult::keep(OutgoingReply::to_event(
                event,
                "Enter the start time (HH:MM):".to_string(),
            ));
        }
        _ => {}
    }
    if let Some(raw) = text(event) {
        return match TimeOfDay::parse(raw) {
            Ok(start) => open_stage_at(session, event, deps, start),
            Err(message) => HandleResult::keep(OutgoingReply::to_event(
                event,
                format!("{message}. Enter the start time (HH:MM):"),
            )),
        };
    }
    HandleResult::keep(reprompt(session, event, deps))
}

fn open_stage_at(
    session: &mut Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
    start: TimeOfDay,
) -> HandleResult {
    let Some(stage) = session.current_stage else {
        return abort_session(session, event, "no stage selected at start-time entry");
    };
    match session.timeline.open_stage(stage, start) {
        Ok(()) => {
            session.state = DialogState::AwaitStageAction;
            let reply = OutgoingReply::to_event(
                event,
                format!("Stage {stage} started at {start}."),
            )
            .with_buttons(stage_action_buttons());
            HandleResult::keep(reply)
        }
        Err(TimelineError::EndBeforeStart { start: open_start, .. }) => {
            HandleResult::keep(OutgoingReply::to_event(
                event,
                format!(
                    "{start} is earlier than the open stage's start {open_start}. Enter a later time (HH:MM):"
                ),
            ))
        }
        Err(TimelineError::DuplicateStage(stage)) => {
            session.current_stage = None;
            session.state = DialogState::AwaitStageSelection;
            let mut reply = stage_selection_prompt(session, event, deps);
            reply.text = format!("Stage {stage} is already recorded.\n{}", reply.text);
            HandleResult::keep(reply)
        }
        Err(TimelineError::NoOpenStage) => {
            abort_session(session, event, "timeline rejected open_stage with NoOpenStage")
        }
    }
}

fn handle_stage_action(
    session: &mut Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
) -> HandleResult {
    match button(event) {
        Some(ButtonAction::NextStage) => {
            session.current_stage = None;
            session.state = DialogState::AwaitStageSelection;
            HandleResult::keep(stage_selection_prompt(session, event, deps))
        }
        Some(ButtonAction::CompleteWork) => {
            session.state = DialogState::AwaitStageEndTime;
            HandleResult::keep(stage_end_prompt(event))
        }
        _ => HandleResult::keep(reprompt(session, event, deps)),
    }
}

fn handle_stage_end_time(
    session: &mut Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
) -> HandleResult {
    match button(event) {
        Some(ButtonAction::EndTimeConfirm) => {
            return close_and_persist(session, event, deps, TimeOfDay::now_local());
        }
        Some(ButtonAction::EndTimeEdit) => {
            return HandleResult::keep(OutgoingReply::to_event(
                event,
                "Enter the end time (HH:MM):".to_string(),
            ));
        }
        _ => {}
    }
    if let Some(raw) = text(event) {
        return match TimeOfDay::parse(raw) {
            Ok(end) => close_and_persist(session, event, deps, end),
            Err(message) => HandleResult::keep(OutgoingReply::to_event(
                event,
                format!("{message}. Enter the end time (HH:MM):"),
            )),
        };
    }
    HandleResult::keep(reprompt(session, event, deps))
}

fn close_and_persist(
    session: &mut Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
    end: TimeOfDay,
) -> HandleResult {
    match session.timeline.close_current(end) {
        Err(TimelineError::NoOpenStage) => {
            // The controller let the dialog reach end-time entry without an
            // open stage: a logic fault, fatal to this session.
            abort_session(session, event, "close_current found no open stage")
        }
        Err(TimelineError::EndBeforeStart { start, .. }) => {
            HandleResult::keep(OutgoingReply::to_event(
                event,
                format!(
                    "{end} is earlier than the stage's start {start}. Enter a later time (HH:MM):"
                ),
            ))
        }
        Err(TimelineError::DuplicateStage(_)) => {
            abort_session(session, event, "close_current reported a duplicate stage")
        }
        Ok(_) => {
            let records = match session.work_records() {
                Ok(records) => records,
                Err(message) => return abort_session(session, event, &message),
            };
            match deps.store.append_records(&records) {
                Ok(count) => {
                    session.state = DialogState::Completed;
                    let site_id = session.site_id.clone().unwrap_or_default();
                    let region = session.region.clone().unwrap_or_default();
                    HandleResult::discard(OutgoingReply::to_event(
                        event,
                        format!(
                            "Work complete. Saved {count} stage record(s) for site {site_id} in {region}."
                        ),
                    ))
                    .with_note(
                        "info",
                        "session_persisted",
                        format!("session {}: saved {count} stage record(s)", session.id),
                    )
                }
                Err(err) => HandleResult::discard(OutgoingReply::to_event(
                    event,
                    "Failed to save the work log; the session has been discarded. Notify the administrator."
                        .to_string(),
                ))
                .with_note(
                    "error",
                    "persist_failed",
                    format!("session {}: {err}", session.id),
                ),
            }
        }
    }
}

fn abort_session(session: &mut Session, event: &IncomingEvent, detail: &str) -> HandleResult {
    session.state = DialogState::Cancelled;
    HandleResult::discard(OutgoingReply::to_event(
        event,
        "Something went wrong on our side and the session was aborted. Send /start to begin again."
            .to_string(),
    ))
    .with_note(
        "error",
        "session_aborted",
        format!("session {}: {detail}", session.id),
    )
}

// Re-prompts re-issue the current state's instructions without error detail.
fn reprompt(session: &Session, event: &IncomingEvent, deps: &DialogDeps<'_>) -> OutgoingReply {
    match session.state {
        DialogState::AwaitStartConfirm => start_prompt(session, event),
        DialogState::AwaitRegion => match &session.pending_region {
            Some(name) => OutgoingReply::to_event(
                event,
                format!("Detected region: {name}. Confirm?"),
            )
            .with_buttons(vec![vec![
                ReplyButton::new("Confirm", ButtonAction::RegionConfirm),
                ReplyButton::new("Edit", ButtonAction::RegionEdit),
            ]]),
            None => region_prompt(event),
        },
        DialogState::AwaitForemanSelection => foreman_prompt(session, event),
        DialogState::AwaitTeamSelection => team_prompt(session, event),
        DialogState::AwaitSiteId => site_id_prompt(session, event),
        DialogState::AwaitStageSelection => stage_selection_prompt(session, event, deps),
        DialogState::AwaitStageStartTime => stage_start_prompt(session, event),
        DialogState::AwaitStageAction => OutgoingReply::to_event(
            event,
            "Choose what happens next.".to_string(),
        )
        .with_buttons(stage_action_buttons()),
        DialogState::AwaitStageEndTime => stage_end_prompt(event),
        DialogState::Completed | DialogState::Cancelled => OutgoingReply::to_event(
            event,
            "This session has ended. Send /start to begin again.".to_string(),
        ),
    }
}

pub fn start_prompt(session: &Session, event: &IncomingEvent) -> OutgoingReply {
    OutgoingReply::to_event(
        event,
        format!(
            "Recording construction-site work for {}. Press Begin to start.",
            session.date
        ),
    )
    .with_buttons(vec![vec![ReplyButton::new("Begin", ButtonAction::StartConfirm)]])
}

fn region_prompt(event: &IncomingEvent) -> OutgoingReply {
    OutgoingReply::to_event(
        event,
        "Share your location to detect the region, or type the region name:".to_string(),
    )
    .with_buttons(vec![vec![ReplyButton::request_location("Share location")]])
}

fn foreman_prompt(session: &Session, event: &IncomingEvent) -> OutgoingReply {
    let buttons = session
        .foreman_candidates
        .iter()
        .enumerate()
        .map(|(index, name)| vec![ReplyButton::new(name, ButtonAction::Foreman(index))])
        .collect();
    OutgoingReply::to_event(event, "Select the supervising foreman:".to_string())
        .with_buttons(buttons)
}

fn team_prompt(session: &Session, event: &IncomingEvent) -> OutgoingReply {
    let mut buttons: Vec<Vec<ReplyButton>> = session
        .crew_candidates
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let mark = if session.team.contains(name) { "[x]" } else { "[ ]" };
            vec![ReplyButton::new(
                &format!("{mark} {name}"),
                ButtonAction::Member(index),
            )]
        })
        .collect();
    buttons.push(vec![ReplyButton::new("Done", ButtonAction::TeamDone)]);
    OutgoingReply::to_event(
        event,
        "Select crew members, then press Done (a session may have no crew):".to_string(),
    )
    .with_buttons(buttons)
}

fn site_id_prompt(_session: &Session, event: &IncomingEvent) -> OutgoingReply {
    OutgoingReply::to_event(event, format!("Enter the site id ({SITE_ID_HINT}):"))
}

fn stage_selection_prompt(
    session: &Session,
    event: &IncomingEvent,
    deps: &DialogDeps<'_>,
) -> OutgoingReply {
    let buttons = (1..=deps.stage_count)
        .map(|stage| {
            let label = if session.timeline.contains(stage) {
                format!("Stage {stage} (recorded)")
            } else {
                format!("Stage {stage}")
            };
            vec![ReplyButton::new(&label, ButtonAction::Stage(stage))]
        })
        .collect();
    OutgoingReply::to_event(event, "Select the next work stage:".to_string())
        .with_buttons(buttons)
}

fn stage_start_prompt(session: &Session, event: &IncomingEvent) -> OutgoingReply {
    let stage = session.current_stage.unwrap_or_default();
    OutgoingReply::to_event(
        event,
        format!("Stage {stage}: record the start time, or type it as HH:MM."),
    )
    .with_buttons(vec![vec![
        ReplyButton::new("Use current time", ButtonAction::StartTimeConfirm),
        ReplyButton::new("Enter time", ButtonAction::StartTimeEdit),
    ]])
}

fn stage_action_buttons() -> Vec<Vec<ReplyButton>> {
    vec![vec![
        ReplyButton::new("Next stage", ButtonAction::NextStage),
        ReplyButton::new("Complete work", ButtonAction::CompleteWork),
    ]]
}

fn stage_end_prompt(event: &IncomingEvent) -> OutgoingReply {
    OutgoingReply::to_event(
        event,
        "Record the end time of the current stage, or type it as HH:MM.".to_string(),
    )
    .with_buttons(vec![vec![
        ReplyButton::new("Use current time", ButtonAction::EndTimeConfirm),
        ReplyButton::new("Enter time", ButtonAction::EndTimeEdit),
    ]])
}
