use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Cancel,
}

impl Command {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().trim_start_matches('/').to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Command { command: String },
    Text { text: String },
    Location { latitude: f64, longitude: f64 },
    Button { action: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingEvent {
    pub channel: String,
    pub session_id: String,
    pub sender: String,
    pub timestamp: i64,
    pub event_id: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

// The opaque action strings carried by button events. Indexes refer to
// positions in the candidate lists the keyboard was rendered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    StartConfirm,
    RegionConfirm,
    RegionEdit,
    Foreman(usize),
    Member(usize),
    TeamDone,
    Stage(u32),
    StartTimeConfirm,
    StartTimeEdit,
    NextStage,
    CompleteWork,
    EndTimeConfirm,
    EndTimeEdit,
}

impl ButtonAction {
    pub fn parse(raw: &str) -> Option<Self> {
        let action = raw.trim();
        match action {
            "start_confirm" => return Some(Self::StartConfirm),
            "region_confirm" => return Some(Self::RegionConfirm),
            "region_edit" => return Some(Self::RegionEdit),
            "team_done" => return Some(Self::TeamDone),
            "start_time_confirm" => return Some(Self::StartTimeConfirm),
            "start_time_edit" => return Some(Self::StartTimeEdit),
            "next_stage" => return Some(Self::NextStage),
            "complete_work" => return Some(Self::CompleteWork),
            "end_time_confirm" => return Some(Self::EndTimeConfirm),
            "end_time_edit" => return Some(Self::EndTimeEdit),
            _ => {}
        }
        if let Some(index) = parse_indexed(action, "foreman_") {
            return Some(Self::Foreman(index));
        }
        if let Some(index) = parse_indexed(action, "member_") {
            return Some(Self::Member(index));
        }
        if let Some(stage) = parse_indexed(action, "stage_") {
            return Some(Self::Stage(stage as u32));
        }
        None
    }

    pub fn encode(self) -> String {
        match self {
            Self::StartConfirm => "start_confirm".to_string(),
            Self::RegionConfirm => "region_confirm".to_string(),
            Self::RegionEdit => "region_edit".to_string(),
            Self::Foreman(index) => format!("foreman_{index}"),
            Self::Member(index) => format!("member_{index}"),
            Self::TeamDone => "team_done".to_string(),
            Self::Stage(stage) => format!("stage_{stage}"),
            Self::StartTimeConfirm => "start_time_confirm".to_string(),
            Self::StartTimeEdit => "start_time_edit".to_string(),
            Self::NextStage => "next_stage".to_string(),
            Self::CompleteWork => "complete_work".to_string(),
            Self::EndTimeConfirm => "end_time_confirm".to_string(),
            Self::EndTimeEdit => "end_time_edit".to_string(),
        }
    }
}

fn parse_indexed(action: &str, prefix: &str) -> Option<usize> {
    let suffix = action.strip_prefix(prefix)?;
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyButton {
    pub label: String,
    pub action: String,
    #[serde(default)]
    pub request_location: bool,
}

impl ReplyButton {
    pub fn new(label: &str, action: ButtonAction) -> Self {
        Self {
            label: label.to_string(),
            action: action.encode(),
            request_location: false,
        }
    }

    pub fn request_location(label: &str) -> Self {
        Self {
            label: label.to_string(),
            action: String::new(),
            request_location: true,
        }
    }
}

// A structured reply: the transport renders text plus button rows. Rendering
// itself is outside this crate; the local chat channel prints rows as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingReply {
    pub channel: String,
    pub session_id: String,
    pub timestamp: i64,
    pub event_id: String,
    pub text: String,
    #[serde(default)]
    pub buttons: Vec<Vec<ReplyButton>>,
}

impl OutgoingReply {
    pub fn to_event(event: &IncomingEvent, text: String) -> Self {
        Self {
            channel: event.channel.clone(),
            session_id: event.session_id.clone(),
            timestamp: event.timestamp,
            event_id: event.event_id.clone(),
            text,
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Vec<ReplyButton>>) -> Self {
        self.buttons = buttons;
        self
    }
}
