use crate::timeline::StageTimeline;
use crate::worklog::WorkRecord;
use std::collections::BTreeSet;

pub const SITE_ID_HINT: &str = "two letters followed by six digits, e.g. VD123456";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    AwaitStartConfirm,
    AwaitRegion,
    AwaitForemanSelection,
    AwaitTeamSelection,
    AwaitSiteId,
    AwaitStageSelection,
    AwaitStageStartTime,
    AwaitStageAction,
    AwaitStageEndTime,
    Completed,
    Cancelled,
}

impl DialogState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

// One user's in-progress conversation. Owned exclusively by the dialog
// engine between checkout and checkin; handlers never see two events for
// the same session at once.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub state: DialogState,
    pub date: String,
    pub region: Option<String>,
    pub pending_region: Option<String>,
    pub foreman: Option<String>,
    pub foreman_candidates: Vec<String>,
    pub crew_candidates: Vec<String>,
    pub team: BTreeSet<String>,
    pub site_id: Option<String>,
    pub current_stage: Option<u32>,
    pub timeline: StageTimeline,
}

impl Session {
    pub fn new(id: &str, date: &str) -> Self {
        Self {
            id: id.to_string(),
            state: DialogState::AwaitStartConfirm,
            date: date.to_string(),
            region: None,
            pending_region: None,
            foreman: None,
            foreman_candidates: Vec::new(),
            crew_candidates: Vec::new(),
            team: BTreeSet::new(),
            site_id: None,
            current_stage: None,
            timeline: StageTimeline::new(),
        }
    }

    pub fn team_joined(&self) -> String {
        self.team.iter().cloned().collect::<Vec<_>>().join(", ")
    }

    // Flattens the finished session into output rows. Failing here means the
    // controller let the session reach persistence in an impossible shape.
    pub fn work_records(&self) -> Result<Vec<WorkRecord>, String> {
        let region = self
            .region
            .as_deref()
            .ok_or("session has no committed region")?;
        let foreman = self
            .foreman
            .as_deref()
            .ok_or("session has no selected foreman")?;
        let site_id = self.site_id.as_deref().ok_or("session has no site id")?;
        if let Some(open) = self.timeline.open_entry() {
            return Err(format!("stage {} is still open", open.stage));
        }
        if self.timeline.is_empty() {
            return Err("session has no recorded stages".to_string());
        }

        let team = self.team_joined();
        let mut records = Vec::with_capacity(self.timeline.len());
        for entry in self.timeline.entries() {
            let end = entry
                .end
                .ok_or_else(|| format!("stage {} has no end time", entry.stage))?;
            let duration = entry
                .duration
                .ok_or_else(|| format!("stage {} has no duration", entry.stage))?;
            records.push(WorkRecord {
                date: self.date.clone(),
                region: region.to_string(),
                foreman: foreman.to_string(),
                team: team.clone(),
                site_id: site_id.to_string(),
                stage: entry.stage,
                start_time: entry.start.to_string(),
                end_time: end.to_string(),
                duration: duration.to_string(),
            });
        }
        Ok(records)
    }
}

// Site ids are case-normalized before validation: exactly two uppercase
// Latin letters followed by six digits.
pub fn normalize_site_id(raw: &str) -> Result<String, String> {
    let candidate = raw.trim().to_ascii_uppercase();
    let bytes = candidate.as_bytes();
    let valid = bytes.len() == 8
        && bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..].iter().all(u8::is_ascii_digit);
    if valid {
        Ok(candidate)
    } else {
        Err(format!("site id must be {SITE_ID_HINT}"))
    }
}
