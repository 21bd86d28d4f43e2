use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimelineError {
    #[error("stage {0} is already recorded")]
    DuplicateStage(u32),
    #[error("no stage is currently open")]
    NoOpenStage,
    #[error("end time {end} precedes start time {start}")]
    EndBeforeStart { start: TimeOfDay, end: TimeOfDay },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn from_parts(hour: u8, minute: u8) -> Result<Self, String> {
        if hour > 23 || minute > 59 {
            return Err(format!("time {hour}:{minute:02} is out of range"));
        }
        Ok(Self { hour, minute })
    }

    // Accepts `H:MM` or `HH:MM`; the minute group must be exactly two digits.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let (hour_part, minute_part) = trimmed
            .split_once(':')
            .ok_or_else(|| format!("time `{trimmed}` must use the HH:MM format"))?;

        let hour_ok = !hour_part.is_empty()
            && hour_part.len() <= 2
            && hour_part.chars().all(|c| c.is_ascii_digit());
        let minute_ok = minute_part.len() == 2 && minute_part.chars().all(|c| c.is_ascii_digit());
        if !hour_ok || !minute_ok {
            return Err(format!("time `{trimmed}` must use the HH:MM format"));
        }

        let hour: u8 = hour_part
            .parse()
            .map_err(|_| format!("time `{trimmed}` must use the HH:MM format"))?;
        let minute: u8 = minute_part
            .parse()
            .map_err(|_| format!("time `{trimmed}` must use the HH:MM format"))?;
        Self::from_parts(hour, minute).map_err(|_| format!("time `{trimmed}` is out of range"))
    }

    pub fn now_local() -> Self {
        use chrono::Timelike;
        let now = chrono::Local::now();
        Self {
            hour: now.hour() as u8,
            minute: now.minute() as u8,
        }
    }

    pub fn minutes_from_midnight(self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDuration {
    minutes: u32,
}

impl ClockDuration {
    pub fn between(start: TimeOfDay, end: TimeOfDay) -> Result<Self, TimelineError> {
        let start_min = start.minutes_from_midnight();
        let end_min = end.minutes_from_midnight();
        if end_min < start_min {
            return Err(TimelineError::EndBeforeStart { start, end });
        }
        Ok(Self {
            minutes: end_min - start_min,
        })
    }

    pub fn minutes(self) -> u32 {
        self.minutes
    }
}

impl fmt::Display for ClockDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}:00", self.minutes / 60, self.minutes % 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageEntry {
    pub stage: u32,
    pub start: TimeOfDay,
    pub end: Option<TimeOfDay>,
    pub duration: Option<ClockDuration>,
}

// Insertion-ordered stage entries. At most one entry is open at any time;
// opening a stage while another is open closes the open one at the new
// stage's start instant, so recorded stages are contiguous and never overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageTimeline {
    entries: Vec<StageEntry>,
}

impl StageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_stage(&mut self, stage: u32, start: TimeOfDay) -> Result<(), TimelineError> {
        if self.contains(stage) {
            return Err(TimelineError::DuplicateStage(stage));
        }
        if self.open_entry().is_some() {
            self.close_current(start)?;
        }
        self.entries.push(StageEntry {
            stage,
            start,
            end: None,
            duration: None,
        });
        Ok(())
    }

    pub fn close_current(&mut self, end: TimeOfDay) -> Result<&StageEntry, TimelineError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.end.is_none())
            .ok_or(TimelineError::NoOpenStage)?;
        let duration = ClockDuration::between(entry.start, end)?;
        entry.end = Some(end);
        entry.duration = Some(duration);
        Ok(entry)
    }

    pub fn contains(&self, stage: u32) -> bool {
        self.entries.iter().any(|entry| entry.stage == stage)
    }

    pub fn open_entry(&self) -> Option<&StageEntry> {
        self.entries.iter().find(|entry| entry.end.is_none())
    }

    pub fn entries(&self) -> &[StageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(raw: &str) -> TimeOfDay {
        TimeOfDay::parse(raw).expect("parse time")
    }

    #[test]
    fn parse_normalizes_single_digit_hours() {
        assert_eq!(time("9:05").to_string(), "09:05");
        assert_eq!(time("23:59").to_string(), "23:59");
        assert_eq!(time("0:00").to_string(), "00:00");
    }

    #[test]
    fn parse_rejects_malformed_and_out_of_range_times() {
        assert!(TimeOfDay::parse("9:5").is_err(), "minute group must be two digits");
        assert!(TimeOfDay::parse("24:00").is_err());
        assert!(TimeOfDay::parse("12:60").is_err());
        assert!(TimeOfDay::parse("12").is_err());
        assert!(TimeOfDay::parse("").is_err());
        assert!(TimeOfDay::parse("ab:cd").is_err());
        assert!(TimeOfDay::parse("123:00").is_err());
        assert!(TimeOfDay::parse("-1:00").is_err());
    }

    #[test]
    fn opening_a_second_stage_closes_the_first_at_its_start() {
        let mut timeline = StageTimeline::new();
        timeline.open_stage(1, time("09:00")).expect("open stage 1");
        timeline.open_stage(2, time("11:00")).expect("open stage 2");

        let first = &timeline.entries()[0];
        assert_eq!(first.end, Some(time("11:00")));
        assert_eq!(first.duration.expect("duration").to_string(), "2:00:00");
        assert_eq!(timeline.open_entry().expect("open entry").stage, 2);
    }

    #[test]
    fn close_current_records_end_and_duration() {
        let mut timeline = StageTimeline::new();
        timeline.open_stage(1, time("09:00")).expect("open stage 1");
        timeline.open_stage(2, time("11:00")).expect("open stage 2");
        timeline.close_current(time("15:00")).expect("close stage 2");

        let second = &timeline.entries()[1];
        assert_eq!(second.end, Some(time("15:00")));
        assert_eq!(second.duration.expect("duration").to_string(), "4:00:00");
        assert!(timeline.open_entry().is_none());
    }

    #[test]
    fn close_without_open_stage_fails() {
        let mut timeline = StageTimeline::new();
        assert_eq!(
            timeline.close_current(time("10:00")),
            Err(TimelineError::NoOpenStage)
        );
    }

    #[test]
    fn reopening_a_recorded_stage_fails() {
        let mut timeline = StageTimeline::new();
        timeline.open_stage(3, time("08:00")).expect("open stage 3");
        assert_eq!(
            timeline.open_stage(3, time("09:00")),
            Err(TimelineError::DuplicateStage(3))
        );
    }

    #[test]
    fn end_before_start_is_rejected_explicitly() {
        let mut timeline = StageTimeline::new();
        timeline.open_stage(1, time("22:00")).expect("open stage 1");
        let err = timeline
            .close_current(time("01:00"))
            .expect_err("midnight crossing must be rejected");
        assert_eq!(
            err,
            TimelineError::EndBeforeStart {
                start: time("22:00"),
                end: time("01:00"),
            }
        );
        // The entry stays open so the user can supply a corrected time.
        assert!(timeline.open_entry().is_some());
    }

    #[test]
    fn implicit_close_also_rejects_out_of_order_starts() {
        let mut timeline = StageTimeline::new();
        timeline.open_stage(1, time("10:00")).expect("open stage 1");
        assert!(timeline.open_stage(2, time("09:00")).is_err());
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn zero_length_stage_is_allowed() {
        let mut timeline = StageTimeline::new();
        timeline.open_stage(1, time("10:00")).expect("open stage 1");
        let entry = timeline.close_current(time("10:00")).expect("close");
        assert_eq!(entry.duration.expect("duration").to_string(), "0:00:00");
    }
}
