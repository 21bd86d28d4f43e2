use crate::channels::chat::run_local_chat_session_stdio;
use crate::config::{
    default_config_dir, default_global_config_path, load_global_settings, save_settings, Settings,
};
use crate::engine::DialogEngine;
use crate::roster::Roster;
use crate::runtime::{
    bootstrap_state_root, drain_queue_once, recover_processing_entries, request_stop,
    run_event_loop, StatePaths, DRAIN_MAX_CONCURRENCY,
};
use crate::worklog::WorkLogStore;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const RUN_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_RECORDS_LIMIT: usize = 20;

const SAMPLE_ROSTER: &str = "\
# Employee roster: one entry per employee.
# An employee whose title starts with `foreman` (any case) is offered as a
# supervising foreman; everyone else in the region is a crew candidate.
employees:
  - name: Example Foreman
    region: Example-Region
    title: Foreman
  - name: Example Crew Member
    region: Example-Region
    title: Rigger
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Init,
    Chat,
    Drain,
    Run,
    Stop,
    Records,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "init" => CliVerb::Init,
        "chat" => CliVerb::Chat,
        "drain" => CliVerb::Drain,
        "run" => CliVerb::Run,
        "stop" => CliVerb::Stop,
        "records" => CliVerb::Records,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  init                  Write a default config and sample roster".to_string(),
        "  chat                  Drive a work-recording dialog from the terminal".to_string(),
        "  drain                 Process queued events once and exit".to_string(),
        "  run                   Poll the event queue until `sitelog stop`".to_string(),
        "  stop                  Signal a running `sitelog run` to exit".to_string(),
        "  records [--limit N]   Print the most recent work records".to_string(),
        "  help                  Show this help".to_string(),
    ]
}

fn help_text() -> String {
    cli_help_lines().join("\n")
}

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    let Some(verb) = args.first() else {
        return Ok(help_text());
    };
    match parse_cli_verb(verb) {
        CliVerb::Init => cmd_init(),
        CliVerb::Chat => cmd_chat(),
        CliVerb::Drain => cmd_drain(),
        CliVerb::Run => cmd_run(),
        CliVerb::Stop => cmd_stop(),
        CliVerb::Records => cmd_records(&args[1..]),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{verb}`\n\n{}", help_text())),
    }
}

fn cmd_init() -> Result<String, String> {
    let config_dir = default_config_dir().map_err(|e| e.to_string())?;
    let config_path = default_global_config_path().map_err(|e| e.to_string())?;

    let settings = if config_path.exists() {
        load_global_settings().map_err(|e| e.to_string())?
    } else {
        let settings = Settings::with_defaults(&config_dir);
        save_settings(&settings, &config_path).map_err(|e| e.to_string())?;
        settings
    };

    if !settings.roster_path.exists() {
        if let Some(parent) = settings.roster_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }
        fs::write(&settings.roster_path, SAMPLE_ROSTER)
            .map_err(|e| format!("failed to write {}: {e}", settings.roster_path.display()))?;
    }

    let state_root = settings.resolve_state_root().map_err(|e| e.to_string())?;
    bootstrap_state_root(&StatePaths::new(&state_root)).map_err(|e| e.to_string())?;

    Ok(format!(
        "initialized\nconfig={}\nroster={}\nstate_root={}",
        config_path.display(),
        settings.roster_path.display(),
        state_root.display()
    ))
}

fn load_settings_for_command() -> Result<Settings, String> {
    load_global_settings().map_err(|e| format!("{e}\nrun `sitelog init` first"))
}

fn build_engine(settings: &Settings) -> Result<(Arc<DialogEngine>, PathBuf), String> {
    let state_root = settings.resolve_state_root().map_err(|e| e.to_string())?;
    let paths = StatePaths::new(&state_root);
    bootstrap_state_root(&paths).map_err(|e| e.to_string())?;

    let roster = Roster::load(&settings.roster_path).map_err(|e| e.to_string())?;
    let db_path = settings.resolve_worklog_db_path().map_err(|e| e.to_string())?;
    let store = WorkLogStore::open(&db_path).map_err(|e| e.to_string())?;

    let engine = DialogEngine::new(
        roster,
        Box::new(settings.geocode_client()),
        store,
        settings.stage_count,
    )
    .with_log_path(paths.runtime_log_path());
    Ok((Arc::new(engine), state_root))
}

fn cmd_chat() -> Result<String, String> {
    let settings = load_settings_for_command()?;
    let (engine, state_root) = build_engine(&settings)?;
    run_local_chat_session_stdio(&state_root, &engine)
}

fn cmd_drain() -> Result<String, String> {
    let settings = load_settings_for_command()?;
    let (engine, state_root) = build_engine(&settings)?;
    let recovered = recover_processing_entries(&state_root)?;
    let processed = drain_queue_once(&state_root, &engine, DRAIN_MAX_CONCURRENCY)?;
    if recovered.is_empty() {
        Ok(format!("processed {processed} event(s)"))
    } else {
        Ok(format!(
            "recovered {} stranded event(s)\nprocessed {processed} event(s)",
            recovered.len()
        ))
    }
}

fn cmd_run() -> Result<String, String> {
    let settings = load_settings_for_command()?;
    let (engine, state_root) = build_engine(&settings)?;
    let total = run_event_loop(&state_root, &engine, RUN_POLL_INTERVAL)?;
    Ok(format!("run loop stopped after {total} event(s)"))
}

fn cmd_stop() -> Result<String, String> {
    let settings = load_settings_for_command()?;
    let state_root = settings.resolve_state_root().map_err(|e| e.to_string())?;
    request_stop(&state_root)?;
    Ok("stop requested".to_string())
}

fn cmd_records(args: &[String]) -> Result<String, String> {
    let limit = parse_records_limit(args)?;
    let settings = load_settings_for_command()?;
    let db_path = settings.resolve_worklog_db_path().map_err(|e| e.to_string())?;
    let store = WorkLogStore::open(&db_path).map_err(|e| e.to_string())?;

    let total = store.record_count().map_err(|e| e.to_string())?;
    let records = store.recent_records(limit).map_err(|e| e.to_string())?;

    let mut lines = vec![format!("{total} record(s) in {}", db_path.display())];
    for record in records {
        lines.push(format!(
            "{} | {} | {} | site {} | stage {} | {}-{} | {} | team: {}",
            record.date,
            record.region,
            record.foreman,
            record.site_id,
            record.stage,
            record.start_time,
            record.end_time,
            record.duration,
            if record.team.is_empty() { "-" } else { &record.team },
        ));
    }
    Ok(lines.join("\n"))
}

fn parse_records_limit(args: &[String]) -> Result<usize, String> {
    match args {
        [] => Ok(DEFAULT_RECORDS_LIMIT),
        [flag, value] if flag == "--limit" => value
            .parse::<usize>()
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| format!("invalid --limit value `{value}`")),
        _ => Err("usage: records [--limit N]".to_string()),
    }
}
