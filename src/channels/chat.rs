use crate::dialog::event::{EventPayload, IncomingEvent, OutgoingReply};
use crate::engine::DialogEngine;
use crate::queue::{self, QueuePaths};
use crate::runtime::drain_queue_once;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const CHAT_EXIT_COMMANDS: &[&str] = &["/exit", "exit", "quit"];
const CHAT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const CHAT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// A stdio stand-in for the chat transport: typed lines become queue events,
// replies are read back from the outgoing queue. A real transport adapter
// works against the same two directories.
pub fn run_local_chat_session_stdio(
    state_root: &Path,
    engine: &Arc<DialogEngine>,
) -> Result<String, String> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut output = stdout.lock();
    run_local_chat_session(state_root, engine, &mut input, &mut output)
}

pub fn run_local_chat_session<R: BufRead, W: Write>(
    state_root: &Path,
    engine: &Arc<DialogEngine>,
    input: &mut R,
    output: &mut W,
) -> Result<String, String> {
    let queue_paths = QueuePaths::from_state_root(state_root);
    let conversation_id = format!("chat-{}", now_nanos());

    writeln!(output, "chat session_id={conversation_id}")
        .map_err(|e| format!("failed to write chat output: {e}"))?;
    writeln!(
        output,
        "commands: /start, /cancel, /location <lat> <lon>, /press <action>; `/exit` to quit"
    )
    .map_err(|e| format!("failed to write chat output: {e}"))?;

    loop {
        write!(output, "you> ").map_err(|e| format!("failed to write chat prompt: {e}"))?;
        output
            .flush()
            .map_err(|e| format!("failed to flush chat prompt: {e}"))?;

        let mut line = String::new();
        let read = input
            .read_line(&mut line)
            .map_err(|e| format!("failed to read chat input: {e}"))?;
        if read == 0 {
            break;
        }

        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if is_chat_exit_command(message) {
            break;
        }

        let payload = match parse_chat_line(message) {
            Ok(payload) => payload,
            Err(error) => {
                writeln!(output, "{error}")
                    .map_err(|e| format!("failed to write chat output: {e}"))?;
                continue;
            }
        };

        let event_id = enqueue_chat_event(&queue_paths, &conversation_id, payload)?;
        let _ = drain_queue_once(state_root, engine, 1)
            .map_err(|e| format!("chat processing failed: {e}"))?;

        match wait_for_reply(&queue_paths, &event_id, CHAT_RESPONSE_TIMEOUT)? {
            Some(reply) => print_reply(output, &reply)?,
            None => {
                writeln!(
                    output,
                    "bot> timed out waiting for a reply (event_id={event_id})"
                )
                .map_err(|e| format!("failed to write chat timeout output: {e}"))?;
            }
        }
    }

    Ok(format!("chat ended\nsession_id={conversation_id}"))
}

fn is_chat_exit_command(message: &str) -> bool {
    CHAT_EXIT_COMMANDS
        .iter()
        .any(|command| message.eq_ignore_ascii_case(command))
}

fn parse_chat_line(message: &str) -> Result<EventPayload, String> {
    if !message.starts_with('/') {
        return Ok(EventPayload::Text {
            text: message.to_string(),
        });
    }

    let mut parts = message.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    match verb {
        "/start" | "/cancel" => Ok(EventPayload::Command {
            command: verb.trim_start_matches('/').to_string(),
        }),
        "/location" => {
            let latitude: f64 = parts
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or("usage: /location <lat> <lon>")?;
            let longitude: f64 = parts
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or("usage: /location <lat> <lon>")?;
            Ok(EventPayload::Location {
                latitude,
                longitude,
            })
        }
        "/press" => {
            let action = parts.next().ok_or("usage: /press <action>")?;
            Ok(EventPayload::Button {
                action: action.to_string(),
            })
        }
        other => Err(format!(
            "unknown chat command `{other}`; try /start, /cancel, /location, /press"
        )),
    }
}

fn enqueue_chat_event(
    queue_paths: &QueuePaths,
    conversation_id: &str,
    payload: EventPayload,
) -> Result<String, String> {
    let event_id = format!("evt-{}", now_nanos());
    let incoming = IncomingEvent {
        channel: "local".to_string(),
        session_id: conversation_id.to_string(),
        sender: "cli".to_string(),
        timestamp: now_secs(),
        event_id: event_id.clone(),
        payload,
    };
    queue::enqueue_incoming(queue_paths, &incoming)
        .map_err(|e| format!("failed to enqueue chat event: {e}"))?;
    Ok(event_id)
}

fn wait_for_reply(
    queue_paths: &QueuePaths,
    event_id: &str,
    timeout: Duration,
) -> Result<Option<OutgoingReply>, String> {
    let started = Instant::now();
    while started.elapsed() <= timeout {
        for path in queue::sorted_outgoing_paths(queue_paths)
            .map_err(|e| format!("failed to read {}: {e}", queue_paths.outgoing.display()))?
        {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            let reply: OutgoingReply = serde_json::from_str(&raw)
                .map_err(|e| format!("failed to parse {}: {e}", path.display()))?;
            if reply.event_id != event_id {
                continue;
            }
            std::fs::remove_file(&path)
                .map_err(|e| format!("failed to remove {}: {e}", path.display()))?;
            return Ok(Some(reply));
        }
        thread::sleep(CHAT_POLL_INTERVAL);
    }
    Ok(None)
}

fn print_reply<W: Write>(output: &mut W, reply: &OutgoingReply) -> Result<(), String> {
    writeln!(output, "bot> {}", reply.text)
        .map_err(|e| format!("failed to write chat output: {e}"))?;
    for row in &reply.buttons {
        let rendered = row
            .iter()
            .map(|button| {
                if button.request_location {
                    format!("[{}] (send /location <lat> <lon>)", button.label)
                } else {
                    format!("[{}] (/press {})", button.label, button.action)
                }
            })
            .collect::<Vec<_>>()
            .join("  ");
        writeln!(output, "     {rendered}")
            .map_err(|e| format!("failed to write chat output: {e}"))?;
    }
    output
        .flush()
        .map_err(|e| format!("failed to flush chat output: {e}"))
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn now_nanos() -> i128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i128)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_exit_commands_are_case_insensitive() {
        assert!(is_chat_exit_command("/exit"));
        assert!(is_chat_exit_command("EXIT"));
        assert!(is_chat_exit_command("Quit"));
        assert!(!is_chat_exit_command("continue"));
    }

    #[test]
    fn chat_lines_map_to_event_payloads() {
        assert_eq!(
            parse_chat_line("/start").expect("start"),
            EventPayload::Command {
                command: "start".to_string()
            }
        );
        assert_eq!(
            parse_chat_line("/location 55.75 37.61").expect("location"),
            EventPayload::Location {
                latitude: 55.75,
                longitude: 37.61
            }
        );
        assert_eq!(
            parse_chat_line("/press stage_1").expect("press"),
            EventPayload::Button {
                action: "stage_1".to_string()
            }
        );
        assert_eq!(
            parse_chat_line("Region-A").expect("text"),
            EventPayload::Text {
                text: "Region-A".to_string()
            }
        );
    }

    #[test]
    fn malformed_chat_commands_report_usage() {
        assert!(parse_chat_line("/location 55.75").expect_err("missing lon").contains("usage"));
        assert!(parse_chat_line("/press").expect_err("missing action").contains("usage"));
        assert!(parse_chat_line("/bogus").expect_err("unknown").contains("unknown chat command"));
    }
}
