//! Line-based presentation adapter.
//!
//! Reads stdin: lines starting with `/` are commands, anything else is sent
//! as chat. Commands are parsed and executed locally and never reach the
//! peer as text. Session events and progress are printed to stdout.

use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

use crate::core::config::ACTIVITY_LOG_VISIBLE;
use crate::core::session::{SessionCommand, SessionEvent, SessionHandle, SessionView};
use crate::utils::formatters::{
    format_countdown, format_file_size, format_latency, progress_bar, truncate_filename,
};
use crate::utils::log_buffer::LogBuffer;
use crate::utils::sos::SignalOfStop;

/// Recognised console commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `/send <path>...` queues files for the peer.
    Send(Vec<PathBuf>),
    Accept,
    Reject,
    /// `/stay` cancels a pending self-destruct on both sides.
    Stay,
    Ping,
    Cancel,
    Status,
    Log,
    Quit,
    Help,
}

/// Available commands with short descriptions (for `/help` output).
pub const COMMAND_HELP: &[(&str, &str)] = &[
    ("/send <path>...", "Queue files for the peer"),
    ("/accept", "Accept the offered file"),
    ("/reject", "Decline the offered file"),
    ("/stay", "Cancel the self-destruct countdown"),
    ("/ping", "Measure latency now"),
    ("/cancel", "Stop sending and clear the queue"),
    ("/status", "Show transfer status"),
    ("/log", "Show recent activity"),
    ("/quit", "Close the session and exit"),
    ("/help", "Show available commands"),
];

const NAME_WIDTH: usize = 32;
const BAR_WIDTH: usize = 24;

/// Try to parse `input` as a slash-command.
///
/// Returns `None` when the input is a regular message (doesn't start with `/`).
/// Returns `Some(Ok(cmd))` for a recognized command, or `Some(Err(msg))` for an
/// unknown or malformed command.
pub fn parse_command(input: &str) -> Option<Result<ConsoleCommand, String>> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut words = trimmed.split_whitespace();
    let cmd = words.next()?;
    let parsed = match cmd {
        "/send" => {
            let paths: Vec<PathBuf> = words.map(PathBuf::from).collect();
            if paths.is_empty() {
                return Some(Err("Usage: /send <path>...".into()));
            }
            ConsoleCommand::Send(paths)
        }
        "/accept" => ConsoleCommand::Accept,
        "/reject" => ConsoleCommand::Reject,
        "/stay" => ConsoleCommand::Stay,
        "/ping" => ConsoleCommand::Ping,
        "/cancel" => ConsoleCommand::Cancel,
        "/status" => ConsoleCommand::Status,
        "/log" => ConsoleCommand::Log,
        "/quit" | "/exit" => ConsoleCommand::Quit,
        "/help" => ConsoleCommand::Help,
        _ => {
            warn!(event = "unknown_command", command = %cmd, "Unknown console command");
            return Some(Err(format!("Unknown command: {}", cmd)));
        }
    };
    Some(Ok(parsed))
}

/// Drive the console until stdin and the session are both done, or until
/// `sos` fires.
pub async fn run(
    mut handle: SessionHandle,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    logs: LogBuffer,
    sos: SignalOfStop,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_progress: Option<(String, u8)> = None;
    println!("Type a message to chat, or /help for commands.");

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if handle_line(&handle, &logs, &line) {
                        sos.cancel();
                    }
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(text) = describe(&event) {
                        println!("{text}");
                    }
                }
                None => break,
            },
            changed = handle.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = handle.view();
                if let Some(line) = progress_update(&view, &mut last_progress) {
                    println!("{line}");
                }
            }
            _ = sos.wait() => break,
        }
    }
}

/// Execute one input line. Returns true when the user asked to quit.
fn handle_line(handle: &SessionHandle, logs: &LogBuffer, line: &str) -> bool {
    let command = match parse_command(line) {
        None => {
            if !line.trim().is_empty() {
                report(handle.send_chat(line));
            }
            return false;
        }
        Some(Err(msg)) => {
            println!("{msg}");
            return false;
        }
        Some(Ok(command)) => command,
    };

    match command {
        ConsoleCommand::Send(paths) => report(handle.enqueue_files(paths)),
        ConsoleCommand::Accept => report(handle.accept_incoming()),
        ConsoleCommand::Reject => report(handle.reject_incoming()),
        ConsoleCommand::Stay => report(handle.cancel_destruct()),
        ConsoleCommand::Ping => report(handle.send(SessionCommand::Ping)),
        ConsoleCommand::Cancel => report(handle.send(SessionCommand::CancelTransfer)),
        ConsoleCommand::Status => println!("{}", status(&handle.view(), Instant::now())),
        ConsoleCommand::Log => {
            for entry in logs.recent(ACTIVITY_LOG_VISIBLE) {
                println!("{} {:>5} {}", entry.timestamp, entry.level, entry.message);
            }
        }
        ConsoleCommand::Help => {
            for (cmd, desc) in COMMAND_HELP {
                println!("  {cmd:<18} {desc}");
            }
        }
        ConsoleCommand::Quit => {
            let _ = handle.close();
            return true;
        }
    }
    false
}

fn report(result: anyhow::Result<()>) {
    if let Err(e) = result {
        println!("! {e}");
    }
}

/// One printable line per user-visible event.
fn describe(event: &SessionEvent) -> Option<String> {
    let text = match event {
        SessionEvent::Connected { peer } => format!("* Connected to {peer}"),
        SessionEvent::IncomingRequest(req) => format!(
            "* {} offers {} ({}, {}). /accept or /reject",
            req.sender_label,
            truncate_filename(&req.name, NAME_WIDTH),
            format_file_size(req.size),
            req.mime_type
        ),
        SessionEvent::ChatReceived(entry) => format!("peer> {}", entry.text),
        SessionEvent::FileSent { name } => format!("* Sent {name}"),
        SessionEvent::FileRejectedByPeer { name } => format!("* Peer declined {name}"),
        SessionEvent::SendFailed { name, reason } => format!("! Could not send {name}: {reason}"),
        SessionEvent::FileDelivered { name, path } => {
            format!("* Received {name} -> {}", path.display())
        }
        SessionEvent::IntegrityFailed { name } => {
            format!("! {name} failed its integrity check and was discarded")
        }
        SessionEvent::IncomingCancelled { name } => format!("* Peer withdrew {name}"),
        SessionEvent::TransferCancelled { name, dropped } => match name {
            Some(name) => format!("* Stopped {name}, dropped {dropped} queued"),
            None => format!("* Dropped {dropped} queued"),
        },
        SessionEvent::QueueComplete => "* All files sent".into(),
        SessionEvent::ModeChanged(mode) => format!("* Switched to {mode} mode"),
        SessionEvent::DestructArmed { after } => format!(
            "* Session self-destructs in {}. /stay to keep it open",
            format_countdown(*after)
        ),
        SessionEvent::DestructCancelled { by_peer: true } => {
            "* Peer cancelled the self-destruct".into()
        }
        SessionEvent::DestructCancelled { by_peer: false } => "* Self-destruct cancelled".into(),
        SessionEvent::Error(msg) => format!("! {msg}"),
        SessionEvent::Closed(reason) => format!("* Session ended: {reason}"),
        SessionEvent::LatencyMeasured(_) => return None,
    };
    Some(text)
}

/// Progress line, printed when the file changes or every 10%.
fn progress_update(view: &SessionView, last: &mut Option<(String, u8)>) -> Option<String> {
    let name = view.transfer_name.as_ref()?;
    let bucket = view.progress / 10;
    if let Some((last_name, last_bucket)) = last
        && last_name == name
        && *last_bucket == bucket
    {
        return None;
    }
    *last = Some((name.clone(), bucket));
    Some(format!(
        "  {} {} {:>3}% {}",
        truncate_filename(name, NAME_WIDTH),
        progress_bar(view.progress, BAR_WIDTH),
        view.progress,
        view.speed_label
    ))
}

fn status(view: &SessionView, now: Instant) -> String {
    let mut out = format!(
        "{} | mode {} | latency {} | queue {}",
        if view.connected {
            format!("connected to {}", view.peer)
        } else {
            "not connected".to_string()
        },
        view.mode,
        view.latency.map(format_latency).unwrap_or_else(|| "-".into()),
        view.queue_depth
    );
    if let Some(name) = &view.transfer_name {
        out.push_str(&format!(
            "\n  {} {} {:>3}% {}",
            truncate_filename(name, NAME_WIDTH),
            progress_bar(view.progress, BAR_WIDTH),
            view.progress,
            view.speed_label
        ));
    }
    if let Some(req) = &view.incoming {
        out.push_str(&format!("\n  waiting for your answer on {}", req.name));
    }
    if let Some(warning) = &view.warning {
        out.push_str(&format!(
            "\n  self-destruct in {}",
            format_countdown(warning.remaining(now))
        ));
    }
    out
}
