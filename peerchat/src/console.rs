//! Line-mode presentation helpers: input parsing and output rendering.

use std::fmt::Write as _;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

use peerchat_proto::envelope::ChatEnvelope;

use crate::room::LogEvent;
use crate::transport::PeerId;

/// Timestamp format used when the configured one cannot be rendered.
const FALLBACK_TIMESTAMP_FORMAT: &str = "%H:%M";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Text to send to the room.
    Say(String),
    /// `/name <new name>`.
    Name(String),
    /// `/peers`.
    Peers,
    /// `/quit`.
    Quit,
    /// `/help`, or an unrecognised slash command.
    Help,
    /// A blank line.
    Empty,
}

impl Command {
    /// Parses one input line. The trailing newline must already be stripped.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Self::Say(line.to_string());
        };

        let (cmd, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(c, a)| (c, a.trim()));

        match cmd {
            "name" if !arg.is_empty() => Self::Name(arg.to_string()),
            "peers" => Self::Peers,
            "quit" | "exit" => Self::Quit,
            _ => Self::Help,
        }
    }
}

/// Usage text for the slash commands.
pub const HELP: &str = "commands: /name <name>, /peers, /quit";

/// Renders an inbound message as `[HH:MM] <name> text`.
///
/// Falls back to `%H:%M` if `format` is not a valid chrono format string.
#[must_use]
pub fn render_message(envelope: &ChatEnvelope, at: &DateTime<Local>, format: &str) -> String {
    let mut stamp = String::new();
    if write!(stamp, "{}", at.format(format)).is_err() {
        stamp.clear();
        let _ = write!(stamp, "{}", at.format(FALLBACK_TIMESTAMP_FORMAT));
    }
    format!("[{stamp}] <{}> {}", envelope.sender_name, envelope.message)
}

/// Renders a relay log event as `! prefix: message`.
#[must_use]
pub fn render_log(event: &LogEvent) -> String {
    format!("! {}: {}", event.prefix, event.message)
}

/// Sends one line on Outbound, handing every log event that arrives in the
/// meantime to `on_log`.
///
/// The publish loop can be blocked reporting into a full Logs channel while
/// Outbound is full, so waiting on Outbound alone would stall both sides.
/// Returns `false` if Outbound is closed.
pub async fn send_line(
    outbound: &mpsc::Sender<String>,
    line: String,
    logs: &mut mpsc::Receiver<LogEvent>,
    mut on_log: impl FnMut(&LogEvent),
) -> bool {
    let send = outbound.send(line);
    tokio::pin!(send);
    loop {
        tokio::select! {
            result = &mut send => return result.is_ok(),
            Some(event) = logs.recv() => on_log(&event),
        }
    }
}

/// Renders the result of `/peers`.
#[must_use]
pub fn render_peers(peers: &[PeerId]) -> String {
    if peers.is_empty() {
        return "no other peers in this room".to_string();
    }
    let list: Vec<&str> = peers.iter().map(PeerId::as_str).collect();
    format!("{} peer(s): {}", peers.len(), list.join(", "))
}
