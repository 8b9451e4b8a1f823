//! Line-oriented rendering of a chat view and parsing of typed commands.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use client_core::{ChatEntry, ChatState, ClientEvent, LobbyBoard};
use shared::domain::{ClientNonce, MessageId};

pub const HELP: &str = "\
commands:
  <text>                      send a message
  /edit <id> <text>           replace the content of one of your messages
  /delete <id>                delete one of your messages
  /history                    load older messages
  /lobby <link> [seconds]     advertise a game lobby, optionally expiring
  /unlobby                    clear your lobby
  /lobbies                    list open lobbies
  /help                       show this text
  /quit                       leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Edit { message_id: MessageId, content: String },
    Delete(MessageId),
    History,
    Lobby { link: String, expires_in_secs: Option<u64> },
    Unlobby,
    Lobbies,
    Help,
    Quit,
    Invalid(String),
}

/// `None` for blank lines.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Say(line.to_string()));
    };
    let (name, args) = rest
        .split_once(char::is_whitespace)
        .map(|(name, args)| (name, args.trim()))
        .unwrap_or((rest, ""));

    let command = match name {
        "edit" => match args.split_once(char::is_whitespace) {
            Some((id, content)) => match parse_message_id(id) {
                Some(message_id) => Command::Edit {
                    message_id,
                    content: content.trim().to_string(),
                },
                None => Command::Invalid(format!("not a message id: {id}")),
            },
            None => Command::Invalid("usage: /edit <id> <text>".into()),
        },
        "delete" => match parse_message_id(args) {
            Some(message_id) => Command::Delete(message_id),
            None => Command::Invalid("usage: /delete <id>".into()),
        },
        "lobby" => {
            let mut parts = args.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(link), None, None) => Command::Lobby {
                    link: link.to_string(),
                    expires_in_secs: None,
                },
                (Some(link), Some(secs), None) => match secs.parse() {
                    Ok(secs) => Command::Lobby {
                        link: link.to_string(),
                        expires_in_secs: Some(secs),
                    },
                    Err(_) => Command::Invalid(format!("not a number of seconds: {secs}")),
                },
                _ => Command::Invalid("usage: /lobby <link> [seconds]".into()),
            }
        }
        "history" => Command::History,
        "unlobby" => Command::Unlobby,
        "lobbies" => Command::Lobbies,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Invalid(format!("unknown command /{other}, try /help")),
    };
    Some(command)
}

fn parse_message_id(raw: &str) -> Option<MessageId> {
    raw.trim_start_matches('#').parse().ok().map(MessageId)
}

pub fn render_entry(entry: &ChatEntry) -> String {
    match entry {
        ChatEntry::Pending(pending) => {
            format!("   … {}: {} (sending)", pending.author.display_name, pending.content)
        }
        ChatEntry::Confirmed(message) => {
            let edited = if message.is_edited { " (edited)" } else { "" };
            format!(
                "#{} {} {}: {}{edited}",
                message.id,
                message.created_at.format("%H:%M"),
                message.user.display_name,
                message.content
            )
        }
    }
}

/// Text for notices worth printing; list changes are handled by [`Transcript`].
pub fn render_event(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::Toast(toast) => Some(match &toast.lobby_link {
            Some(link) => format!("* {} ({link})", toast.text),
            None => format!("* {}", toast.text),
        }),
        ClientEvent::Alert { message, .. } => Some(format!("! {message}")),
        ClientEvent::MessagesChanged
        | ClientEvent::LobbyBadgeChanged { .. }
        | ClientEvent::ComposerReady => None,
    }
}

pub fn render_lobbies(board: &LobbyBoard, now: DateTime<Utc>) -> Vec<String> {
    let mut badges: Vec<_> = board.badges().filter(|b| !b.is_expired(now)).collect();
    badges.sort_by_key(|badge| badge.user_id);
    if badges.is_empty() {
        return vec!["no open lobbies".into()];
    }
    badges
        .into_iter()
        .map(|badge| {
            let name = badge
                .display_name
                .clone()
                .unwrap_or_else(|| format!("User {}", badge.user_id));
            let link = badge.lobby_link.as_deref().unwrap_or("-");
            match badge.expires_at {
                Some(expires_at) => {
                    let left = (expires_at - now).num_seconds().max(0);
                    format!("{name}: {link} ({left}s left)")
                }
                None => format!("{name}: {link}"),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EntryKey {
    Pending(ClientNonce),
    Message(MessageId),
}

/// Remembers what was last printed so each refresh only prints what changed.
#[derive(Debug, Default)]
pub struct Transcript {
    rendered: HashMap<EntryKey, String>,
}

impl Transcript {
    pub fn refresh(&mut self, state: &ChatState) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current = HashMap::with_capacity(state.len());
        for entry in state.entries() {
            let key = match entry {
                ChatEntry::Pending(pending) => EntryKey::Pending(pending.nonce),
                ChatEntry::Confirmed(message) => EntryKey::Message(message.id),
            };
            let line = render_entry(entry);
            if self.rendered.get(&key) != Some(&line) {
                lines.push(line.clone());
            }
            current.insert(key, line);
        }

        let mut removed: Vec<MessageId> = self
            .rendered
            .keys()
            .filter_map(|key| match key {
                EntryKey::Message(id) if !current.contains_key(key) => Some(*id),
                _ => None,
            })
            .filter(|id| state.was_deleted(*id))
            .collect();
        removed.sort();
        lines.extend(removed.into_iter().map(|id| format!("#{id} deleted")));

        self.rendered = current;
        lines
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
