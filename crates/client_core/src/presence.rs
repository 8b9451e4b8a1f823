//! Member-list lobby badges and the toasts that accompany other members' changes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::UserId,
    protocol::{LobbyClear, LobbyUpdate, PresenceEvent},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyBadge {
    pub user_id: UserId,
    pub lobby_link: Option<String>,
    pub display_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LobbyBadge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub user_id: UserId,
    pub text: String,
    pub lobby_link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceOutcome {
    pub badge_changed: bool,
    pub toast: Option<Toast>,
}

#[derive(Debug, Clone, Default)]
pub struct LobbyBoard {
    badges: HashMap<UserId, LobbyBadge>,
}

fn name_or_fallback(display_name: Option<&str>, user_id: UserId) -> String {
    display_name
        .map(str::to_string)
        .unwrap_or_else(|| format!("User {}", user_id.0))
}

impl LobbyBoard {
    pub fn badge(&self, user_id: UserId) -> Option<&LobbyBadge> {
        self.badges.get(&user_id)
    }

    pub fn badges(&self) -> impl Iterator<Item = &LobbyBadge> {
        self.badges.values()
    }

    pub fn len(&self) -> usize {
        self.badges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.badges.is_empty()
    }

    /// Updates the badge for the event's user. Only other members' changes toast.
    pub fn apply(&mut self, event: PresenceEvent, viewer: UserId) -> PresenceOutcome {
        let is_self = event.user_id() == viewer;
        let (badge_changed, toast) = match event {
            PresenceEvent::LobbyUpdated(update) => self.update(update),
            PresenceEvent::LobbyCleared(clear) => self.clear(clear),
        };
        PresenceOutcome {
            badge_changed,
            toast: if is_self { None } else { Some(toast) },
        }
    }

    fn update(&mut self, update: LobbyUpdate) -> (bool, Toast) {
        let toast = Toast {
            user_id: update.user_id,
            text: format!(
                "{} opened a lobby",
                name_or_fallback(update.display_name.as_deref(), update.user_id)
            ),
            lobby_link: update.lobby_link.clone(),
        };
        let badge = LobbyBadge {
            user_id: update.user_id,
            lobby_link: update.lobby_link,
            display_name: update.display_name,
            expires_at: update.expires_at,
        };
        let changed = self.badges.get(&badge.user_id) != Some(&badge);
        self.badges.insert(badge.user_id, badge);
        (changed, toast)
    }

    fn clear(&mut self, clear: LobbyClear) -> (bool, Toast) {
        let changed = self.badges.remove(&clear.user_id).is_some();
        let toast = Toast {
            user_id: clear.user_id,
            text: format!(
                "{} closed their lobby",
                name_or_fallback(clear.display_name.as_deref(), clear.user_id)
            ),
            lobby_link: None,
        };
        (changed, toast)
    }

    /// Drops badges whose countdown has run out.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<UserId> {
        let expired: Vec<UserId> = self
            .badges
            .values()
            .filter(|badge| badge.is_expired(now))
            .map(|badge| badge.user_id)
            .collect();
        for user_id in &expired {
            self.badges.remove(user_id);
        }
        expired
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
