use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::notify::LoginMessages;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Text {
    #[serde(default)]
    pub en: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub ru: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    /// Only announcements need an id; texts without one are free-form.
    #[serde(default)]
    pub id: Option<String>,
    /// `0` marks a free-form text that may be shown any number of times.
    #[serde(default)]
    pub max_views: u32,
    #[serde(default)]
    pub header: Text,
    #[serde(default)]
    pub body: Text,
}

impl Notification {
    fn is_announcement(&self) -> bool {
        self.id.is_some() && self.max_views > 0
    }

    /// JSON text component accepted by `tellraw`.
    pub fn formatted_text(&self) -> String {
        serde_json::json!({ "text": format!("{}\n{}", self.header.en, self.body.en) }).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenNotification {
    pub id: String,
    #[serde(default)]
    pub times_seen: u32,
}

pub type Users = BTreeMap<String, Vec<SeenNotification>>;

/// Picks the first announcement the player has not exhausted, falling back to a
/// random free-form text.
pub fn select_notification<'a, R: rand::Rng + ?Sized>(
    notifications: &'a [Notification],
    seen: &[SeenNotification],
    rng: &mut R,
) -> Option<&'a Notification> {
    let exhausted = |n: &Notification| {
        seen.iter()
            .find(|s| Some(&s.id) == n.id.as_ref())
            .is_some_and(|s| s.times_seen >= n.max_views)
    };
    if let Some(n) = notifications
        .iter()
        .filter(|n| n.is_announcement())
        .find(|n| !exhausted(*n))
    {
        return Some(n);
    }

    let texts: Vec<&Notification> = notifications
        .iter()
        .filter(|n| !n.is_announcement())
        .collect();
    texts.choose(rng).copied()
}

fn record_view(notification: &Notification, seen: &mut Vec<SeenNotification>) {
    let Some(id) = notification.id.as_ref().filter(|_| notification.is_announcement()) else {
        return;
    };
    match seen.iter_mut().find(|s| &s.id == id) {
        Some(entry) => entry.times_seen = entry.times_seen.saturating_add(1),
        None => seen.push(SeenNotification {
            id: id.clone(),
            times_seen: 1,
        }),
    }
}

/// File-backed login messages: a notifications list plus a per-player record of
/// which announcements were already shown.
pub struct NotificationCatalogue {
    messages_path: PathBuf,
    users_path: PathBuf,
    // Two logins firing together would otherwise race on the users file.
    lock: Mutex<()>,
}

impl NotificationCatalogue {
    pub fn new(messages_path: PathBuf, users_path: PathBuf) -> Self {
        Self {
            messages_path,
            users_path,
            lock: Mutex::new(()),
        }
    }

    fn try_login_message(&self, player: &str) -> anyhow::Result<String> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let notifications = load_notifications(&self.messages_path)?;
        let mut users = load_users(&self.users_path)?;
        let seen = users.entry(player.to_string()).or_default();

        let Some(notification) = select_notification(&notifications, seen, &mut rand::thread_rng())
        else {
            return Ok(String::new());
        };
        record_view(notification, seen);
        save_users(&self.users_path, &users)?;

        tracing::info!(
            player,
            notification = notification.id.as_deref().unwrap_or("-"),
            "selected login message"
        );
        Ok(notification.formatted_text())
    }
}

impl LoginMessages for NotificationCatalogue {
    fn login_message(&self, player: &str) -> String {
        match self.try_login_message(player) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(
                    player,
                    error = %crate::error::format_error_chain(&err),
                    "failed to build login message"
                );
                String::new()
            }
        }
    }
}

/// Entries that do not deserialize are skipped with a warning.
pub fn load_notifications(path: &Path) -> anyhow::Result<Vec<Notification>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let values: Vec<serde_json::Value> =
        serde_json::from_slice(&raw).with_context(|| format!("parse {}", path.display()))?;

    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<Notification>(value) {
            Ok(n) => out.push(n),
            Err(err) => tracing::warn!(error = %err, "skipping malformed notification"),
        }
    }
    Ok(out)
}

pub fn load_users(path: &Path) -> anyhow::Result<Users> {
    if !path.exists() {
        return Ok(Users::new());
    }
    let raw = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Users::new());
    }
    serde_json::from_slice(&raw).with_context(|| format!("parse {}", path.display()))
}

fn save_users(path: &Path, users: &Users) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(users)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
