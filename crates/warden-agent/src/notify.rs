use std::{sync::Arc, time::Duration};

use crate::console::{Console, LineHandler};

const LOGIN_MARKER: &str = "logged in with entity id";
/// Broadcast echoes share the login wording but carry this marker instead of a
/// player address.
const BROADCAST_MARKER: &str = "[/ ";
const LOG_PREFIX_DELIMITER: &str = "]: ";
const ADDRESS_DELIMITER: &str = "[/";

/// Source of the text shown to a player after login. An empty string means
/// "nothing to show".
pub trait LoginMessages: Send + Sync + 'static {
    fn login_message(&self, player: &str) -> String;
}

pub fn is_login_line(line: &str) -> bool {
    line.contains(LOGIN_MARKER) && !line.contains(BROADCAST_MARKER)
}

/// `"[12:00:00] [Server thread/INFO]: Steve[/127.0.0.1:54321] logged in ..."` -> `"Steve"`.
pub fn extract_player_name(line: &str) -> String {
    let after_prefix = line
        .rsplit_once(LOG_PREFIX_DELIMITER)
        .map(|(_, rest)| rest)
        .unwrap_or(line);
    let name = after_prefix
        .split_once(ADDRESS_DELIMITER)
        .map(|(name, _)| name)
        .unwrap_or(after_prefix);
    name.trim().to_string()
}

/// Watches console lines for logins and sends each player a delayed private message.
///
/// Timers are detached tasks; they are not cancelled on shutdown and simply find the
/// console detached if the server went away in the meantime.
pub struct NotificationScheduler {
    console: Console,
    messages: Arc<dyn LoginMessages>,
    delay: Duration,
    enabled: bool,
}

impl NotificationScheduler {
    pub fn new(
        console: Console,
        messages: Arc<dyn LoginMessages>,
        delay: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            console,
            messages,
            delay,
            enabled,
        }
    }

    /// Returns the player a message was scheduled for, if any.
    pub fn on_line(&self, line: &str) -> Option<String> {
        if !self.enabled || !is_login_line(line) {
            return None;
        }
        let player = extract_player_name(line);
        if player.is_empty() {
            tracing::debug!(line, "login line without a player name");
            return None;
        }

        tracing::info!(
            player = %player,
            delay_secs = self.delay.as_secs(),
            "scheduling welcome message"
        );
        let console = self.console.clone();
        let messages = self.messages.clone();
        let delay = self.delay;
        let target = player.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            send_private_message(&console, messages, target).await;
        });
        Some(player)
    }
}

impl LineHandler for NotificationScheduler {
    fn handle_line(&self, line: &str) {
        self.on_line(line);
    }
}

pub async fn send_private_message(console: &Console, messages: Arc<dyn LoginMessages>, player: String) {
    // The catalogue touches the disk.
    let lookup = {
        let player = player.clone();
        tokio::task::spawn_blocking(move || messages.login_message(&player)).await
    };
    let text = match lookup {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(player = %player, error = %err, "login message lookup failed");
            return;
        }
    };
    if text.trim().is_empty() {
        tracing::debug!(player = %player, "no login message to send");
        return;
    }
    console.send(&format!("tellraw {player} {text}")).await;
}
