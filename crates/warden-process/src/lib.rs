use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

/// Lifecycle of the supervised server process.
///
/// The supervisor walks `Stopped -> Starting -> Running -> (Stopping -> Starting)* -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

pub const NO_ERROR: &str = "All good!";

/// Flags shared between the supervisor, the console bridge and external callers
/// (tray/status surfaces, the down-detector).
///
/// Every field is independently atomic; there is no multi-field transaction, so a
/// reader may observe e.g. `backup_requested` already cleared while `backup_in_flight`
/// is still set.
#[derive(Debug)]
pub struct ControlState {
    stop_requested: AtomicBool,
    backup_requested: AtomicBool,
    backup_in_flight: AtomicBool,
    record_net_stat: AtomicBool,
    last_error: Mutex<String>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            backup_requested: AtomicBool::new(false),
            backup_in_flight: AtomicBool::new(false),
            record_net_stat: AtomicBool::new(false),
            last_error: Mutex::new(NO_ERROR.to_string()),
        }
    }
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn set_backup_requested(&self, value: bool) {
        self.backup_requested.store(value, Ordering::SeqCst);
    }

    pub fn backup_requested(&self) -> bool {
        self.backup_requested.load(Ordering::SeqCst)
    }

    /// Returns the previous value and clears the flag.
    pub fn take_backup_requested(&self) -> bool {
        self.backup_requested.swap(false, Ordering::SeqCst)
    }

    pub fn set_backup_in_flight(&self, value: bool) {
        self.backup_in_flight.store(value, Ordering::SeqCst);
    }

    pub fn backup_in_flight(&self) -> bool {
        self.backup_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_record_net_stat(&self, value: bool) {
        self.record_net_stat.store(value, Ordering::SeqCst);
    }

    /// Read-and-clear for the down-detector side of the signal.
    pub fn take_record_net_stat(&self) -> bool {
        self.record_net_stat.swap(false, Ordering::SeqCst)
    }

    /// Stores `message` prefixed with the local time it was recorded at.
    pub fn set_error(&self, message: impl AsRef<str>) {
        let stamped = format!(
            "{}\n{}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            message.as_ref()
        );
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = stamped;
    }

    pub fn last_error(&self) -> String {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_reports_no_error() {
        let state = ControlState::new();
        assert_eq!(state.last_error(), NO_ERROR);
        assert!(!state.stop_requested());
        assert!(!state.backup_requested());
        assert!(!state.backup_in_flight());
    }

    #[test]
    fn set_error_keeps_message_after_timestamp() {
        let state = ControlState::new();
        state.set_error("backup sources missing");
        let err = state.last_error();
        let (stamp, msg) = err.split_once('\n').unwrap();
        assert_eq!(msg, "backup sources missing");
        assert_eq!(stamp.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn take_flags_clear_them() {
        let state = ControlState::new();
        state.set_backup_requested(true);
        state.set_record_net_stat(true);
        assert!(state.take_backup_requested());
        assert!(!state.take_backup_requested());
        assert!(state.take_record_net_stat());
        assert!(!state.take_record_net_stat());
    }
}
