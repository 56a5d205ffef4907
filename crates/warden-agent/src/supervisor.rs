use std::{process::Stdio, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tokio::{process::Child, task::JoinHandle, time::MissedTickBehavior};
use warden_core::retention::cleanup_old_archives;
use warden_process::{ControlState, ServerState};

use crate::{
    backup::{BackupEngine, BackupJob},
    config::{BackupConfig, Config, ServerConfig},
    console::{Console, ConsoleBridge, ConsoleReader, LineHandler},
    error::{BackupError, SupervisorError, format_error_chain},
    launch::resolve_launch_spec,
    notify::{LoginMessages, NotificationScheduler},
    transfer::TransferClient,
};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const BRIDGE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Exited(Option<i32>),
    /// The server ignored `stop` for the whole timeout and was killed.
    Killed,
}

/// Daily backup time with minute-level debounce.
#[derive(Debug, Clone)]
pub struct BackupTrigger {
    at: NaiveTime,
    last_fired: Option<(NaiveDate, u32, u32)>,
}

impl BackupTrigger {
    pub fn new(at: NaiveTime) -> Self {
        Self {
            at,
            last_fired: None,
        }
    }

    /// True the first time it is polled within the configured minute of a day.
    pub fn scheduled_due(&mut self, now: NaiveDateTime) -> bool {
        if now.hour() != self.at.hour() || now.minute() != self.at.minute() {
            return false;
        }
        let key = (now.date(), now.hour(), now.minute());
        if self.last_fired == Some(key) {
            return false;
        }
        self.last_fired = Some(key);
        true
    }
}

struct ServerHandle {
    child: Child,
    pgid: Option<i32>,
    bridge: ConsoleBridge,
}

/// Everything the background half of a backup cycle needs.
#[derive(Clone)]
struct Completion {
    engine: BackupEngine,
    control: Arc<ControlState>,
    transfer: Option<TransferClient>,
    retention_days: u32,
    delay: Duration,
}

impl Completion {
    async fn run(self, job: BackupJob) {
        self.finish(job).await;
        self.control.set_backup_requested(false);
        self.control.set_backup_in_flight(false);
        tracing::info!("backup cycle finished");
    }

    async fn finish(&self, job: BackupJob) {
        if !self.delay.is_zero() {
            tracing::info!(delay_secs = self.delay.as_secs(), "waiting before compressing backup");
            tokio::time::sleep(self.delay).await;
        }

        let engine = self.engine.clone();
        let archive = match tokio::task::spawn_blocking(move || engine.compress_and_finalize(job)).await {
            Ok(Ok(archive)) => archive,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "backup compression failed; nothing will be sent");
                self.control.set_error(err.to_string());
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "backup compression task failed");
                self.control.set_error(format!("backup compression task failed: {err}"));
                return;
            }
        };

        let dir = self.engine.backup_dir().to_path_buf();
        let days = self.retention_days;
        match tokio::task::spawn_blocking(move || cleanup_old_archives(days, &dir)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                tracing::error!(error = %err, "retention cleanup failed");
                self.control.set_error(format!("retention cleanup failed: {err}"));
            }
            Err(err) => tracing::error!(error = %err, "retention cleanup task failed"),
        }

        match &self.transfer {
            Some(client) => {
                if let Err(err) = client.send_with_retry(&archive).await {
                    self.control.set_error(err.to_string());
                }
            }
            None => tracing::warn!(
                archive = %archive.display(),
                "archive transfer disabled; keeping local copy only"
            ),
        }
    }
}

/// Owns the server process and sequences stop, backup and restart.
pub struct Supervisor {
    server_cfg: ServerConfig,
    backup_cfg: BackupConfig,
    control: Arc<ControlState>,
    console: Console,
    handler: Arc<dyn LineHandler>,
    server: Option<ServerHandle>,
    state: ServerState,
    trigger: BackupTrigger,
    completion: Completion,
    pending: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(
        cfg: &Config,
        control: Arc<ControlState>,
        messages: Arc<dyn LoginMessages>,
    ) -> anyhow::Result<Self> {
        let console = Console::new();
        let handler: Arc<dyn LineHandler> = Arc::new(NotificationScheduler::new(
            console.clone(),
            messages,
            cfg.notifications.delay(),
            cfg.notifications.enabled,
        ));
        let transfer = if cfg.transfer.enabled {
            Some(TransferClient::new(&cfg.transfer)?)
        } else {
            None
        };

        Ok(Self {
            server_cfg: cfg.server.clone(),
            backup_cfg: cfg.backups.clone(),
            control: control.clone(),
            console,
            handler,
            server: None,
            state: ServerState::Stopped,
            trigger: BackupTrigger::new(cfg.backups.backup_time()?),
            completion: Completion {
                engine: BackupEngine::new(cfg.backups.dir.clone()),
                control,
                transfer,
                retention_days: cfg.backups.retention_days,
                delay: cfg.backups.post_backup_delay(),
            },
            pending: None,
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    #[cfg(test)]
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Starts the server and polls triggers until a stop is requested.
    ///
    /// Returns an error only when the server could not be (re)started; in that case
    /// nothing is left running.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.start_server().await.context("initial server start")?;

        let mut tick = tokio::time::interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if self.control.stop_requested() {
                tracing::info!("stop requested");
                break;
            }
            if self.pending.as_ref().is_some_and(|h| h.is_finished()) {
                self.pending = None;
            }
            if !self.evaluate_triggers(chrono::Local::now().naive_local()) {
                continue;
            }

            match self.backup_and_restart().await {
                Ok(pending) => {
                    if pending.is_some() {
                        self.pending = pending;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "fatal: server could not be restarted");
                    self.control.set_error(err.to_string());
                    self.stop_server().await;
                    let delay = self.server_cfg.fatal_exit_delay();
                    tracing::warn!(delay_secs = delay.as_secs(), "supervisor exiting");
                    tokio::time::sleep(delay).await;
                    return Err(err.into());
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.stop_server().await;
        if let Some(pending) = self.pending.take()
            && !pending.is_finished()
        {
            tracing::info!("waiting for background backup to finish");
            if let Err(err) = pending.await {
                tracing::error!(error = %err, "background backup task failed");
            }
        }
        tracing::info!(state = ?self.state(), "supervisor stopped");
    }

    /// Decides whether a backup cycle should start now. Never fires while a
    /// previous cycle is still in flight.
    pub fn evaluate_triggers(&mut self, now: NaiveDateTime) -> bool {
        if self.control.backup_in_flight() {
            return false;
        }
        let scheduled = self.trigger.scheduled_due(now);
        let manual = self.control.take_backup_requested();
        if !scheduled && !manual {
            return false;
        }

        self.control.set_record_net_stat(true);
        let reason = if scheduled { "scheduled" } else { "manual" };
        tracing::info!(reason, at = %now.format("%H:%M:%S"), "backup triggered");
        true
    }

    /// Launches the server unless one is already running.
    pub async fn start_server(&mut self) -> anyhow::Result<()> {
        if self.server.is_some() {
            tracing::warn!("server already running; start ignored");
            return Ok(());
        }

        self.state = ServerState::Starting;
        let spec = resolve_launch_spec(&self.server_cfg);
        tracing::info!(
            kind = spec.kind,
            cwd = %spec.cwd.display(),
            "starting server: {}",
            spec.command_line()
        );

        let mut cmd = tokio::process::Command::new(&spec.exec);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    // Own session so a forced stop can take the whole process group down.
                    set_parent_death_signal()?;
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = match cmd
            .spawn()
            .with_context(|| format!("spawn {} (cwd {})", spec.exec.display(), spec.cwd.display()))
        {
            Ok(child) => child,
            Err(err) => {
                self.state = ServerState::Stopped;
                return Err(err);
            }
        };
        let pid = child.id();

        if let Some(stdin) = child.stdin.take() {
            self.console.attach(Box::new(stdin)).await;
        }
        let mut streams: Vec<(&'static str, ConsoleReader)> = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            streams.push(("stdout", Box::new(out)));
        }
        if let Some(err) = child.stderr.take() {
            streams.push(("stderr", Box::new(err)));
        }
        let bridge = ConsoleBridge::spawn(streams, self.handler.clone());

        self.server = Some(ServerHandle {
            child,
            pgid: pid.map(|p| p as i32),
            bridge,
        });
        self.state = ServerState::Running;
        tracing::info!(pid, "server started");
        Ok(())
    }

    /// Warns players, asks the server to stop and waits for it, killing it if it
    /// takes too long. The handle is released on every path.
    pub async fn stop_server(&mut self) -> StopOutcome {
        let Some(mut handle) = self.server.take() else {
            self.state = ServerState::Stopped;
            return StopOutcome::NotRunning;
        };
        self.state = ServerState::Stopping;

        let outcome = self.stop_child(&mut handle).await;

        self.console.detach().await;
        if let Some(lines) = handle.bridge.finish(BRIDGE_DRAIN_TIMEOUT).await {
            tracing::debug!(lines, "server output drained");
        }
        self.state = ServerState::Stopped;
        outcome
    }

    async fn stop_child(&self, handle: &mut ServerHandle) -> StopOutcome {
        match handle.child.try_wait() {
            Ok(Some(status)) => {
                tracing::warn!(code = ?status.code(), "server had already exited");
                return StopOutcome::Exited(status.code());
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "could not poll server process"),
        }

        tracing::info!("stopping server");
        self.console
            .send(&format!("say {}", self.server_cfg.restart_warning))
            .await;
        tokio::time::sleep(self.server_cfg.stop_grace()).await;
        self.console.send("stop").await;

        let timeout = self.server_cfg.stop_timeout();
        match tokio::time::timeout(timeout, handle.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(code = ?status.code(), "server stopped");
                StopOutcome::Exited(status.code())
            }
            Ok(Err(err)) => {
                tracing::error!(error = %err, "failed waiting for server exit; killing");
                force_kill(handle).await;
                StopOutcome::Killed
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "server did not stop in time; killing"
                );
                force_kill(handle).await;
                StopOutcome::Killed
            }
        }
    }

    /// Stop, copy, restart, then compress and send in the background.
    ///
    /// Returns the handle of the background task when the copy succeeded. A failed
    /// copy still restarts the server; a failed restart is fatal.
    pub async fn backup_and_restart(&mut self) -> Result<Option<JoinHandle<()>>, SupervisorError> {
        self.control.set_backup_requested(true);
        self.control.set_backup_in_flight(true);
        tracing::info!("backup cycle started");

        if let StopOutcome::Exited(Some(code)) = self.stop_server().await
            && code != 0
        {
            tracing::warn!(code, "server exited with a non-zero status before backup");
        }

        let engine = self.completion.engine.clone();
        let sources = self.backup_cfg.sources.clone();
        let copied = match tokio::task::spawn_blocking(move || engine.copy_to_staging(&sources)).await {
            Ok(result) => result,
            Err(err) => Err(BackupError::Staging {
                staging: self.completion.engine.backup_dir().to_path_buf(),
                source: anyhow::anyhow!("copy task failed: {err}"),
            }),
        };

        let job = match copied {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(error = %err, "backup copy failed; restarting server");
                self.control.set_error(err.to_string());
                let restarted = self.start_server().await;
                self.clear_cycle_flags();
                restarted.map_err(SupervisorError::FatalRestartFailure)?;
                return Ok(None);
            }
        };

        tracing::info!(staging = %job.staging_dir.display(), "sources copied; restarting server");
        if let Err(err) = self.start_server().await {
            tracing::error!(error = %format_error_chain(&err), "server restart failed");
            self.clear_cycle_flags();
            return Err(SupervisorError::FatalRestartFailure(err));
        }

        let completion = self.completion.clone();
        Ok(Some(tokio::spawn(completion.run(job))))
    }

    fn clear_cycle_flags(&self) {
        self.control.set_backup_requested(false);
        self.control.set_backup_in_flight(false);
    }
}

async fn force_kill(handle: &mut ServerHandle) {
    #[cfg(unix)]
    {
        if let Some(pgid) = handle.pgid {
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
    if let Err(err) = handle.child.kill().await {
        tracing::warn!(error = %err, "failed to kill server process");
    }
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal() -> std::io::Result<()> {
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        path::{Path, PathBuf},
        sync::{
            Mutex,
            atomic::{AtomicU64, Ordering},
        },
    };

    fn temp_dir_for(test_name: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "warden-agent-supervisor-{test_name}-{}-{n}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl LoginMessages for Recorder {
        fn login_message(&self, player: &str) -> String {
            self.0.lock().unwrap().push(player.to_string());
            r#"{"text":"welcome"}"#.to_string()
        }
    }

    fn config(root: &Path, launcher: &Path, sources: &[PathBuf], notifications: bool) -> Config {
        let sources = sources
            .iter()
            .map(|p| format!("\"{}\"", p.display()))
            .collect::<Vec<_>>()
            .join(", ");
        let raw = format!(
            r#"
[server]
dir = "{root}"
launcher = "{launcher}"
stop_grace_secs = 0
stop_timeout_secs = 5
fatal_exit_delay_secs = 0

[backups]
time = "03:00"
sources = [{sources}]
dir = "{root}/backups"
post_backup_delay_secs = 0

[transfer]
enabled = false

[notifications]
enabled = {notifications}
delay_secs = 0
"#,
            root = root.display(),
            launcher = launcher.display(),
        );
        Config::parse(&raw).unwrap()
    }

    fn supervisor(cfg: &Config) -> (Supervisor, Arc<ControlState>) {
        let control = Arc::new(ControlState::new());
        let sup = Supervisor::new(cfg, control.clone(), Arc::new(Recorder::default())).unwrap();
        (sup, control)
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const ECHO_SERVER: &str = r#"echo "server ready"
while read line; do
  echo "got: $line"
  if [ "$line" = "stop" ]; then
    echo "stopping"
    exit 0
  fi
done
"#;

    #[test]
    fn trigger_fires_once_per_matching_minute() {
        let mut trigger = BackupTrigger::new(NaiveTime::from_hms_opt(3, 0, 0).unwrap());
        assert!(trigger.scheduled_due(at(3, 0, 0)));
        assert!(!trigger.scheduled_due(at(3, 0, 45)));
        assert!(!trigger.scheduled_due(at(3, 1, 0)));
        assert!(!trigger.scheduled_due(at(14, 59, 0)));

        let next_day = at(3, 0, 10) + chrono::Duration::days(1);
        assert!(trigger.scheduled_due(next_day));
    }

    #[tokio::test]
    async fn manual_flag_fires_regardless_of_time() {
        let root = temp_dir_for("manual");
        let cfg = config(&root, Path::new("/bin/true"), &[root.clone()], false);
        let (mut sup, control) = supervisor(&cfg);

        assert!(!sup.evaluate_triggers(at(14, 59, 0)));

        control.set_backup_requested(true);
        assert!(sup.evaluate_triggers(at(14, 59, 0)));
        assert!(!control.backup_requested());
        assert!(control.take_record_net_stat());

        assert!(sup.evaluate_triggers(at(3, 0, 0)));
        assert!(!sup.evaluate_triggers(at(3, 0, 45)));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn in_flight_cycle_suppresses_triggers() {
        let root = temp_dir_for("in-flight");
        let cfg = config(&root, Path::new("/bin/true"), &[root.clone()], false);
        let (mut sup, control) = supervisor(&cfg);

        control.set_backup_in_flight(true);
        control.set_backup_requested(true);
        assert!(!sup.evaluate_triggers(at(3, 0, 0)));
        assert!(control.backup_requested());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_is_idempotent_and_stop_is_graceful() {
        let root = temp_dir_for("lifecycle");
        let launcher = write_script(&root, "start.sh", ECHO_SERVER);
        let cfg = config(&root, &launcher, &[root.clone()], false);
        let (mut sup, _control) = supervisor(&cfg);

        sup.start_server().await.unwrap();
        assert_eq!(sup.state(), ServerState::Running);
        let pid = sup.server.as_ref().and_then(|h| h.child.id());
        sup.start_server().await.unwrap();
        assert_eq!(sup.server.as_ref().and_then(|h| h.child.id()), pid);

        assert_eq!(sup.stop_server().await, StopOutcome::Exited(Some(0)));
        assert_eq!(sup.state(), ServerState::Stopped);
        assert!(!sup.console().is_attached().await);
        assert_eq!(sup.stop_server().await, StopOutcome::NotRunning);

        sup.start_server().await.unwrap();
        assert_eq!(sup.state(), ServerState::Running);
        assert_eq!(sup.stop_server().await, StopOutcome::Exited(Some(0)));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_stops_server_when_stop_is_requested() {
        let root = temp_dir_for("run-stop");
        let world = root.join("world");
        std::fs::create_dir_all(&world).unwrap();
        let launcher = write_script(&root, "start.sh", ECHO_SERVER);
        let cfg = config(&root, &launcher, &[world], false);
        let (mut sup, control) = supervisor(&cfg);

        let stopper = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stopper.request_stop();
        });

        tokio::time::timeout(Duration::from_secs(15), sup.run())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(sup.state(), ServerState::Stopped);
        assert!(sup.server.is_none());
        assert!(!sup.console().is_attached().await);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_exits_with_error_when_restart_fails() {
        let root = temp_dir_for("run-fatal");
        let world = root.join("world");
        std::fs::create_dir_all(&world).unwrap();
        std::fs::write(world.join("level.dat"), b"level").unwrap();
        let launcher = write_script(&root, "start.sh", ECHO_SERVER);
        let cfg = config(&root, &launcher, &[world], false);
        let (mut sup, control) = supervisor(&cfg);

        let trigger = control.clone();
        let script = launcher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            std::fs::remove_file(&script).unwrap();
            trigger.set_backup_requested(true);
        });

        let result = tokio::time::timeout(Duration::from_secs(15), sup.run())
            .await
            .unwrap();

        assert!(result.is_err());
        assert!(
            control.last_error().contains("server restart failed"),
            "{}",
            control.last_error()
        );
        assert_eq!(sup.state(), ServerState::Stopped);
        assert!(!control.backup_in_flight());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stubborn_server_is_killed_after_timeout() {
        let root = temp_dir_for("stubborn");
        let launcher = write_script(
            &root,
            "start.sh",
            "trap '' TERM INT\necho up\nwhile true; do sleep 1; done\n",
        );
        let mut cfg = config(&root, &launcher, &[root.clone()], false);
        cfg.server.stop_timeout_secs = 1;
        let (mut sup, _control) = supervisor(&cfg);

        sup.start_server().await.unwrap();
        assert_eq!(sup.stop_server().await, StopOutcome::Killed);
        assert_eq!(sup.state(), ServerState::Stopped);
        assert!(sup.server.is_none());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn login_line_reaches_the_catalogue() {
        let root = temp_dir_for("login");
        let launcher = write_script(
            &root,
            "start.sh",
            &format!(
                "echo '[12:00:00] [Server thread/INFO]: Steve[/127.0.0.1:5] logged in with entity id 1'\n{ECHO_SERVER}"
            ),
        );
        let cfg = config(&root, &launcher, &[root.clone()], true);
        let control = Arc::new(ControlState::new());
        let recorder = Arc::new(Recorder::default());
        let mut sup = Supervisor::new(&cfg, control, recorder.clone()).unwrap();

        sup.start_server().await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while recorder.0.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(recorder.0.lock().unwrap().as_slice(), ["Steve".to_string()]);
        sup.stop_server().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn backup_cycle_restarts_then_archives() {
        let root = temp_dir_for("cycle");
        let world = root.join("world");
        std::fs::create_dir_all(world.join("region")).unwrap();
        std::fs::write(world.join("level.dat"), b"level").unwrap();
        std::fs::write(world.join("region").join("r.0.0.mca"), b"chunks").unwrap();
        let launcher = write_script(&root, "start.sh", ECHO_SERVER);
        let cfg = config(&root, &launcher, &[world.clone()], false);
        let (mut sup, control) = supervisor(&cfg);

        sup.start_server().await.unwrap();
        let pending = sup.backup_and_restart().await.unwrap().unwrap();
        assert_eq!(sup.state(), ServerState::Running);
        pending.await.unwrap();

        assert!(!control.backup_requested());
        assert!(!control.backup_in_flight());
        let entries: Vec<String> = std::fs::read_dir(root.join("backups"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries.len(), 1, "{entries:?}");
        assert!(entries[0].starts_with("world_") && entries[0].ends_with(".zip"));
        assert_eq!(control.last_error(), warden_process::NO_ERROR);

        sup.stop_server().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn copy_failure_records_error_and_restarts() {
        let root = temp_dir_for("copy-fail");
        let missing = root.join("no-such-world");
        let launcher = write_script(&root, "start.sh", ECHO_SERVER);
        let cfg = config(&root, &launcher, &[missing.clone()], false);
        let (mut sup, control) = supervisor(&cfg);

        sup.start_server().await.unwrap();
        assert!(sup.backup_and_restart().await.unwrap().is_none());

        assert_eq!(sup.state(), ServerState::Running);
        assert!(control.last_error().contains("no-such-world"));
        assert!(!control.backup_in_flight());
        assert!(!control.backup_requested());
        sup.stop_server().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restart_failure_is_fatal() {
        let root = temp_dir_for("fatal");
        let world = root.join("world");
        std::fs::create_dir_all(&world).unwrap();
        std::fs::write(world.join("level.dat"), b"level").unwrap();
        let launcher = write_script(&root, "start.sh", ECHO_SERVER);
        let cfg = config(&root, &launcher, &[world], false);
        let (mut sup, control) = supervisor(&cfg);

        sup.start_server().await.unwrap();
        std::fs::remove_file(&launcher).unwrap();

        let err = sup.backup_and_restart().await.unwrap_err();
        assert!(matches!(err, SupervisorError::FatalRestartFailure(_)));
        assert_eq!(sup.state(), ServerState::Stopped);
        assert!(!control.backup_in_flight());

        let leftovers: Vec<_> = std::fs::read_dir(root.join("backups")).unwrap().collect();
        assert!(leftovers.is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }
}
