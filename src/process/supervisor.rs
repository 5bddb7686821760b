use crate::config::ManagedProcessSpec;
use crate::error::{HerderError, Result};
use crate::logs::{attach, LogSink, SharedSink};
use crate::process::restart::{ExitDecision, RestartTracker};
use crate::process::spawner::{spawn_process, SpawnedProcess};
use crate::process::types::{AppStatus, ProcessState};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound on draining pipes held open by orphaned grandchildren
const CAPTURE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How one run of the child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Exited,
    SpawnFailed,
    Shutdown,
}

/// Supervises a single spec: spawns it, captures its output and applies
/// the restart policy until the budget runs out or shutdown is requested.
pub struct AppSupervisor {
    spec: ManagedProcessSpec,
    tracker: RestartTracker,
    status: watch::Sender<AppStatus>,
    shutdown: watch::Receiver<bool>,
}

impl AppSupervisor {
    /// Create a supervisor for `spec` and the receiver for its status
    ///
    /// # Arguments
    /// * `spec` - The app to supervise
    /// * `shutdown` - Flipped to `true` when the child must be stopped
    pub fn new(
        spec: ManagedProcessSpec,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, watch::Receiver<AppStatus>) {
        let (status, status_rx) = watch::channel(AppStatus::new(spec.name()));
        (
            Self {
                spec,
                tracker: RestartTracker::new(),
                status,
                shutdown,
            },
            status_rx,
        )
    }

    /// Run the supervision loop to completion
    pub async fn run(mut self) {
        let sink = match LogSink::open(self.spec.logging()).await {
            Ok(sink) => {
                debug!(
                    "Logging '{}' to {} and {}{}",
                    self.spec.name(),
                    sink.out_path().display(),
                    sink.error_path().display(),
                    if sink.is_merged() { " (merged)" } else { "" }
                );
                Arc::new(Mutex::new(sink))
            }
            Err(e) => {
                error!("Cannot open logs for '{}': {}", self.spec.name(), e);
                self.update(|s| s.last_error = Some(e.to_string()));
                self.finish(ProcessState::Errored, false);
                return;
            }
        };

        loop {
            let outcome = self.run_once(&sink).await;
            if outcome == RunOutcome::Shutdown {
                self.finish(ProcessState::Stopped, false);
                return;
            }

            match self.spec.restart_policy().decide(&self.tracker) {
                ExitDecision::Restart { delay } => {
                    self.update(|s| s.state = ProcessState::RestartPending);
                    info!(
                        "Restarting '{}' in {:?} (restart {} of {})",
                        self.spec.name(),
                        delay,
                        self.tracker.restart_count() + 1,
                        self.spec.restart_policy().max_restarts
                    );

                    if !self.sleep_unless_shutdown(delay).await {
                        self.finish(ProcessState::Stopped, false);
                        return;
                    }

                    self.tracker.record_restart();
                    let restarts = self.tracker.restart_count();
                    let last_restart = self.tracker.last_restart_time();
                    self.update(|s| {
                        s.restarts = restarts;
                        s.last_restart = last_restart;
                    });
                }
                ExitDecision::Stop { exhausted } => {
                    if exhausted {
                        let condition = HerderError::RestartBudgetExhausted(self.spec.name().to_string());
                        warn!(
                            "{} after {} restart(s), leaving it stopped",
                            condition,
                            self.tracker.restart_count()
                        );
                    } else {
                        info!("Autorestart disabled for '{}', leaving it stopped", self.spec.name());
                    }

                    let state = if outcome == RunOutcome::SpawnFailed {
                        ProcessState::Errored
                    } else {
                        ProcessState::Stopped
                    };
                    self.finish(state, exhausted);
                    return;
                }
            }
        }
    }

    /// Spawn the child once and wait for it to exit or for shutdown
    async fn run_once(&mut self, sink: &SharedSink) -> RunOutcome {
        if *self.shutdown.borrow() {
            return RunOutcome::Shutdown;
        }

        self.update(|s| s.attempts += 1);

        let mut spawned = match spawn_process(&self.spec).await {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("{}", e);
                self.update(|s| {
                    s.pid = None;
                    s.last_error = Some(e.to_string());
                });
                return RunOutcome::SpawnFailed;
            }
        };

        let pid = spawned.pid;
        info!("Started '{}' (PID: {})", self.spec.name(), pid);
        self.update(|s| {
            s.state = ProcessState::Running;
            s.pid = Some(pid);
            s.spawns += 1;
            s.started_at = Some(SystemTime::now());
            s.last_error = None;
        });

        let capture = match attach(self.spec.name(), &mut spawned.child, Arc::clone(sink)) {
            Ok(capture) => Some(capture),
            Err(e) => {
                warn!("Output of '{}' will not be logged: {}", self.spec.name(), e);
                None
            }
        };

        let mut shutdown = self.shutdown.clone();
        let exit = tokio::select! {
            result = spawned.child.wait() => Some(result),
            _ = shutdown_requested(&mut shutdown) => None,
        };

        let (outcome, exit_code) = match exit {
            Some(Ok(status)) => {
                info!("Process '{}' (PID: {}) exited: {}", self.spec.name(), pid, status);
                (RunOutcome::Exited, status.code())
            }
            Some(Err(e)) => {
                warn!("Failed to wait for '{}' (PID: {}): {}", self.spec.name(), pid, e);
                (RunOutcome::Exited, None)
            }
            None => {
                if let Err(e) = stop_child(&self.spec, &mut spawned).await {
                    error!("{}", e);
                }
                (RunOutcome::Shutdown, None)
            }
        };

        // Drain the pipes before the next spawn so log order follows run order
        if let Some(capture) = capture {
            if tokio::time::timeout(CAPTURE_DRAIN_TIMEOUT, capture.finish())
                .await
                .is_err()
            {
                debug!(
                    "Output pipes of '{}' still open after exit, not waiting further",
                    self.spec.name()
                );
            }
        }

        self.update(|s| {
            s.state = ProcessState::Exited;
            s.pid = None;
            s.last_exit_code = exit_code;
        });

        outcome
    }

    /// Sleep for `delay`; returns `false` if shutdown arrived first
    async fn sleep_unless_shutdown(&self, delay: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown_requested(&mut shutdown) => false,
        }
    }

    fn update<F: FnOnce(&mut AppStatus)>(&self, modify: F) {
        self.status.send_modify(modify);
    }

    fn finish(&self, state: ProcessState, exhausted: bool) {
        debug!("Supervision of '{}' finished in state {}", self.spec.name(), state);
        self.update(|s| {
            s.state = state;
            s.pid = None;
            s.exhausted = exhausted;
            s.finished = true;
        });
    }
}

/// Resolves once shutdown is requested or the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Ask the child's process group to stop, then SIGKILL the group after the
/// grace period
async fn stop_child(spec: &ManagedProcessSpec, spawned: &mut SpawnedProcess) -> Result<()> {
    let stop = spec.stop();

    info!(
        "Stopping '{}' (PID: {}) with {}",
        spec.name(),
        spawned.pid,
        stop.signal
    );

    if let Err(e) = signal_group(spawned, &stop.signal) {
        warn!("{}", e);
    }

    let result = match tokio::time::timeout(stop.kill_timeout, spawned.child.wait()).await {
        Ok(Ok(status)) => {
            info!("Process '{}' exited gracefully: {}", spec.name(), status);
            Ok(())
        }
        Ok(Err(e)) => Err(HerderError::StopError(
            spec.name().to_string(),
            format!("Wait failed: {}", e),
        )),
        Err(_) => {
            warn!(
                "Process '{}' did not exit within {:?}, sending SIGKILL",
                spec.name(),
                stop.kill_timeout
            );
            spawned.child.kill().await.map_err(|e| {
                HerderError::StopError(
                    spec.name().to_string(),
                    format!("Failed to send SIGKILL after timeout: {}", e),
                )
            })
        }
    };

    // Descendants that outlived the leader would keep the pipes open
    if let Err(e) = signal_group(spawned, "SIGKILL") {
        debug!("{}", e);
    }

    result
}

/// Deliver `signal_name` to every process in the child's group
#[cfg(unix)]
fn signal_group(spawned: &mut SpawnedProcess, signal_name: &str) -> Result<()> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let signal = parse_signal(signal_name)?;
    killpg(Pid::from_raw(spawned.pid as i32), signal).map_err(|e| {
        HerderError::SignalError(format!(
            "Failed to send {} to process group of {} (PGID: {}): {}",
            signal_name, spawned.name, spawned.pid, e
        ))
    })
}

#[cfg(not(unix))]
fn signal_group(spawned: &mut SpawnedProcess, _signal_name: &str) -> Result<()> {
    spawned.child.start_kill().map_err(|e| {
        HerderError::SignalError(format!("Failed to stop {}: {}", spawned.name, e))
    })
}

#[cfg(unix)]
fn parse_signal(signal_name: &str) -> Result<nix::sys::signal::Signal> {
    use nix::sys::signal::Signal;

    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(HerderError::SignalError(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}

/// A running app task and its status feed
struct AppHandle {
    name: String,
    status: watch::Receiver<AppStatus>,
    task: JoinHandle<()>,
}

/// Supervises a set of independent apps, one task per spec
pub struct Supervisor {
    apps: Vec<AppHandle>,
    shutdown: watch::Sender<bool>,
}

impl Supervisor {
    /// Start supervising every spec; must be called inside a tokio runtime
    pub fn start<I>(specs: I) -> Self
    where
        I: IntoIterator<Item = ManagedProcessSpec>,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let apps = specs
            .into_iter()
            .map(|spec| {
                if spec.watch() {
                    warn!(
                        "'{}' sets watch = true; reload on file change is not supported and is ignored",
                        spec.name()
                    );
                }

                let name = spec.name().to_string();
                let (app, status) = AppSupervisor::new(spec, shutdown_rx.clone());
                let task = tokio::spawn(app.run());
                AppHandle { name, status, task }
            })
            .collect();

        Self { apps, shutdown }
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.apps.iter().map(|app| app.name.as_str()).collect()
    }

    pub fn status(&self, name: &str) -> Option<AppStatus> {
        self.find(name).map(|app| app.status.borrow().clone())
    }

    pub fn statuses(&self) -> Vec<AppStatus> {
        self.apps
            .iter()
            .map(|app| app.status.borrow().clone())
            .collect()
    }

    /// Subscribe to status changes of one app
    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<AppStatus>> {
        self.find(name).map(|app| app.status.clone())
    }

    /// Wait until the status of `name` satisfies `predicate`, or its task
    /// ends; returns the status seen last
    pub async fn wait_until<F>(&self, name: &str, predicate: F) -> Result<AppStatus>
    where
        F: FnMut(&AppStatus) -> bool,
    {
        let mut status = self
            .subscribe(name)
            .ok_or_else(|| HerderError::ProcessNotFound(name.to_string()))?;

        let satisfied = status.wait_for(predicate).await.map(|seen| seen.clone()).ok();
        Ok(satisfied.unwrap_or_else(|| status.borrow().clone()))
    }

    /// Wait until every app reached its final state
    pub async fn wait_all(&self) -> Vec<AppStatus> {
        let mut statuses = Vec::with_capacity(self.apps.len());
        for app in &self.apps {
            let mut status = app.status.clone();
            let finished = status.wait_for(|s| s.finished).await.map(|seen| seen.clone()).ok();
            statuses.push(finished.unwrap_or_else(|| status.borrow().clone()));
        }
        statuses
    }

    /// Stop every child and wait for all app tasks to end
    pub async fn shutdown(self) -> Vec<AppStatus> {
        info!("Stopping {} app(s)", self.apps.len());
        self.shutdown.send_replace(true);

        let mut statuses = Vec::with_capacity(self.apps.len());
        for app in self.apps {
            if let Err(e) = app.task.await {
                error!("Supervisor task for '{}' failed: {}", app.name, e);
            }
            statuses.push(app.status.borrow().clone());
        }
        statuses
    }

    fn find(&self, name: &str) -> Option<&AppHandle> {
        self.apps.iter().find(|app| app.name == name)
    }
}
