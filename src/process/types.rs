use serde::Serialize;
use std::time::{Duration, SystemTime};

/// Lifecycle state of one managed app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    Stopped,
    Running,
    Exited,
    RestartPending,
    /// Stopped after the last attempt failed to spawn
    Errored,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Exited => write!(f, "exited"),
            ProcessState::RestartPending => write!(f, "restart-pending"),
            ProcessState::Errored => write!(f, "errored"),
        }
    }
}

/// Runtime status of one app, owned by its supervisor task
#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub name: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    /// Spawn attempts, successful or not
    pub attempts: u32,
    /// Successful spawns
    pub spawns: u32,
    pub restarts: u32,
    pub last_exit_code: Option<i32>,
    pub last_error: Option<String>,
    pub started_at: Option<SystemTime>,
    pub last_restart: Option<SystemTime>,
    /// Autorestart was on but the restart budget ran out
    pub exhausted: bool,
    /// The supervisor task has reached its final state
    pub finished: bool,
}

impl AppStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ProcessState::Stopped,
            pid: None,
            attempts: 0,
            spawns: 0,
            restarts: 0,
            last_exit_code: None,
            last_error: None,
            started_at: None,
            last_restart: None,
            exhausted: false,
            finished: false,
        }
    }

    /// Time since the current child was spawned, while it is running
    pub fn uptime(&self) -> Option<Duration> {
        if self.state != ProcessState::Running {
            return None;
        }
        self.started_at
            .and_then(|started| SystemTime::now().duration_since(started).ok())
    }
}
