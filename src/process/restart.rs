use std::time::{Duration, SystemTime};

/// Restart policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub autorestart: bool,
    /// Maximum number of restarts over the life of the supervisor
    pub max_restarts: u32,
    /// Fixed delay before each restart
    pub restart_delay: Duration,
}

/// What to do after the child exits (or fails to spawn)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Wait `delay`, then spawn again
    Restart { delay: Duration },
    /// Leave the process stopped; `exhausted` is set when autorestart was on
    /// but the budget ran out
    Stop { exhausted: bool },
}

impl RestartPolicy {
    pub fn new(autorestart: bool, max_restarts: u32, restart_delay: Duration) -> Self {
        Self {
            autorestart,
            max_restarts,
            restart_delay,
        }
    }

    /// Check if restart should be attempted given the restarts performed so far
    pub fn should_restart(&self, restarts_so_far: u32) -> bool {
        self.autorestart && restarts_so_far < self.max_restarts
    }

    pub fn decide(&self, tracker: &RestartTracker) -> ExitDecision {
        if self.should_restart(tracker.restart_count()) {
            ExitDecision::Restart {
                delay: self.restart_delay,
            }
        } else {
            ExitDecision::Stop {
                exhausted: self.autorestart,
            }
        }
    }
}

/// Tracks restart history for a process
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    /// Timestamps of all restart attempts
    restart_times: Vec<SystemTime>,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a restart attempt
    pub fn record_restart(&mut self) {
        self.restart_times.push(SystemTime::now());
    }

    /// Get the total number of restarts
    pub fn restart_count(&self) -> u32 {
        u32::try_from(self.restart_times.len()).unwrap_or(u32::MAX)
    }

    /// Get the time of the last restart, if any
    pub fn last_restart_time(&self) -> Option<SystemTime> {
        self.restart_times.last().copied()
    }
}
