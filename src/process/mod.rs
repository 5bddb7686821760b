// Process module - Spawning, restart policy and supervision of managed apps

pub mod restart;
pub mod spawner;
mod supervisor;
mod types;

pub use restart::{ExitDecision, RestartPolicy, RestartTracker};
pub use spawner::{build_command, spawn_process, SpawnedProcess};
pub use supervisor::{AppSupervisor, Supervisor};
pub use types::{AppStatus, ProcessState};
