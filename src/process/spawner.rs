use crate::config::ManagedProcessSpec;
use crate::error::{HerderError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,

    /// Process name from configuration
    pub name: String,
}

/// Build the command for a spec without spawning it.
///
/// `interpreter script args...` when an interpreter is set, otherwise
/// `script args...`. A relative script run directly is resolved against
/// the app's working directory.
pub fn build_command(spec: &ManagedProcessSpec) -> Command {
    let command_spec = spec.command();

    let mut command = match command_spec.interpreter {
        Some(ref interpreter) => {
            let mut command = Command::new(interpreter);
            command.arg(&command_spec.script);
            command
        }
        None => Command::new(resolve_script(spec)),
    };

    command.args(&command_spec.args);
    command.current_dir(spec.cwd());

    // Inherited environment first, spec values win on collision
    command.envs(spec.env());

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    // Own process group: stop signals reach the whole tree, and a terminal
    // Ctrl-C reaches herder only
    #[cfg(unix)]
    command.process_group(0);

    command
}

fn resolve_script(spec: &ManagedProcessSpec) -> PathBuf {
    let script = &spec.command().script;
    if script.is_relative() && script.components().count() > 1 {
        spec.cwd().join(script)
    } else {
        script.clone()
    }
}

/// Spawn a process based on the provided spec
///
/// # Arguments
/// * `spec` - Validated spec containing all spawn settings
///
/// # Returns
/// * `Ok(SpawnedProcess)` - Successfully spawned process with metadata
/// * `Err(HerderError::SpawnFailure)` - Bad working directory, missing
///   interpreter or script, or any other OS-level spawn error
pub async fn spawn_process(spec: &ManagedProcessSpec) -> Result<SpawnedProcess> {
    let cwd = spec.cwd();
    if !cwd.is_dir() {
        return Err(HerderError::spawn_failure(
            spec.name(),
            format!("working directory does not exist: {}", cwd.display()),
        ));
    }

    let mut command = build_command(spec);

    let child = command.spawn().map_err(|e| {
        HerderError::spawn_failure(
            spec.name(),
            format!("{}: {}", spec.command_line(), e),
        )
    })?;

    let pid = child.id().ok_or_else(|| {
        HerderError::spawn_failure(spec.name(), "child exited before its PID was read")
    })?;

    Ok(SpawnedProcess {
        child,
        pid,
        name: spec.name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawSpec;
    use std::path::Path;
    use tempfile::TempDir;

    fn create_test_spec(name: &str, cwd: &Path, script: &str, args: &[&str]) -> RawSpec {
        let mut raw = RawSpec::new(
            name,
            script,
            cwd,
            cwd.join("out.log"),
            cwd.join("err.log"),
        );
        raw.args = args.iter().map(|a| a.to_string()).collect();
        raw
    }

    fn build(raw: RawSpec) -> ManagedProcessSpec {
        ManagedProcessSpec::try_from(raw).unwrap()
    }

    async fn stdout_of(spec: &ManagedProcessSpec) -> String {
        let spawned = spawn_process(spec).await.unwrap();
        let output = spawned.child.wait_with_output().await.unwrap();
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    #[tokio::test]
    async fn test_spawn_simple_process() {
        let temp_dir = TempDir::new().unwrap();
        let spec = build(create_test_spec("test-echo", temp_dir.path(), "/bin/echo", &["hi"]));

        let spawned = spawn_process(&spec).await.unwrap();
        assert_eq!(spawned.name, "test-echo");
        assert!(spawned.pid > 0);
        assert!(spawned.child.stdout.is_some());
        assert!(spawned.child.stderr.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_leads_its_own_process_group() {
        use nix::unistd::{getpgid, getpgrp, Pid};

        let temp_dir = TempDir::new().unwrap();
        let spec = build(create_test_spec("test-pgid", temp_dir.path(), "/bin/sleep", &["5"]));

        let mut spawned = spawn_process(&spec).await.unwrap();
        let pgid = getpgid(Some(Pid::from_raw(spawned.pid as i32))).unwrap();
        assert_eq!(pgid, Pid::from_raw(spawned.pid as i32));
        assert_ne!(pgid, getpgrp());

        spawned.child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_uses_working_directory() {
        let temp_dir = TempDir::new().unwrap();
        let spec = build(create_test_spec("test-pwd", temp_dir.path(), "/bin/sh", &["-c", "pwd -P"]));

        let expected = temp_dir.path().canonicalize().unwrap();
        assert_eq!(stdout_of(&spec).await, expected.display().to_string());
    }

    #[tokio::test]
    async fn test_spec_env_overrides_ambient() {
        std::env::set_var("LOG_LEVEL", "DEBUG");

        let temp_dir = TempDir::new().unwrap();
        let mut raw = create_test_spec("test-env", temp_dir.path(), "/bin/sh", &["-c", "echo $LOG_LEVEL"]);
        raw.env.insert("LOG_LEVEL".to_string(), "INFO".to_string());

        assert_eq!(stdout_of(&build(raw)).await, "INFO");
    }

    #[tokio::test]
    async fn test_ambient_env_inherited() {
        std::env::set_var("HERDER_SPAWNER_AMBIENT", "kept");

        let temp_dir = TempDir::new().unwrap();
        let raw = create_test_spec(
            "test-ambient",
            temp_dir.path(),
            "/bin/sh",
            &["-c", "echo $HERDER_SPAWNER_AMBIENT"],
        );

        assert_eq!(stdout_of(&build(raw)).await, "kept");
    }

    #[tokio::test]
    async fn test_interpreter_runs_script_relative_to_cwd() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("watchers")).unwrap();
        std::fs::write(
            temp_dir.path().join("watchers/hello.sh"),
            "echo \"hello from $1\"\n",
        )
        .unwrap();

        let mut raw = create_test_spec("test-interp", temp_dir.path(), "watchers/hello.sh", &["herder"]);
        raw.interpreter = Some("sh".to_string());

        assert_eq!(stdout_of(&build(raw)).await, "hello from herder");
    }

    #[tokio::test]
    async fn test_missing_working_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut raw = create_test_spec("test-invalid-cwd", temp_dir.path(), "/bin/echo", &[]);
        raw.cwd = temp_dir.path().join("gone");

        match spawn_process(&build(raw)).await {
            Err(HerderError::SpawnFailure { name, reason }) => {
                assert_eq!(name, "test-invalid-cwd");
                assert!(reason.contains("working directory"));
            }
            other => panic!("Expected SpawnFailure, got {:?}", other.map(|s| s.pid)),
        }
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let temp_dir = TempDir::new().unwrap();
        let mut raw = create_test_spec("test-no-interp", temp_dir.path(), "script.py", &[]);
        raw.interpreter = Some("herder-no-such-interpreter".to_string());

        let result = spawn_process(&build(raw)).await;
        assert!(matches!(result, Err(HerderError::SpawnFailure { .. })));
    }

    #[tokio::test]
    async fn test_missing_script() {
        let temp_dir = TempDir::new().unwrap();
        let raw = create_test_spec("test-no-script", temp_dir.path(), "/nonexistent/script", &[]);

        let result = spawn_process(&build(raw)).await;
        assert!(matches!(result, Err(HerderError::SpawnFailure { .. })));
    }
}
