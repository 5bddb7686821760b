// Config module - Managed process specs and ecosystem file loading

mod ecosystem;

pub use ecosystem::{Ecosystem, LoadReport, Rejected};

use crate::error::{HerderError, Result};
use crate::logs::DateFormat;
use crate::process::restart::RestartPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Signals accepted for `stop_signal`
pub const VALID_STOP_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

/// One app entry exactly as it appears in an ecosystem file.
///
/// Numeric fields are signed so that negative values survive parsing and
/// are reported as [`HerderError::InvalidSpec`] instead of a type error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSpec {
    /// Process name (unique identifier)
    #[serde(default)]
    pub name: String,

    /// Script to run, relative to `cwd` or absolute
    #[serde(default)]
    pub script: PathBuf,

    /// Interpreter used to run the script (e.g. `python3`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    /// Extra arguments appended after the script
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Working directory for the process
    pub cwd: PathBuf,

    /// Supervisor-side reload on file change (not the child's purpose)
    #[serde(default)]
    pub watch: bool,

    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: i64,

    /// Delay before restart, in milliseconds
    #[serde(default)]
    pub restart_delay: i64,

    /// Grace period between the stop signal and SIGKILL, in milliseconds
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: i64,

    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    pub error_file: PathBuf,

    pub out_file: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_date_format: Option<String>,

    #[serde(default)]
    pub merge_logs: bool,
}

// Default value functions for serde
fn default_autorestart() -> bool {
    true
}

fn default_max_restarts() -> i64 {
    10
}

fn default_kill_timeout() -> i64 {
    1600
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

impl RawSpec {
    /// Create a raw spec with defaults for every optional field
    pub fn new(
        name: impl Into<String>,
        script: impl Into<PathBuf>,
        cwd: impl Into<PathBuf>,
        out_file: impl Into<PathBuf>,
        error_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            interpreter: None,
            args: Vec::new(),
            cwd: cwd.into(),
            watch: false,
            autorestart: default_autorestart(),
            max_restarts: default_max_restarts(),
            restart_delay: 0,
            kill_timeout: default_kill_timeout(),
            stop_signal: default_stop_signal(),
            env: BTreeMap::new(),
            error_file: error_file.into(),
            out_file: out_file.into(),
            log_date_format: None,
            merge_logs: false,
        }
    }

    /// Expand `$VAR` and `${VAR}` references against the current environment.
    ///
    /// Applies to the script, args, working directory and log paths. Env
    /// values are passed to the child exactly as written. Unknown variables
    /// are left untouched.
    pub fn expand_env_vars(&mut self) {
        self.script = expand_env_in_path(&self.script);
        self.cwd = expand_env_in_path(&self.cwd);
        self.out_file = expand_env_in_path(&self.out_file);
        self.error_file = expand_env_in_path(&self.error_file);
        self.args = self.args.iter().map(|arg| expand_env_in_string(arg)).collect();
    }
}

/// How to invoke the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub interpreter: Option<String>,
    pub script: PathBuf,
    pub args: Vec<String>,
}

/// Where and how the child's output is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub out_file: PathBuf,
    pub error_file: PathBuf,
    pub merge_logs: bool,
    pub date_format: Option<DateFormat>,
}

/// How the child is asked to stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopConfig {
    pub signal: String,
    pub kill_timeout: Duration,
}

/// A validated, immutable description of one managed process.
///
/// Built from a [`RawSpec`] and serialized back through it, so loading and
/// re-serializing a spec is lossless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSpec", into = "RawSpec")]
pub struct ManagedProcessSpec {
    name: String,
    command: CommandSpec,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    restart_policy: RestartPolicy,
    logging: LogConfig,
    stop: StopConfig,
    watch: bool,
}

impl ManagedProcessSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Variables injected over the inherited environment
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn restart_policy(&self) -> &RestartPolicy {
        &self.restart_policy
    }

    pub fn logging(&self) -> &LogConfig {
        &self.logging
    }

    pub fn stop(&self) -> &StopConfig {
        &self.stop
    }

    pub fn watch(&self) -> bool {
        self.watch
    }

    /// Human-readable command line, for display only
    pub fn command_line(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref interpreter) = self.command.interpreter {
            parts.push(interpreter.clone());
        }
        parts.push(self.command.script.display().to_string());
        parts.extend(self.command.args.iter().cloned());
        parts.join(" ")
    }
}

impl TryFrom<RawSpec> for ManagedProcessSpec {
    type Error = HerderError;

    fn try_from(raw: RawSpec) -> Result<Self> {
        let name = raw.name;
        if name.trim().is_empty() {
            return Err(HerderError::invalid_spec("<unnamed>", "name must not be empty"));
        }

        let invalid = |reason: String| HerderError::invalid_spec(name.clone(), reason);

        if raw.script.as_os_str().is_empty() {
            return Err(invalid("script must not be empty".to_string()));
        }

        if let Some(ref interpreter) = raw.interpreter {
            if interpreter.trim().is_empty() {
                return Err(invalid("interpreter must not be empty when set".to_string()));
            }
        }

        if !raw.cwd.is_absolute() {
            return Err(invalid(format!(
                "cwd must be an absolute path: {}",
                raw.cwd.display()
            )));
        }

        for (field, path) in [("out_file", &raw.out_file), ("error_file", &raw.error_file)] {
            if !path.is_absolute() {
                return Err(invalid(format!(
                    "{} must be an absolute path: {}",
                    field,
                    path.display()
                )));
            }
        }

        if raw.max_restarts < 0 {
            return Err(invalid(format!(
                "max_restarts must be >= 0, got {}",
                raw.max_restarts
            )));
        }
        let max_restarts = u32::try_from(raw.max_restarts).map_err(|_| {
            invalid(format!(
                "max_restarts must be at most {}, got {}",
                u32::MAX,
                raw.max_restarts
            ))
        })?;

        let restart_delay = u64::try_from(raw.restart_delay).map_err(|_| {
            invalid(format!("restart_delay must be >= 0, got {}", raw.restart_delay))
        })?;

        let kill_timeout = u64::try_from(raw.kill_timeout).map_err(|_| {
            invalid(format!("kill_timeout must be >= 0, got {}", raw.kill_timeout))
        })?;

        if !VALID_STOP_SIGNALS.contains(&raw.stop_signal.as_str()) {
            return Err(invalid(format!(
                "Invalid stop_signal: {}. Must be one of: {}",
                raw.stop_signal,
                VALID_STOP_SIGNALS.join(", ")
            )));
        }

        let date_format = raw
            .log_date_format
            .as_deref()
            .map(DateFormat::parse)
            .transpose()
            .map_err(|e| invalid(format!("log_date_format: {}", e)))?;

        Ok(Self {
            command: CommandSpec {
                interpreter: raw.interpreter,
                script: raw.script,
                args: raw.args,
            },
            cwd: raw.cwd,
            env: raw.env,
            restart_policy: RestartPolicy::new(
                raw.autorestart,
                max_restarts,
                Duration::from_millis(restart_delay),
            ),
            logging: LogConfig {
                out_file: raw.out_file,
                error_file: raw.error_file,
                merge_logs: raw.merge_logs,
                date_format,
            },
            stop: StopConfig {
                signal: raw.stop_signal,
                kill_timeout: Duration::from_millis(kill_timeout),
            },
            watch: raw.watch,
            name,
        })
    }
}

impl From<ManagedProcessSpec> for RawSpec {
    fn from(spec: ManagedProcessSpec) -> Self {
        let policy = spec.restart_policy;
        Self {
            name: spec.name,
            script: spec.command.script,
            interpreter: spec.command.interpreter,
            args: spec.command.args,
            cwd: spec.cwd,
            watch: spec.watch,
            autorestart: policy.autorestart,
            max_restarts: i64::from(policy.max_restarts),
            restart_delay: duration_to_millis(policy.restart_delay),
            kill_timeout: duration_to_millis(spec.stop.kill_timeout),
            stop_signal: spec.stop.signal,
            env: spec.env,
            error_file: spec.logging.error_file,
            out_file: spec.logging.out_file,
            log_date_format: spec.logging.date_format.map(|f| f.pattern().to_string()),
            merge_logs: spec.logging.merge_logs,
        }
    }
}

fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Expand environment variables in a string
fn expand_env_in_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (var, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        let valid = !var.is_empty()
            && !var.starts_with(|c: char| c.is_ascii_digit())
            && var.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

        let value = if valid { std::env::var(var).ok() } else { None };

        match value {
            Some(value) => {
                result.push_str(&value);
                rest = &after[consumed..];
            }
            None => {
                result.push('$');
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

/// Expand environment variables in a path
fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if !path_str.contains('$') {
        return path.to_path_buf();
    }
    PathBuf::from(expand_env_in_string(&path_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str) -> RawSpec {
        RawSpec::new(
            name,
            "watchers/filesystem_watcher.py",
            "/srv/app",
            "/tmp/app-out.log",
            "/tmp/app-error.log",
        )
    }

    #[test]
    fn test_raw_spec_defaults() {
        let raw = raw("test");

        assert!(raw.autorestart);
        assert_eq!(raw.max_restarts, 10);
        assert_eq!(raw.restart_delay, 0);
        assert_eq!(raw.kill_timeout, 1600);
        assert_eq!(raw.stop_signal, "SIGTERM");
        assert!(!raw.merge_logs);
        assert!(!raw.watch);
    }

    #[test]
    fn test_valid_spec() {
        let mut raw = raw("fte-watcher");
        raw.interpreter = Some("python3".to_string());
        raw.restart_delay = 5000;
        raw.env.insert("DRY_RUN".to_string(), "false".to_string());

        let spec = ManagedProcessSpec::try_from(raw).unwrap();
        assert_eq!(spec.name(), "fte-watcher");
        assert_eq!(spec.cwd(), Path::new("/srv/app"));
        assert_eq!(spec.restart_policy().max_restarts, 10);
        assert_eq!(spec.restart_policy().restart_delay, Duration::from_millis(5000));
        assert_eq!(spec.env().get("DRY_RUN"), Some(&"false".to_string()));
        assert_eq!(
            spec.command_line(),
            "python3 watchers/filesystem_watcher.py"
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = ManagedProcessSpec::try_from(raw(""));
        assert!(matches!(result, Err(HerderError::InvalidSpec { .. })));
    }

    #[test]
    fn test_negative_max_restarts_rejected() {
        let mut raw = raw("test");
        raw.max_restarts = -1;

        match ManagedProcessSpec::try_from(raw) {
            Err(HerderError::InvalidSpec { name, reason }) => {
                assert_eq!(name, "test");
                assert!(reason.contains("max_restarts"));
            }
            other => panic!("Expected InvalidSpec, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_max_restarts_rejected() {
        let mut raw = raw("test");
        raw.max_restarts = i64::from(u32::MAX) + 1;

        match ManagedProcessSpec::try_from(raw) {
            Err(HerderError::InvalidSpec { reason, .. }) => {
                assert!(reason.contains("at most"));
                assert!(!reason.contains(">= 0"));
            }
            other => panic!("Expected InvalidSpec, got {:?}", other),
        }
    }

    #[test]
    fn test_max_restarts_upper_bound_accepted() {
        let mut raw = raw("test");
        raw.max_restarts = i64::from(u32::MAX);

        let spec = ManagedProcessSpec::try_from(raw).unwrap();
        assert_eq!(spec.restart_policy().max_restarts, u32::MAX);
    }

    #[test]
    fn test_negative_restart_delay_rejected() {
        let mut raw = raw("test");
        raw.restart_delay = -5;

        assert!(matches!(
            ManagedProcessSpec::try_from(raw),
            Err(HerderError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_relative_cwd_rejected() {
        let mut raw = raw("test");
        raw.cwd = PathBuf::from("relative/dir");

        match ManagedProcessSpec::try_from(raw) {
            Err(HerderError::InvalidSpec { reason, .. }) => assert!(reason.contains("cwd")),
            other => panic!("Expected InvalidSpec, got {:?}", other),
        }
    }

    #[test]
    fn test_relative_log_path_rejected() {
        let mut raw = raw("test");
        raw.error_file = PathBuf::from("logs/err.log");

        assert!(matches!(
            ManagedProcessSpec::try_from(raw),
            Err(HerderError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_invalid_signal_rejected() {
        let mut raw = raw("test");
        raw.stop_signal = "SIGBOGUS".to_string();

        assert!(matches!(
            ManagedProcessSpec::try_from(raw),
            Err(HerderError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_bad_date_format_rejected() {
        let mut raw = raw("test");
        raw.log_date_format = Some("YYY-MM".to_string());

        assert!(matches!(
            ManagedProcessSpec::try_from(raw),
            Err(HerderError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_cwd_need_not_exist_at_load() {
        let mut raw = raw("test");
        raw.cwd = PathBuf::from("/definitely/not/here");

        assert!(ManagedProcessSpec::try_from(raw).is_ok());
    }

    #[test]
    fn test_raw_round_trip() {
        let mut raw = raw("test");
        raw.interpreter = Some("python3".to_string());
        raw.args = vec!["--verbose".to_string()];
        raw.log_date_format = Some("YYYY-MM-DD HH:mm:ss".to_string());
        raw.merge_logs = true;
        raw.restart_delay = 250;

        let spec = ManagedProcessSpec::try_from(raw.clone()).unwrap();
        assert_eq!(RawSpec::from(spec), raw);
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("HERDER_TEST_ROOT", "/opt/herder");
        std::env::set_var("HERDER_TEST_LEVEL", "INFO");

        let mut raw = raw("test");
        raw.cwd = PathBuf::from("${HERDER_TEST_ROOT}/app");
        raw.script = PathBuf::from("$HERDER_TEST_ROOT/run.py");
        raw.args = vec!["--level=$HERDER_TEST_LEVEL".to_string()];

        raw.expand_env_vars();

        assert_eq!(raw.cwd, PathBuf::from("/opt/herder/app"));
        assert_eq!(raw.script, PathBuf::from("/opt/herder/run.py"));
        assert_eq!(raw.args[0], "--level=INFO");
    }

    #[test]
    fn test_env_values_kept_literal() {
        std::env::set_var("HERDER_TEST_LITERAL", "expanded");

        let mut raw = raw("test");
        raw.env
            .insert("PATTERN".to_string(), "$HERDER_TEST_LITERAL/${HOME}".to_string());

        raw.expand_env_vars();

        assert_eq!(
            raw.env.get("PATTERN"),
            Some(&"$HERDER_TEST_LITERAL/${HOME}".to_string())
        );
    }

    #[test]
    fn test_expand_leaves_unknown_vars() {
        assert_eq!(
            expand_env_in_string("cost: $HERDER_SURELY_UNSET_VAR and $5"),
            "cost: $HERDER_SURELY_UNSET_VAR and $5"
        );
        assert_eq!(expand_env_in_string("trailing $"), "trailing $");
        assert_eq!(expand_env_in_string("${unterminated"), "${unterminated");
    }
}
