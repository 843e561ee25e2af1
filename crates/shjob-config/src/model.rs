use serde::{Deserialize, Serialize};
use shjob_runner::{RunnerOptions, Shell, SuccessPolicy, timeout_from_secs};
use std::collections::HashMap;
use std::path::PathBuf;

/// Where a configuration value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// Command-line flag (highest precedence)
    Cli,
    /// `SHJOB_*` environment variable
    Env,
    /// Configuration file
    Config,
    /// Built-in default (lowest precedence)
    Default,
}

impl ConfigSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

/// `[runner]` section
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RunnerSection {
    /// Worker threads for the job pool (absent = tokio default)
    pub worker_threads: Option<usize>,
    /// Bound on concurrently running asynchronous jobs (absent = unbounded)
    pub max_concurrent_jobs: Option<usize>,
    /// Timeout when a job names none (0 or absent = unbounded)
    pub default_timeout_secs: Option<f64>,
}

/// `[capture]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CaptureSection {
    /// Lines retained per stream (absent = unbounded)
    pub max_lines: Option<usize>,
    /// Keep a final line that has no newline
    pub flush_partial_lines: Option<bool>,
}

/// `[shell]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShellSection {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
}

/// `[status]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StatusSection {
    /// Exit codes treated as success by the CLI
    pub success_exit_codes: Option<Vec<i32>>,
}

/// Configuration for shjob.
///
/// Built by [`Config::discover`] with precedence
/// CLI > environment > config file > defaults. Every value records its source
/// for `shjob config`.
///
/// # Example
///
/// ```rust,no_run
/// use shjob_config::{CliArgs, Config};
///
/// let config = Config::discover(&CliArgs::default())?;
/// let options = config.runner_options();
/// println!("shell: {:?}", options.shell.program);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub runner: RunnerSection,
    pub capture: CaptureSection,
    pub shell: ShellSection,
    pub status: StatusSection,
    /// File the values were loaded from, if any
    pub config_path: Option<PathBuf>,
    pub source_attribution: HashMap<String, ConfigSource>,
}

impl Config {
    /// Source of `key`; unset keys are defaults.
    #[must_use]
    pub fn source_of(&self, key: &str) -> ConfigSource {
        self.source_attribution
            .get(key)
            .copied()
            .unwrap_or(ConfigSource::Default)
    }

    /// Shell from `[shell]`, falling back to the platform default.
    #[must_use]
    pub fn shell(&self) -> Shell {
        let default = Shell::platform_default();
        match (&self.shell.program, &self.shell.args) {
            (None, None) => default,
            (Some(program), Some(args)) => Shell::new(program, args),
            (Some(program), None) => Shell::new(program, default.args),
            (None, Some(args)) => Shell::new(default.program, args),
        }
    }

    #[must_use]
    pub fn success_policy(&self) -> SuccessPolicy {
        match &self.status.success_exit_codes {
            Some(codes) => SuccessPolicy::new(codes.iter().copied()),
            None => SuccessPolicy::default(),
        }
    }

    /// Settings for a [`JobRunner`](shjob_runner::JobRunner).
    ///
    /// Assumes the configuration has been validated.
    #[must_use]
    pub fn runner_options(&self) -> RunnerOptions {
        let default_timeout = self
            .runner
            .default_timeout_secs
            .and_then(|secs| timeout_from_secs(secs).ok().flatten());

        RunnerOptions {
            worker_threads: self.runner.worker_threads,
            max_concurrent_jobs: self.runner.max_concurrent_jobs,
            max_captured_lines: self.capture.max_lines,
            flush_partial_lines: self.capture.flush_partial_lines.unwrap_or(false),
            shell: self.shell(),
            default_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_map_to_unbounded_runner() {
        let options = Config::default().runner_options();
        assert_eq!(options.worker_threads, None);
        assert_eq!(options.max_concurrent_jobs, None);
        assert_eq!(options.max_captured_lines, None);
        assert!(!options.flush_partial_lines);
        assert_eq!(options.default_timeout, None);
        assert_eq!(options.shell, Shell::platform_default());
    }

    #[test]
    fn test_runner_options_from_sections() {
        let config = Config {
            runner: RunnerSection {
                worker_threads: Some(2),
                max_concurrent_jobs: Some(4),
                default_timeout_secs: Some(1.5),
            },
            capture: CaptureSection {
                max_lines: Some(100),
                flush_partial_lines: Some(true),
            },
            ..Config::default()
        };
        let options = config.runner_options();
        assert_eq!(options.worker_threads, Some(2));
        assert_eq!(options.max_concurrent_jobs, Some(4));
        assert_eq!(options.max_captured_lines, Some(100));
        assert!(options.flush_partial_lines);
        assert_eq!(options.default_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_zero_default_timeout_is_unbounded() {
        let mut config = Config::default();
        config.runner.default_timeout_secs = Some(0.0);
        assert_eq!(config.runner_options().default_timeout, None);
    }

    #[test]
    fn test_partial_shell_section_keeps_default_args() {
        let mut config = Config::default();
        config.shell.program = Some("bash".to_string());
        let shell = config.shell();
        assert_eq!(shell.program, "bash");
        assert_eq!(shell.args, Shell::platform_default().args);
    }

    #[test]
    fn test_success_policy_from_status() {
        let mut config = Config::default();
        assert_eq!(config.success_policy(), SuccessPolicy::default());
        config.status.success_exit_codes = Some(vec![0, 2]);
        assert_eq!(config.success_policy(), SuccessPolicy::new([0, 2]));
    }

    #[test]
    fn test_source_of_unset_key_is_default() {
        let config = Config::default();
        assert_eq!(config.source_of("max_lines"), ConfigSource::Default);
        assert_eq!(ConfigSource::Env.as_str(), "env");
    }
}
