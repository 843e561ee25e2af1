use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::{
    CaptureSection, CliArgs, Config, ConfigSource, RunnerSection, ShellSection, StatusSection,
};

/// Directory holding the config file
pub const CONFIG_DIR: &str = ".shjob";
/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.toml";
/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SHJOB_CONFIG";

/// Environment overrides: variable name and the key it sets
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("SHJOB_WORKER_THREADS", "worker_threads"),
    ("SHJOB_MAX_CONCURRENT_JOBS", "max_concurrent_jobs"),
    ("SHJOB_DEFAULT_TIMEOUT_SECS", "default_timeout_secs"),
    ("SHJOB_MAX_LINES", "max_lines"),
    ("SHJOB_FLUSH_PARTIAL_LINES", "flush_partial_lines"),
];

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize, Serialize)]
struct TomlConfig {
    runner: Option<RunnerSection>,
    capture: Option<CaptureSection>,
    shell: Option<ShellSection>,
    status: Option<StatusSection>,
}

impl Config {
    /// Discover and load configuration with precedence: CLI > env > file > defaults
    ///
    /// Uses the current working directory for config file discovery when no
    /// explicit path is given.
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let start_dir = env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover and load configuration starting from a specific directory.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self> {
        Self::discover_with_env(start_dir, cli_args, |key| env::var(key).ok())
    }

    /// Discovery with an explicit environment lookup.
    ///
    /// This is the variant used by tests to avoid process-global state.
    pub fn discover_with_env<F>(start_dir: &Path, cli_args: &CliArgs, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Explicit path: CLI flag, then environment, then upward search
        let config_path = match &cli_args.config_path {
            Some(path) => Some(path.clone()),
            None => match lookup(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
                Some(path) => Some(PathBuf::from(path)),
                None => Self::discover_config_file_from(start_dir),
            },
        };

        if let Some(path) = &config_path {
            let file_config = Self::load_config_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;
            config.apply_file(file_config);
            config.config_path = Some(path.clone());
        }

        config.apply_env(&lookup)?;
        config.apply_cli(cli_args);

        config.validate()?;
        Ok(config)
    }

    /// Search upward from `start_dir` for `.shjob/config.toml`.
    ///
    /// Stops at repository root markers (.git, .hg, .svn) or the filesystem
    /// root.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        let mut current_dir = Some(start_dir);

        while let Some(dir) = current_dir {
            let config_path = dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.is_file() {
                return Some(config_path);
            }

            if dir.join(".git").exists() || dir.join(".hg").exists() || dir.join(".svn").exists() {
                // Stop at repository root if no config found
                break;
            }

            current_dir = dir.parent();
        }

        None
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn set_source(&mut self, key: &str, source: ConfigSource) {
        self.source_attribution.insert(key.to_string(), source);
    }

    fn apply_file(&mut self, file: TomlConfig) {
        let source = ConfigSource::Config;

        if let Some(runner) = file.runner {
            if runner.worker_threads.is_some() {
                self.runner.worker_threads = runner.worker_threads;
                self.set_source("worker_threads", source);
            }
            if runner.max_concurrent_jobs.is_some() {
                self.runner.max_concurrent_jobs = runner.max_concurrent_jobs;
                self.set_source("max_concurrent_jobs", source);
            }
            if runner.default_timeout_secs.is_some() {
                self.runner.default_timeout_secs = runner.default_timeout_secs;
                self.set_source("default_timeout_secs", source);
            }
        }

        if let Some(capture) = file.capture {
            if capture.max_lines.is_some() {
                self.capture.max_lines = capture.max_lines;
                self.set_source("max_lines", source);
            }
            if capture.flush_partial_lines.is_some() {
                self.capture.flush_partial_lines = capture.flush_partial_lines;
                self.set_source("flush_partial_lines", source);
            }
        }

        if let Some(shell) = file.shell {
            if shell.program.is_some() {
                self.shell.program = shell.program;
                self.set_source("shell_program", source);
            }
            if shell.args.is_some() {
                self.shell.args = shell.args;
                self.set_source("shell_args", source);
            }
        }

        if let Some(status) = file.status
            && status.success_exit_codes.is_some()
        {
            self.status.success_exit_codes = status.success_exit_codes;
            self.set_source("success_exit_codes", source);
        }
    }

    fn apply_env<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, key) in ENV_OVERRIDES {
            let Some(raw) = lookup(var).filter(|value| !value.trim().is_empty()) else {
                continue;
            };
            let raw = raw.trim();
            match *key {
                "worker_threads" => self.runner.worker_threads = Some(parse_env(var, raw)?),
                "max_concurrent_jobs" => {
                    self.runner.max_concurrent_jobs = Some(parse_env(var, raw)?);
                }
                "default_timeout_secs" => {
                    self.runner.default_timeout_secs = Some(parse_env(var, raw)?);
                }
                "max_lines" => self.capture.max_lines = Some(parse_env(var, raw)?),
                "flush_partial_lines" => {
                    self.capture.flush_partial_lines = Some(parse_env(var, raw)?);
                }
                _ => continue,
            }
            self.set_source(key, ConfigSource::Env);
        }
        Ok(())
    }

    fn apply_cli(&mut self, cli: &CliArgs) {
        let source = ConfigSource::Cli;

        if let Some(threads) = cli.worker_threads {
            self.runner.worker_threads = Some(threads);
            self.set_source("worker_threads", source);
        }
        if let Some(limit) = cli.max_concurrent_jobs {
            self.runner.max_concurrent_jobs = Some(limit);
            self.set_source("max_concurrent_jobs", source);
        }
        if let Some(timeout) = cli.default_timeout_secs {
            self.runner.default_timeout_secs = Some(timeout);
            self.set_source("default_timeout_secs", source);
        }
        if let Some(max_lines) = cli.max_lines {
            self.capture.max_lines = Some(max_lines);
            self.set_source("max_lines", source);
        }
        if let Some(flush) = cli.flush_partial_lines {
            self.capture.flush_partial_lines = Some(flush);
            self.set_source("flush_partial_lines", source);
        }
    }
}

fn parse_env<T: FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: var.to_string(),
        value: format!("cannot parse '{raw}'"),
    })
}
