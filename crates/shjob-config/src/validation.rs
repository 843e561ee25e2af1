use crate::error::ConfigError;

use super::Config;

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

impl Config {
    /// Validate configuration values
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.worker_threads == Some(0) {
            return Err(invalid("worker_threads", "must be greater than 0"));
        }
        if let Some(threads) = self.runner.worker_threads
            && threads > 1024
        {
            return Err(invalid("worker_threads", "exceeds maximum limit of 1024"));
        }

        if self.runner.max_concurrent_jobs == Some(0) {
            return Err(invalid("max_concurrent_jobs", "must be greater than 0"));
        }

        if let Some(timeout) = self.runner.default_timeout_secs
            && (!timeout.is_finite() || timeout < 0.0)
        {
            return Err(invalid(
                "default_timeout_secs",
                "must be a finite number of seconds >= 0",
            ));
        }

        if self.capture.max_lines == Some(0) {
            return Err(invalid("max_lines", "must be greater than 0"));
        }

        if let Some(program) = &self.shell.program
            && program.trim().is_empty()
        {
            return Err(invalid("shell_program", "must not be empty"));
        }

        if let Some(codes) = &self.status.success_exit_codes
            && codes.is_empty()
        {
            return Err(invalid("success_exit_codes", "must list at least one exit code"));
        }

        Ok(())
    }
}
