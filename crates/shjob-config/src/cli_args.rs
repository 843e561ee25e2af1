use std::path::PathBuf;

/// Overrides supplied on the command line (highest precedence).
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Explicit config file; disables discovery
    pub config_path: Option<PathBuf>,
    pub worker_threads: Option<usize>,
    pub max_concurrent_jobs: Option<usize>,
    pub default_timeout_secs: Option<f64>,
    pub max_lines: Option<usize>,
    pub flush_partial_lines: Option<bool>,
}
