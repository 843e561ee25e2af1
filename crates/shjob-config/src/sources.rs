use std::collections::BTreeMap;

use super::Config;

fn render_limit(value: Option<usize>) -> String {
    value.map_or_else(|| "unbounded".to_string(), |v| v.to_string())
}

impl Config {
    /// Effective configuration as `key -> (value, source)`, sorted by key
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let mut config = BTreeMap::new();

        let mut add_config = |key: &str, value: String| {
            let source = self.source_of(key).as_str().to_string();
            config.insert(key.to_string(), (value, source));
        };

        add_config(
            "worker_threads",
            self.runner
                .worker_threads
                .map_or_else(|| "auto".to_string(), |v| v.to_string()),
        );
        add_config(
            "max_concurrent_jobs",
            render_limit(self.runner.max_concurrent_jobs),
        );
        add_config(
            "default_timeout_secs",
            self.runner.default_timeout_secs.unwrap_or(0.0).to_string(),
        );
        add_config("max_lines", render_limit(self.capture.max_lines));
        add_config(
            "flush_partial_lines",
            self.capture.flush_partial_lines.unwrap_or(false).to_string(),
        );

        let shell = self.shell();
        add_config("shell_program", shell.program.to_string_lossy().into_owned());
        add_config(
            "shell_args",
            shell
                .args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" "),
        );
        add_config(
            "success_exit_codes",
            self.success_policy()
                .codes()
                .map(|code| code.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        );

        config
    }
}
