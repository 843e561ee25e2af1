use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command as TokioCommand;

use crate::error::SubmitError;

// ============================================================================
// Shell - how a command line is interpreted
// ============================================================================

/// The command interpreter a command line is handed to.
///
/// Callers build one shell command string rather than an argv array, so
/// operators, quoting and chaining behave as they would at an interactive
/// prompt. The command line is appended as the final argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    /// Interpreter program (`sh`, `cmd`, ...)
    pub program: OsString,
    /// Arguments placed before the command line (`-c`, `/C`, ...)
    pub args: Vec<OsString>,
}

impl Shell {
    /// Create a shell from a program and its leading arguments.
    #[must_use]
    pub fn new<I, S>(program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `cmd /C` on Windows, `sh -c` everywhere else.
    #[must_use]
    pub fn platform_default() -> Self {
        #[cfg(windows)]
        {
            Self::new("cmd", ["/C"])
        }

        #[cfg(not(windows))]
        {
            Self::new("sh", ["-c"])
        }
    }

    pub(crate) fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::platform_default()
    }
}

// ============================================================================
// LaunchDescriptor - what to run
// ============================================================================

/// Immutable description of one process launch.
///
/// # Example
///
/// ```rust
/// use shjob_runner::LaunchDescriptor;
///
/// let descriptor = LaunchDescriptor::new("p4 -s edit //depot/file.txt")
///     .cwd("/work/client")
///     .env("P4CLIENT", "my-client")
///     .stdin("Description: fix build\n");
///
/// assert!(descriptor.validate().is_ok());
/// assert_eq!(descriptor.environment.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchDescriptor {
    /// Command line as typed at a shell prompt
    pub command_line: String,
    /// Optional working directory (inherited when absent)
    pub working_directory: Option<PathBuf>,
    /// Variables added on top of the inherited environment
    pub environment: BTreeMap<String, String>,
    /// Payload written to stdin; stdin is only piped when this is present
    pub stdin: Option<String>,
}

impl LaunchDescriptor {
    #[must_use]
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            ..Self::default()
        }
    }

    /// Set the working directory for the process.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(cwd.into());
        self
    }

    /// Add one environment variable. A later value for the same key wins.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Supply data for the process's stdin.
    #[must_use]
    pub fn stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Whether the runner must pipe stdin for this launch.
    #[must_use]
    pub const fn needs_stdin(&self) -> bool {
        self.stdin.is_some()
    }

    /// Check the caller contract before anything is spawned.
    pub fn validate(&self) -> Result<(), SubmitError> {
        if self.command_line.trim().is_empty() {
            return Err(SubmitError::EmptyCommandLine);
        }
        if self.command_line.contains('\0') {
            return Err(SubmitError::NulByte {
                field: "command line".to_string(),
            });
        }

        for (key, value) in &self.environment {
            let reason = if key.is_empty() {
                Some("name is empty")
            } else if key.contains('=') {
                Some("name contains '='")
            } else if key.contains('\0') || value.contains('\0') {
                Some("contains a NUL byte")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(SubmitError::InvalidEnvironment {
                    key: key.clone(),
                    reason: reason.to_string(),
                });
            }
        }

        if let Some(dir) = &self.working_directory
            && dir.as_os_str().to_string_lossy().contains('\0')
        {
            return Err(SubmitError::NulByte {
                field: "working directory".to_string(),
            });
        }

        Ok(())
    }

    /// Build the OS command that runs this descriptor through `shell`.
    ///
    /// stdout and stderr are always piped. stdin is piped only when a payload
    /// is present; otherwise it is attached to the null device.
    #[must_use]
    pub fn to_command(&self, shell: &Shell) -> TokioCommand {
        let mut cmd = TokioCommand::new(&shell.program);
        cmd.args(&shell.args);

        #[cfg(windows)]
        {
            // cmd /C strips one pair of surrounding quotes, so embedded quotes survive
            cmd.raw_arg(format!("\"{}\"", self.command_line));
        }

        #[cfg(not(windows))]
        {
            cmd.arg(&self.command_line);
        }

        if let Some(ref cwd) = self.working_directory {
            cmd.current_dir(cwd);
        }

        for (key, value) in &self.environment {
            cmd.env(key, value);
        }

        cmd.stdin(if self.needs_stdin() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_new() {
        let d = LaunchDescriptor::new("echo hi");
        assert_eq!(d.command_line, "echo hi");
        assert!(d.working_directory.is_none());
        assert!(d.environment.is_empty());
        assert!(d.stdin.is_none());
        assert!(!d.needs_stdin());
    }

    #[test]
    fn test_descriptor_builder_chain() {
        let d = LaunchDescriptor::new("sd opened")
            .cwd("/work")
            .env("SDPORT", "server:2000")
            .envs([("SDUSER", "me"), ("SDCLIENT", "box")])
            .stdin("payload");

        assert_eq!(d.working_directory, Some(PathBuf::from("/work")));
        assert_eq!(d.environment.len(), 3);
        assert_eq!(d.environment["SDUSER"], "me");
        assert!(d.needs_stdin());
    }

    #[test]
    fn test_env_later_value_wins() {
        let d = LaunchDescriptor::new("x").env("K", "1").env("K", "2");
        assert_eq!(d.environment.len(), 1);
        assert_eq!(d.environment["K"], "2");
    }

    #[test]
    fn test_empty_stdin_still_redirects() {
        let d = LaunchDescriptor::new("cat").stdin("");
        assert!(d.needs_stdin());
    }

    #[test]
    fn test_validate_rejects_empty_and_blank() {
        assert_eq!(
            LaunchDescriptor::new("").validate(),
            Err(SubmitError::EmptyCommandLine)
        );
        assert_eq!(
            LaunchDescriptor::new("  \t\n").validate(),
            Err(SubmitError::EmptyCommandLine)
        );
    }

    #[test]
    fn test_validate_rejects_nul_in_command() {
        let err = LaunchDescriptor::new("echo \0").validate().unwrap_err();
        assert!(matches!(err, SubmitError::NulByte { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_env_keys() {
        for key in ["", "A=B", "NUL\0"] {
            let err = LaunchDescriptor::new("true")
                .env(key, "v")
                .validate()
                .unwrap_err();
            assert!(
                matches!(err, SubmitError::InvalidEnvironment { .. }),
                "key {key:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_accepts_shell_metacharacters() {
        let d = LaunchDescriptor::new("echo a && echo b | tr a-z A-Z > out.txt; echo $HOME");
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_shell_platform_default() {
        let shell = Shell::platform_default();
        #[cfg(windows)]
        assert_eq!(shell.program, OsString::from("cmd"));
        #[cfg(not(windows))]
        {
            assert_eq!(shell.program, OsString::from("sh"));
            assert_eq!(shell.args, vec![OsString::from("-c")]);
        }
        assert_eq!(Shell::default(), shell);
    }

    #[test]
    fn test_shell_custom() {
        let shell = Shell::new("bash", ["-o", "pipefail", "-c"]);
        assert_eq!(shell.program_name(), "bash");
        assert_eq!(shell.args.len(), 3);
    }

    #[test]
    fn test_to_command_builds() {
        let d = LaunchDescriptor::new("echo hello").env("A", "1");
        let cmd = d.to_command(&Shell::platform_default());
        assert_eq!(cmd.as_std().get_program(), Shell::platform_default().program);
        let envs: Vec<_> = cmd.as_std().get_envs().collect();
        assert_eq!(envs.len(), 1);
    }
}
