//! Command-line interface for shjob
//!
//! Results are always delivered on the main thread: the runner dispatches
//! callbacks onto an [`ExecutionContext`] that `main` pumps.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use shjob_config::{CliArgs, Config, ConfigError};
use shjob_runner::{
    ExecutionContext, JobOutcome, JobRequest, JobResult, JobRunner, LaunchDescriptor,
    SubmitError, SuccessPolicy,
};

use crate::exit_codes::ExitCode;
use crate::logging;

/// How long one pump of the execution context waits before checking again
const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// An input named on the command line could not be read.
#[derive(Debug, thiserror::Error)]
#[error("Failed to read {path}: {source}")]
pub struct InputError {
    path: String,
    #[source]
    source: io::Error,
}

impl InputError {
    fn new(path: &Path, source: io::Error) -> Self {
        let path = if path == Path::new("-") {
            "stdin".to_string()
        } else {
            path.display().to_string()
        };
        Self { path, source }
    }
}

#[derive(Parser, Debug)]
#[command(name = "shjob")]
#[command(about = "Run shell command lines as jobs with captured output and timeouts")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Worker threads for the job pool
    #[arg(long, global = true)]
    pub worker_threads: Option<usize>,

    /// Maximum asynchronous jobs running at once
    #[arg(long, global = true)]
    pub max_concurrent_jobs: Option<usize>,

    /// Maximum lines retained per stream (oldest lines are dropped)
    #[arg(long, global = true)]
    pub max_lines: Option<usize>,

    /// Keep a final output line that has no trailing newline
    #[arg(long, global = true)]
    pub flush_partial_lines: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one command line and print its result
    Run {
        /// Working directory for the process
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Extra environment variable (KEY=VALUE), repeatable
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Text written to the process's stdin
        #[arg(long, conflicts_with = "stdin_file")]
        stdin: Option<String>,

        /// File whose contents are written to stdin ("-" reads shjob's own stdin)
        #[arg(long)]
        stdin_file: Option<PathBuf>,

        /// Timeout in seconds (0 = unbounded; default from configuration)
        #[arg(long)]
        timeout: Option<f64>,

        /// Run on the worker pool instead of the main thread
        #[arg(long = "async")]
        run_async: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Command line; words are joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Run every non-empty line of a file as an asynchronous job
    Batch {
        /// Timeout in seconds applied to every job
        #[arg(long)]
        timeout: Option<f64>,

        /// Print one JSON result per line
        #[arg(long)]
        json: bool,

        /// File of command lines ("-" reads stdin)
        file: PathBuf,
    },

    /// Show the effective configuration and where each value came from
    Config {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Run the CLI. Prints all output, including errors.
///
/// Returns the exit code to use when it is not [`ExitCode::SUCCESS`].
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(err) = logging::init_tracing(cli.verbose) {
        eprintln!("shjob: failed to initialise logging: {err}");
    }

    let cli_args = CliArgs {
        config_path: cli.config.clone(),
        worker_threads: cli.worker_threads,
        max_concurrent_jobs: cli.max_concurrent_jobs,
        default_timeout_secs: None,
        max_lines: cli.max_lines,
        flush_partial_lines: cli.flush_partial_lines.then_some(true),
    };

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("shjob: {err:#}");
            return Err(ExitCode::CLI_ARGS);
        }
    };
    tracing::debug!(config_path = ?config.config_path, "Configuration loaded");

    let outcome = match cli.command {
        Commands::Run {
            cwd,
            env,
            stdin,
            stdin_file,
            timeout,
            run_async,
            json,
            command,
        } => {
            let stdin = match (stdin, stdin_file) {
                (Some(text), _) => Ok(Some(text)),
                (None, Some(path)) => read_input(&path).map(Some),
                (None, None) => Ok(None),
            };
            stdin.and_then(|stdin| {
                let mut descriptor = LaunchDescriptor::new(command.join(" ")).envs(env);
                if let Some(cwd) = cwd {
                    descriptor = descriptor.cwd(cwd);
                }
                if let Some(stdin) = stdin {
                    descriptor = descriptor.stdin(stdin);
                }
                execute_run(&config, descriptor, timeout, run_async, json)
            })
        }
        Commands::Batch {
            timeout,
            json,
            file,
        } => execute_batch(&config, &file, timeout, json),
        Commands::Config { json } => execute_config(&config, json),
    };

    match outcome {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(err) => {
            eprintln!("shjob: {err:#}");
            Err(error_exit_code(&err))
        }
    }
}

/// Map a command error to an exit code.
fn error_exit_code(err: &anyhow::Error) -> ExitCode {
    if err.downcast_ref::<SubmitError>().is_some()
        || err.downcast_ref::<ConfigError>().is_some()
        || err.downcast_ref::<InputError>().is_some()
    {
        ExitCode::CLI_ARGS
    } else {
        ExitCode::INTERNAL
    }
}

fn read_input(path: &Path) -> Result<String> {
    let contents = if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer).map(|_| buffer)
    } else {
        std::fs::read_to_string(path)
    };
    Ok(contents.map_err(|err| InputError::new(path, err))?)
}

fn build_runner(config: &Config, context: &ExecutionContext) -> Result<JobRunner> {
    JobRunner::builder()
        .options(config.runner_options())
        .dispatcher(context.dispatcher())
        .build()
        .context("Failed to start job runner")
}

/// Pump `context` on this thread until `expected` results have arrived.
fn collect_results(
    context: &ExecutionContext,
    results: &mpsc::Receiver<JobResult>,
    expected: usize,
    mut on_result: impl FnMut(JobResult) -> Result<()>,
) -> Result<()> {
    let mut delivered = 0;
    while delivered < expected {
        context.run_next(PUMP_INTERVAL);
        while let Ok(result) = results.try_recv() {
            delivered += 1;
            on_result(result)?;
        }
    }
    Ok(())
}

fn execute_run(
    config: &Config,
    descriptor: LaunchDescriptor,
    timeout: Option<f64>,
    run_async: bool,
    json: bool,
) -> Result<ExitCode> {
    let context = ExecutionContext::new();
    let runner = build_runner(config, &context)?;
    let policy = config.success_policy();

    let (tx, rx) = mpsc::channel();
    let mut request = JobRequest::new(descriptor)
        .synchronous(!run_async)
        .on_complete(move |result| {
            let _ = tx.send(result);
        });
    if let Some(seconds) = timeout {
        request = request.timeout_secs(seconds);
    }

    let id = runner.submit(request)?;
    tracing::debug!(job_id = %id, run_async, "Job submitted");

    let mut code = ExitCode::SUCCESS;
    collect_results(&context, &rx, 1, |result| {
        code = ExitCode::for_result(&result, &policy);
        if json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_result_text(&result, &policy, false)?;
        }
        Ok(())
    })?;
    Ok(code)
}

fn execute_batch(
    config: &Config,
    file: &Path,
    timeout: Option<f64>,
    json: bool,
) -> Result<ExitCode> {
    let command_lines = read_command_lines(file)?;
    let context = ExecutionContext::new();
    let runner = build_runner(config, &context)?;
    let policy = config.success_policy();

    let (tx, rx) = mpsc::channel();
    let mut submitted = 0;
    let mut rejected = None;
    for command_line in command_lines {
        let tx = tx.clone();
        let mut request = JobRequest::new(LaunchDescriptor::new(command_line)).on_complete(
            move |result| {
                let _ = tx.send(result);
            },
        );
        if let Some(seconds) = timeout {
            request = request.timeout_secs(seconds);
        }
        match runner.submit(request) {
            Ok(_) => submitted += 1,
            Err(err) => {
                rejected = Some(err);
                break;
            }
        }
    }
    tracing::debug!(jobs = submitted, "Batch submitted");

    let mut code = ExitCode::SUCCESS;
    collect_results(&context, &rx, submitted, |result| {
        code = code.worst(ExitCode::for_result(&result, &policy));
        if json {
            println!("{}", serde_json::to_string(&result)?);
        } else {
            print_result_text(&result, &policy, true)?;
        }
        Ok(())
    })?;

    // Jobs accepted before a rejected line still report their results
    match rejected {
        Some(err) => Err(err.into()),
        None => Ok(code),
    }
}

fn read_command_lines(file: &Path) -> Result<Vec<String>> {
    let reader: Box<dyn BufRead> = if file == Path::new("-") {
        Box::new(io::stdin().lock())
    } else {
        let handle = std::fs::File::open(file).map_err(|err| InputError::new(file, err))?;
        Box::new(io::BufReader::new(handle))
    };

    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|err| InputError::new(file, err))?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Print captured output: stdout lines to stdout, stderr lines to stderr.
///
/// With `header`, each result is introduced by a summary line on stdout.
fn print_result_text(result: &JobResult, policy: &SuccessPolicy, header: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if header {
        let status = match result.outcome() {
            JobOutcome::Completed { exit_code } if policy.is_success(result) => {
                format!("ok (exit {exit_code})")
            }
            JobOutcome::Completed { exit_code } => format!("failed (exit {exit_code})"),
            JobOutcome::TimedOut { .. } => "timed out".to_string(),
            JobOutcome::LaunchFailed { .. } => "launch failed".to_string(),
        };
        writeln!(out, "== job {} {status}: {}", result.job_id(), result.command_line())?;
    }

    for line in result.stdout().iter() {
        writeln!(out, "{line}")?;
    }
    out.flush()?;

    let mut err = io::stderr().lock();
    for line in result.stderr().iter() {
        writeln!(err, "{line}")?;
    }
    match result.outcome() {
        JobOutcome::TimedOut { timeout } => writeln!(
            err,
            "shjob: job {} timed out after {}s and was killed",
            result.job_id(),
            timeout.as_secs_f64()
        )?,
        JobOutcome::LaunchFailed { error } => {
            writeln!(err, "shjob: job {} failed to launch: {error}", result.job_id())?;
        }
        JobOutcome::Completed { .. } => {}
    }
    if result.stdout_truncated() || result.stderr_truncated() {
        writeln!(
            err,
            "shjob: job {} output truncated to the newest lines",
            result.job_id()
        )?;
    }
    Ok(())
}

fn execute_config(config: &Config, json: bool) -> Result<ExitCode> {
    let effective = config.effective_config();

    if json {
        let map: serde_json::Map<String, serde_json::Value> = effective
            .into_iter()
            .map(|(key, (value, source))| {
                (key, serde_json::json!({ "value": value, "source": source }))
            })
            .collect();
        let document = serde_json::json!({
            "config_path": config.config_path.as_ref().map(|p| p.display().to_string()),
            "values": map,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(ExitCode::SUCCESS);
    }

    match &config.config_path {
        Some(path) => println!("# config file: {}", path.display()),
        None => println!("# config file: none (defaults)"),
    }
    for (key, (value, source)) in effective {
        println!("{key} = {value} ({source})");
    }
    Ok(ExitCode::SUCCESS)
}
