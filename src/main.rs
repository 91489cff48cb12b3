mod command;
mod config;
mod frame;
mod terminal;
mod watch;

use clap::Parser;
use config::{Overrides, WatchConfig};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Execute a command periodically, showing its output full-screen.
#[derive(Parser, Debug)]
#[command(name = "rewatch", version, about)]
pub struct Cli {
    /// Seconds between updates (fractional allowed)
    #[arg(short = 'n', long, value_name = "SECS", value_parser = config::parse_seconds)]
    interval: Option<Duration>,

    /// Turn off the header
    #[arg(short = 't', long)]
    no_title: bool,

    /// Run the command directly instead of through `sh -c`
    #[arg(short = 'x', long)]
    exec: bool,

    /// Hostname shown in the header (empty to show only the time)
    #[arg(long)]
    hostname: Option<String>,

    /// strftime format of the header clock
    #[arg(long, value_name = "FORMAT")]
    time_format: Option<String>,

    /// Shell used when not in exec mode
    #[arg(long, value_name = "PATH")]
    shell: Option<PathBuf>,

    /// Kill the command if one run takes longer than this many seconds
    #[arg(long, value_name = "SECS", value_parser = config::parse_seconds)]
    timeout: Option<Duration>,

    /// Config file with defaults for the flags above
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Command to run, with its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<(), std::io::Error> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rewatch=warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// Report an error that ends the process, once.
///
/// stderr always gets the message; it is logged as well only when logs go
/// to a file.
fn fatal<W: Write>(error: &dyn std::fmt::Display, logs_to_file: bool, stderr: &mut W) -> ExitCode {
    if logs_to_file {
        tracing::error!(error = %error, "fatal error");
    }
    let _ = writeln!(stderr, "Error: {error}");
    ExitCode::FAILURE
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_file.as_ref()) {
        eprintln!("Error: failed to open log file: {e}");
        return ExitCode::FAILURE;
    }
    tracing::debug!(?cli, "parsed CLI arguments");
    let logs_to_file = cli.log_file.is_some();

    let file_config = match config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => return fatal(&e, logs_to_file, &mut std::io::stderr()),
    };
    let overrides = Overrides {
        interval: cli.interval,
        no_title: cli.no_title,
        exec: cli.exec,
        hostname: cli.hostname,
        time_format: cli.time_format,
        shell: cli.shell,
        timeout: cli.timeout,
    };
    let config = match WatchConfig::resolve(file_config, overrides, cli.command) {
        Ok(c) => c,
        Err(e) => return fatal(&e, logs_to_file, &mut std::io::stderr()),
    };

    match watch::run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fatal(&e, logs_to_file, &mut std::io::stderr()),
    }
}
