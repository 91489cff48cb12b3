/// Running the watched command once and capturing its output.
///
/// stdout and stderr share one pipe so their lines interleave the way they
/// would on a terminal. Only as many lines as fit on screen are read; the
/// read end is closed before waiting so a command with endless output gets
/// EPIPE instead of stalling the cycle.
use crate::config::WatchConfig;
use crate::frame::{read_body, Frame};
use std::os::fd::OwnedFd;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::BufReader;
use tokio::net::unix::pipe;
use tokio::process::Command;

/// Errors from a single run of the command. None of them stop the loop.
#[derive(Debug)]
pub enum CommandError {
    /// Failed to create the capture pipe.
    Pipe { source: std::io::Error },
    /// Failed to start the command.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// Failed while reading captured output.
    Read { source: std::io::Error },
    /// Failed to reap the child.
    Wait { source: std::io::Error },
    /// The command outlived the configured timeout and was killed.
    TimedOut { after: Duration },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Pipe { source } => write!(f, "failed to create output pipe: {}", source),
            CommandError::Spawn { program, source } => {
                write!(f, "failed to spawn {}: {}", program, source)
            }
            CommandError::Read { source } => write!(f, "failed to read command output: {}", source),
            CommandError::Wait { source } => write!(f, "failed to wait for command: {}", source),
            CommandError::TimedOut { after } => {
                write!(f, "command killed after {:.1}s timeout", after.as_secs_f64())
            }
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Pipe { source } => Some(source),
            CommandError::Spawn { source, .. } => Some(source),
            CommandError::Read { source } => Some(source),
            CommandError::Wait { source } => Some(source),
            CommandError::TimedOut { .. } => None,
        }
    }
}

/// Build the child process: `argv[0] argv[1..]` in exec mode, otherwise
/// `{shell} -c "{argv joined by spaces}"`. stdin is always null.
pub fn build_command(config: &WatchConfig) -> Command {
    let mut cmd = match config.command.split_first() {
        Some((program, args)) if config.exec => {
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        }
        _ => {
            let mut cmd = Command::new(&config.shell);
            cmd.arg("-c").arg(config.joined_command());
            cmd
        }
    };
    cmd.stdin(Stdio::null());
    cmd
}

/// Run the command once, appending up to `rows` lines of its combined
/// output to `frame`.
///
/// Lines appended before a read error or timeout stay in the frame.
pub async fn capture_into(
    config: &WatchConfig,
    frame: &mut Frame,
    rows: u16,
    width: u16,
) -> Result<(), CommandError> {
    let (read_end, write_end) = std::io::pipe().map_err(|e| CommandError::Pipe { source: e })?;
    let write_end_err = write_end
        .try_clone()
        .map_err(|e| CommandError::Pipe { source: e })?;

    let mut cmd = build_command(config);
    cmd.stdout(write_end).stderr(write_end_err);
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    let start = Instant::now();
    let spawned = cmd.kill_on_drop(true).spawn();
    // The command still owns our copies of the write end; release them so
    // the reader sees EOF when the child exits.
    drop(cmd);
    let mut child = spawned.map_err(|e| CommandError::Spawn {
        program: program.clone(),
        source: e,
    })?;
    tracing::debug!(program = %program, pid = ?child.id(), "command started");

    let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(read_end))
        .map_err(|e| CommandError::Pipe { source: e })?;

    let work = async {
        let mut lines = BufReader::new(receiver);
        let read = read_body(&mut lines, &mut *frame, rows, width).await;
        drop(lines);
        let status = child.wait().await;
        (read, status)
    };

    let (read, status) = match config.timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(done) => done,
            Err(_) => {
                tracing::warn!(program = %program, timeout_secs = limit.as_secs_f64(), "command timed out, killing");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(error = %e, "failed to kill timed out command");
                }
                match child.wait().await {
                    Ok(status) => {
                        tracing::debug!(exit_code = ?status.code(), "timed out command reaped")
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to reap timed out command"),
                }
                return Err(CommandError::TimedOut { after: limit });
            }
        },
        None => work.await,
    };

    let status = status.map_err(|e| CommandError::Wait { source: e })?;
    tracing::debug!(
        exit_code = ?status.code(),
        duration_ms = start.elapsed().as_millis() as u64,
        "command finished"
    );
    read.map_err(|e| CommandError::Read { source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(command: &[&str], exec: bool) -> WatchConfig {
        WatchConfig {
            interval: Duration::from_secs(1),
            no_title: true,
            exec,
            hostname: None,
            time_format: crate::config::DEFAULT_TIME_FORMAT.to_string(),
            shell: PathBuf::from("/bin/sh"),
            timeout: None,
            command: command.iter().map(|w| w.to_string()).collect(),
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_build_command_shell_wrapped() {
        let cmd = build_command(&config(&["ls", "-l", "/tmp"], false));
        assert_eq!(cmd.as_std().get_program(), "/bin/sh");
        assert_eq!(args_of(&cmd), vec!["-c", "ls -l /tmp"]);
    }

    #[test]
    fn test_build_command_exec_mode() {
        let cmd = build_command(&config(&["ls", "-l", "/tmp"], true));
        assert_eq!(cmd.as_std().get_program(), "ls");
        assert_eq!(args_of(&cmd), vec!["-l", "/tmp"]);
    }

    #[test]
    fn test_build_command_custom_shell() {
        let mut cfg = config(&["echo", "$HOME"], false);
        cfg.shell = PathBuf::from("/bin/bash");
        let cmd = build_command(&cfg);
        assert_eq!(cmd.as_std().get_program(), "/bin/bash");
        assert_eq!(args_of(&cmd), vec!["-c", "echo $HOME"]);
    }

    #[tokio::test]
    async fn test_capture_echo() {
        let mut frame = Frame::new();
        capture_into(&config(&["echo", "hi"], false), &mut frame, 24, 80)
            .await
            .unwrap();
        assert_eq!(frame.content(), b"hi\n");
    }

    #[tokio::test]
    async fn test_capture_merges_stderr() {
        let mut frame = Frame::new();
        let cfg = config(&["echo out; echo err >&2"], false);
        capture_into(&cfg, &mut frame, 24, 80).await.unwrap();
        assert_eq!(frame.content(), b"out\nerr\n");
    }

    #[tokio::test]
    async fn test_capture_truncates_rows_and_width() {
        let mut frame = Frame::new();
        let cfg = config(&["printf", "'abcdef\\n\\nxyz\\n12345678\\nlast\\n'"], false);
        capture_into(&cfg, &mut frame, 3, 4).await.unwrap();
        assert_eq!(frame.content(), b"abcd\nxyz\n");
    }

    #[tokio::test]
    async fn test_capture_nonzero_exit_is_not_an_error() {
        let mut frame = Frame::new();
        let cfg = config(&["echo partial; exit 3"], false);
        capture_into(&cfg, &mut frame, 24, 80).await.unwrap();
        assert_eq!(frame.content(), b"partial\n");
    }

    #[tokio::test]
    async fn test_capture_spawn_failure() {
        let mut frame = Frame::new();
        let cfg = config(&["nonexistent-binary-xyz"], true);
        let err = capture_into(&cfg, &mut frame, 24, 80).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn nonexistent-binary-xyz"));
        assert!(frame.content().is_empty());
    }

    #[tokio::test]
    async fn test_capture_endless_output_finishes() {
        let mut frame = Frame::new();
        let cfg = config(&["yes"], true);
        capture_into(&cfg, &mut frame, 2, 80).await.unwrap();
        assert_eq!(frame.content(), b"y\ny\n");
    }

    #[tokio::test]
    async fn test_capture_line_without_newline_is_bounded() {
        let mut frame = Frame::new();
        let cfg = config(&["head -c 400000 /dev/zero | tr '\\0' a"], false);
        let err = capture_into(&cfg, &mut frame, 21, 80).await.unwrap_err();
        assert!(matches!(err, CommandError::Read { .. }));

        let mut expected = vec![b'a'; 80];
        expected.push(b'\n');
        assert_eq!(frame.content(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_capture_timeout_kills_command() {
        let mut frame = Frame::new();
        let mut cfg = config(&["echo early; sleep 10"], false);
        cfg.timeout = Some(Duration::from_millis(200));

        let start = Instant::now();
        let err = capture_into(&cfg, &mut frame, 24, 80).await.unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(frame.content(), b"early\n");
    }
}
