/// The watch loop: render once, then re-render on every timer tick and
/// window resize until SIGINT or SIGTERM arrives.
///
/// Events are handled one at a time. A render in progress is never
/// interrupted; signals that arrive meanwhile are picked up by the next
/// wait. Timer ticks missed during a slow render are skipped, not replayed.
use crate::command;
use crate::config::WatchConfig;
use crate::frame::{Frame, Header, HEADER_ROWS};
use crate::terminal::{Screen, Size, TerminalError, TerminalSession};
use std::io::Write;
use std::os::fd::AsFd;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    Tick,
    Resize,
    Terminate,
}

/// A blocking multi-source wait yielding one event per call.
pub trait EventSource {
    async fn next_event(&mut self) -> WatchEvent;
}

/// Timer, SIGWINCH, SIGINT and SIGTERM merged into one stream.
pub struct SignalEvents {
    timer: Interval,
    resize: Signal,
    interrupt: Signal,
    terminate: Signal,
}

impl SignalEvents {
    /// Register the signal handlers and start the timer. The first tick
    /// fires one `period` from now.
    pub fn install(period: Duration) -> std::io::Result<Self> {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Ok(Self {
            timer,
            resize: signal(SignalKind::window_change())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }
}

impl EventSource for SignalEvents {
    async fn next_event(&mut self) -> WatchEvent {
        tokio::select! {
            biased;
            _ = self.interrupt.recv() => WatchEvent::Terminate,
            _ = self.terminate.recv() => WatchEvent::Terminate,
            _ = self.resize.recv() => WatchEvent::Resize,
            _ = self.timer.tick() => WatchEvent::Tick,
        }
    }
}

#[derive(Debug)]
pub enum WatchError {
    Terminal(TerminalError),
    Signal { source: std::io::Error },
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::Terminal(e) => write!(f, "{}", e),
            WatchError::Signal { source } => {
                write!(f, "failed to install signal handlers: {}", source)
            }
        }
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatchError::Terminal(e) => Some(e),
            WatchError::Signal { source } => Some(source),
        }
    }
}

impl From<TerminalError> for WatchError {
    fn from(e: TerminalError) -> Self {
        WatchError::Terminal(e)
    }
}

/// Take over the terminal and watch until a termination signal.
///
/// The terminal is restored before this returns, whatever the outcome.
pub async fn run(config: &WatchConfig) -> Result<(), WatchError> {
    run_on(config, std::io::stdin(), std::io::stdout()).await
}

/// `run` against an explicit terminal: `tty` for the line discipline,
/// `out` for frames and the window size.
///
/// Signal streams are registered before the terminal is touched so a
/// SIGINT during startup can never hit the default handler while the
/// terminal is in cbreak mode.
pub async fn run_on<F, W>(config: &WatchConfig, tty: F, out: W) -> Result<(), WatchError>
where
    F: AsFd,
    W: Write + AsFd,
{
    let mut events =
        SignalEvents::install(config.interval).map_err(|e| WatchError::Signal { source: e })?;
    let mut session = TerminalSession::enter(tty, out)?;

    tracing::info!(
        command = %config.joined_command(),
        interval_ms = config.interval.as_millis() as u64,
        exec = config.exec,
        "watch started"
    );
    let renders = watch_loop(config, &mut events, &mut session).await;
    session.leave();
    tracing::info!(renders, "watch stopped");
    Ok(())
}

/// Render immediately, then once per tick or resize until `Terminate`.
///
/// Returns the number of frames rendered.
pub async fn watch_loop<E, S>(config: &WatchConfig, events: &mut E, screen: &mut S) -> u64
where
    E: EventSource,
    S: Screen,
{
    let mut renders = 0u64;
    render_once(config, screen).await;
    renders += 1;

    loop {
        match events.next_event().await {
            WatchEvent::Terminate => {
                tracing::debug!("termination requested");
                return renders;
            }
            WatchEvent::Resize => {
                tracing::debug!("window resized");
                render_once(config, screen).await;
            }
            WatchEvent::Tick => render_once(config, screen).await,
        }
        renders += 1;
    }
}

/// One render cycle against the live screen.
async fn render_once<S: Screen>(config: &WatchConfig, screen: &mut S) {
    let size = screen.size().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "using default 80x24 size");
        Size::default()
    });
    let time = chrono::Local::now()
        .format(&config.time_format)
        .to_string();

    let frame = render_frame(config, size, &time).await;
    if let Err(e) = screen.present(&frame) {
        tracing::error!(error = %e, "failed to write frame");
    }
}

/// Compose a frame: header (unless disabled) and the command's output
/// fitted to `size`. Command failures leave the body short or empty.
pub async fn render_frame(config: &WatchConfig, size: Size, time: &str) -> Frame {
    let mut frame = Frame::new();

    let rows = if config.no_title {
        size.rows
    } else {
        let header = Header::new(
            config.interval,
            &config.joined_command(),
            config.hostname.as_deref(),
            time,
        );
        frame.push_header(&header, size.cols);
        size.rows.saturating_sub(HEADER_ROWS)
    };

    if let Err(e) = command::capture_into(config, &mut frame, rows, size.cols).await {
        tracing::error!(error = %e, "render cycle degraded");
    }
    frame
}
