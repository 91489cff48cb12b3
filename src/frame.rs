/// Composition of a single screenful of output.
///
/// A `Frame` is built fresh for every render cycle: clear-and-home, an
/// optional header, then as many body lines as fit. It is written to the
/// terminal once and discarded.
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Cursor home followed by erase-below.
const CLEAR_HOME: &[u8] = b"\x1b[H\x1b[J";

/// Rows reserved at the top of the screen when the header is shown.
pub const HEADER_ROWS: u16 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    buf: Vec<u8>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            buf: CLEAR_HOME.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Append the header line followed by a blank separator line.
    pub fn push_header(&mut self, header: &Header, width: u16) {
        self.buf.extend_from_slice(header.render(width).as_bytes());
        self.buf.extend_from_slice(b"\n\n");
    }

    /// Append one body line, cut to `width` bytes. Empty lines are dropped.
    ///
    /// Returns whether anything was written.
    pub fn push_line(&mut self, line: &[u8], width: u16) -> bool {
        if line.is_empty() {
            return false;
        }
        let end = line.len().min(usize::from(width));
        self.buf.extend_from_slice(&line[..end]);
        self.buf.push(b'\n');
        true
    }

    /// The body portion, i.e. everything after the clear sequence.
    #[cfg(test)]
    pub fn content(&self) -> &[u8] {
        &self.buf[CLEAR_HOME.len()..]
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

/// Header text: command summary on the left, clock on the right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub left: String,
    pub right: String,
}

impl Header {
    /// `Every 2.0s: {command}` on the left, `{hostname}: {time}` on the right.
    ///
    /// An empty hostname leaves only the time.
    pub fn new(interval: Duration, command: &str, hostname: Option<&str>, time: &str) -> Self {
        let left = format!("Every {}s: {}", tenths(interval), command);
        let right = match hostname {
            Some(host) if !host.is_empty() => format!("{host}: {time}"),
            _ => time.to_string(),
        };
        Self { left, right }
    }

    /// Lay the header out on one line of `width` columns.
    ///
    /// The right text is right-aligned in whatever the left text leaves and
    /// is cut from the front when it does not fit. The left text is never
    /// shortened, so it alone may exceed `width`.
    pub fn render(&self, width: u16) -> String {
        let pad = usize::from(width).saturating_sub(self.left.len());
        if pad == 0 {
            return self.left.clone();
        }
        let right = tail(&self.right, pad);
        format!("{}{:>pad$}", self.left, right, pad = pad)
    }
}

/// Interval truncated (not rounded) to tenths of a second, e.g. `1.5`.
fn tenths(interval: Duration) -> String {
    let tenths = interval.as_millis() / 100;
    format!("{}.{}", tenths / 10, tenths % 10)
}

/// The last `max` bytes of `s`, widened to a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Longest line accepted before reading stops for the cycle.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Copy up to `rows` lines from `reader` into `frame`.
///
/// Every line read consumes one row of budget, including empty lines that
/// are not drawn. A trailing `\r` is stripped. Only `width` bytes of a line
/// are kept in memory; a line longer than `MAX_LINE_BYTES` is drawn cut and
/// ends the read with `InvalidData`. On error the lines already appended
/// stay in the frame.
pub async fn read_body<R>(
    reader: &mut R,
    frame: &mut Frame,
    rows: u16,
    width: u16,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    // One spare byte so a `\r` right after the visible part can be stripped.
    let keep = usize::from(width) + 1;
    let mut line = Vec::with_capacity(keep);
    for _ in 0..rows {
        line.clear();
        let Some(total) = read_capped_line(reader, &mut line, keep).await? else {
            break;
        };
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        frame.push_line(&line, width);
        if total > MAX_LINE_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("output line longer than {MAX_LINE_BYTES} bytes"),
            ));
        }
    }
    Ok(())
}

/// Read one line, storing at most `keep` bytes of it in `line` without the
/// `\n`. Returns the full line length, or `None` at end of stream.
///
/// Stops early once the line passes `MAX_LINE_BYTES`.
async fn read_capped_line<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    keep: usize,
) -> std::io::Result<Option<usize>>
where
    R: AsyncBufRead + Unpin,
{
    let mut total = 0usize;
    let mut seen = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(seen.then_some(total));
        }
        seen = true;
        let (chunk, used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (&available[..i], i + 1, true),
            None => (available, available.len(), false),
        };
        let room = keep.saturating_sub(line.len());
        line.extend_from_slice(&chunk[..chunk.len().min(room)]);
        total += chunk.len();
        reader.consume(used);
        if done || total > MAX_LINE_BYTES {
            return Ok(Some(total));
        }
    }
}
