use regex::Regex;
use std::sync::LazyLock;

// ffmpeg's out_time_ms is actually microseconds, same as out_time_us.
static OUT_TIME_US_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^out_time_(?:us|ms)=(\d+)$").expect("invalid out_time_us regex")
});
static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^out_time=|\btime=)(\d+):(\d{2}):(\d{2}(?:\.\d+)?)")
        .expect("invalid clock regex")
});

/// One recognised line of ffmpeg status output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusLine {
    /// Processed position within the current invocation, in seconds.
    Position(f64),
    /// `progress=continue`: alive, no position on this line.
    Heartbeat,
    /// `progress=end`.
    End,
}

/// Parse one line of `-progress pipe:1` (or stderr stats) output. None for anything else.
pub fn parse_status_line(line: &str) -> Option<StatusLine> {
    let line = line.trim();
    match line {
        "progress=end" => return Some(StatusLine::End),
        "progress=continue" => return Some(StatusLine::Heartbeat),
        _ => {}
    }

    if let Some(caps) = OUT_TIME_US_RE.captures(line) {
        let micros: u64 = caps[1].parse().ok()?;
        return Some(StatusLine::Position(micros as f64 / 1_000_000.0));
    }

    if let Some(caps) = CLOCK_RE.captures(line) {
        let hours: f64 = caps[1].parse().ok()?;
        let minutes: f64 = caps[2].parse().ok()?;
        let seconds: f64 = caps[3].parse().ok()?;
        return Some(StatusLine::Position(hours * 3600.0 + minutes * 60.0 + seconds));
    }

    None
}
