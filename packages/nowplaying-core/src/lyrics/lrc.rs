//! LRC tokenizer.
//!
//! Parsing happens in two independent passes: [`parse_lines`] turns each
//! `[mm:ss.xx]text` line into a timed line with only a start time, and
//! [`stitch_end_times`] fills in end times from the following line's start.
//! [`parse`] runs both.

use super::LyricLine;

/// End time of the final line: it stays active until the track ends.
pub const LAST_LINE_END_MS: u64 = u64::MAX;

/// Parses LRC text into lines sorted by start time with end times stitched.
#[must_use]
pub fn parse(raw: &str) -> Vec<LyricLine> {
    let mut lines = parse_lines(raw);
    stitch_end_times(&mut lines);
    lines
}

/// First pass: tokenizes every line independently.
///
/// Lines without a leading timestamp tag (metadata such as `[ar:...]`, blank
/// lines, plain text) are skipped. A line carrying several timestamp tags
/// yields one entry per tag. The result is sorted ascending by start time;
/// `end_time_ms` is left at [`LAST_LINE_END_MS`] for every line.
#[must_use]
pub fn parse_lines(raw: &str) -> Vec<LyricLine> {
    let mut lines = Vec::new();

    for raw_line in raw.lines() {
        let mut rest = raw_line.trim();
        let mut starts = Vec::new();

        while let Some(tag_body) = rest.strip_prefix('[') {
            let Some(close) = tag_body.find(']') else {
                break;
            };
            let Some(start) = parse_timestamp(&tag_body[..close]) else {
                break;
            };
            starts.push(start);
            rest = &tag_body[close + 1..];
        }

        let words = rest.trim();
        for start_time_ms in starts {
            lines.push(LyricLine {
                start_time_ms,
                end_time_ms: LAST_LINE_END_MS,
                words: words.to_string(),
            });
        }
    }

    // Stable sort keeps file order for identical timestamps
    lines.sort_by_key(|line| line.start_time_ms);
    lines
}

/// Second pass: each line ends where the next one starts.
pub fn stitch_end_times(lines: &mut [LyricLine]) {
    let len = lines.len();
    for i in 0..len {
        lines[i].end_time_ms = if i + 1 < len {
            lines[i + 1].start_time_ms
        } else {
            LAST_LINE_END_MS
        };
    }
}

/// Parses `mm:ss`, `mm:ss.x`, `mm:ss.xx` or `mm:ss.xxx` into milliseconds.
fn parse_timestamp(token: &str) -> Option<u64> {
    let (minutes, seconds) = token.split_once(':')?;
    let minutes: u64 = parse_digits(minutes)?;

    let (whole, fraction) = match seconds.split_once(['.', ',']) {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (seconds, None),
    };
    let whole: u64 = parse_digits(whole)?;
    if whole >= 60 {
        return None;
    }

    let fraction_ms = match fraction {
        None => 0,
        Some(f) if f.is_empty() || f.len() > 3 => return None,
        Some(f) => parse_digits(f)? * 10u64.pow(3 - f.len() as u32),
    };

    Some(minutes * 60_000 + whole * 1000 + fraction_ms)
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
