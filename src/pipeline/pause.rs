//! Pause-marker grammar embedded in reply text.
//!
//! A marker is `[pause:<seconds>]` or `[pause:<seconds>s]`, fractional
//! seconds allowed, matched case-insensitively with optional whitespace
//! inside the brackets. Anything else in square brackets is ordinary text.

/// Longest pause a single marker may request.
pub const MAX_PAUSE_MS: u64 = 30_000;

const PREFIX: &str = "[pause:";

/// One piece of reply text to be synthesized after a pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseSegment {
    /// Text to speak (empty for a pause with nothing after it).
    pub text: String,
    /// Silence before the text, in milliseconds.
    pub pause_before_ms: u64,
}

enum Token<'a> {
    Text(&'a str),
    Pause(u64),
}

/// Split reply text at pause markers.
///
/// Each text run carries the duration of the marker before it (0 for the
/// first run). Two markers with no text between them, or a marker at the
/// very end, yield a segment with empty text that only carries its pause.
pub fn split_pause_segments(text: &str) -> Vec<PauseSegment> {
    let mut segments = Vec::new();
    let mut pending: Option<u64> = None;
    let mut buffer = String::new();

    for token in tokenize(text) {
        match token {
            Token::Text(t) => buffer.push_str(t),
            Token::Pause(ms) => {
                flush_segment(&mut buffer, pending, &mut segments);
                pending = Some(ms);
            }
        }
    }
    flush_segment(&mut buffer, pending, &mut segments);
    segments
}

fn flush_segment(buffer: &mut String, pending: Option<u64>, segments: &mut Vec<PauseSegment>) {
    let text = collapse_whitespace(buffer);
    buffer.clear();
    if !text.is_empty() {
        segments.push(PauseSegment {
            text,
            pause_before_ms: pending.unwrap_or(0),
        });
    } else if let Some(ms) = pending {
        segments.push(PauseSegment {
            text: String::new(),
            pause_before_ms: ms,
        });
    }
}

/// Remove every pause marker and collapse whitespace, for display.
///
/// Idempotent: stripping already-stripped text returns it unchanged.
pub fn strip_pause_markers(text: &str) -> String {
    let mut current = text.to_owned();
    loop {
        let mut out = String::with_capacity(current.len());
        let mut removed = false;
        for token in tokenize(&current) {
            match token {
                Token::Text(t) => out.push_str(t),
                Token::Pause(_) => {
                    removed = true;
                    out.push(' ');
                }
            }
        }
        let collapsed = collapse_whitespace(&out);
        // Removing a marker can splice its neighbours into a new one.
        if !removed {
            return collapsed;
        }
        current = collapsed;
    }
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find('[') {
        let at = cursor + offset;
        match parse_marker(&text[at..]) {
            Some((len, ms)) => {
                if at > text_start {
                    tokens.push(Token::Text(&text[text_start..at]));
                }
                tokens.push(Token::Pause(ms));
                cursor = at + len;
                text_start = cursor;
            }
            None => cursor = at + 1,
        }
    }
    if text_start < text.len() {
        tokens.push(Token::Text(&text[text_start..]));
    }
    tokens
}

/// Parse a marker at the start of `s`, returning its byte length and
/// duration in milliseconds.
fn parse_marker(s: &str) -> Option<(usize, u64)> {
    let head = s.get(..PREFIX.len())?;
    if !head.eq_ignore_ascii_case(PREFIX) {
        return None;
    }
    let rest = &s[PREFIX.len()..];
    let close = rest.find(']')?;
    let inner = rest[..close].trim();
    let number = inner
        .strip_suffix(|c: char| c.eq_ignore_ascii_case(&'s'))
        .unwrap_or(inner)
        .trim_end();

    let digits = number.chars().filter(char::is_ascii_digit).count();
    let dots = number.chars().filter(|&c| c == '.').count();
    if digits == 0 || dots > 1 || digits + dots != number.chars().count() {
        return None;
    }
    let seconds: f64 = number.parse().ok()?;
    let ms = ((seconds * 1000.0).round() as u64).min(MAX_PAUSE_MS);
    Some((PREFIX.len() + close + 1, ms))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
