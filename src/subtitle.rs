use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::text::{speech_tokens, wrap_text};

const COMMA_PAUSE: f64 = 0.2;
const SENTENCE_END_PAUSE: f64 = 0.4;
// Sub-linear so long words don't hog the segment.
const LENGTH_EXPONENT: f64 = 0.75;

#[derive(Debug, Clone, PartialEq)]
pub struct SrtEntry {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

fn pause_after(token: &str) -> Option<f64> {
    match token {
        "," => Some(COMMA_PAUSE),
        "." | "!" | "?" => Some(SENTENCE_END_PAUSE),
        _ => None,
    }
}

/// Per-word cues for `text` spoken over `[start, start + duration)`.
///
/// Words share the time left after punctuation pauses, weighted by length. When the
/// pauses alone would overrun the segment they are scaled down to fit.
pub fn word_timings(text: &str, start: f64, duration: f64) -> Vec<SrtEntry> {
    let duration = duration.max(0.0);
    let tokens = speech_tokens(text);
    if tokens.is_empty() {
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![SrtEntry {
            start,
            end: start + duration,
            text: text.trim().to_string(),
        }];
    }

    let total_pause: f64 = tokens.iter().filter_map(|t| pause_after(t)).sum();
    let pause_scale = if total_pause > duration && total_pause > 0.0 {
        duration / total_pause
    } else {
        1.0
    };
    let word_time = (duration - total_pause * pause_scale).max(0.0);
    let weight = |w: &str| (w.chars().count() as f64).powf(LENGTH_EXPONENT);
    let total_weight: f64 = tokens
        .iter()
        .filter(|t| pause_after(t).is_none())
        .map(|w| weight(w))
        .sum();

    let mut entries = Vec::new();
    let mut cursor = start;
    for token in tokens {
        match pause_after(token) {
            Some(pause) => cursor += pause * pause_scale,
            None => {
                let len = if total_weight > 0.0 {
                    word_time * weight(token) / total_weight
                } else {
                    0.0
                };
                let end = (cursor + len).min(start + duration);
                entries.push(SrtEntry {
                    start: cursor.min(end),
                    end,
                    text: token.to_string(),
                });
                cursor = end;
            }
        }
    }
    entries
}

pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

pub fn write_srt(path: &Path, entries: &[SrtEntry]) -> std::io::Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    for (i, entry) in entries.iter().enumerate() {
        writeln!(f, "{}", i + 1)?;
        writeln!(
            f,
            "{} --> {}",
            format_srt_time(entry.start),
            format_srt_time(entry.end)
        )?;
        for line in wrap_text(&entry.text, 80) {
            writeln!(f, "{}", line)?;
        }
        writeln!(f)?;
    }
    f.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srt_time_format() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(3723.4567), "01:02:03,457");
        assert_eq!(format_srt_time(-1.0), "00:00:00,000");
    }

    #[test]
    fn words_fill_the_segment_with_pauses() {
        let entries = word_timings("Hello, big world.", 10.0, 2.0);
        let words: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(words, ["Hello", "big", "world"]);
        assert!((entries[0].start - 10.0).abs() < 1e-9);
        // the comma pause sits between the first two words
        assert!((entries[1].start - entries[0].end - COMMA_PAUSE).abs() < 1e-9);
        // trailing sentence pause leaves the last word ending before the segment does
        assert!((entries[2].end - (12.0 - SENTENCE_END_PAUSE)).abs() < 1e-9);
        assert!(entries.windows(2).all(|w| w[0].end <= w[1].start));
    }

    #[test]
    fn pauses_never_overrun_short_segments() {
        let entries = word_timings("a, b, c, d.", 0.0, 0.5);
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| e.end <= 0.5 + 1e-9 && e.start <= e.end));
    }

    #[test]
    fn empty_and_symbol_only_text() {
        assert!(word_timings("   ", 0.0, 1.0).is_empty());
        let entries = word_timings("🙂", 1.0, 1.0);
        assert_eq!(entries.len(), 1);
        assert_eq!((entries[0].start, entries[0].end), (1.0, 2.0));
    }

    #[test]
    fn writes_numbered_cues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cues.srt");
        let entries = word_timings("One two.", 0.0, 1.0);
        write_srt(&path, &entries).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("1\n00:00:00,000 --> "));
        assert!(body.contains("\n2\n"));
        assert!(body.contains("two\n"));
    }
}
