use std::sync::OnceLock;

use regex::Regex;

/// First `max_chars` characters of `s` and whether anything was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> (&str, bool) {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&s[..byte_idx], true),
        None => (s, false),
    }
}

/// Greedy word wrap on a character budget. Words longer than `width` get a line of their own.
pub fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        let current_len = current.chars().count();
        if current_len + word.chars().count() + 1 > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\w[\w'-]*)|([,.!?])").expect("static regex"))
}

/// Words and the punctuation marks that imply a pause, in reading order.
pub fn speech_tokens(s: &str) -> Vec<&str> {
    token_regex().find_iter(s).map(|m| m.as_str()).collect()
}
