use serde::{Deserialize, Serialize};

use crate::config::NarrationConfig;
use crate::text::truncate_chars;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,
    pub author: String,
    pub score: i64,
}

/// One story as handed to the pipeline. Never mutated by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub slug: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub url: String,
}

impl StoryRecord {
    /// Slug reduced to characters that are safe in a file name.
    pub fn file_stem(&self) -> String {
        let stem: String = self
            .slug
            .trim()
            .chars()
            .map(|c| c.to_ascii_lowercase())
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let stem = stem.trim_matches('-');
        if stem.is_empty() {
            "story".to_string()
        } else {
            stem.to_string()
        }
    }

    /// The `n` highest-scoring comments, best first. Equal scores keep their input order.
    pub fn top_comments(&self, n: usize) -> Vec<&Comment> {
        let mut ranked: Vec<&Comment> = self
            .comments
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked.truncate(n);
        ranked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    Title,
    Story,
    Comment,
}

impl SegmentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentRole::Title => "title",
            SegmentRole::Story => "story",
            SegmentRole::Comment => "comment",
        }
    }
}

/// One unit of narration: what gets spoken and what gets drawn for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub role: SegmentRole,
    pub narration: String,
    pub display: String,
    pub label: Option<String>,
}

impl Segment {
    /// Identifier used for the segment's temporary files.
    pub fn id(&self) -> String {
        format!("{:02}_{}", self.index, self.role.as_str())
    }
}

/// Title, body, then the top comments by score.
pub fn plan_segments(
    story: &StoryRecord,
    narration: &NarrationConfig,
    max_comments: usize,
) -> Vec<Segment> {
    let mut segments = Vec::new();

    let title = story.title.trim();
    if !title.is_empty() {
        segments.push(Segment {
            index: segments.len(),
            role: SegmentRole::Title,
            narration: format!("{}{}", narration.title_intro, title),
            display: title.to_string(),
            label: None,
        });
    }

    let body = story.body.trim();
    if !body.is_empty() {
        let (spoken, truncated) = match narration.body_char_limit {
            Some(limit) => truncate_chars(body, limit),
            None => (body, false),
        };
        let mut spoken = spoken.trim_end().to_string();
        if truncated {
            spoken.push_str("...");
        }
        if truncated || narration.always_outro {
            spoken.push_str(&narration.body_outro);
        }

        let (shown, shown_truncated) = truncate_chars(body, narration.card_char_limit);
        let mut shown = shown.trim_end().to_string();
        if shown_truncated {
            shown.push_str("...");
        }

        segments.push(Segment {
            index: segments.len(),
            role: SegmentRole::Story,
            narration: spoken.trim().to_string(),
            display: shown,
            label: None,
        });
    }

    for comment in story.top_comments(max_comments) {
        let text = comment.text.trim();
        segments.push(Segment {
            index: segments.len(),
            role: SegmentRole::Comment,
            narration: text.to_string(),
            display: text.to_string(),
            label: Some(format!("{} · {} points", comment.author, comment.score)),
        });
    }

    segments
}
