use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::story::StoryRecord;

const BASE_URL: &str = "https://api.pexels.com/videos";
const ENOUGH_CANDIDATES: usize = 3;
const FALLBACK_QUERIES: [&str; 5] = [
    "abstract background",
    "nature scenery",
    "city timelapse",
    "technology",
    "lifestyle",
];
const STOP_WORDS: [&str; 38] = [
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "when", "where", "how", "why", "what", "this", "that", "these", "those", "is", "are",
    "was", "were", "been", "being", "have", "has", "had", "do", "does", "did", "my", "your",
];
const THEMES: [(&str, &[&str]); 5] = [
    ("money", &["salary", "pay", "dollar", "cost", "price", "financial"]),
    ("relationship", &["boyfriend", "girlfriend", "wife", "husband", "partner", "dating"]),
    ("work", &["boss", "job", "work", "office", "employee", "manager"]),
    ("family", &["mom", "dad", "mother", "father", "parent", "sibling"]),
    ("food", &["eat", "food", "cook", "restaurant", "meal", "dinner"]),
];

#[derive(thiserror::Error, Debug)]
pub enum PexelsError {
    #[error("PEXELS_API_KEY is not set")]
    MissingKey,

    #[error("download of '{url}' failed: {reason}")]
    DownloadFailed { url: String, reason: String },
}

/// A downloadable stock clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipDescriptor {
    pub id: u64,
    pub duration: f64,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    videos: Vec<RawVideo>,
}

#[derive(Debug, Deserialize)]
struct RawVideo {
    id: u64,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    video_files: Vec<RawVideoFile>,
}

#[derive(Debug, Deserialize)]
struct RawVideoFile {
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    link: String,
}

impl RawVideo {
    /// HD at most 1280 wide when available, else the first rendition.
    fn into_descriptor(self) -> Option<ClipDescriptor> {
        let hd = self
            .video_files
            .iter()
            .position(|f| f.quality.as_deref() == Some("hd") && f.width.is_some_and(|w| w <= 1280));
        let file = match hd {
            Some(i) => self.video_files.into_iter().nth(i),
            None => self.video_files.into_iter().next(),
        }?;
        Some(ClipDescriptor {
            id: self.id,
            duration: self.duration,
            url: file.link,
        })
    }
}

/// Search terms for a story category; unknown categories get generic ones.
pub fn category_queries(category: &str) -> &'static [&'static str] {
    match category {
        "relationships" => &["couple arguing", "relationship drama", "couple talking", "romantic conflict"],
        "workplace" => &["office stress", "workplace", "business meeting", "corporate life"],
        "family" => &["family dinner", "family gathering", "home life", "family drama"],
        "money" => &["counting money", "financial", "bills", "shopping"],
        "food" => &["cooking", "restaurant", "food preparation", "kitchen"],
        "life" => &["daily life", "city life", "lifestyle", "everyday moments"],
        "drama" => &["dramatic", "conflict", "intense", "emotional"],
        "viral" => &["trending", "social media", "viral", "internet"],
        _ => &["lifestyle", "abstract", "background"],
    }
}

/// Up to five search keywords from a title: long non-stop words, then matched themes.
pub fn title_keywords(title: &str) -> Vec<String> {
    let lower = title.to_lowercase();
    let mut keywords: Vec<String> = lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.chars().count() > 3 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect();
    for (theme, words) in THEMES {
        if words.iter().any(|w| lower.contains(w)) {
            keywords.push(theme.to_string());
        }
    }
    keywords.truncate(5);
    keywords
}

pub struct PexelsClient {
    client: reqwest::Client,
    api_key: String,
    cache_dir: PathBuf,
}

impl PexelsClient {
    pub fn new(api_key: &str, cache_dir: impl Into<PathBuf>) -> Result<Self, PexelsError> {
        if api_key.trim().is_empty() {
            return Err(PexelsError::MissingKey);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            cache_dir: cache_dir.into(),
        })
    }

    pub async fn search(&self, query: &str, per_page: u32) -> anyhow::Result<Vec<ClipDescriptor>> {
        debug!("Pexels search '{}'", query);
        let per_page = per_page.to_string();
        let res: SearchResponse = self
            .client
            .get(format!("{BASE_URL}/search"))
            .header("Authorization", &self.api_key)
            .query(&[
                ("query", query),
                ("per_page", per_page.as_str()),
                ("orientation", "landscape"),
                ("size", "medium"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("unexpected pexels search payload")?;
        Ok(res
            .videos
            .into_iter()
            .filter_map(RawVideo::into_descriptor)
            .collect())
    }

    // Search errors only cost a query; they never abort selection.
    async fn search_lenient(&self, query: &str, per_page: u32) -> Vec<ClipDescriptor> {
        match self.search(query, per_page).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Pexels search '{}' failed: {:#}", query, e);
                Vec::new()
            }
        }
    }

    /// Downloads `clip` into the cache as `file_name`, reusing an earlier download.
    pub async fn fetch(&self, clip: &ClipDescriptor, file_name: &str) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let dest = self.cache_dir.join(file_name);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            info!("Using cached clip {}", dest.display());
            return Ok(dest);
        }
        info!("Downloading clip {} to {}", clip.id, dest.display());
        let tmp = dest.with_extension("download");
        match self.download(&clip.url, &tmp).await {
            Ok(()) => {
                tokio::fs::rename(&tmp, &dest).await?;
                Ok(dest)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(PexelsError::DownloadFailed {
                    url: clip.url.clone(),
                    reason: format!("{e:#}"),
                }
                .into())
            }
        }
    }

    async fn download(&self, url: &str, to: &Path) -> anyhow::Result<()> {
        let mut res = self.client.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(to).await?;
        while let Some(chunk) = res.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// First candidate from category queries, then title keywords, then generic queries.
    pub async fn pick_for_story(&self, story: &StoryRecord) -> Option<ClipDescriptor> {
        let mut found = Vec::new();
        for query in category_queries(&story.category) {
            found.extend(self.search_lenient(query, 5).await);
            if found.len() >= ENOUGH_CANDIDATES {
                break;
            }
        }
        if let Some(clip) = found.into_iter().next() {
            return Some(clip);
        }

        let keywords = title_keywords(&story.title);
        let combined = match keywords.as_slice() {
            [a, b, ..] => format!("{a} {b}"),
            [a] => a.clone(),
            [] => "lifestyle".to_string(),
        };
        if let Some(clip) = self.search_lenient(&combined, 5).await.into_iter().next() {
            return Some(clip);
        }
        if keywords.len() > 1 {
            for keyword in keywords.iter().take(3) {
                if let Some(clip) = self.search_lenient(keyword, 5).await.into_iter().next() {
                    return Some(clip);
                }
            }
        }

        for query in FALLBACK_QUERIES {
            if let Some(clip) = self.search_lenient(query, 1).await.into_iter().next() {
                return Some(clip);
            }
        }
        None
    }

    /// Picks and downloads a background for `story`. `None` when nothing could be found.
    pub async fn select_for_story(&self, story: &StoryRecord) -> anyhow::Result<Option<PathBuf>> {
        let Some(clip) = self.pick_for_story(story).await else {
            warn!("No stock footage found for '{}'", story.slug);
            return Ok(None);
        };
        let name = format!("{}_{}.mp4", story.file_stem(), clip.id);
        self.fetch(&clip, &name).await.map(Some)
    }
}
