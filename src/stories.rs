use std::collections::HashSet;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::story::{Comment, StoryRecord};

#[derive(thiserror::Error, Debug)]
pub enum StoryError {
    #[error("story not found: {0}")]
    NotFound(String),
}

/// Where stories come from. `None` asks for the newest story not yet turned into a video.
pub trait StorySource {
    fn fetch(&self, slug: Option<&str>) -> impl Future<Output = anyhow::Result<StoryRecord>> + Send;
}

/// A row of the `posts` table, only the columns the pipeline reads.
#[derive(Debug, Deserialize)]
pub struct PostRow {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Section {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: Option<SectionMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct SectionMetadata {
    #[serde(default)]
    comments: Vec<RawComment>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    #[serde(default)]
    content: String,
    #[serde(default = "anonymous")]
    author: String,
    #[serde(default = "default_upvotes")]
    upvotes: i64,
}

fn anonymous() -> String {
    "anonymous".to_string()
}

fn default_upvotes() -> i64 {
    100
}

const STORY_SECTIONS: [&str; 5] = ["describe-1", "describe-2", "describe-3", "describe-4", "describe-5"];
const COMMENT_SECTION: &str = "comments-1";

fn sections(content: &Value) -> Vec<Section> {
    // Older rows store the content document as a JSON string.
    let parsed;
    let doc = match content {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v) => {
                parsed = v;
                &parsed
            }
            Err(_) => return Vec::new(),
        },
        other => other,
    };
    doc.get("sections")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

impl PostRow {
    pub fn into_story(self) -> StoryRecord {
        let sections = sections(&self.content);
        let body = match &self.content {
            Value::String(s) if sections.is_empty() => s.clone(),
            _ => sections
                .iter()
                .filter(|s| STORY_SECTIONS.contains(&s.kind.as_str()))
                .map(|s| s.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        };
        let comments = sections
            .into_iter()
            .filter(|s| s.kind == COMMENT_SECTION)
            .flat_map(|s| s.metadata.unwrap_or_default().comments)
            .map(|c| Comment {
                text: c.content,
                author: c.author,
                score: c.upvotes,
            })
            .collect();
        StoryRecord {
            url: format!("https://threadjuice.com/blog/{}", self.slug),
            slug: self.slug,
            title: self.title,
            body,
            comments,
            category: self.category.unwrap_or_default(),
        }
    }
}

/// Stories from the Supabase REST endpoint of the `posts` table.
pub struct SupabaseStories {
    client: reqwest::Client,
    base_url: String,
    key: String,
    used_path: PathBuf,
    scan_limit: usize,
}

impl SupabaseStories {
    pub fn new(base_url: &str, key: &str, used_path: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            used_path: used_path.into(),
            scan_limit: 20,
        }
    }

    async fn query(&self, query: &str) -> anyhow::Result<Vec<PostRow>> {
        let url = format!("{}/rest/v1/posts?{}", self.base_url, query);
        debug!("GET {}", url);
        let rows = self
            .client
            .get(&url)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<PostRow>>()
            .await
            .context("unexpected posts payload")?;
        Ok(rows)
    }
}

impl StorySource for SupabaseStories {
    async fn fetch(&self, slug: Option<&str>) -> anyhow::Result<StoryRecord> {
        if let Some(slug) = slug {
            let rows = self.query(&format!("slug=eq.{slug}&select=*")).await?;
            let row = rows
                .into_iter()
                .next()
                .ok_or_else(|| StoryError::NotFound(slug.to_string()))?;
            info!("Fetched story '{}'", row.slug);
            return Ok(row.into_story());
        }

        let rows = self
            .query(&format!(
                "status=eq.published&select=*&order=created_at.desc&limit={}",
                self.scan_limit
            ))
            .await?;
        let mut used = load_used_slugs(&self.used_path)?;
        for row in rows {
            if used.contains(&row.slug) {
                debug!("Skipping story (already used): {}", row.slug);
                continue;
            }
            info!("Selected story: {}", row.title);
            used.insert(row.slug.clone());
            save_used_slugs(&self.used_path, &used)?;
            return Ok(row.into_story());
        }
        Err(StoryError::NotFound("no unused published story".to_string()).into())
    }
}

/// Stories from a local JSON file holding one story or an array of them.
pub struct JsonFileStories {
    path: PathBuf,
}

impl JsonFileStories {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoryFile {
    Many(Vec<StoryRecord>),
    One(StoryRecord),
}

impl StorySource for JsonFileStories {
    async fn fetch(&self, slug: Option<&str>) -> anyhow::Result<StoryRecord> {
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read story file '{}'", self.path.display()))?;
        let parsed: StoryFile = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse story file '{}'", self.path.display()))?;
        let stories = match parsed {
            StoryFile::Many(v) => v,
            StoryFile::One(s) => vec![s],
        };
        let story = match slug {
            Some(slug) => stories.into_iter().find(|s| s.slug == slug),
            None => stories.into_iter().next(),
        };
        story.ok_or_else(|| {
            StoryError::NotFound(slug.unwrap_or("<first>").to_string()).into()
        })
    }
}

pub fn load_used_slugs(path: &Path) -> anyhow::Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let data = fs::read_to_string(path)?;
    let slugs: Vec<String> = serde_json::from_str(&data)?;
    Ok(slugs.into_iter().collect())
}

pub fn save_used_slugs(path: &Path, slugs: &HashSet<String>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut sorted: Vec<&String> = slugs.iter().collect();
    sorted.sort();
    let data = serde_json::to_string_pretty(&sorted)?;
    fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_sections_become_body_and_comments() {
        let row: PostRow = serde_json::from_value(json!({
            "slug": "office-fridge",
            "title": "The Office Fridge War",
            "category": "workplace",
            "content": {
                "sections": [
                    {"type": "hero", "content": "ignored"},
                    {"type": "describe-1", "content": "First part."},
                    {"type": "describe-2", "content": "Second part."},
                    {"type": "comments-1", "content": "", "metadata": {"comments": [
                        {"content": "Wow.", "author": "u/a", "upvotes": 12},
                        {"content": "No way"}
                    ]}}
                ]
            }
        }))
        .unwrap();
        let story = row.into_story();
        assert_eq!(story.body, "First part.\n\nSecond part.");
        assert_eq!(story.category, "workplace");
        assert_eq!(story.url, "https://threadjuice.com/blog/office-fridge");
        assert_eq!(story.comments.len(), 2);
        assert_eq!(story.comments[0].score, 12);
        assert_eq!(story.comments[1].author, "anonymous");
        assert_eq!(story.comments[1].score, 100);
    }

    #[test]
    fn string_content_is_parsed_or_used_verbatim() {
        let doc = json!({"sections": [{"type": "describe-1", "content": "Inner."}]}).to_string();
        let row: PostRow =
            serde_json::from_value(json!({"slug": "s", "title": "t", "content": doc})).unwrap();
        assert_eq!(row.into_story().body, "Inner.");

        let row: PostRow =
            serde_json::from_value(json!({"slug": "s", "title": "t", "content": "plain text"}))
                .unwrap();
        assert_eq!(row.into_story().body, "plain text");
    }

    #[test]
    fn used_slugs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("used_slugs.json");
        assert!(load_used_slugs(&path).unwrap().is_empty());
        let set: HashSet<String> = ["b", "a"].iter().map(|s| s.to_string()).collect();
        save_used_slugs(&path, &set).unwrap();
        assert_eq!(load_used_slugs(&path).unwrap(), set);
    }

    #[tokio::test]
    async fn json_file_source_selects_by_slug() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stories.json");
        let stories = json!([
            {"slug": "one", "title": "One", "body": "b1"},
            {"slug": "two", "title": "Two", "body": "b2", "comments": [
                {"text": "c", "author": "u/x", "score": 3}
            ]}
        ]);
        fs::write(&path, stories.to_string()).unwrap();
        let source = JsonFileStories::new(&path);

        assert_eq!(source.fetch(None).await.unwrap().slug, "one");
        let two = source.fetch(Some("two")).await.unwrap();
        assert_eq!(two.comments.len(), 1);
        let err = source.fetch(Some("nope")).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<StoryError>(), Some(StoryError::NotFound(_))));
    }
}
