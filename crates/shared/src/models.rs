use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

const UNTITLED: &str = "Untitled update";

/// One candidate news item, normalized and ready for selection.
///
/// The `link` is the identity of a story: two stories with the same link are
/// the same story no matter what the other fields say.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub title: String,
    pub summary: String,
    pub link: String,
    pub source: String,
    pub published: Option<DateTime<Utc>>,
}

/// Raw story as it appears in a curated dataset file.
///
/// Every field is optional so one bad record never breaks the whole file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoryRecord {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "description")]
    pub summary: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, alias = "date")]
    pub published: Option<String>,
}

impl Story {
    pub fn new(
        title: impl Into<String>,
        summary: impl Into<String>,
        link: impl Into<String>,
        source: impl Into<String>,
        published: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
            link: link.into(),
            source: source.into(),
            published,
        }
    }

    /// Normalize a raw record. Records without a link are rejected.
    pub fn from_record(record: StoryRecord) -> Option<Self> {
        let link = record.link.as_deref().map(str::trim).unwrap_or_default();
        if link.is_empty() {
            return None;
        }

        let title = record
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED)
            .to_string();

        let summary = record
            .summary
            .as_deref()
            .map(clean_summary)
            .unwrap_or_default();

        let source = record
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| host_of(link))
            .unwrap_or_else(|| "source".to_string());

        let published = record.published.as_deref().and_then(parse_published);

        Some(Self {
            title,
            summary,
            link: link.to_string(),
            source,
            published,
        })
    }

    /// Host portion of the link, lowercased. Used for source diversity.
    pub fn domain(&self) -> String {
        host_of(&self.link).unwrap_or_else(|| {
            self.link
                .split('/')
                .next()
                .unwrap_or_default()
                .to_lowercase()
        })
    }

    /// Number of characters in the title (not bytes).
    pub fn title_len(&self) -> usize {
        self.title.chars().count()
    }
}

/// A labelled group of chosen stories handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub style: String,
    pub stories: Vec<Story>,
}

impl Section {
    pub fn new(title: impl Into<String>, style: impl Into<String>, stories: Vec<Story>) -> Self {
        Self {
            title: title.into(),
            style: style.into(),
            stories,
        }
    }
}

pub fn host_of(link: &str) -> Option<String> {
    Url::parse(link)
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
        .filter(|host| !host.is_empty())
}

/// Parse the publication timestamps seen in feeds and curated files.
///
/// Values without a timezone are taken as UTC.
pub fn parse_published(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Reduce a feed summary to a single line of plain text.
pub fn clean_summary(raw: &str) -> String {
    let raw = raw.trim();
    let text = if raw.contains('<') {
        html2text::from_read(raw.as_bytes(), 10_000)
    } else {
        raw.to_string()
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop repeated links, keeping the first occurrence of each.
pub fn dedupe_by_link(stories: Vec<Story>) -> Vec<Story> {
    let mut seen = HashSet::new();
    stories
        .into_iter()
        .filter(|story| seen.insert(story.link.clone()))
        .collect()
}

/// Newest first. Stories without a date sort after every dated story.
pub fn sort_by_recency(stories: &mut [Story]) {
    stories.sort_by(|a, b| b.published.cmp(&a.published));
}
