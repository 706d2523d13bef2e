use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, FeedKind, LiveFeed};
use crate::error::SourceError;
use crate::models::{clean_summary, host_of, parse_published, Story, StoryRecord};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; CurateDigest/1.0)";
const FETCH_CONCURRENCY: usize = 10;

/// Where candidate stories come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceMode {
    /// A prepared JSON dataset on disk.
    #[default]
    Curated,
    /// The configured RSS feeds.
    Live,
}

impl FromStr for SourceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "curated" => Ok(SourceMode::Curated),
            "live" => Ok(SourceMode::Live),
            other => anyhow::bail!("mode must be 'curated' or 'live', got '{}'", other),
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Curated => write!(f, "curated"),
            SourceMode::Live => write!(f, "live"),
        }
    }
}

/// Gather candidates for a run. A missing curated dataset falls back to the
/// live feeds.
pub async fn load_stories(mode: SourceMode, config: &Config) -> Result<Vec<Story>> {
    match mode {
        SourceMode::Curated => match load_curated(&config.curated_path) {
            Ok(stories) => Ok(stories),
            Err(SourceError::Missing(path)) => {
                warn!(
                    "Curated dataset missing at {}, falling back to live feeds",
                    path.display()
                );
                load_live(&config.feeds).await
            }
            Err(e) => Err(e.into()),
        },
        SourceMode::Live => load_live(&config.feeds).await,
    }
}

/// Read a curated JSON array of story records. Records that are not objects
/// or have no link are skipped.
pub fn load_curated(path: &Path) -> Result<Vec<Story>, SourceError> {
    if !path.exists() {
        return Err(SourceError::Missing(path.to_path_buf()));
    }

    let content = fs::read_to_string(path)?;
    let records: Option<Vec<Value>> =
        serde_json::from_str(&content).map_err(|source| SourceError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let records = records.unwrap_or_default();
    let total = records.len();
    let stories: Vec<Story> = records
        .into_iter()
        .filter_map(|raw| serde_json::from_value::<StoryRecord>(raw).ok())
        .filter_map(Story::from_record)
        .collect();

    if stories.len() < total {
        debug!("Skipped {} unusable curated records", total - stories.len());
    }
    info!("Loaded {} curated stories from {}", stories.len(), path.display());

    Ok(stories)
}

pub async fn load_live(feeds: &[LiveFeed]) -> Result<Vec<Story>> {
    let fetcher = FeedFetcher::new()?;
    Ok(fetcher.fetch_all(feeds).await)
}

pub struct FeedFetcher {
    client: Client,
    resolver: Client,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        let resolver = Client::builder()
            .timeout(Duration::from_secs(6))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, resolver })
    }

    /// Fetch every feed. Feed order is kept; a feed that fails is logged and
    /// contributes nothing.
    pub async fn fetch_all(&self, feeds: &[LiveFeed]) -> Vec<Story> {
        let results: Vec<(String, Result<Vec<Story>, SourceError>)> = stream::iter(feeds)
            .map(|feed| async move { (feed.name.clone(), self.fetch_feed(feed).await) })
            .buffered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut stories = Vec::new();
        for (name, result) in results {
            match result {
                Ok(items) => {
                    info!("Fetched {} items from {}", items.len(), name);
                    stories.extend(items);
                }
                Err(e) => warn!("Failed to fetch feed {}: {}", name, e),
            }
        }
        stories
    }

    async fn fetch_feed(&self, feed: &LiveFeed) -> Result<Vec<Story>, SourceError> {
        let url = feed_url(feed);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        let channel = rss::Channel::read_from(&body[..])?;

        let drafts: Vec<Story> = channel
            .items()
            .iter()
            .filter_map(|item| story_from_item(item, feed))
            .collect();

        let kind = feed.kind;
        let stories: Vec<Story> = stream::iter(drafts)
            .map(|mut story| async move {
                let resolved = self.canonical_link(&story.link, kind).await;
                if let Some(link) = resolved {
                    story.link = link;
                }
                story
            })
            .buffered(FETCH_CONCURRENCY)
            .collect()
            .await;

        Ok(stories)
    }

    async fn canonical_link(&self, link: &str, kind: FeedKind) -> Option<String> {
        match kind {
            FeedKind::Google => {
                let target = unwrap_google_link(link)?;
                Some(self.follow_redirects(&target).await.unwrap_or(target))
            }
            FeedKind::Rss => self.follow_redirects(link).await,
        }
    }

    async fn follow_redirects(&self, url: &str) -> Option<String> {
        match self.resolver.get(url).send().await {
            Ok(response) => {
                let final_url = response.url().as_str();
                final_url.starts_with("http").then(|| final_url.to_string())
            }
            Err(e) => {
                debug!("Canonical resolution failed for {}: {}", url, e);
                None
            }
        }
    }
}

/// URL to request for a feed. Google feeds without a URL search for their
/// query.
pub fn feed_url(feed: &LiveFeed) -> String {
    if feed.kind == FeedKind::Google && feed.url.trim().is_empty() {
        let query = feed.query.as_deref().unwrap_or("artificial intelligence");
        return format!(
            "https://news.google.com/rss/search?q={}&hl=en-US&gl=US&ceid=US:en",
            urlencoding::encode(query)
        );
    }
    feed.url.clone()
}

/// Pull the publisher URL out of a news.google.com redirect link.
pub fn unwrap_google_link(link: &str) -> Option<String> {
    let url = Url::parse(link).ok()?;
    if !url.host_str()?.contains("news.google.com") {
        return None;
    }
    url.query_pairs()
        .find(|(key, _)| key == "url")
        .or_else(|| url.query_pairs().find(|(key, _)| key == "q"))
        .map(|(_, value)| value.into_owned())
}

fn story_from_item(item: &rss::Item, feed: &LiveFeed) -> Option<Story> {
    let link = item
        .link()
        .or_else(|| item.guid().map(|g| g.value()))
        .map(str::trim)
        .filter(|l| !l.is_empty())?
        .to_string();

    let title = item
        .title()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled update")
        .to_string();

    let summary = item.description().map(clean_summary).unwrap_or_default();

    let published = item.pub_date().and_then(parse_published);

    let source = item
        .source()
        .and_then(|s| s.title())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| host_of(&link))
        .unwrap_or_else(|| feed.name.clone());

    Some(Story {
        title,
        summary,
        link,
        source,
        published,
    })
}
