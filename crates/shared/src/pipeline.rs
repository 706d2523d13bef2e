//! One generation run, start to finish.
//!
//! The day lock is taken before the seen cache is read and held until the
//! cache has been updated, so two runs for the same day cannot both treat a
//! story as new.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::digest::{DigestGenerator, DigestOutputs};
use crate::error::GenerationError;
use crate::io::resolve_path;
use crate::models::{dedupe_by_link, sort_by_recency, Section, Story};
use crate::seen::{lock_dir_for, DayLock, SeenCache, SeenOptions, SeenScope};
use crate::selection::SectionPlanner;
use crate::sources::{load_stories, SourceMode};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Relative paths (config, cache, dataset, output) resolve against this.
    pub base_dir: PathBuf,
    pub config_path: Option<PathBuf>,
    pub source_mode: SourceMode,
    /// Overrides `[seen] scope` from the config file.
    pub seen_scope: Option<SeenScope>,
    /// Overrides `[seen] ttl_days` from the config file.
    pub seen_ttl: Option<i64>,
    pub reset_seen: bool,
    pub out_dir: PathBuf,
    pub today: NaiveDate,
    pub lock_timeout: Duration,
}

impl RunOptions {
    pub fn new(base_dir: impl Into<PathBuf>, today: NaiveDate) -> Self {
        Self {
            base_dir: base_dir.into(),
            config_path: None,
            source_mode: SourceMode::Curated,
            seen_scope: None,
            seen_ttl: None,
            reset_seen: false,
            out_dir: PathBuf::from("out"),
            today,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub date: NaiveDate,
    pub title: String,
    pub sections: Vec<Section>,
    /// Every story in the issue.
    pub published_count: usize,
    /// Stories not shown before; only these were recorded in the cache.
    pub new_count: usize,
    pub outputs: DigestOutputs,
}

impl RunReport {
    /// The issue went out, but every story in it had been published before.
    pub fn is_all_stale(&self) -> bool {
        self.new_count == 0
    }
}

pub async fn run(options: &RunOptions) -> Result<RunReport> {
    let config_path = Config::locate(options.config_path.as_deref(), &options.base_dir);
    let config = Config::load(&config_path)?;

    let cache_path = resolve_path(&options.base_dir, &config.seen.path);
    let _lock = DayLock::acquire(
        &lock_dir_for(&cache_path),
        options.today,
        options.lock_timeout,
    )
    .await?;

    let mut seen = SeenCache::open(SeenOptions {
        path: cache_path,
        scope: options.seen_scope.unwrap_or(config.seen.scope),
        ttl_days: options.seen_ttl.or(config.seen.ttl_days),
        reset: options.reset_seen,
        today: options.today,
    });

    let mut config = config;
    config.curated_path = resolve_path(&options.base_dir, &config.curated_path);

    let stories = load_stories(options.source_mode, &config).await?;
    if stories.is_empty() {
        return Err(GenerationError::NoCandidates(options.source_mode).into());
    }

    let mut stories = dedupe_by_link(stories);
    sort_by_recency(&mut stories);

    let fresh_links: HashSet<String> = seen
        .filter_new(stories.iter().map(|s| &s.link), options.today)
        .into_iter()
        .collect();
    let (fresh, stale): (Vec<Story>, Vec<Story>) = stories
        .into_iter()
        .partition(|story| fresh_links.contains(&story.link));

    info!(
        "{} candidates: {} new, {} already published",
        fresh.len() + stale.len(),
        fresh.len(),
        stale.len()
    );

    let sections = SectionPlanner::new(&config.newsletter).plan(&fresh, &stale);
    let published: Vec<&str> = sections
        .iter()
        .flat_map(|section| section.stories.iter().map(|s| s.link.as_str()))
        .collect();

    if published.is_empty() {
        return Err(GenerationError::NothingToPublish.into());
    }

    let new_links: Vec<&str> = published
        .iter()
        .copied()
        .filter(|link| fresh_links.contains(*link))
        .collect();
    if new_links.len() < published.len() {
        warn!(
            "{} previously published stories were reused to fill sections",
            published.len() - new_links.len()
        );
    }

    let title = DigestGenerator::title_for(options.today);
    let out_dir = resolve_path(&options.base_dir, &options.out_dir);
    let outputs = DigestGenerator::save(options.today, &title, &sections, &out_dir)?;
    info!("Saved digest to {}", outputs.markdown.display());

    seen.remember(options.today, &new_links)
        .context("Failed to record published stories")?;

    Ok(RunReport {
        date: options.today,
        title,
        published_count: published.len(),
        new_count: new_links.len(),
        sections,
        outputs,
    })
}
