//! Turning a ranked candidate pool into the sections of one issue.
//!
//! Picking is a two-phase policy. The first pass walks candidates best-first
//! and allows a single story per domain; the backfill pass only runs when the
//! first pass came up short and fills the remaining slots with the shortest
//! unclaimed titles, domain limits lifted.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::config::{Bucket, NewsletterSettings, PlanMode};
use crate::models::{Section, Story};
use crate::scoring::{MaxScorer, Scorer};

pub const TOP_SECTION_TITLE: &str = "Top stories";
pub const TOP_SECTION_STYLE: &str = "top";

/// Choose up to `target` stories from `candidates`.
///
/// Links already in `claimed` are never returned, and every returned link is
/// added to `claimed` so later picks sharing the set cannot repeat it.
pub fn pick_top<F>(
    candidates: &[Story],
    target: usize,
    claimed: &mut HashSet<String>,
    scorer: F,
) -> Vec<Story>
where
    F: Fn(&Story) -> f64,
{
    pick_top_avoiding(candidates, target, claimed, HashSet::new(), scorer)
}

/// Like [`pick_top`], but the first pass also treats `used_domains` as taken.
fn pick_top_avoiding<F>(
    candidates: &[Story],
    target: usize,
    claimed: &mut HashSet<String>,
    mut used_domains: HashSet<String>,
    scorer: F,
) -> Vec<Story>
where
    F: Fn(&Story) -> f64,
{
    if target == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let ranked = rank_by(candidates, |story| scorer(story));

    let mut chosen = first_pass(&ranked, target, claimed, &mut used_domains);
    if chosen.len() < target {
        let missing = target - chosen.len();
        chosen.extend(backfill(&ranked, missing, claimed));
    }
    chosen
}

/// One story per domain, best score first. Domains in `used_domains` count
/// as taken; chosen domains are added to it.
pub fn first_pass(
    ranked: &[&Story],
    target: usize,
    claimed: &mut HashSet<String>,
    used_domains: &mut HashSet<String>,
) -> Vec<Story> {
    let mut chosen = Vec::new();

    for story in ranked {
        if chosen.len() >= target {
            break;
        }
        if claimed.contains(&story.link) {
            continue;
        }
        if !used_domains.insert(story.domain()) {
            continue;
        }
        claimed.insert(story.link.clone());
        chosen.push((*story).clone());
    }

    chosen
}

/// Shortest titles first, ignoring domains.
pub fn backfill(ranked: &[&Story], missing: usize, claimed: &mut HashSet<String>) -> Vec<Story> {
    let mut leftovers: Vec<&Story> = ranked
        .iter()
        .copied()
        .filter(|story| !claimed.contains(&story.link))
        .collect();
    leftovers.sort_by_key(|story| story.title_len());

    let mut chosen = Vec::new();
    for story in leftovers {
        if chosen.len() >= missing {
            break;
        }
        // Duplicate links inside the pool are skipped here.
        if !claimed.insert(story.link.clone()) {
            continue;
        }
        chosen.push(story.clone());
    }
    chosen
}

/// Stable sort by score, highest first. Ties keep their input order.
fn rank_by<F>(stories: &[Story], score: F) -> Vec<&Story>
where
    F: Fn(&Story) -> f64,
{
    let mut scored: Vec<(f64, &Story)> = stories.iter().map(|s| (score(s), s)).collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, story)| story).collect()
}

/// Order by `(score, published)` descending, stories without a date last.
fn rank_with_recency<F>(stories: &[Story], score: F) -> Vec<Story>
where
    F: Fn(&Story) -> f64,
{
    let mut scored: Vec<(f64, &Story)> = stories.iter().map(|s| (score(s), s)).collect();
    scored.sort_by(|a, b| match b.0.total_cmp(&a.0) {
        Ordering::Equal => b.1.published.cmp(&a.1.published),
        other => other,
    });
    scored.into_iter().map(|(_, story)| story.clone()).collect()
}

/// Builds the sections of one issue from configured buckets.
pub struct SectionPlanner<'a> {
    settings: &'a NewsletterSettings,
}

impl<'a> SectionPlanner<'a> {
    pub fn new(settings: &'a NewsletterSettings) -> Self {
        Self { settings }
    }

    /// Plan from a single pool of candidates.
    pub fn plan_fresh(&self, stories: &[Story]) -> Vec<Section> {
        self.plan(stories, &[])
    }

    /// Plan from `fresh` stories, dipping into `stale` (already published)
    /// ones only for slots the fresh pool cannot fill.
    pub fn plan(&self, fresh: &[Story], stale: &[Story]) -> Vec<Section> {
        match self.settings.mode {
            PlanMode::Segments => self.plan_segments(fresh, stale),
            PlanMode::Top => vec![self.plan_top(fresh, stale)],
        }
    }

    // Buckets run in order and share one claimed set, so earlier buckets get
    // first pick.
    fn plan_segments(&self, fresh: &[Story], stale: &[Story]) -> Vec<Section> {
        let mut claimed = HashSet::new();
        self.settings
            .buckets
            .iter()
            .map(|bucket| {
                let scorer = Scorer::for_bucket(bucket);
                let stories = pick_with_reserve(
                    fresh,
                    stale,
                    self.settings.per_bucket,
                    &mut claimed,
                    |s| scorer.score(s),
                );
                section_for(bucket, stories)
            })
            .collect()
    }

    fn plan_top(&self, fresh: &[Story], stale: &[Story]) -> Section {
        let scorer = MaxScorer::new(&self.settings.buckets);
        let mut claimed = HashSet::new();
        let stories = pick_with_reserve(
            fresh,
            stale,
            self.settings.per_bucket,
            &mut claimed,
            |s| scorer.score(s),
        );
        Section::new(TOP_SECTION_TITLE, TOP_SECTION_STYLE, stories)
    }
}

fn pick_with_reserve<F>(
    fresh: &[Story],
    stale: &[Story],
    target: usize,
    claimed: &mut HashSet<String>,
    scorer: F,
) -> Vec<Story>
where
    F: Fn(&Story) -> f64,
{
    let ranked = rank_with_recency(fresh, &scorer);
    let mut chosen = pick_top(&ranked, target, claimed, &scorer);

    // Domains already in the section stay taken for the reserve's first pass.
    if chosen.len() < target && !stale.is_empty() {
        let used_domains = chosen.iter().map(Story::domain).collect();
        let ranked = rank_with_recency(stale, &scorer);
        chosen.extend(pick_top_avoiding(
            &ranked,
            target - chosen.len(),
            claimed,
            used_domains,
            &scorer,
        ));
    }
    chosen
}

fn section_for(bucket: &Bucket, stories: Vec<Story>) -> Section {
    Section::new(bucket.label.clone(), bucket.style.clone(), stories)
}
