use crate::config::Bucket;
use crate::models::Story;

const KEYWORD_WEIGHT: f64 = 2.0;
const SUMMARY_BONUS: f64 = 1.0;
const TITLE_PENALTY_CAP: usize = 140;
const TITLE_PENALTY_DIVISOR: f64 = 200.0;

/// Keyword relevance heuristic for one bucket.
///
/// Each keyword found (case-insensitive substring of title + summary) adds
/// 2.0, a non-empty summary adds 1.0, and the title length costs up to 0.7.
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    keywords: Vec<String>,
}

impl Scorer {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn for_bucket(bucket: &Bucket) -> Self {
        Self::new(&bucket.keywords)
    }

    pub fn score(&self, story: &Story) -> f64 {
        let text = format!("{} {}", story.title, story.summary).to_lowercase();

        let mut score = self
            .keywords
            .iter()
            .filter(|kw| text.contains(kw.as_str()))
            .count() as f64
            * KEYWORD_WEIGHT;

        if !story.summary.is_empty() {
            score += SUMMARY_BONUS;
        }

        score - story.title_len().min(TITLE_PENALTY_CAP) as f64 / TITLE_PENALTY_DIVISOR
    }
}

/// Best score across several buckets, used by the single "top" ranking.
#[derive(Debug, Clone, Default)]
pub struct MaxScorer {
    scorers: Vec<Scorer>,
}

impl MaxScorer {
    pub fn new(buckets: &[Bucket]) -> Self {
        Self {
            scorers: buckets.iter().map(Scorer::for_bucket).collect(),
        }
    }

    /// 0.0 when there are no buckets at all.
    pub fn score(&self, story: &Story) -> f64 {
        self.scorers
            .iter()
            .map(|s| s.score(story))
            .reduce(f64::max)
            .unwrap_or(0.0)
    }
}

pub fn score(bucket: &Bucket, story: &Story) -> f64 {
    Scorer::for_bucket(bucket).score(story)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(title: &str, summary: &str) -> Story {
        Story::new(title, summary, "https://example.com/a", "example.com", None)
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_keyword_hits_add_fixed_weight() {
        let scorer = Scorer::new(["runway", "midjourney", "sdk"]);
        // 2 hits, summary bonus, 10-char title penalty
        let s = story("Runway new", "Midjourney update");
        assert_close(scorer.score(&s), 2.0 * 2.0 + 1.0 - 10.0 / 200.0);
    }

    #[test]
    fn test_keyword_counts_once_however_often_it_appears() {
        let scorer = Scorer::new(["ai"]);
        let s = story("AI AI AI", "");
        assert_close(scorer.score(&s), 2.0 - 8.0 / 200.0);
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let scorer = Scorer::new(["NVIDIA"]);
        assert_close(scorer.score(&story("nvidia", "")), 2.0 - 6.0 / 200.0);
    }

    #[test]
    fn test_title_penalty_is_capped() {
        let scorer = Scorer::default();
        let long = "x".repeat(500);
        assert_close(scorer.score(&story(&long, "")), -0.7);
    }

    #[test]
    fn test_title_length_counts_characters() {
        let scorer = Scorer::default();
        assert_close(scorer.score(&story("żółć", "")), -4.0 / 200.0);
    }

    #[test]
    fn test_summary_only_match_still_counts() {
        let scorer = Scorer::new(["tiktok"]);
        let s = story("Brand news", "Going viral on TikTok");
        assert_close(scorer.score(&s), 2.0 + 1.0 - 10.0 / 200.0);
    }

    #[test]
    fn test_max_scorer_picks_best_bucket() {
        let buckets = vec![
            Bucket::new("a", "A", "a", &["alpha"]),
            Bucket::new("b", "B", "b", &["beta", "gamma"]),
        ];
        let max = MaxScorer::new(&buckets);
        let s = story("beta gamma", "");
        assert_close(max.score(&s), score(&buckets[1], &s));
        assert_close(MaxScorer::new(&[]).score(&s), 0.0);
    }
}
