use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::seen::SeenScope;

pub const DEFAULT_CONFIG_FILE: &str = "sources.toml";
pub const CONFIG_PATH_VAR: &str = "CURATE_DIGEST_CONFIG";

/// How sections are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    /// One section per bucket, buckets in configured order.
    #[default]
    Segments,
    /// A single section ranked by the best score across all buckets.
    Top,
}

impl FromStr for PlanMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "segments" => Ok(PlanMode::Segments),
            "top" => Ok(PlanMode::Top),
            other => anyhow::bail!("newsletter.mode must be 'segments' or 'top', got '{}'", other),
        }
    }
}

impl fmt::Display for PlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanMode::Segments => write!(f, "segments"),
            PlanMode::Top => write!(f, "top"),
        }
    }
}

/// A topical category with its own keyword set.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Bucket {
    pub key: String,
    pub label: String,
    pub style: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Bucket {
    pub fn new(key: &str, label: &str, style: &str, keywords: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            style: style.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewsletterSettings {
    pub per_bucket: usize,
    pub mode: PlanMode,
    pub buckets: Vec<Bucket>,
}

impl Default for NewsletterSettings {
    fn default() -> Self {
        Self {
            per_bucket: 5,
            mode: PlanMode::Segments,
            buckets: default_buckets(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    #[default]
    Rss,
    Google,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiveFeed {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub kind: FeedKind,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeenSettings {
    pub path: PathBuf,
    pub scope: SeenScope,
    pub ttl_days: Option<i64>,
}

impl Default for SeenSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".cache/seen.json"),
            scope: SeenScope::Rolling,
            ttl_days: None,
        }
    }
}

/// Fully resolved and validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub newsletter: NewsletterSettings,
    pub curated_path: PathBuf,
    pub feeds: Vec<LiveFeed>,
    pub seen: SeenSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            newsletter: NewsletterSettings::default(),
            curated_path: PathBuf::from("data/news.json"),
            feeds: vec![LiveFeed {
                name: "Google AI".to_string(),
                url: "https://news.google.com/rss/search?q=Artificial+Intelligence&hl=en-US&gl=US&ceid=US:en"
                    .to_string(),
                kind: FeedKind::Google,
                query: Some("artificial intelligence".to_string()),
            }],
            seen: SeenSettings::default(),
        }
    }
}

// On-disk shape. Everything optional so a partial file overrides only what it names.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    newsletter: RawNewsletter,
    #[serde(default)]
    curated: RawCurated,
    #[serde(default)]
    live: Option<RawLive>,
    #[serde(default)]
    seen: RawSeen,
}

#[derive(Debug, Default, Deserialize)]
struct RawNewsletter {
    per_bucket: Option<i64>,
    mode: Option<String>,
    buckets: Option<Vec<Bucket>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCurated {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLive {
    #[serde(default)]
    feeds: Vec<LiveFeed>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSeen {
    path: Option<PathBuf>,
    scope: Option<String>,
    ttl_days: Option<i64>,
}

impl Config {
    /// Load a config file. A missing file means defaults; anything else that
    /// goes wrong is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content).context("Failed to parse TOML")?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> Result<Self> {
        let defaults = Self::default();

        let per_bucket = match raw.newsletter.per_bucket {
            Some(n) if n < 1 => anyhow::bail!("newsletter.per_bucket must be >= 1, got {}", n),
            Some(n) => n as usize,
            None => defaults.newsletter.per_bucket,
        };

        let mode = match raw.newsletter.mode {
            Some(mode) => mode.parse()?,
            None => defaults.newsletter.mode,
        };

        let buckets = match raw.newsletter.buckets {
            Some(buckets) => buckets
                .into_iter()
                .map(|b| Bucket {
                    keywords: b.keywords.iter().map(|k| k.to_lowercase()).collect(),
                    ..b
                })
                .collect(),
            None => defaults.newsletter.buckets,
        };

        let seen = SeenSettings {
            path: raw.seen.path.unwrap_or(defaults.seen.path),
            scope: match raw.seen.scope {
                Some(scope) => scope.parse()?,
                None => defaults.seen.scope,
            },
            ttl_days: raw.seen.ttl_days,
        };

        let config = Self {
            newsletter: NewsletterSettings {
                per_bucket,
                mode,
                buckets,
            },
            curated_path: raw.curated.path.unwrap_or(defaults.curated_path),
            feeds: raw.live.map(|live| live.feeds).unwrap_or(defaults.feeds),
            seen,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.newsletter.per_bucket < 1 {
            anyhow::bail!("newsletter.per_bucket must be >= 1");
        }

        let mut keys = HashSet::new();
        for bucket in &self.newsletter.buckets {
            if bucket.key.trim().is_empty() {
                anyhow::bail!("Every bucket must define a key");
            }
            if bucket.label.trim().is_empty() {
                anyhow::bail!("Bucket '{}' must define a label", bucket.key);
            }
            if bucket.style.trim().is_empty() {
                anyhow::bail!("Bucket '{}' must define a style", bucket.key);
            }
            if !keys.insert(bucket.key.as_str()) {
                anyhow::bail!("Bucket '{}' is defined more than once", bucket.key);
            }
        }

        for feed in &self.feeds {
            if feed.kind == FeedKind::Rss && feed.url.trim().is_empty() {
                anyhow::bail!("Feed '{}' must define a url", feed.name);
            }
        }

        Ok(())
    }

    /// Work out which config file to read. An explicit path wins, then the
    /// `CURATE_DIGEST_CONFIG` variable, then `sources.toml` under `base_dir`.
    pub fn locate(explicit: Option<&Path>, base_dir: &Path) -> PathBuf {
        Self::try_load_dotenv();

        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_PATH_VAR).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        }
    }

    fn try_load_dotenv() {
        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/curate-digest/.env
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("curate-digest").join(".env");
            if config_path.exists() {
                let _ = dotenvy::from_path(&config_path);
            }
        }
    }
}

pub fn default_buckets() -> Vec<Bucket> {
    vec![
        Bucket::new(
            "creators",
            "GenerativeAI creators",
            "creators",
            &[
                "prompt",
                "workflow",
                "lora",
                "style",
                "comfyui",
                "stable diffusion",
                "sdxl",
                "veo",
                "runway",
                "kling",
                "pika",
                "krea",
                "midjourney",
                "gen-3",
                "controlnet",
                "inpainting",
                "outpainting",
                "frame",
                "storyboard",
                "editor",
                "video generation",
                "image-to-video",
                "ip-adapter",
                "rag video",
                "image",
                "video",
                "audio",
                "media",
            ],
        ),
        Bucket::new(
            "marketing",
            "Marketing / fun",
            "marketing",
            &[
                "campaign",
                "marketing",
                "ads",
                "reklama",
                "brand",
                "viral",
                "trend",
                "influencer",
                "case study",
                "cmo",
                "konkurs",
                "social",
                "mem",
                "fun",
                "creative",
                "tiktok",
                "instagram",
                "youtube",
                "x ",
            ],
        ),
        Bucket::new(
            "bizdev",
            "Biznes & dev",
            "bizdev",
            &[
                "ustawa",
                "regulacja",
                "prawo",
                "funding",
                "seed",
                "series",
                "ipo",
                "m&a",
                "nvidia",
                "tsmc",
                "intel",
                "amd",
                "factory",
                "fabryka",
                "data center",
                "cloud",
                "sla",
                "api",
                "sdk",
                "benchmark",
                "latency",
                "throughput",
                "token",
                "enterprise",
                "security",
                "compliance",
                "eu ai act",
                "governance",
                "llm",
                "invest",
                "inwestycja",
                "rynek",
                "biznes",
                "deweloper",
                "developer",
                "stack",
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&temp_dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.newsletter.per_bucket, 5);
        assert_eq!(config.newsletter.mode, PlanMode::Segments);
        let keys: Vec<_> = config.newsletter.buckets.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["creators", "marketing", "bizdev"]);
    }

    #[test]
    fn test_partial_file_overrides_only_named_fields() {
        let config = Config::from_toml(
            r#"
            [newsletter]
            per_bucket = 2
            mode = "top"

            [seen]
            scope = "daily"
            ttl_days = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.newsletter.per_bucket, 2);
        assert_eq!(config.newsletter.mode, PlanMode::Top);
        assert_eq!(config.newsletter.buckets, default_buckets());
        assert_eq!(config.seen.scope, SeenScope::Daily);
        assert_eq!(config.seen.ttl_days, Some(7));
        assert_eq!(config.curated_path, PathBuf::from("data/news.json"));
    }

    #[test]
    fn test_rejects_non_positive_per_bucket() {
        assert!(Config::from_toml("[newsletter]\nper_bucket = 0\n").is_err());
        assert!(Config::from_toml("[newsletter]\nper_bucket = -3\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(Config::from_toml("[newsletter]\nmode = \"random\"\n").is_err());
    }

    #[test]
    fn test_buckets_keep_file_order_and_lowercase_keywords() {
        let config = Config::from_toml(
            r#"
            [[newsletter.buckets]]
            key = "zeta"
            label = "Zeta"
            style = "z"
            keywords = ["NVIDIA", "Cloud"]

            [[newsletter.buckets]]
            key = "alpha"
            label = "Alpha"
            style = "a"
            "#,
        )
        .unwrap();
        let keys: Vec<_> = config.newsletter.buckets.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(config.newsletter.buckets[0].keywords, vec!["nvidia", "cloud"]);
        assert!(config.newsletter.buckets[1].keywords.is_empty());
    }

    #[test]
    fn test_rejects_duplicate_bucket_keys() {
        let result = Config::from_toml(
            r#"
            [[newsletter.buckets]]
            key = "a"
            label = "A"
            style = "a"

            [[newsletter.buckets]]
            key = "a"
            label = "A again"
            style = "a"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_live_section_disables_feeds() {
        let config = Config::from_toml("[live]\nfeeds = []\n").unwrap();
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_locate_prefers_explicit_path() {
        let base = Path::new("/srv/digest");
        let path = Config::locate(Some(Path::new("custom.toml")), base);
        assert_eq!(path, PathBuf::from("/srv/digest/custom.toml"));
        let path = Config::locate(Some(Path::new("/etc/digest.toml")), base);
        assert_eq!(path, PathBuf::from("/etc/digest.toml"));
    }
}
