// Public modules
pub mod config;
pub mod digest;
pub mod error;
pub mod io;
pub mod models;
pub mod pipeline;
pub mod scoring;
pub mod seen;
pub mod selection;
pub mod sources;

// Re-export commonly used types
pub use config::{Bucket, Config, NewsletterSettings, PlanMode};
pub use digest::{DigestGenerator, DigestOutputs};
pub use error::{GenerationError, SourceError};
pub use io::{list_issues, IssueSummary};
pub use models::{Section, Story};
pub use pipeline::{run, RunOptions, RunReport};
pub use scoring::{MaxScorer, Scorer};
pub use seen::{DayLock, LockTimeout, SeenCache, SeenOptions, SeenScope};
pub use selection::{pick_top, SectionPlanner};
pub use sources::SourceMode;
