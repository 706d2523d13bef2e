use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::Parser;
use shared::{list_issues, GenerationError, RunOptions, SeenScope, SourceMode};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::Level;

#[derive(Parser)]
#[command(name = "curate-digest")]
#[command(about = "Pick the stories for today's AI digest and write it out")]
struct Args {
    /// Where candidate stories come from (curated, live)
    #[arg(short, long, default_value = "curated")]
    mode: SourceMode,

    /// Config file (default: $CURATE_DIGEST_CONFIG or sources.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory relative paths are resolved against
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Directory the digest files are written to
    #[arg(short, long, default_value = "out")]
    out_dir: PathBuf,

    /// Seen-cache scope (rolling, daily); overrides the config file
    #[arg(long)]
    seen_scope: Option<SeenScope>,

    /// Forget seen links older than this many days; overrides the config file
    #[arg(long)]
    seen_ttl: Option<i64>,

    /// Delete the seen cache before running
    #[arg(long)]
    reset_seen: bool,

    /// Seconds to wait for another run of the same day to finish
    #[arg(long, default_value = "60")]
    lock_timeout: u64,

    /// Generate the issue for this day instead of today (YYYY-MM-DD)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// List previously written issues and exit
    #[arg(long)]
    list: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_target(false)
        .init();

    match execute(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(generation) = e.downcast_ref::<GenerationError>() {
                eprintln!("\n⚠ {}", generation);
                ExitCode::from(2)
            } else {
                eprintln!("\n✗ Error: {:#}", e);
                ExitCode::from(1)
            }
        }
    }
}

async fn execute(args: Args) -> Result<()> {
    if args.list {
        return print_issues(&shared::io::resolve_path(&args.base_dir, &args.out_dir));
    }

    let today = args.date.unwrap_or_else(|| Local::now().date_naive());
    let options = RunOptions {
        base_dir: args.base_dir,
        config_path: args.config,
        source_mode: args.mode,
        seen_scope: args.seen_scope,
        seen_ttl: args.seen_ttl,
        reset_seen: args.reset_seen,
        out_dir: args.out_dir,
        today,
        lock_timeout: Duration::from_secs(args.lock_timeout),
    };

    println!("📰 Building digest for {} ({} mode)...", today, options.source_mode);
    if options.reset_seen {
        println!("🧹 Seen cache will be reset");
    }

    let report = shared::run(&options).await?;

    for section in &report.sections {
        println!("\n## {} ({})", section.title, section.stories.len());
        for story in &section.stories {
            println!("  • {} [{}]", story.title, story.source);
        }
    }

    println!(
        "\n✓ Published {} stories ({} new)",
        report.published_count, report.new_count
    );
    if report.is_all_stale() {
        println!("⚠ Every story in this issue was published before");
    }

    println!("\n✅ Digest saved to: {}", report.outputs.markdown.display());
    println!("   JSON: {}", report.outputs.json.display());
    println!("   Links: {}", report.outputs.links_csv.display());

    Ok(())
}

fn print_issues(out_dir: &std::path::Path) -> Result<()> {
    let issues = list_issues(out_dir)?;

    if issues.is_empty() {
        println!("No issues found in {}", out_dir.display());
        return Ok(());
    }

    println!("📚 {} issues in {}:", issues.len(), out_dir.display());
    for (path, issue) in issues {
        println!(
            "  {}  {:>3} stories  {}",
            issue.date,
            issue.published_count,
            path.display()
        );
    }
    Ok(())
}
