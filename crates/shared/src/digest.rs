use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::Section;

/// JSON document handed to downstream renderers.
#[derive(Debug, Serialize)]
pub struct DigestPayload<'a> {
    pub date: String,
    pub title: &'a str,
    pub sections: &'a [Section],
    pub published_count: usize,
}

/// Files written for one issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestOutputs {
    pub markdown: PathBuf,
    pub json: PathBuf,
    pub links_csv: PathBuf,
}

pub struct DigestGenerator;

impl DigestGenerator {
    pub fn title_for(day: NaiveDate) -> String {
        format!("Daily AI Digest — {}", day.format("%Y-%m-%d"))
    }

    fn format_date(date: &DateTime<Utc>) -> String {
        date.format("%-d-%b-%Y").to_string()
    }

    /// Numbered Markdown list; numbering runs on across sections.
    pub fn generate_markdown(title: &str, sections: &[Section]) -> String {
        let mut md = String::new();
        md.push_str(&format!("# {}\n\n", title));

        let mut counter = 1;
        for section in sections {
            md.push_str(&format!("## {}\n\n", section.title));

            for story in &section.stories {
                md.push_str(&format!(
                    "{}. [{}]({})  \n",
                    counter,
                    Self::escape_markdown(&story.title),
                    story.link
                ));

                let mut meta = format!("*{}*", Self::escape_markdown(&story.source));
                if let Some(published) = &story.published {
                    meta.push_str(&format!(" • {}", Self::format_date(published)));
                }
                if !story.summary.is_empty() {
                    meta.push_str(&format!(" — {}", story.summary.replace('\n', " ")));
                }
                md.push_str(&format!("   {}\n\n", meta));
                counter += 1;
            }
        }

        format!("{}\n", md.trim_end())
    }

    fn escape_markdown(text: &str) -> String {
        text.replace('\\', "\\\\")
            .replace('[', "\\[")
            .replace(']', "\\]")
            .replace('*', "\\*")
    }

    pub fn generate_json(
        day: NaiveDate,
        title: &str,
        sections: &[Section],
    ) -> Result<String> {
        let payload = DigestPayload {
            date: day.format("%Y-%m-%d").to_string(),
            title,
            sections,
            published_count: sections.iter().map(|s| s.stories.len()).sum(),
        };
        serde_json::to_string_pretty(&payload).context("Failed to serialize digest")
    }

    /// One row per story: section title on the first row of each section,
    /// a blank row between sections.
    pub fn generate_links_csv(sections: &[Section]) -> String {
        let mut csv = String::new();

        for section in sections {
            let mut first_story = true;

            for story in &section.stories {
                let label = if first_story {
                    Self::escape_csv(&section.title)
                } else {
                    String::new()
                };
                csv.push_str(&format!(
                    "{},{},{}\n",
                    label,
                    Self::escape_csv(&story.title),
                    Self::escape_csv(&story.link)
                ));
                first_story = false;
            }

            csv.push_str(",,\n");
        }

        csv
    }

    fn escape_csv(text: &str) -> String {
        if text.contains(',') || text.contains('"') || text.contains('\n') {
            format!("\"{}\"", text.replace('"', "\"\""))
        } else {
            text.to_string()
        }
    }

    /// Write `<day>_ALL.md`, `<day>.json` and `<day>-LINKS.csv` into `out_dir`.
    pub fn save(
        day: NaiveDate,
        title: &str,
        sections: &[Section],
        out_dir: &Path,
    ) -> Result<DigestOutputs> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

        let stem = day.format("%Y-%m-%d").to_string();
        let outputs = DigestOutputs {
            markdown: out_dir.join(format!("{}_ALL.md", stem)),
            json: out_dir.join(format!("{}.json", stem)),
            links_csv: out_dir.join(format!("{}-LINKS.csv", stem)),
        };

        fs::write(&outputs.markdown, Self::generate_markdown(title, sections))
            .context("Failed to write Markdown digest")?;
        fs::write(&outputs.json, Self::generate_json(day, title, sections)?)
            .context("Failed to write JSON digest")?;
        fs::write(&outputs.links_csv, Self::generate_links_csv(sections))
            .context("Failed to write links CSV file")?;

        Ok(outputs)
    }
}
