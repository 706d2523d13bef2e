use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Headline data of a previously written issue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IssueSummary {
    pub date: String,
    pub title: String,
    pub published_count: usize,
}

/// Join a relative path onto `base`; absolute paths are kept as they are.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Load the summary of one issue JSON file
pub fn load_issue(filepath: &Path) -> Result<IssueSummary> {
    if !filepath.exists() {
        anyhow::bail!("Issue file not found: {}", filepath.display());
    }

    let content = fs::read_to_string(filepath)
        .with_context(|| format!("Failed to read issue file: {}", filepath.display()))?;

    let issue: IssueSummary = serde_json::from_str(&content).with_context(|| {
        format!(
            "Failed to parse issue JSON from {}. The file may be corrupted.",
            filepath.display()
        )
    })?;

    if NaiveDate::parse_from_str(&issue.date, "%Y-%m-%d").is_err() {
        anyhow::bail!(
            "Issue file {} has an invalid date: {}",
            filepath.display(),
            issue.date
        );
    }

    Ok(issue)
}

/// All issues in `out_dir`, newest first. Unreadable files are skipped with
/// a warning.
pub fn list_issues(out_dir: &Path) -> Result<Vec<(PathBuf, IssueSummary)>> {
    let mut files = Vec::new();

    if out_dir.exists() {
        for entry in fs::read_dir(out_dir).context("Failed to read output directory")? {
            let path = entry?.path();

            let is_issue = path.extension().and_then(|s| s.to_str()) == Some("json")
                && path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(|stem| NaiveDate::parse_from_str(stem, "%Y-%m-%d").is_ok())
                    .unwrap_or(false);
            if !is_issue {
                continue;
            }

            match load_issue(&path) {
                Ok(issue) => files.push((path, issue)),
                Err(e) => tracing::warn!("Could not load {}: {:#}", path.display(), e),
            }
        }
    }

    // ISO dates sort lexically
    files.sort_by(|a, b| b.1.date.cmp(&a.1.date));

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_issue(dir: &Path, date: &str, count: usize) {
        let json = format!(
            r#"{{"date":"{date}","title":"Issue {date}","sections":[],"published_count":{count}}}"#
        );
        fs::write(dir.join(format!("{}.json", date)), json).unwrap();
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/base");
        assert_eq!(resolve_path(base, Path::new("out")), PathBuf::from("/base/out"));
        assert_eq!(resolve_path(base, Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn test_list_issues_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        write_issue(temp_dir.path(), "2026-01-02", 3);
        write_issue(temp_dir.path(), "2026-01-10", 5);
        fs::write(temp_dir.path().join("2026-01-05.json"), "{oops").unwrap();
        fs::write(temp_dir.path().join("notes.json"), "{}").unwrap();

        let issues = list_issues(temp_dir.path()).unwrap();
        let dates: Vec<_> = issues.iter().map(|(_, i)| i.date.as_str()).collect();
        assert_eq!(dates, vec!["2026-01-10", "2026-01-02"]);
        assert_eq!(issues[0].1.published_count, 5);
    }

    #[test]
    fn test_list_issues_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_issues(&temp_dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_load_issue_rejects_bad_date() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("x.json");
        fs::write(&path, r#"{"date":"yesterday","title":"t","published_count":1}"#).unwrap();
        assert!(load_issue(&path).is_err());
    }
}
