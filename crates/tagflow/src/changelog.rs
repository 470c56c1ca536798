//! Release notes extraction from a Keep a Changelog style file.
//!
//! Sections are H2 headings. All of these name version `1.4.0`:
//!
//! ```text
//! ## [1.4.0] - 2024-03-01
//! ## 1.4.0
//! ## [v1.4.0]
//! ```

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChangelogError {
    #[error("failed to read changelog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("changelog has no section for version {version}")]
    SectionNotFound { version: String },

    #[error("changelog section for version {version} is empty")]
    EmptySection { version: String },
}

/// Returns the body of the section for `version`, trimmed.
///
/// A missing section and a blank one are both errors, so a release can never
/// be published with empty notes.
pub fn extract_section(content: &str, version: &str) -> Result<String, ChangelogError> {
    let wanted = normalize_version(version);
    let lines: Vec<&str> = content.lines().collect();

    let start = lines
        .iter()
        .position(|line| heading_label(line).is_some_and(|label| label_version(label) == wanted))
        .ok_or_else(|| ChangelogError::SectionNotFound {
            version: version.to_string(),
        })?;
    let end = find_section_end(&lines, start);

    let body = lines[start + 1..end].join("\n");
    let body = body.trim();
    if body.is_empty() {
        return Err(ChangelogError::EmptySection {
            version: version.to_string(),
        });
    }
    Ok(body.to_string())
}

/// Reads `path` and extracts the notes for `version`.
pub async fn read_release_notes(path: &Path, version: &str) -> Result<String, ChangelogError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ChangelogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    extract_section(&content, version)
}

/// Returns the label of an H2 heading, or `None` for any other line.
fn heading_label(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix("##")?;
    // `###` and deeper are subsections
    if rest.starts_with('#') {
        return None;
    }
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

/// Reduces a heading label such as `[v1.4.0] - 2024-03-01` to `1.4.0`.
fn label_version(label: &str) -> &str {
    let label = match label.split_once(" - ") {
        Some((head, _date)) => head,
        None => label,
    };
    normalize_version(label.trim().trim_matches(['[', ']']).trim())
}

fn normalize_version(version: &str) -> &str {
    let version = version.trim();
    version.strip_prefix('v').unwrap_or(version)
}

fn find_section_end(lines: &[&str], start: usize) -> usize {
    lines[start + 1..]
        .iter()
        .position(|line| heading_label(line).is_some())
        .map_or(lines.len(), |offset| start + 1 + offset)
}
