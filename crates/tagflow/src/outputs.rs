//! Step output channel.
//!
//! A step publishes key/value results by appending to the file named in
//! `GITHUB_OUTPUT`, either as `key=value` lines or as multi-line blocks:
//!
//! ```text
//! version=1.4.0
//! notes<<EOF
//! first line
//! second line
//! EOF
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the output file.
pub const OUTPUT_ENV: &str = "GITHUB_OUTPUT";

/// Output naming the released version.
pub const VERSION_KEY: &str = "version";
/// Output naming the built distribution, relative to the working directory
/// or absolute.
pub const ASSET_PATH_KEY: &str = "asset_path";

/// Errors raised while reading or validating step outputs.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("failed to read step outputs from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed output on line {line}: {content:?}")]
    Malformed { line: usize, content: String },

    #[error("unterminated block for '{key}': missing closing '{delimiter}'")]
    Unterminated { key: String, delimiter: String },

    #[error("build did not emit required output(s): {}", .missing.join(", "))]
    Missing { missing: Vec<String> },

    #[error("built asset {} does not exist", .0.display())]
    AssetNotFound(PathBuf),
}

/// Parsed contents of an output file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutputs(BTreeMap<String, String>);

impl StepOutputs {
    /// Parses `key=value` lines and `key<<DELIM` blocks. A later key
    /// overrides an earlier one.
    pub fn parse(content: &str) -> Result<Self, OutputError> {
        let mut values = BTreeMap::new();
        let mut lines = content.lines().enumerate();

        while let Some((index, line)) = lines.next() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() {
                continue;
            }

            // `<<` is checked first: a value line may legitimately contain '='
            // after it, but a key may not.
            let heredoc = line
                .split_once("<<")
                .filter(|(key, _)| !key.contains('='));
            if let Some((key, delimiter)) = heredoc {
                let key = checked_key(key, index, line)?;
                let delimiter = delimiter.trim();
                if delimiter.is_empty() {
                    return Err(malformed(index, line));
                }

                let mut body = Vec::new();
                let mut closed = false;
                for (_, inner) in lines.by_ref() {
                    let inner = inner.strip_suffix('\r').unwrap_or(inner);
                    if inner == delimiter {
                        closed = true;
                        break;
                    }
                    body.push(inner);
                }
                if !closed {
                    return Err(OutputError::Unterminated {
                        key,
                        delimiter: delimiter.to_string(),
                    });
                }
                values.insert(key, body.join("\n"));
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| malformed(index, line))?;
            let key = checked_key(key, index, line)?;
            values.insert(key, value.to_string());
        }

        Ok(Self(values))
    }

    /// Reads and parses the file at `path`. A missing file means no outputs.
    pub async fn read(path: &Path) -> Result<Self, OutputError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            // A step that emitted nothing may never have created the file.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(OutputError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&content)
    }

    /// Returns the value emitted for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the number of distinct keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing was emitted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn checked_key(key: &str, index: usize, line: &str) -> Result<String, OutputError> {
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(malformed(index, line));
    }
    Ok(key.to_string())
}

fn malformed(index: usize, line: &str) -> OutputError {
    OutputError::Malformed {
        line: index + 1,
        content: line.to_string(),
    }
}

/// The two values the build step must publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutputs {
    pub version: String,
    pub asset_path: PathBuf,
}

impl BuildOutputs {
    /// Extracts `version` and `asset_path`. Emitting only one of them is as
    /// much a failure as emitting neither.
    pub fn from_outputs(outputs: &StepOutputs) -> Result<Self, OutputError> {
        let version = non_empty(outputs.get(VERSION_KEY));
        let asset_path = non_empty(outputs.get(ASSET_PATH_KEY));

        match (version, asset_path) {
            (Some(version), Some(asset_path)) => Ok(Self {
                version: version.to_string(),
                asset_path: PathBuf::from(asset_path),
            }),
            (version, asset_path) => {
                let mut missing = Vec::new();
                if version.is_none() {
                    missing.push(VERSION_KEY.to_string());
                }
                if asset_path.is_none() {
                    missing.push(ASSET_PATH_KEY.to_string());
                }
                Err(OutputError::Missing { missing })
            }
        }
    }

    /// Resolves `asset_path` against `workdir` and checks that it exists.
    pub fn resolve_asset(mut self, workdir: &Path) -> Result<Self, OutputError> {
        if self.asset_path.is_relative() {
            self.asset_path = workdir.join(&self.asset_path);
        }
        if !self.asset_path.is_file() {
            return Err(OutputError::AssetNotFound(self.asset_path));
        }
        Ok(self)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
