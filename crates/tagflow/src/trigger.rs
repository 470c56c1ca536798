//! Decides whether a pushed ref starts a release run.

const TAG_REF_PREFIX: &str = "refs/tags/";

/// Matches pushed tags against a glob such as `v*`.
#[derive(Debug, Clone)]
pub struct TagTrigger {
    pattern: String,
}

impl Default for TagTrigger {
    fn default() -> Self {
        Self::new("v*")
    }
}

impl TagTrigger {
    /// Creates a trigger for tags matching the glob `pattern`.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Returns the glob tags are matched against.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the tag to release if `git_ref` is a tag push matching the
    /// pattern.
    ///
    /// Accepts a full ref (`refs/tags/v1.2.3`) or a bare tag name. Any other
    /// fully qualified ref, such as a branch, never matches.
    pub fn resolve_tag<'a>(&self, git_ref: &'a str) -> Option<&'a str> {
        let git_ref = git_ref.trim();
        let tag = match git_ref.strip_prefix(TAG_REF_PREFIX) {
            Some(tag) => tag,
            None if git_ref.starts_with("refs/") => return None,
            None => git_ref,
        };

        if tag.is_empty() || !glob_match::glob_match(&self.pattern, tag) {
            return None;
        }
        Some(tag)
    }
}
