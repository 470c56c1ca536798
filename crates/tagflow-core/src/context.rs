//! Run context with heterogeneous type storage.
//!
//! Values produced by one step (the pushed tag, the interpreter path, the
//! build's version and asset path) are handed to later steps through here.

use crate::error::WorkflowError;
use crate::step::StepName;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Type-safe context key wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey(String);

impl ContextKey {
    /// Creates a new ContextKey.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContextKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContextKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ContextKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ContextKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Execution context shared by the steps of one run.
///
/// Stores any `Send + Sync` type, retrieved by downcasting.
///
/// # Examples
///
/// ```
/// use tagflow_core::Context;
/// use std::path::PathBuf;
///
/// let mut ctx = Context::new();
/// ctx.insert("version", "1.4.0".to_string());
/// ctx.insert("asset_path", PathBuf::from("dist/b2-1.4.0.tar.gz"));
///
/// assert_eq!(ctx.get::<String>("version").map(String::as_str), Some("1.4.0"));
/// // Wrong type returns None
/// assert_eq!(ctx.get::<String>("asset_path"), None);
/// ```
pub struct Context {
    data: HashMap<ContextKey, Box<dyn Any + Send + Sync>>,
    started_at: Instant,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a new empty context.
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Inserts a value with the given key.
    ///
    /// If the key already exists, the previous value is replaced.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<ContextKey>, value: T) {
        self.data.insert(key.into(), Box::new(value));
    }

    /// Returns a reference to the value for the given key.
    ///
    /// Returns `None` if the key doesn't exist or the type doesn't match.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Like [`get`](Self::get), but a missing value is an error attributed
    /// to `step_name`.
    pub fn require<T: Any>(&self, step_name: &StepName, key: &str) -> Result<&T, WorkflowError> {
        self.get::<T>(key)
            .ok_or_else(|| WorkflowError::MissingInput {
                step_name: step_name.clone(),
                key: ContextKey::new(key),
            })
    }

    /// Returns a mutable reference to the value for the given key.
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.data.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Removes a value by key and returns it.
    ///
    /// Returns `None` if the key doesn't exist or the type doesn't match.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        self.data
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|b| *b)
    }

    /// Returns `true` if the context contains a value for the given key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns an iterator over all keys in the context.
    pub fn keys(&self) -> impl Iterator<Item = &ContextKey> {
        self.data.keys()
    }

    /// Returns the number of entries in the context.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the context contains no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the time elapsed since the context was created.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
