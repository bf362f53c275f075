//! Image store shared types
//!
//! Contains data structures passed to and returned by image store
//! implementations. The actual backend execution logic is in the store
//! implementations.

use crate::error::{KilnError, KilnResult};
use serde::Deserialize;

/// One entry of the backend's structured image listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageRecord {
    /// Image ID
    #[serde(default)]
    pub id: String,
    /// Fully-qualified names (e.g. "localhost/proj/cache/core/8.0:abc123def456").
    /// Dangling images have none.
    #[serde(default)]
    pub names: Option<Vec<String>>,
}

/// Parse the JSON array printed by `images --json`.
///
/// An empty or whitespace-only listing is treated as no images.
pub fn parse_image_listing(raw: &str) -> KilnResult<Vec<ImageRecord>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| KilnError::ImageListParse(e.to_string()))
}

/// Select every name that contains `prefix` anywhere.
///
/// The match is substring containment, not prefix-anchored, since the
/// backend may qualify names with a registry such as `localhost/`.
pub fn names_containing(records: &[ImageRecord], prefix: &str) -> Vec<String> {
    let mut matched = Vec::new();
    for record in records {
        for name in record.names.iter().flatten() {
            if name.contains(prefix) && !matched.contains(name) {
                matched.push(name.clone());
            }
        }
    }
    matched
}

/// A single piece of pending image configuration.
///
/// Applied in order; a later change to the same key overwrites an earlier
/// one, matching the backend's last-write-wins behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChange {
    /// Environment variable baked into the image
    Env(String, String),
    /// Image label
    Label(String, String),
    /// Entrypoint in exec form
    Entrypoint(Vec<String>),
    /// Default command in exec form
    Cmd(Vec<String>),
    /// Exposed port
    Port(u16),
    /// User (name or uid) the container runs as
    User(String),
    /// Declared volume path
    Volume(String),
}

impl ConfigChange {
    /// Backend flag and value for this change
    pub fn to_args(&self) -> [String; 2] {
        match self {
            Self::Env(k, v) => ["--env".to_string(), format!("{}={}", k, v)],
            Self::Label(k, v) => ["--label".to_string(), format!("{}={}", k, v)],
            Self::Entrypoint(argv) => ["--entrypoint".to_string(), exec_form(argv)],
            Self::Cmd(argv) => ["--cmd".to_string(), exec_form(argv)],
            Self::Port(port) => ["--port".to_string(), port.to_string()],
            Self::User(user) => ["--user".to_string(), user.clone()],
            Self::Volume(path) => ["--volume".to_string(), path.clone()],
        }
    }
}

/// Render an argv as a JSON array (exec form)
pub(crate) fn exec_form(argv: &[String]) -> String {
    serde_json::to_string(argv).unwrap_or_else(|_| "[]".to_string())
}

/// Options for snapshotting a working container into a tagged image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Squash all layers into one
    pub squash: bool,
    /// Default command recorded in the image
    pub cmd: Option<Vec<String>>,
    /// Dockerfile-style change instructions (e.g. "EXPOSE 6379")
    pub changes: Vec<String>,
}
