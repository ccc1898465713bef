//! Account linking directory
//!
//! Maps game accounts to the community accounts their owners linked.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Resolves a game account to its linked community account
pub trait AccountLinks: Send + Sync {
    fn resolve_platform_id(&self, game_uuid: Uuid) -> Option<String>;
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Failed to access link file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode links: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// On-disk form of a single link
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkEntry {
    game_uuid: Uuid,
    community_id: String,
}

/// Link directory persisted as a YAML list
#[derive(Debug, Clone, Default)]
pub struct AccountLinkDirectory {
    links: Arc<DashMap<Uuid, String>>,
    path: Option<PathBuf>,
}

impl AccountLinkDirectory {
    /// Create an empty directory that is never written to disk
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load links from `path`
    ///
    /// A missing file yields an empty directory. A file that cannot be parsed
    /// is logged and also yields an empty directory.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let links = DashMap::new();

        if let Ok(file_content) = tokio::fs::read_to_string(&path).await {
            match serde_yaml::from_str::<Vec<LinkEntry>>(&file_content) {
                Ok(entries) => {
                    for entry in entries {
                        links.insert(entry.game_uuid, entry.community_id);
                    }
                    info!("Loaded {} account link(s) from {}", links.len(), path.display());
                }
                Err(e) => warn!("Ignoring unreadable link file {}: {e}", path.display()),
            }
        }

        Self {
            links: Arc::new(links),
            path: Some(path),
        }
    }

    /// Write all links back to the file they were loaded from
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created, the links cannot
    /// be serialized, or the file cannot be written.
    pub async fn save(&self) -> Result<(), LinkError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut entries: Vec<LinkEntry> = self
            .links
            .iter()
            .map(|entry| LinkEntry {
                game_uuid: *entry.key(),
                community_id: entry.value().clone(),
            })
            .collect();
        entries.sort_by_key(|entry| entry.game_uuid);

        let yaml = serde_yaml::to_string(&entries)?;
        tokio::fs::write(path, yaml).await?;
        Ok(())
    }

    /// Link a game account, returning the community account it was linked to before
    pub fn link(&self, game_uuid: Uuid, community_id: impl Into<String>) -> Option<String> {
        self.links.insert(game_uuid, community_id.into())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl AccountLinks for AccountLinkDirectory {
    fn resolve_platform_id(&self, game_uuid: Uuid) -> Option<String> {
        self.links.get(&game_uuid).map(|entry| entry.value().clone())
    }
}
