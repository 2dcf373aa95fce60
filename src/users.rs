//! Allow-list of users permitted to hold a session
//!
//! The list is a JSON array of email addresses read from a file. It is
//! re-read lazily once its TTL has passed, so edits take effect without a
//! restart.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{Error, Result};

struct Members {
    emails: HashSet<String>,
    loaded_at: Instant,
}

/// Refreshable set of permitted emails
pub struct AllowList {
    path: PathBuf,
    ttl: Duration,
    members: RwLock<Members>,
}

impl AllowList {
    /// Read the allow-list at `path`, refreshing it every `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllowList`] if the file cannot be read or is not a
    /// JSON array of strings.
    pub fn load(path: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let path = path.into();
        let bytes = std::fs::read(&path)
            .map_err(|e| Error::AllowList(format!("{}: {e}", path.display())))?;
        let emails = parse(&path, &bytes)?;

        info!(path = %path.display(), users = emails.len(), "Loaded allow-list");

        let list = Self {
            path,
            ttl,
            members: RwLock::new(Members {
                emails,
                loaded_at: Instant::now(),
            }),
        };
        if list.is_empty() {
            warn!(path = %list.path.display(), "Allow-list is empty, every login will be forbidden");
        }
        Ok(list)
    }

    /// Returns `true` if `email` is on the list, re-reading the file first
    /// when the loaded copy is older than the TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllowList`] if a due refresh fails.
    pub async fn contains(&self, email: &str) -> Result<bool> {
        if self.is_stale() {
            self.reload().await?;
        }
        Ok(self.members.read().emails.contains(email))
    }

    /// Number of loaded entries.
    pub fn len(&self) -> usize {
        self.members.read().emails.len()
    }

    /// Returns `true` if nobody is allowed.
    pub fn is_empty(&self) -> bool {
        self.members.read().emails.is_empty()
    }

    fn is_stale(&self) -> bool {
        self.members.read().loaded_at.elapsed() >= self.ttl
    }

    async fn reload(&self) -> Result<()> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::AllowList(format!("{}: {e}", self.path.display())))?;
        let emails = parse(&self.path, &bytes)?;

        debug!(path = %self.path.display(), users = emails.len(), "Refreshed allow-list");

        *self.members.write() = Members {
            emails,
            loaded_at: Instant::now(),
        };
        Ok(())
    }
}

impl std::fmt::Debug for AllowList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllowList")
            .field("path", &self.path)
            .field("ttl", &self.ttl)
            .field("users", &self.len())
            .finish()
    }
}

fn parse(path: &Path, bytes: &[u8]) -> Result<HashSet<String>> {
    let emails: Vec<String> = serde_json::from_slice(bytes)
        .map_err(|e| Error::AllowList(format!("{}: {e}", path.display())))?;
    Ok(emails.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_list(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn contains_listed_email() {
        let file = write_list(r#"["a@x.com", "b@x.com"]"#);
        let list = AllowList::load(file.path(), Duration::from_secs(300)).unwrap();

        assert!(list.contains("a@x.com").await.unwrap());
        assert!(!list.contains("c@x.com").await.unwrap());
        assert_eq!(list.len(), 2);
    }

    #[tokio::test]
    async fn empty_list_forbids_everyone() {
        let file = write_list("[]");
        let list = AllowList::load(file.path(), Duration::from_secs(300)).unwrap();

        assert!(list.is_empty());
        assert!(!list.contains("a@x.com").await.unwrap());
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = AllowList::load("/nonexistent/users.json", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::AllowList(_)));
    }

    #[test]
    fn load_rejects_non_array() {
        let file = write_list(r#"{"a@x.com": true}"#);
        let err = AllowList::load(file.path(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::AllowList(_)));
    }

    #[tokio::test]
    async fn stale_list_is_reread() {
        // GIVEN: a list loaded with a zero TTL
        let file = write_list(r#"["a@x.com"]"#);
        let list = AllowList::load(file.path(), Duration::ZERO).unwrap();
        assert!(!list.contains("new@x.com").await.unwrap());

        // WHEN: the file changes
        std::fs::write(file.path(), r#"["new@x.com"]"#).unwrap();

        // THEN: the next lookup sees the new content
        assert!(list.contains("new@x.com").await.unwrap());
        assert!(!list.contains("a@x.com").await.unwrap());
    }

    #[tokio::test]
    async fn fresh_list_is_not_reread() {
        let file = write_list(r#"["a@x.com"]"#);
        let list = AllowList::load(file.path(), Duration::from_secs(3600)).unwrap();

        std::fs::write(file.path(), "[]").unwrap();

        assert!(list.contains("a@x.com").await.unwrap());
    }

    #[tokio::test]
    async fn failed_refresh_surfaces_error() {
        let file = write_list(r#"["a@x.com"]"#);
        let list = AllowList::load(file.path(), Duration::ZERO).unwrap();

        std::fs::write(file.path(), "not json").unwrap();

        assert!(matches!(
            list.contains("a@x.com").await,
            Err(Error::AllowList(_))
        ));
    }
}
