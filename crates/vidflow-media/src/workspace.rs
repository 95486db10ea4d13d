//! Scratch directories for a single processing attempt.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::error::MediaResult;

/// A temporary directory removed when dropped.
///
/// Every stage attempt gets its own workspace, so concurrent attempts
/// never share files and a crashed attempt leaves nothing behind once the
/// process exits.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a workspace under `parent`, creating `parent` if needed.
    pub async fn create(parent: impl AsRef<Path>, label: &str) -> MediaResult<Self> {
        let parent = parent.as_ref();
        tokio::fs::create_dir_all(parent).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize_label(label)))
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a file inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(48)
        .collect();
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_workspace_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::create(parent.path().join("jobs"), "v-1/trim").await.unwrap();
        let path = ws.path().to_path_buf();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("v-1_trim-"));
        assert_eq!(ws.file("input.mp4"), path.join("input.mp4"));

        drop(ws);
        assert!(!path.exists());
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("../etc"), "___etc");
        assert_eq!(sanitize_label(""), "job");
    }
}
