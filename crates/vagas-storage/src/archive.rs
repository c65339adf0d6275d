//! Raw listing pages kept on disk, addressed by content hash.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedPage {
    /// Path below the archive root: `<stamp>/<source>/<sha256>.html`.
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: usize,
    /// The same page was already archived under this stamp.
    pub reused: bool,
}

#[derive(Debug, Clone)]
pub struct PageArchive {
    root: PathBuf,
}

impl PageArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn page_path(fetched_at: DateTime<Utc>, source: &str, sha256: &str) -> PathBuf {
        [
            fetched_at.format("%Y%m%d_%H%M%S").to_string(),
            source.to_string(),
            format!("{sha256}.html"),
        ]
        .iter()
        .collect()
    }

    /// Readers never observe a partial page: content goes to a sibling
    /// `.part` file first and is renamed into place.
    pub async fn store_page(
        &self,
        fetched_at: DateTime<Utc>,
        source: &str,
        html: &str,
    ) -> anyhow::Result<ArchivedPage> {
        let sha256 = hex::encode(Sha256::digest(html.as_bytes()));
        let path = Self::page_path(fetched_at, source, &sha256);
        let target = self.root.join(&path);
        let mut page = ArchivedPage {
            path,
            sha256,
            bytes: html.len(),
            reused: true,
        };

        if fs::try_exists(&target)
            .await
            .with_context(|| format!("probing {}", target.display()))?
        {
            return Ok(page);
        }

        let dir = target
            .parent()
            .with_context(|| format!("{} has no parent directory", target.display()))?;
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let part = target.with_extension(format!("{}.part", Uuid::new_v4().simple()));
        fs::write(&part, html)
            .await
            .with_context(|| format!("writing {}", part.display()))?;
        if let Err(err) = fs::rename(&part, &target).await {
            let _ = fs::remove_file(&part).await;
            return Err(err).with_context(|| format!("moving page into {}", target.display()));
        }

        page.reused = false;
        Ok(page)
    }
}
