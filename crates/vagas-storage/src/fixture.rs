//! Replays captured listing pages instead of hitting the network.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use uuid::Uuid;

use crate::render::{FetchError, FetchOptions, PageRenderer};

/// Pages keyed by the exact listing URL they were captured from.
#[derive(Debug, Clone, Default)]
pub struct FixturePageRenderer {
    pages: HashMap<String, String>,
}

impl FixturePageRenderer {
    pub fn from_pages<I, K, V>(pages: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let pages = pages.into_iter().map(|(url, html)| (url.into(), html.into()));
        Self {
            pages: pages.collect(),
        }
    }

    /// `path` is a JSON object of listing URL to HTML file, the files
    /// resolved next to the manifest.
    pub fn from_manifest(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let entries: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("manifest {} is not a url -> file map", path.display()))?;
        let dir = path.parent().unwrap_or(Path::new("."));

        entries
            .into_iter()
            .map(|(url, file)| {
                let file = dir.join(file);
                std::fs::read_to_string(&file)
                    .with_context(|| format!("reading page {}", file.display()))
                    .map(|html| (url, html))
            })
            .collect::<anyhow::Result<HashMap<_, _>>>()
            .map(|pages| Self { pages })
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[async_trait]
impl PageRenderer for FixturePageRenderer {
    async fn fetch(
        &self,
        _cycle_id: Uuid,
        _source: &str,
        url: &str,
        _options: &FetchOptions,
    ) -> Result<String, FetchError> {
        match self.pages.get(url) {
            Some(html) => Ok(html.clone()),
            None => Err(FetchError::NotFound(url.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_urls_are_not_found() {
        let renderer = FixturePageRenderer::from_pages([("https://a.example/list", "<ul></ul>")]);
        let options = FetchOptions::default();

        let html = renderer
            .fetch(Uuid::nil(), "siteA", "https://a.example/list", &options)
            .await
            .unwrap();
        assert_eq!(html, "<ul></ul>");

        let err = renderer
            .fetch(Uuid::nil(), "siteA", "https://a.example/list?page=2", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(url) if url.ends_with("page=2")));
    }

    #[tokio::test]
    async fn manifest_files_resolve_next_to_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("linkedin")).unwrap();
        std::fs::write(dir.path().join("linkedin/p1.html"), "<p>vaga</p>").unwrap();
        std::fs::write(
            dir.path().join("pages.json"),
            r#"{"https://a.example/list": "linkedin/p1.html"}"#,
        )
        .unwrap();

        let renderer = FixturePageRenderer::from_manifest(dir.path().join("pages.json")).unwrap();
        assert_eq!(renderer.len(), 1);
        let html = renderer
            .fetch(Uuid::nil(), "linkedin", "https://a.example/list", &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(html, "<p>vaga</p>");
    }

    #[test]
    fn missing_page_file_fails_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pages.json"), r#"{"https://a.example/x": "gone.html"}"#)
            .unwrap();
        assert!(FixturePageRenderer::from_manifest(dir.path().join("pages.json")).is_err());
    }
}
