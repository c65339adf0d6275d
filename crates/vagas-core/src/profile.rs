//! Per-source URL shape: which hosts belong to a source, how relative links are
//! resolved, and where a native posting id lives in the path or query.

use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::Source;

pub const LINKEDIN_ID_PATH_PATTERN: &str = r"^/jobs/view/(?:[^/]*-)?(\d+)(?:/|$)";
pub const INFOJOBS_ID_PATH_PATTERN: &str = r"^/vaga-de-[^/]*__(\d+)\.aspx";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid id path pattern {pattern:?} for source {source_id}: {reason}")]
    InvalidPattern {
        source_id: String,
        pattern: String,
        reason: String,
    },
    #[error("id path pattern {pattern:?} for source {source_id} needs exactly one capture group")]
    MissingCaptureGroup { source_id: String, pattern: String },
    #[error("invalid base url {url:?} for source {source_id}: {reason}")]
    InvalidBaseUrl {
        source_id: String,
        url: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub source: Source,
    pub domains: Vec<String>,
    pub base_url: Option<Url>,
    pub id_path_pattern: Option<Regex>,
    pub id_query_params: Vec<String>,
}

impl SourceProfile {
    /// A profile with no known URL shape; links get the generic strip rule and
    /// uids fall back to query ids or hashes.
    pub fn generic(source: Source) -> Self {
        Self {
            source,
            domains: Vec::new(),
            base_url: None,
            id_path_pattern: None,
            id_query_params: Vec::new(),
        }
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.domains = domains
            .into_iter()
            .map(|d| d.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ProfileError> {
        let parsed = Url::parse(base_url).map_err(|e| ProfileError::InvalidBaseUrl {
            source_id: self.source.to_string(),
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        self.base_url = Some(parsed);
        Ok(self)
    }

    pub fn with_id_path_pattern(mut self, pattern: &str) -> Result<Self, ProfileError> {
        let regex = Regex::new(pattern).map_err(|e| ProfileError::InvalidPattern {
            source_id: self.source.to_string(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        if regex.captures_len() != 2 {
            return Err(ProfileError::MissingCaptureGroup {
                source_id: self.source.to_string(),
                pattern: pattern.to_string(),
            });
        }
        self.id_path_pattern = Some(regex);
        Ok(self)
    }

    pub fn with_id_query_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_query_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn linkedin() -> Self {
        Self::generic(Source::Linkedin)
            .with_domains(["linkedin.com"])
            .with_base_url("https://www.linkedin.com")
            .and_then(|p| p.with_id_path_pattern(LINKEDIN_ID_PATH_PATTERN))
            .map(|p| p.with_id_query_params(["currentJobId"]))
            .unwrap_or_else(|_| Self::generic(Source::Linkedin))
    }

    pub fn infojobs() -> Self {
        Self::generic(Source::Infojobs)
            .with_domains(["infojobs.com.br"])
            .with_base_url("https://www.infojobs.com.br")
            .and_then(|p| p.with_id_path_pattern(INFOJOBS_ID_PATH_PATTERN))
            .unwrap_or_else(|_| Self::generic(Source::Infojobs))
    }

    pub fn owns_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }

    /// Matches the id-bearing path prefix, returning the matched prefix without
    /// a trailing slash and the captured id text.
    pub fn match_id_path<'p>(&self, path: &'p str) -> Option<(&'p str, &'p str)> {
        let caps = self.id_path_pattern.as_ref()?.captures(path)?;
        let whole = caps.get(0)?.as_str().trim_end_matches('/');
        let id = caps.get(1)?.as_str();
        Some((whole, id))
    }
}

/// Profiles for every configured source, keyed by source.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    profiles: BTreeMap<Source, SourceProfile>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.insert(SourceProfile::linkedin());
        catalog.insert(SourceProfile::infojobs());
        catalog
    }

    pub fn insert(&mut self, profile: SourceProfile) {
        self.profiles.insert(profile.source.clone(), profile);
    }

    pub fn get(&self, source: &Source) -> Option<&SourceProfile> {
        self.profiles.get(source)
    }

    /// Returns the configured profile or a generic one for unknown sources.
    pub fn profile_for(&self, source: &Source) -> SourceProfile {
        self.get(source)
            .cloned()
            .unwrap_or_else(|| SourceProfile::generic(source.clone()))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
