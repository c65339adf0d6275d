//! Core domain model and identity resolution for vagas.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod link;
pub mod profile;
pub mod text;
pub mod uid;

pub use link::canonicalize;
pub use profile::{ProfileError, SourceCatalog, SourceProfile};
pub use uid::{resolve_uid, ResolvedIdentity, UidHints, UidRule, UidUnresolvable};

/// Origin site of a posting. Unknown ids are kept verbatim so new sources can be
/// configured without a code change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
    Linkedin,
    Infojobs,
    Other(String),
}

impl Source {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("linkedin") {
            Source::Linkedin
        } else if trimmed.eq_ignore_ascii_case("infojobs") {
            Source::Infojobs
        } else {
            Source::Other(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Source::Linkedin => "linkedin",
            Source::Infojobs => "infojobs",
            Source::Other(id) => id.as_str(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Source {
    fn from(value: String) -> Self {
        Source::parse(&value)
    }
}

impl From<Source> for String {
    fn from(value: Source) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    Remote,
    OnSite,
    Hybrid,
    #[default]
    Unknown,
}

impl EmploymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmploymentType::Remote => "remote",
            EmploymentType::OnSite => "on_site",
            EmploymentType::Hybrid => "hybrid",
            EmploymentType::Unknown => "unknown",
        }
    }

    /// Interprets a categorical label as published by a source (filter names,
    /// card badges, stored column values). Free text is not scanned here.
    pub fn from_label(label: &str) -> Option<Self> {
        let folded = text::fold(label);
        match folded.trim() {
            "remote" | "remoto" | "remota" | "home office" | "teletrabalho" => {
                Some(EmploymentType::Remote)
            }
            "on_site" | "onsite" | "on-site" | "on site" | "presencial" => {
                Some(EmploymentType::OnSite)
            }
            "hybrid" | "hibrido" | "hibrida" => Some(EmploymentType::Hybrid),
            "unknown" => Some(EmploymentType::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for EmploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable, source-namespaced identity of a logical posting. Only the resolver
/// and stored rows can produce one, so an empty uid is unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobUid(String);

impl JobUid {
    pub(crate) fn from_parts(source: &Source, tail: &str) -> Self {
        Self(format!("{}:{}", source.as_str(), tail))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobUid {
    type Error = UidUnresolvable;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            Err(UidUnresolvable::EmptyLink)
        } else {
            Ok(Self(value))
        }
    }
}

/// Best-effort strings a field extractor captured for one listing fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub raw_link: String,
    #[serde(default)]
    pub employment_hint: String,
    #[serde(default)]
    pub native_id_hint: Option<String>,
    #[serde(default)]
    pub date_posted: String,
}

/// A normalized posting as built during one cycle. Lifecycle timestamps belong
/// to the stored row, see [`StoredPosting`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobPosting {
    pub uid: JobUid,
    pub source: Source,
    pub title: String,
    pub company: String,
    pub location: String,
    pub raw_link: String,
    pub canonical_link: String,
    pub employment_type: EmploymentType,
    pub date_posted: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredPosting {
    pub posting: JobPosting,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
