//! Environment settings and the `sources.yaml` registry.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use vagas_core::{EmploymentType, ProfileError, Source, SourceCatalog, SourceProfile};
use vagas_storage::DEFAULT_USER_AGENT;

use crate::schedule::Schedule;

/// Place names accepted by the default Brazil-scoped crawl.
pub const BRAZIL_REGION_TOKENS: &[&str] = &[
    "brasil", "brazil", "br", "sp", "são paulo", "rio de janeiro", "rj", "minas gerais", "mg",
    "bahia", "ba", "paraná", "pr", "pernambuco", "pe", "ceará", "ce", "goiás", "go",
    "distrito federal", "df", "rio grande do sul", "rs", "santa catarina", "sc",
    "espírito santo", "es", "porto alegre", "recife", "fortaleza", "curitiba", "salvador",
    "manaus", "belém", "campinas", "florianópolis", "joinville", "natal", "maceió", "aracaju",
    "teresina", "palmas", "campo grande", "cuiabá", "vitória", "santos", "sorocaba",
    "ribeirão preto", "londrina", "maringá", "uberlândia", "juiz de fora", "blumenau",
    "belo horizonte", "brasília", "goiânia", "contagem", "betim", "nova lima", "vila velha",
    "são josé dos campos", "são bernardo do campo", "santo andré", "osasco", "barueri",
];

const LINKEDIN_SEARCH: &str = "https://www.linkedin.com/jobs/search?keywords={keywords}&location=Brasil&geoId=106057199&f_TPR=r86400";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingEnv(&'static str),
    #[error("{name}={value:?} is invalid: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("reading {path}")]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("parsing {path}")]
    Parse {
        path: PathBuf,
        #[source]
        error: serde_yaml::Error,
    },
    #[error("source {source_id}")]
    Profile {
        source_id: String,
        #[source]
        error: ProfileError,
    },
    #[error("source {0} is listed more than once")]
    DuplicateSource(String),
    #[error("no field extractor is registered for source {0}")]
    NoExtractor(String),
    #[error("invalid schedule {value:?}: {reason}")]
    Schedule { value: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListingConfig {
    /// Listing URL; `{keywords}` is replaced by the url-encoded crawl keywords.
    pub url: String,
    /// Category the listing URL filters on.
    #[serde(default)]
    pub employment_hint: EmploymentType,
    #[serde(default)]
    pub default_location: Option<String>,
}

impl ListingConfig {
    pub fn new(url: impl Into<String>, employment_hint: EmploymentType) -> Self {
        Self {
            url: url.into(),
            employment_hint,
            default_location: None,
        }
    }

    pub fn with_default_location(mut self, location: impl Into<String>) -> Self {
        self.default_location = Some(location.into());
        self
    }

    pub fn url_for(&self, keywords: &str) -> String {
        let encoded = url::form_urlencoded::byte_serialize(keywords.trim().as_bytes()).collect::<String>();
        self.url.replace("{keywords}", &encoded)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: Source,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub id_path_pattern: Option<String>,
    #[serde(default)]
    pub id_query_params: Vec<String>,
    #[serde(default)]
    pub listings: Vec<ListingConfig>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceConfig {
    pub fn profile(&self) -> Result<SourceProfile, ConfigError> {
        let wrap = |error| ConfigError::Profile {
            source_id: self.source_id.to_string(),
            error,
        };
        let mut profile = SourceProfile::generic(self.source_id.clone())
            .with_domains(&self.domains)
            .with_id_query_params(&self.id_query_params);
        if let Some(base_url) = &self.base_url {
            profile = profile.with_base_url(base_url).map_err(wrap)?;
        }
        if let Some(pattern) = &self.id_path_pattern {
            profile = profile.with_id_path_pattern(pattern).map_err(wrap)?;
        }
        Ok(profile)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub region_tokens: Vec<String>,
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    /// LinkedIn in three work-mode passes plus InfoJobs for two states, scoped
    /// to Brazil.
    pub fn builtin() -> Self {
        let linkedin = SourceProfile::linkedin();
        let infojobs = SourceProfile::infojobs();
        let linkedin_pass = |f_wt: u8, hint| {
            ListingConfig::new(format!("{LINKEDIN_SEARCH}&f_WT={f_wt}&position=1&pageNum=0"), hint)
        };

        Self {
            region_tokens: BRAZIL_REGION_TOKENS.iter().map(ToString::to_string).collect(),
            sources: vec![
                SourceConfig {
                    source_id: Source::Linkedin,
                    display_name: "LinkedIn".to_string(),
                    enabled: true,
                    domains: linkedin.domains.clone(),
                    base_url: linkedin.base_url.as_ref().map(ToString::to_string),
                    id_path_pattern: Some(vagas_core::profile::LINKEDIN_ID_PATH_PATTERN.to_string()),
                    id_query_params: linkedin.id_query_params.clone(),
                    listings: vec![
                        linkedin_pass(2, EmploymentType::Remote),
                        linkedin_pass(1, EmploymentType::OnSite),
                        linkedin_pass(3, EmploymentType::Hybrid),
                    ],
                },
                SourceConfig {
                    source_id: Source::Infojobs,
                    display_name: "InfoJobs".to_string(),
                    enabled: true,
                    domains: infojobs.domains.clone(),
                    base_url: infojobs.base_url.as_ref().map(ToString::to_string),
                    id_path_pattern: Some(vagas_core::profile::INFOJOBS_ID_PATH_PATTERN.to_string()),
                    id_query_params: Vec::new(),
                    listings: vec![
                        ListingConfig::new(
                            "https://www.infojobs.com.br/empregos-em-sao-paulo.aspx?Antiguedad=1",
                            EmploymentType::Unknown,
                        )
                        .with_default_location("São Paulo"),
                        ListingConfig::new(
                            "https://www.infojobs.com.br/empregos-em-rio-janeiro.aspx?Antiguedad=1",
                            EmploymentType::Unknown,
                        )
                        .with_default_location("Rio de Janeiro"),
                    ],
                },
            ],
        }
    }

    pub fn from_yaml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let registry: Self = serde_yaml::from_str(text).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_yaml_str(&text, path)
    }

    /// Loads `path` when it exists, else falls back to [`SourceRegistry::builtin`].
    pub fn load_or_builtin(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            info!(path = %path.display(), "sources file not found; using built-in sources");
            Ok(Self::builtin())
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for source in &self.sources {
            if !seen.insert(source.source_id.clone()) {
                return Err(ConfigError::DuplicateSource(source.source_id.to_string()));
            }
            source.profile()?;
        }
        Ok(())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Profiles for every listed source, enabled or not, so links from a
    /// disabled source still canonicalize the same way.
    pub fn catalog(&self) -> Result<SourceCatalog, ConfigError> {
        let mut catalog = SourceCatalog::new();
        for source in &self.sources {
            catalog.insert(source.profile()?);
        }
        Ok(catalog)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub sources_file: PathBuf,
    pub keywords: String,
    pub region_tokens: Option<Vec<String>>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub store_timeout_secs: u64,
    pub archive_dir: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub schedule: Schedule,
    pub utc_offset_hours: i32,
    pub parallel_sources: bool,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = var("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;
        let schedule = match var("VAGAS_SCHEDULE") {
            Some(value) => value.parse()?,
            None => Schedule::default(),
        };

        Ok(Self {
            database_url,
            sources_file: var("VAGAS_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./sources.yaml")),
            keywords: var("VAGAS_KEYWORDS").unwrap_or_default(),
            region_tokens: var("VAGAS_REGION_TOKENS").map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(ToString::to_string)
                    .collect()
            }),
            user_agent: var("VAGAS_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: parse_var("VAGAS_HTTP_TIMEOUT_SECS", var("VAGAS_HTTP_TIMEOUT_SECS"), 30)?,
            store_timeout_secs: parse_var("VAGAS_STORE_TIMEOUT_SECS", var("VAGAS_STORE_TIMEOUT_SECS"), 60)?,
            archive_dir: var("VAGAS_ARCHIVE_DIR").map(PathBuf::from),
            reports_dir: var("VAGAS_REPORTS_DIR").map(PathBuf::from),
            schedule,
            utc_offset_hours: parse_var("VAGAS_UTC_OFFSET_HOURS", var("VAGAS_UTC_OFFSET_HOURS"), -3)?,
            parallel_sources: match var("VAGAS_PARALLEL_SOURCES") {
                None => true,
                Some(v) => parse_bool("VAGAS_PARALLEL_SOURCES", &v)?,
            },
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Loads the registry, applying the region override from the environment.
    pub fn load_registry(&self) -> Result<SourceRegistry, ConfigError> {
        let mut registry = SourceRegistry::load_or_builtin(&self.sources_file)?;
        if let Some(tokens) = &self.region_tokens {
            registry.region_tokens = tokens.clone();
        }
        Ok(registry)
    }
}

fn parse_var<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
