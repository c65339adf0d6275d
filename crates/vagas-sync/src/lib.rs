//! Crawl cycles: fetch every configured listing, extract, normalize, dedupe and
//! persist once per cycle.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vagas_adapters::{extractor_for_source, FieldExtractor};
use vagas_core::text::PhraseSet;
use vagas_core::{JobPosting, Source};
use vagas_storage::{
    FetchOptions, HttpClientConfig, HttpPageRenderer, PageArchive, PageRenderer, PgPostingStore,
    PostingStore,
};

pub mod config;
pub mod dedup;
pub mod normalize;
pub mod schedule;

pub use config::{
    ConfigError, ListingConfig, SourceConfig, SourceRegistry, SyncConfig, BRAZIL_REGION_TOKENS,
};
pub use dedup::dedupe;
pub use normalize::{Discard, ListingContext, RecordNormalizer};
pub use schedule::{Schedule, Scheduler};

/// Counts for one source within one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCycleReport {
    pub source: Source,
    pub listings: usize,
    pub pages_fetched: usize,
    pub fragments: usize,
    pub extracted: usize,
    pub extraction_errors: usize,
    pub out_of_region: usize,
    pub unresolvable: usize,
    pub normalized: usize,
    pub archive_errors: usize,
    /// Set when a listing failed to render; the source contributes nothing.
    pub fetch_error: Option<String>,
}

impl SourceCycleReport {
    fn new(source: Source, listings: usize) -> Self {
        Self {
            source,
            listings,
            pages_fetched: 0,
            fragments: 0,
            extracted: 0,
            extraction_errors: 0,
            out_of_region: 0,
            unresolvable: 0,
            normalized: 0,
            archive_errors: 0,
            fetch_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceCycleReport>,
    pub fetched: usize,
    pub extracted: usize,
    pub normalized: usize,
    pub deduplicated: usize,
    pub written: usize,
    pub inserted: usize,
    pub updated: usize,
    pub persistence_error: Option<String>,
    pub reports_dir: Option<String>,
}

impl CycleSummary {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceCycleReport> {
        self.sources.iter().filter(|s| s.fetch_error.is_some())
    }
}

/// Static inputs of every cycle.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub registry: SourceRegistry,
    pub keywords: String,
    pub parallel_sources: bool,
    pub archive_dir: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub fetch_options: FetchOptions,
}

impl CycleConfig {
    pub fn new(registry: SourceRegistry) -> Self {
        Self {
            registry,
            keywords: String::new(),
            parallel_sources: true,
            archive_dir: None,
            reports_dir: None,
            fetch_options: FetchOptions {
                locale: Some("pt-BR,pt;q=0.9,en;q=0.8".to_string()),
                viewport: Some((1920, 1080)),
                scroll_depth: Some(20),
            },
        }
    }

    pub fn from_sync_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            keywords: config.keywords.clone(),
            parallel_sources: config.parallel_sources,
            archive_dir: config.archive_dir.clone(),
            reports_dir: config.reports_dir.clone(),
            ..Self::new(config.load_registry()?)
        })
    }
}

struct SourcePlan {
    source: Source,
    listings: Vec<ListingConfig>,
    extractor: Arc<dyn FieldExtractor>,
    normalizer: RecordNormalizer,
}

struct SourceBatch {
    report: SourceCycleReport,
    postings: Vec<JobPosting>,
}

/// Everything a per-source worker needs besides its plan.
struct Collector {
    renderer: Arc<dyn PageRenderer>,
    archive: Option<PageArchive>,
    keywords: String,
    fetch_options: FetchOptions,
}

impl Collector {
    async fn collect(&self, plan: &SourcePlan, cycle_id: Uuid) -> SourceBatch {
        let mut report = SourceCycleReport::new(plan.source.clone(), plan.listings.len());
        let mut postings = Vec::new();

        for listing in &plan.listings {
            let url = listing.url_for(&self.keywords);
            let html = match self
                .renderer
                .fetch(cycle_id, plan.source.as_str(), &url, &self.fetch_options)
                .await
            {
                Ok(html) => html,
                Err(err) => {
                    warn!(%cycle_id, source = %plan.source, %url, error = %err, "listing fetch failed; dropping source for this cycle");
                    report.fetch_error = Some(err.to_string());
                    return SourceBatch {
                        report,
                        postings: Vec::new(),
                    };
                }
            };
            report.pages_fetched += 1;

            if let Some(archive) = &self.archive {
                if let Err(err) = archive.store_page(Utc::now(), plan.source.as_str(), &html).await {
                    warn!(source = %plan.source, %url, error = %err, "archiving page failed");
                    report.archive_errors += 1;
                }
            }

            let page = plan.extractor.extract_page(&html);
            report.fragments += page.fragments;
            report.extracted += page.records.len();
            report.extraction_errors += page.errors.len();
            for err in &page.errors {
                warn!(source = %plan.source, %url, error = %err, "skipping fragment");
            }

            for fields in page.records {
                match plan.normalizer.normalize(fields, ListingContext::from(listing)) {
                    Ok(posting) => postings.push(posting),
                    Err(Discard::OutOfRegion(location)) => {
                        debug!(source = %plan.source, %location, "outside crawl region");
                        report.out_of_region += 1;
                    }
                    Err(Discard::Unresolvable(err)) => {
                        warn!(source = %plan.source, error = %err, "discarding record without uid");
                        report.unresolvable += 1;
                    }
                }
            }
        }

        report.normalized = postings.len();
        SourceBatch { report, postings }
    }
}

pub struct SyncPipeline {
    plans: Vec<Arc<SourcePlan>>,
    collector: Arc<Collector>,
    store: Arc<dyn PostingStore>,
    parallel_sources: bool,
    reports_dir: Option<PathBuf>,
}

impl SyncPipeline {
    pub fn new(
        config: CycleConfig,
        renderer: Arc<dyn PageRenderer>,
        store: Arc<dyn PostingStore>,
    ) -> Result<Self, ConfigError> {
        let catalog = config.registry.catalog()?;
        let region = PhraseSet::new(&config.registry.region_tokens);

        let mut plans = Vec::new();
        for source in config.registry.enabled() {
            let extractor = extractor_for_source(&source.source_id)
                .ok_or_else(|| ConfigError::NoExtractor(source.source_id.to_string()))?;
            plans.push(Arc::new(SourcePlan {
                source: source.source_id.clone(),
                listings: source.listings.clone(),
                extractor,
                normalizer: RecordNormalizer::new(catalog.profile_for(&source.source_id), region.clone()),
            }));
        }

        Ok(Self {
            plans,
            collector: Arc::new(Collector {
                renderer,
                archive: config.archive_dir.map(PageArchive::new),
                keywords: config.keywords,
                fetch_options: config.fetch_options,
            }),
            store,
            parallel_sources: config.parallel_sources,
            reports_dir: config.reports_dir,
        })
    }

    /// HTTP renderer and Postgres store, both bounded by the configured timeouts.
    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let renderer = HttpPageRenderer::new(HttpClientConfig {
            timeout: config.http_timeout(),
            fetch_deadline: config.http_timeout() * 4,
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let store = PgPostingStore::connect(&config.database_url, config.store_timeout())
            .await
            .context("configuring postgres pool")?;
        let pipeline = Self::new(
            CycleConfig::from_sync_config(config)?,
            Arc::new(renderer),
            Arc::new(store),
        )?;
        Ok(pipeline)
    }

    pub fn store(&self) -> &Arc<dyn PostingStore> {
        &self.store
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.plans.iter().map(|p| &p.source)
    }

    /// Runs one full cycle. Failures are recorded in the summary, never
    /// returned; nothing is persisted until every source has finished.
    pub async fn run_cycle(&self) -> CycleSummary {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%cycle_id, sources = self.plans.len(), "cycle started");

        let batches = if self.parallel_sources {
            self.collect_parallel(cycle_id).await
        } else {
            let mut batches = Vec::with_capacity(self.plans.len());
            for plan in &self.plans {
                batches.push(self.collector.collect(plan, cycle_id).await);
            }
            batches
        };

        let mut reports = Vec::with_capacity(batches.len());
        let mut merged = Vec::new();
        for batch in batches {
            reports.push(batch.report);
            merged.extend(batch.postings);
        }
        let normalized = merged.len();
        let unique = dedupe(merged).into_values().collect::<Vec<_>>();

        let (written, inserted, updated, persistence_error) = if unique.is_empty() {
            (0, 0, 0, None)
        } else {
            match self.store.upsert(&unique).await {
                Ok(report) => (report.written, report.inserted, report.updated, None),
                Err(err) => {
                    error!(%cycle_id, error = %err, postings = unique.len(), "persisting cycle failed; batch rolled back");
                    (0, 0, 0, Some(err.to_string()))
                }
            }
        };

        let mut summary = CycleSummary {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            fetched: reports.iter().map(|r| r.pages_fetched).sum(),
            extracted: reports.iter().map(|r| r.extracted).sum(),
            normalized,
            deduplicated: unique.len(),
            written,
            inserted,
            updated,
            sources: reports,
            persistence_error,
            reports_dir: None,
        };

        for source in &summary.sources {
            info!(
                %cycle_id,
                source = %source.source,
                pages = source.pages_fetched,
                extracted = source.extracted,
                normalized = source.normalized,
                extraction_errors = source.extraction_errors,
                out_of_region = source.out_of_region,
                unresolvable = source.unresolvable,
                fetch_failed = source.fetch_error.is_some(),
                "source finished"
            );
        }
        info!(
            %cycle_id,
            fetched = summary.fetched,
            extracted = summary.extracted,
            deduplicated = summary.deduplicated,
            written = summary.written,
            inserted = summary.inserted,
            updated = summary.updated,
            "cycle finished"
        );

        if let Some(dir) = &self.reports_dir {
            match write_reports(dir, &summary).await {
                Ok(path) => summary.reports_dir = Some(path.display().to_string()),
                Err(err) => warn!(%cycle_id, error = %err, "writing cycle report failed"),
            }
        }
        summary
    }

    async fn collect_parallel(&self, cycle_id: Uuid) -> Vec<SourceBatch> {
        let mut set = JoinSet::new();
        for (index, plan) in self.plans.iter().enumerate() {
            let plan = Arc::clone(plan);
            let collector = Arc::clone(&self.collector);
            set.spawn(async move { (index, collector.collect(&plan, cycle_id).await) });
        }

        let mut slots: Vec<Option<SourceBatch>> = self.plans.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, batch)) => slots[index] = Some(batch),
                Err(err) => error!(%cycle_id, error = %err, "source worker failed"),
            }
        }

        // Merge in configuration order so later-wins dedup is reproducible.
        slots
            .into_iter()
            .zip(&self.plans)
            .map(|(slot, plan)| {
                slot.unwrap_or_else(|| {
                    let mut report = SourceCycleReport::new(plan.source.clone(), plan.listings.len());
                    report.fetch_error = Some("source worker failed".to_string());
                    SourceBatch {
                        report,
                        postings: Vec::new(),
                    }
                })
            })
            .collect()
    }
}

/// Writes `<reports_dir>/<cycle_id>/cycle_summary.json` and a Markdown brief.
pub async fn write_reports(reports_dir: &Path, summary: &CycleSummary) -> Result<PathBuf> {
    let dir = reports_dir.join(summary.cycle_id.to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing cycle summary")?;
    fs::write(dir.join("cycle_summary.json"), json)
        .await
        .context("writing cycle_summary.json")?;

    let mut per_source: BTreeMap<String, String> = BTreeMap::new();
    for source in &summary.sources {
        let line = match &source.fetch_error {
            Some(err) => format!("fetch failed ({err})"),
            None => format!(
                "{} pages, {} extracted, {} kept, {} out of region, {} without uid, {} fragment errors",
                source.pages_fetched,
                source.extracted,
                source.normalized,
                source.out_of_region,
                source.unresolvable,
                source.extraction_errors
            ),
        };
        per_source.insert(source.source.to_string(), line);
    }
    let brief = format!(
        "# Vagas cycle brief\n\n- Cycle ID: `{}`\n- Started: {}\n- Finished: {}\n- Pages fetched: {}\n- Extracted: {}\n- Unique postings: {}\n- Written: {} ({} new, {} updated)\n- Persistence: {}\n\n## Sources\n{}\n",
        summary.cycle_id,
        summary.started_at,
        summary.finished_at,
        summary.fetched,
        summary.extracted,
        summary.deduplicated,
        summary.written,
        summary.inserted,
        summary.updated,
        summary.persistence_error.as_deref().unwrap_or("ok"),
        per_source
            .iter()
            .map(|(k, v)| format!("- {k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    );
    fs::write(dir.join("cycle_brief.md"), brief)
        .await
        .context("writing cycle_brief.md")?;
    Ok(dir)
}

/// Runs cycles on `scheduler`'s timetable until `shutdown` resolves and returns
/// how many cycles completed. A cycle interrupted by shutdown persists nothing.
pub async fn run_scheduled<F>(pipeline: &SyncPipeline, mut scheduler: Scheduler, shutdown: F) -> usize
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut completed = 0usize;

    loop {
        let now = Utc::now();
        let next = scheduler.next_run_at(now);
        let wait = (next - now).to_std().unwrap_or_default();
        if !wait.is_zero() {
            info!(next_run_at = %next, "waiting for next cycle");
        }

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!(completed, "shutdown requested");
                return completed;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        scheduler.mark_started(Utc::now());
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                warn!(completed, "shutdown during a cycle; nothing persisted for it");
                return completed;
            }
            summary = pipeline.run_cycle() => {
                completed += 1;
                if summary.persistence_error.is_some() {
                    warn!(cycle_id = %summary.cycle_id, "cycle ended without persisting");
                }
            }
        }
    }
}

pub async fn run_sync_once_from_env() -> Result<CycleSummary> {
    let config = SyncConfig::from_env()?;
    let pipeline = SyncPipeline::from_config(&config).await?;
    Ok(pipeline.run_cycle().await)
}
