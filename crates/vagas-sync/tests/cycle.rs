use std::path::Path;
use std::sync::Arc;

use vagas_core::{EmploymentType, JobUid, Source};
use vagas_storage::{FixturePageRenderer, MemoryPostingStore, PostingStore};
use vagas_sync::{CycleConfig, ListingConfig, SourceRegistry, SyncPipeline};

fn fixture_renderer() -> FixturePageRenderer {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/pages.json");
    FixturePageRenderer::from_manifest(manifest).expect("load fixture manifest")
}

/// Built-in sources pointed at the checked-in fixture pages.
fn fixture_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::builtin();
    for source in &mut registry.sources {
        source.listings = match source.source_id {
            Source::Linkedin => vec![
                ListingConfig::new("https://fixtures.vagas.test/linkedin/remote", EmploymentType::Remote),
                ListingConfig::new("https://fixtures.vagas.test/linkedin/on_site", EmploymentType::OnSite),
            ],
            _ => vec![ListingConfig::new(
                "https://fixtures.vagas.test/infojobs/sao-paulo",
                EmploymentType::Unknown,
            )
            .with_default_location("São Paulo")],
        };
    }
    registry
}

fn uid(value: &str) -> JobUid {
    JobUid::try_from(value.to_string()).unwrap()
}

#[tokio::test]
async fn fixture_cycle_extracts_filters_dedupes_and_persists() {
    let store = Arc::new(MemoryPostingStore::new());
    let pipeline = SyncPipeline::new(
        CycleConfig::new(fixture_registry()),
        Arc::new(fixture_renderer()),
        store.clone(),
    )
    .unwrap();

    let summary = pipeline.run_cycle().await;

    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.extracted, 8);
    assert_eq!(summary.normalized, 6);
    assert_eq!(summary.deduplicated, 5);
    assert_eq!(summary.written, 5);
    assert_eq!(summary.inserted, 5);
    assert!(summary.persistence_error.is_none());

    let linkedin = &summary.sources[0];
    assert_eq!(linkedin.source, Source::Linkedin);
    assert_eq!(linkedin.extraction_errors, 1);
    assert_eq!(linkedin.out_of_region, 1);
    assert_eq!(linkedin.unresolvable, 1);
    assert_eq!(summary.sources[1].source, Source::Infojobs);
    assert_eq!(summary.sources[1].normalized, 2);

    // Seen through both work-mode listings: the later sighting wins whole.
    let backend = store.load(&uid("linkedin:3812345678")).await.unwrap().unwrap();
    assert_eq!(backend.posting.title, "Desenvolvedor Backend Rust Sênior");
    assert_eq!(backend.posting.employment_type, EmploymentType::OnSite);
    assert_eq!(
        backend.posting.canonical_link,
        "https://www.linkedin.com/jobs/view/3812345678"
    );

    let remote = store.load(&uid("linkedin:3822223333")).await.unwrap().unwrap();
    assert_eq!(remote.posting.employment_type, EmploymentType::Remote);

    let hybrid = store.load(&uid("linkedin:3899990001")).await.unwrap().unwrap();
    assert_eq!(hybrid.posting.employment_type, EmploymentType::Hybrid);

    let analyst = store.load(&uid("infojobs:10495645")).await.unwrap().unwrap();
    assert_eq!(analyst.posting.employment_type, EmploymentType::OnSite);
    assert_eq!(analyst.posting.date_posted, "ontem");

    let java = store.load(&uid("infojobs:10501234")).await.unwrap().unwrap();
    assert_eq!(java.posting.employment_type, EmploymentType::Remote);
    assert_eq!(
        java.posting.canonical_link,
        "https://www.infojobs.com.br/vaga-de-desenvolvedor-java-em-sao-paulo__10501234.aspx"
    );
}

#[tokio::test]
async fn repeating_a_cycle_updates_rows_in_place() {
    let store = Arc::new(MemoryPostingStore::new());
    let pipeline = SyncPipeline::new(
        CycleConfig {
            parallel_sources: false,
            ..CycleConfig::new(fixture_registry())
        },
        Arc::new(fixture_renderer()),
        store.clone(),
    )
    .unwrap();

    pipeline.run_cycle().await;
    let before = store.snapshot().await;

    let second = pipeline.run_cycle().await;
    let after = store.snapshot().await;

    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 5);
    assert_eq!(store.count().await.unwrap(), 5);
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.posting.uid, new.posting.uid);
        assert_eq!(old.created_at, new.created_at);
        assert!(new.updated_at > old.updated_at);
    }
}

#[tokio::test]
async fn cycle_of_linkless_fragments_writes_nothing() {
    let page = r#"<html><body>
        <div class="base-card">
          <h3 class="base-search-card__title">Vaga sem link</h3>
          <span class="job-search-card__location">São Paulo, SP</span>
        </div>
        <div class="base-card">
          <h3 class="base-search-card__title">Outra vaga</h3>
          <a class="base-card__full-link" href=""></a>
          <span class="job-search-card__location">Recife, PE</span>
        </div>
    </body></html>"#;
    let mut registry = SourceRegistry::builtin();
    registry.sources.retain(|s| s.source_id == Source::Linkedin);
    registry.sources[0].listings = vec![ListingConfig::new(
        "https://fixtures.vagas.test/empty-links",
        EmploymentType::Remote,
    )];

    let store = Arc::new(MemoryPostingStore::new());
    let pipeline = SyncPipeline::new(
        CycleConfig::new(registry),
        Arc::new(FixturePageRenderer::from_pages([(
            "https://fixtures.vagas.test/empty-links",
            page,
        )])),
        store.clone(),
    )
    .unwrap();

    let summary = pipeline.run_cycle().await;
    assert_eq!(summary.extracted, 2);
    assert_eq!(summary.sources[0].unresolvable, 2);
    assert_eq!(summary.written, 0);
    assert_eq!(store.count().await.unwrap(), 0);
}
