use std::path::Path;

use vagas_adapters::{FieldExtractor, InfojobsExtractor};
use vagas_core::ExtractedFields;

#[test]
fn state_listing_matches_golden_snapshot() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/infojobs");
    let html = std::fs::read_to_string(root.join("sao_paulo.html")).expect("read fixture page");
    let snapshot =
        std::fs::read_to_string(root.join("sao_paulo.snapshot.json")).expect("read snapshot");
    let expected: Vec<ExtractedFields> = serde_json::from_str(&snapshot).expect("parse snapshot");

    let page = InfojobsExtractor.extract_page(&html);

    // The outer "card-list" wrapper is skipped in favour of the cards it holds.
    assert_eq!(page.fragments, 2);
    assert!(page.errors.is_empty());
    assert_eq!(page.records, expected);
}
