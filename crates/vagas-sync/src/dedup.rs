//! Collapses postings that share a uid within one cycle.

use std::collections::BTreeMap;

use vagas_core::{JobPosting, JobUid};

/// One entry per distinct uid. A later posting replaces an earlier one
/// wholesale; fields are never merged.
pub fn dedupe<I>(postings: I) -> BTreeMap<JobUid, JobPosting>
where
    I: IntoIterator<Item = JobPosting>,
{
    let mut unique = BTreeMap::new();
    for posting in postings {
        unique.insert(posting.uid.clone(), posting);
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use vagas_core::{resolve_uid, EmploymentType, Source, SourceProfile, UidHints};

    fn posting(link: &str, title: &str, employment_type: EmploymentType) -> JobPosting {
        let profile = SourceProfile::generic(Source::parse("siteA"))
            .with_domains(["x.example"])
            .with_id_path_pattern(r"^/jobs/view/(\d+)")
            .unwrap();
        let identity = resolve_uid(link, &profile, UidHints::default()).unwrap();
        JobPosting {
            uid: identity.uid,
            source: profile.source.clone(),
            title: title.to_string(),
            company: "Acme".to_string(),
            location: "São Paulo, SP".to_string(),
            raw_link: link.to_string(),
            canonical_link: identity.canonical_link,
            employment_type,
            date_posted: "hoje".to_string(),
        }
    }

    #[test]
    fn tracking_variants_collapse_to_one_entry() {
        let unique = dedupe([
            posting("https://x.example/jobs/view/555?utm=abc", "Dev", EmploymentType::OnSite),
            posting("https://x.example/jobs/view/555?utm=xyz", "Dev", EmploymentType::OnSite),
        ]);
        assert_eq!(unique.len(), 1);
        let (uid, kept) = unique.iter().next().unwrap();
        assert_eq!(uid.as_str(), "siteA:555");
        assert_eq!(kept.canonical_link, "https://x.example/jobs/view/555");
    }

    #[test]
    fn later_record_replaces_the_whole_earlier_one() {
        let unique = dedupe([
            posting("https://x.example/jobs/view/1?a", "Dev Rust", EmploymentType::OnSite),
            posting("https://x.example/jobs/view/2", "Other", EmploymentType::Unknown),
            posting("https://x.example/jobs/view/1?b", "", EmploymentType::Remote),
        ]);
        assert_eq!(unique.len(), 2);
        let first = unique.values().find(|p| p.uid.as_str() == "siteA:1").unwrap();
        assert_eq!(first.employment_type, EmploymentType::Remote);
        // Whole-record replacement: the empty title wins too.
        assert_eq!(first.title, "");
        assert_eq!(first.raw_link, "https://x.example/jobs/view/1?b");
    }

    #[test]
    fn dedupe_is_idempotent() {
        let once = dedupe([
            posting("https://x.example/jobs/view/3", "A", EmploymentType::Hybrid),
            posting("https://x.example/other", "B", EmploymentType::Unknown),
            posting("https://x.example/jobs/view/3?x", "C", EmploymentType::Hybrid),
        ]);
        let twice = dedupe(once.values().cloned());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(dedupe(Vec::new()).is_empty());
    }
}
