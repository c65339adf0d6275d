//! Turns extracted fields into postings: region filter, identity, and
//! employment-type inference.

use thiserror::Error;
use vagas_core::text::PhraseSet;
use vagas_core::{
    resolve_uid, EmploymentType, ExtractedFields, JobPosting, SourceProfile, UidHints,
    UidUnresolvable,
};

use crate::config::ListingConfig;

const REMOTE_VOCABULARY: &[&str] = &["remoto", "remota", "remote", "home office", "teletrabalho"];
const HYBRID_VOCABULARY: &[&str] = &["híbrido", "híbrida", "hybrid"];

/// Why a record never became a posting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Discard {
    #[error("location {0:?} is outside the crawl region")]
    OutOfRegion(String),
    #[error(transparent)]
    Unresolvable(#[from] UidUnresolvable),
}

/// What the listing a record came from says about it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingContext<'a> {
    pub employment_hint: EmploymentType,
    pub default_location: Option<&'a str>,
}

impl<'a> From<&'a ListingConfig> for ListingContext<'a> {
    fn from(listing: &'a ListingConfig) -> Self {
        Self {
            employment_hint: listing.employment_hint,
            default_location: listing.default_location.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    profile: SourceProfile,
    region: PhraseSet,
    remote: PhraseSet,
    hybrid: PhraseSet,
}

impl RecordNormalizer {
    /// An empty `region` accepts every location.
    pub fn new(profile: SourceProfile, region: PhraseSet) -> Self {
        Self {
            profile,
            region,
            remote: PhraseSet::new(REMOTE_VOCABULARY),
            hybrid: PhraseSet::new(HYBRID_VOCABULARY),
        }
    }

    pub fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    pub fn normalize(
        &self,
        fields: ExtractedFields,
        listing: ListingContext<'_>,
    ) -> Result<JobPosting, Discard> {
        let title = fields.title.trim().to_string();
        let mut location = fields.location.trim().to_string();
        if location.is_empty() {
            location = listing.default_location.unwrap_or_default().trim().to_string();
        }
        if !self.region.is_empty() && !self.region.matches(&location) {
            return Err(Discard::OutOfRegion(location));
        }

        let identity = resolve_uid(
            &fields.raw_link,
            &self.profile,
            UidHints {
                native_id: fields.native_id_hint.as_deref(),
            },
        )?;

        let employment_type = self.infer_employment_type(
            &title,
            &location,
            &fields.employment_hint,
            listing.employment_hint,
        );

        Ok(JobPosting {
            uid: identity.uid,
            source: self.profile.source.clone(),
            title,
            company: fields.company.trim().to_string(),
            location,
            raw_link: fields.raw_link.trim().to_string(),
            canonical_link: identity.canonical_link,
            employment_type,
            date_posted: fields.date_posted.trim().to_lowercase(),
        })
    }

    /// Remote wording beats hybrid wording, title beats location, and any
    /// wording beats the card label, which beats the listing category.
    pub fn infer_employment_type(
        &self,
        title: &str,
        location: &str,
        card_label: &str,
        category: EmploymentType,
    ) -> EmploymentType {
        if self.remote.matches(title) || self.remote.matches(location) {
            EmploymentType::Remote
        } else if self.hybrid.matches(title) || self.hybrid.matches(location) {
            EmploymentType::Hybrid
        } else if let Some(label) = EmploymentType::from_label(card_label)
            .filter(|label| *label != EmploymentType::Unknown)
        {
            label
        } else {
            category
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vagas_core::Source;

    fn normalizer(region: &[&str]) -> RecordNormalizer {
        RecordNormalizer::new(SourceProfile::linkedin(), PhraseSet::new(region))
    }

    fn fields(title: &str, location: &str, link: &str) -> ExtractedFields {
        ExtractedFields {
            title: title.to_string(),
            company: " Acme ".to_string(),
            location: location.to_string(),
            raw_link: link.to_string(),
            date_posted: " Há 2 Dias ".to_string(),
            ..Default::default()
        }
    }

    fn on_site() -> ListingContext<'static> {
        ListingContext {
            employment_hint: EmploymentType::OnSite,
            default_location: None,
        }
    }

    #[test]
    fn region_filter_keeps_sao_paulo_and_drops_lisbon() {
        let n = normalizer(&["sp"]);
        let link = "https://br.linkedin.com/jobs/view/1";
        assert!(n.normalize(fields("Dev", "São Paulo, SP", link), on_site()).is_ok());
        assert_eq!(
            n.normalize(fields("Dev", "Lisbon, Portugal", link), on_site()),
            Err(Discard::OutOfRegion("Lisbon, Portugal".into()))
        );
    }

    #[test]
    fn text_signal_overrides_the_listing_category() {
        let posting = normalizer(&[])
            .normalize(
                fields("Desenvolvedor Remoto", "Recife, PE", "https://br.linkedin.com/jobs/view/7"),
                on_site(),
            )
            .unwrap();
        assert_eq!(posting.employment_type, EmploymentType::Remote);
    }

    #[test]
    fn employment_precedence_follows_title_then_location_then_labels() {
        let n = normalizer(&[]);
        let infer = |title: &str, location: &str, label: &str, category| {
            n.infer_employment_type(title, location, label, category)
        };
        assert_eq!(
            infer("Dev Híbrido", "Remote, BR", "", EmploymentType::OnSite),
            EmploymentType::Remote
        );
        assert_eq!(
            infer("Dev hibrido", "Curitiba", "Presencial", EmploymentType::Remote),
            EmploymentType::Hybrid
        );
        assert_eq!(
            infer("Dev", "Curitiba", "Presencial", EmploymentType::Remote),
            EmploymentType::OnSite
        );
        assert_eq!(
            infer("Dev", "Curitiba", "Tempo integral", EmploymentType::Hybrid),
            EmploymentType::Hybrid
        );
        assert_eq!(infer("Dev", "", "", EmploymentType::Unknown), EmploymentType::Unknown);
        // Word boundaries: "remoteness" is not remote wording.
        assert_eq!(
            infer("Remoteness analyst", "", "", EmploymentType::OnSite),
            EmploymentType::OnSite
        );
    }

    #[test]
    fn empty_or_broken_links_are_discarded() {
        let n = normalizer(&[]);
        let mut empty = fields("Dev", "SP", "  ");
        empty.native_id_hint = Some("123".into());
        assert_eq!(
            n.normalize(empty, on_site()),
            Err(Discard::Unresolvable(UidUnresolvable::EmptyLink))
        );
        assert!(matches!(
            n.normalize(fields("Dev", "SP", "javascript:void(0)"), on_site()),
            Err(Discard::Unresolvable(UidUnresolvable::UnparsableLink(_)))
        ));
    }

    #[test]
    fn fields_are_trimmed_and_identity_resolved() {
        let posting = normalizer(&["sp"])
            .normalize(
                fields(
                    "  Dev Rust ",
                    "São Paulo, SP",
                    "https://br.linkedin.com/jobs/view/dev-rust-at-acme-0042?trk=a",
                ),
                on_site(),
            )
            .unwrap();
        assert_eq!(posting.uid.as_str(), "linkedin:42");
        assert_eq!(posting.source, Source::Linkedin);
        assert_eq!(posting.title, "Dev Rust");
        assert_eq!(posting.company, "Acme");
        assert_eq!(
            posting.canonical_link,
            "https://br.linkedin.com/jobs/view/dev-rust-at-acme-0042"
        );
        assert_eq!(posting.date_posted, "há 2 dias");
        assert_eq!(posting.employment_type, EmploymentType::OnSite);
    }

    #[test]
    fn listing_location_fills_missing_card_location() {
        let n = RecordNormalizer::new(SourceProfile::infojobs(), PhraseSet::new(["são paulo"]));
        let listing = ListingConfig::new("https://www.infojobs.com.br/sp", EmploymentType::Unknown)
            .with_default_location("São Paulo");
        let posting = n
            .normalize(
                fields("Analista", "", "/vaga-de-analista__10495645.aspx"),
                ListingContext::from(&listing),
            )
            .unwrap();
        assert_eq!(posting.location, "São Paulo");
        assert_eq!(posting.uid.as_str(), "infojobs:10495645");
    }
}
