//! Per-source field extractors over rendered listing HTML.
//!
//! Each source's markup has changed over time, so every field is looked up
//! through an ordered chain of selectors; the first one that yields text wins.

use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use vagas_core::text::fold;
use vagas_core::{ExtractedFields, Source};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },
    #[error("fragment {index} carries no title, link or posting id")]
    EmptyFragment { index: usize },
    #[error("no posting card found in fragment")]
    NoCard,
}

/// Everything extracted from one listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedPage {
    pub fragments: usize,
    pub records: Vec<ExtractedFields>,
    #[serde(skip)]
    pub errors: Vec<ExtractionError>,
}

pub trait FieldExtractor: Send + Sync {
    fn source(&self) -> Source;

    /// Splits a page into posting cards and extracts each one. A malformed card
    /// is reported in `errors` and never aborts the rest of the page.
    fn extract_page(&self, html: &str) -> ExtractedPage;

    /// Extracts a single card given as an HTML fragment.
    fn extract_fragment(&self, fragment_html: &str) -> Result<ExtractedFields, ExtractionError>;
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(selector).map_err(|e| ExtractionError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn squash_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    squash_whitespace(&element.text().collect::<String>())
}

/// First non-empty text found by trying `selectors` in order.
fn first_text(scope: ElementRef<'_>, selectors: &[&str]) -> Result<Option<String>, ExtractionError> {
    for selector in selectors {
        let sel = parse_selector(selector)?;
        if let Some(text) = scope
            .select(&sel)
            .map(element_text)
            .find(|t| !t.is_empty())
        {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

fn first_attr(
    scope: ElementRef<'_>,
    selectors: &[&str],
    attr: &str,
) -> Result<Option<String>, ExtractionError> {
    for selector in selectors {
        let sel = parse_selector(selector)?;
        if let Some(value) = scope
            .select(&sel)
            .filter_map(|n| n.value().attr(attr))
            .map(str::trim)
            .find(|v| !v.is_empty())
        {
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

fn own_attr(element: ElementRef<'_>, attrs: &[&str]) -> Option<String> {
    attrs
        .iter()
        .filter_map(|a| element.value().attr(a))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Cards matched by the first selector in the chain that matches anything.
fn select_cards<'a>(
    scope: ElementRef<'a>,
    selectors: &[&str],
) -> Result<Vec<ElementRef<'a>>, ExtractionError> {
    for selector in selectors {
        let sel = parse_selector(selector)?;
        let cards = scope.select(&sel).collect::<Vec<_>>();
        if !cards.is_empty() {
            return Ok(cards);
        }
    }
    Ok(Vec::new())
}

fn is_blank(fields: &ExtractedFields) -> bool {
    fields.title.is_empty() && fields.raw_link.is_empty() && fields.native_id_hint.is_none()
}

fn extract_cards<F>(cards: Vec<ElementRef<'_>>, mut extract: F) -> ExtractedPage
where
    F: FnMut(ElementRef<'_>) -> Result<ExtractedFields, ExtractionError>,
{
    let mut page = ExtractedPage {
        fragments: cards.len(),
        ..Default::default()
    };
    for (index, card) in cards.into_iter().enumerate() {
        match extract(card) {
            Ok(fields) if is_blank(&fields) => {
                page.errors.push(ExtractionError::EmptyFragment { index })
            }
            Ok(fields) => page.records.push(fields),
            Err(err) => page.errors.push(err),
        }
    }
    page
}

const LINKEDIN_CARDS: &[&str] = &["div.job-card-container", "div.base-card"];
const LINKEDIN_TITLE: &[&str] = &["h3.base-search-card__title", "h3.base-card__title"];
const LINKEDIN_COMPANY: &[&str] = &[
    "h4.base-search-card__company-name",
    "h4.base-card__company-name",
];
const LINKEDIN_LOCATION: &[&str] = &[
    "span.job-card-container__location",
    "span.job-search-card__location",
];
const LINKEDIN_LINK: &[&str] = &["a.base-card__full-link", "a.result-card__full-card-link"];
const LINKEDIN_EMPLOYMENT: &[&str] = &["span.job-search-card__employment-type"];
const LINKEDIN_ID_ATTRS: &[&str] = &["data-entity-urn", "data-job-id"];

/// Guest job-search result cards on linkedin.com.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkedinExtractor;

impl LinkedinExtractor {
    fn extract_card(&self, card: ElementRef<'_>) -> Result<ExtractedFields, ExtractionError> {
        let native_id_hint = own_attr(card, LINKEDIN_ID_ATTRS)
            .or(first_attr(card, &["[data-entity-urn]"], "data-entity-urn")?);
        Ok(ExtractedFields {
            title: first_text(card, LINKEDIN_TITLE)?.unwrap_or_default(),
            company: first_text(card, LINKEDIN_COMPANY)?.unwrap_or_default(),
            location: first_text(card, LINKEDIN_LOCATION)?.unwrap_or_default(),
            raw_link: first_attr(card, LINKEDIN_LINK, "href")?.unwrap_or_default(),
            employment_hint: first_text(card, LINKEDIN_EMPLOYMENT)?.unwrap_or_default(),
            native_id_hint,
            date_posted: first_text(card, &["time"])?
                .map(|t| t.to_lowercase())
                .unwrap_or_default(),
        })
    }
}

impl FieldExtractor for LinkedinExtractor {
    fn source(&self) -> Source {
        Source::Linkedin
    }

    fn extract_page(&self, html: &str) -> ExtractedPage {
        let document = Html::parse_document(html);
        match select_cards(document.root_element(), LINKEDIN_CARDS) {
            Ok(cards) => {
                debug!(cards = cards.len(), "linkedin cards found");
                extract_cards(cards, |card| self.extract_card(card))
            }
            Err(err) => ExtractedPage {
                errors: vec![err],
                ..Default::default()
            },
        }
    }

    fn extract_fragment(&self, fragment_html: &str) -> Result<ExtractedFields, ExtractionError> {
        let fragment = Html::parse_fragment(fragment_html);
        let root = fragment.root_element();
        let card = select_cards(root, LINKEDIN_CARDS)?
            .into_iter()
            .next()
            .unwrap_or(root);
        let fields = self.extract_card(card)?;
        if is_blank(&fields) {
            return Err(ExtractionError::EmptyFragment { index: 0 });
        }
        Ok(fields)
    }
}

pub const INFOJOBS_BASE_URL: &str = "https://www.infojobs.com.br";
const INFOJOBS_CARD: &str = r#"div[class*="card"]"#;
const INFOJOBS_VACANCY_LINK: &str = r#"a[href^="/vaga-de-"]"#;
const INFOJOBS_ID_ATTRS: &[&str] = &["data-id", "data-vacancy-id"];
const BR_STATE_CODES: &[&str] = &[
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB",
    "PR", "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

/// State listing pages on infojobs.com.br. Cards carry little structure, so
/// spans are classified by content.
#[derive(Debug, Clone, Copy, Default)]
pub struct InfojobsExtractor;

fn looks_like_location(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| BR_STATE_CODES.contains(&word))
}

fn looks_like_work_mode(text: &str) -> bool {
    let folded = fold(text);
    ["presencial", "home office", "hibrido", "remoto"]
        .iter()
        .any(|needle| folded.contains(needle))
}

fn looks_like_date(text: &str) -> bool {
    let folded = fold(text);
    folded == "hoje" || folded == "ontem" || folded.starts_with("ha ")
}

impl InfojobsExtractor {
    fn cards<'a>(&self, scope: ElementRef<'a>) -> Result<Vec<ElementRef<'a>>, ExtractionError> {
        let card_sel = parse_selector(INFOJOBS_CARD)?;
        let link_sel = parse_selector(INFOJOBS_VACANCY_LINK)?;
        let has_vacancy = |el: &ElementRef<'_>| el.select(&link_sel).next().is_some();

        // Nested wrappers also carry "card" classes; keep the innermost one.
        Ok(scope
            .select(&card_sel)
            .filter(|card| has_vacancy(card))
            .filter(|card| !card.select(&card_sel).any(|inner| has_vacancy(&inner)))
            .collect())
    }

    fn extract_card(&self, card: ElementRef<'_>) -> Result<ExtractedFields, ExtractionError> {
        let link_sel = parse_selector(INFOJOBS_VACANCY_LINK)?;
        let span_sel = parse_selector("span")?;

        let anchor = card.select(&link_sel).next();
        let title = anchor.map(element_text).unwrap_or_default();
        let raw_link = anchor
            .and_then(|a| a.value().attr("href"))
            .map(|href| format!("{INFOJOBS_BASE_URL}{}", href.trim()))
            .unwrap_or_default();

        let spans = card
            .select(&span_sel)
            .map(element_text)
            .filter(|t| !t.is_empty() && *t != title)
            .collect::<Vec<_>>();

        let location = spans
            .iter()
            .find(|t| looks_like_location(t))
            .cloned()
            .unwrap_or_default();
        let employment_hint = spans
            .iter()
            .find(|t| looks_like_work_mode(t))
            .cloned()
            .unwrap_or_default();
        let date_posted = spans
            .iter()
            .find(|t| looks_like_date(t))
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| "hoje".to_string());
        let company = spans
            .iter()
            .find(|t| !looks_like_location(t) && !looks_like_work_mode(t) && !looks_like_date(t))
            .cloned()
            .unwrap_or_default();

        Ok(ExtractedFields {
            title,
            company,
            location,
            raw_link,
            employment_hint,
            native_id_hint: own_attr(card, INFOJOBS_ID_ATTRS),
            date_posted,
        })
    }
}

impl FieldExtractor for InfojobsExtractor {
    fn source(&self) -> Source {
        Source::Infojobs
    }

    fn extract_page(&self, html: &str) -> ExtractedPage {
        let document = Html::parse_document(html);
        match self.cards(document.root_element()) {
            Ok(cards) => {
                debug!(cards = cards.len(), "infojobs cards found");
                extract_cards(cards, |card| self.extract_card(card))
            }
            Err(err) => ExtractedPage {
                errors: vec![err],
                ..Default::default()
            },
        }
    }

    fn extract_fragment(&self, fragment_html: &str) -> Result<ExtractedFields, ExtractionError> {
        let fragment = Html::parse_fragment(fragment_html);
        let card = self
            .cards(fragment.root_element())?
            .into_iter()
            .next()
            .ok_or(ExtractionError::NoCard)?;
        let fields = self.extract_card(card)?;
        if is_blank(&fields) {
            return Err(ExtractionError::EmptyFragment { index: 0 });
        }
        Ok(fields)
    }
}

pub fn extractor_for_source(source: &Source) -> Option<Arc<dyn FieldExtractor>> {
    match source {
        Source::Linkedin => Some(Arc::new(LinkedinExtractor)),
        Source::Infojobs => Some(Arc::new(InfojobsExtractor)),
        Source::Other(_) => None,
    }
}
