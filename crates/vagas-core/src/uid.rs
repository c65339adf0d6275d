//! Job UID resolution.
//!
//! Rules are tried in order and the first hit wins: a native id stated by the
//! source's markup, the id embedded in the canonical path, a known identifying
//! query parameter on the raw link (tagged `trk:`), and finally a content hash
//! of the canonical link (tagged `h:`).

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::link::{canonicalize, parse_link};
use crate::profile::SourceProfile;
use crate::JobUid;

const HASH_HEX_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UidUnresolvable {
    #[error("raw link is empty")]
    EmptyLink,
    #[error("raw link {0:?} is not an absolute http(s) URL")]
    UnparsableLink(String),
}

/// Auxiliary signals captured from the markup surrounding a link.
#[derive(Debug, Clone, Copy, Default)]
pub struct UidHints<'a> {
    pub native_id: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UidRule {
    MarkupId,
    PathId,
    QueryId,
    ContentHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub uid: JobUid,
    pub canonical_link: String,
    pub rule: UidRule,
}

pub fn resolve_uid(
    raw_link: &str,
    profile: &SourceProfile,
    hints: UidHints<'_>,
) -> Result<ResolvedIdentity, UidUnresolvable> {
    if raw_link.trim().is_empty() {
        return Err(UidUnresolvable::EmptyLink);
    }
    let canonical_link = canonicalize(raw_link, profile)
        .ok_or_else(|| UidUnresolvable::UnparsableLink(raw_link.to_string()))?;
    let source = &profile.source;

    if let Some(id) = hints.native_id.and_then(normalize_numeric_id) {
        return Ok(ResolvedIdentity {
            uid: JobUid::from_parts(source, &id),
            canonical_link,
            rule: UidRule::MarkupId,
        });
    }

    if let Some(id) = path_native_id(&canonical_link, profile) {
        return Ok(ResolvedIdentity {
            uid: JobUid::from_parts(source, &id),
            canonical_link,
            rule: UidRule::PathId,
        });
    }

    if let Some(id) = query_native_id(raw_link, profile) {
        return Ok(ResolvedIdentity {
            uid: JobUid::from_parts(source, &format!("trk:{id}")),
            canonical_link,
            rule: UidRule::QueryId,
        });
    }

    let digest = content_hash(&canonical_link, source.as_str());
    Ok(ResolvedIdentity {
        uid: JobUid::from_parts(source, &format!("h:{digest}")),
        canonical_link,
        rule: UidRule::ContentHash,
    })
}

/// Normalizes an id whose encoding drifts between visits: URN wrappers such as
/// `urn:li:jobPosting:555` keep their trailing digits and leading zeros are
/// dropped.
pub fn normalize_numeric_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    let digits = &trimmed[start..];
    let stripped = digits.trim_start_matches('0');
    Some(if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    })
}

fn path_native_id(canonical_link: &str, profile: &SourceProfile) -> Option<String> {
    let url = url::Url::parse(canonical_link).ok()?;
    if !profile.owns_host(url.host_str()?) {
        return None;
    }
    let (_, id) = profile.match_id_path(url.path())?;
    normalize_numeric_id(id)
}

fn query_native_id(raw_link: &str, profile: &SourceProfile) -> Option<String> {
    if profile.id_query_params.is_empty() {
        return None;
    }
    let url = parse_link(raw_link, profile)?;
    let found = url.query_pairs().find_map(|(key, value)| {
        profile
            .id_query_params
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&key))
            .then(|| value.into_owned())
    });
    let value = found?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else if value.chars().all(|c| c.is_ascii_digit()) {
        normalize_numeric_id(value)
    } else {
        Some(value.to_string())
    }
}

fn content_hash(canonical_link: &str, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_link.as_bytes());
    hasher.update(source.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(HASH_HEX_LEN);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Source;

    fn site_a() -> SourceProfile {
        SourceProfile::generic(Source::parse("siteA"))
            .with_domains(["x.example"])
            .with_id_path_pattern(r"^/jobs/view/(\d+)")
            .unwrap()
            .with_id_query_params(["currentJobId"])
    }

    #[test]
    fn tracking_variants_share_a_path_uid() {
        let profile = site_a();
        let a = resolve_uid("https://x.example/jobs/view/555?utm=abc", &profile, UidHints::default())
            .unwrap();
        let b = resolve_uid("https://x.example/jobs/view/555?utm=xyz", &profile, UidHints::default())
            .unwrap();
        assert_eq!(a.uid.as_str(), "siteA:555");
        assert_eq!(a.canonical_link, "https://x.example/jobs/view/555");
        assert_eq!(a.rule, UidRule::PathId);
        assert_eq!(a, b);
    }

    #[test]
    fn markup_id_beats_conflicting_query_id() {
        let profile = site_a();
        let resolved = resolve_uid(
            "https://x.example/search?currentJobId=999",
            &profile,
            UidHints {
                native_id: Some("urn:li:jobPosting:123"),
            },
        )
        .unwrap();
        assert_eq!(resolved.uid.as_str(), "siteA:123");
        assert_eq!(resolved.rule, UidRule::MarkupId);
    }

    #[test]
    fn markup_id_beats_path_id() {
        let resolved = resolve_uid(
            "https://x.example/jobs/view/555",
            &site_a(),
            UidHints {
                native_id: Some("777"),
            },
        )
        .unwrap();
        assert_eq!(resolved.uid.as_str(), "siteA:777");
    }

    #[test]
    fn query_ids_are_tagged_apart_from_path_ids() {
        let profile = site_a();
        let query = resolve_uid(
            "https://x.example/jobs/search?currentJobId=555&start=25",
            &profile,
            UidHints::default(),
        )
        .unwrap();
        assert_eq!(query.uid.as_str(), "siteA:trk:555");
        assert_eq!(query.rule, UidRule::QueryId);
        assert_eq!(query.canonical_link, "https://x.example/jobs/search");

        let path = resolve_uid("https://x.example/jobs/view/555", &profile, UidHints::default())
            .unwrap();
        assert_ne!(query.uid, path.uid);
    }

    #[test]
    fn non_numeric_query_values_are_kept_verbatim() {
        let resolved = resolve_uid(
            "https://x.example/jobs/search?currentJobId=%20abc-9%20",
            &site_a(),
            UidHints::default(),
        )
        .unwrap();
        assert_eq!(resolved.uid.as_str(), "siteA:trk:abc-9");
        assert_eq!(resolved.rule, UidRule::QueryId);
    }

    #[test]
    fn blank_query_values_fall_through_to_the_hash() {
        let resolved = resolve_uid(
            "https://x.example/jobs/search?currentJobId=%20",
            &site_a(),
            UidHints::default(),
        )
        .unwrap();
        assert_eq!(resolved.rule, UidRule::ContentHash);
        assert!(resolved.uid.as_str().starts_with("siteA:h:"));
        assert_eq!(resolved.uid.as_str().len(), "siteA:h:".len() + HASH_HEX_LEN);
    }

    #[test]
    fn hash_uid_is_deterministic_and_ignores_query_noise() {
        let profile = SourceProfile::generic(Source::parse("siteB"));
        let a = resolve_uid("https://b.example/post/abc?x=1", &profile, UidHints::default()).unwrap();
        let b = resolve_uid("https://b.example/post/abc?x=2", &profile, UidHints::default()).unwrap();
        let c = resolve_uid("https://b.example/post/abc?x=1", &profile, UidHints::default()).unwrap();
        assert_eq!(a.uid, b.uid);
        assert_eq!(a, c);
    }

    #[test]
    fn hash_is_namespaced_by_source() {
        let a = resolve_uid(
            "https://b.example/post/abc",
            &SourceProfile::generic(Source::parse("one")),
            UidHints::default(),
        )
        .unwrap();
        let b = resolve_uid(
            "https://b.example/post/abc",
            &SourceProfile::generic(Source::parse("two")),
            UidHints::default(),
        )
        .unwrap();
        assert_ne!(a.uid.as_str()["one:h:".len()..], b.uid.as_str()["two:h:".len()..]);
    }

    #[test]
    fn id_encoding_drift_resolves_to_the_same_uid() {
        let profile = SourceProfile::linkedin();
        let from_path = resolve_uid(
            "https://br.linkedin.com/jobs/view/dev-at-acme-0042?trk=x",
            &profile,
            UidHints::default(),
        )
        .unwrap();
        let from_markup = resolve_uid(
            "https://www.linkedin.com/jobs/view/dev-42",
            &profile,
            UidHints {
                native_id: Some("urn:li:jobPosting:42"),
            },
        )
        .unwrap();
        assert_eq!(from_path.uid.as_str(), "linkedin:42");
        assert_eq!(from_path.uid, from_markup.uid);
    }

    #[test]
    fn inner_digits_of_a_slug_are_not_a_posting_id() {
        let profile = SourceProfile::linkedin();
        let dev = resolve_uid(
            "https://www.linkedin.com/jobs/view/python-3-developer?trk=a",
            &profile,
            UidHints::default(),
        )
        .unwrap();
        let lead = resolve_uid(
            "https://www.linkedin.com/jobs/view/python-3-senior-lead",
            &profile,
            UidHints::default(),
        )
        .unwrap();
        assert_eq!(dev.canonical_link, "https://www.linkedin.com/jobs/view/python-3-developer");
        assert_eq!(dev.rule, UidRule::ContentHash);
        assert_ne!(dev.uid, lead.uid);

        let suffixed = resolve_uid(
            "https://www.linkedin.com/jobs/view/3812345678abc",
            &profile,
            UidHints::default(),
        )
        .unwrap();
        assert_eq!(suffixed.canonical_link, "https://www.linkedin.com/jobs/view/3812345678abc");
        assert_ne!(suffixed.uid.as_str(), "linkedin:3812345678");
    }

    #[test]
    fn empty_or_unparsable_links_are_unresolvable() {
        let profile = site_a();
        let hints = UidHints {
            native_id: Some("123"),
        };
        assert_eq!(resolve_uid("", &profile, hints), Err(UidUnresolvable::EmptyLink));
        assert_eq!(
            resolve_uid("not a url", &profile, hints),
            Err(UidUnresolvable::UnparsableLink("not a url".into()))
        );
    }

    #[test]
    fn numeric_ids_normalize() {
        assert_eq!(normalize_numeric_id("0555").as_deref(), Some("555"));
        assert_eq!(normalize_numeric_id("urn:li:jobPosting:3812345678").as_deref(), Some("3812345678"));
        assert_eq!(normalize_numeric_id("000").as_deref(), Some("0"));
        assert_eq!(normalize_numeric_id("abc"), None);
        assert_eq!(normalize_numeric_id(""), None);
    }
}
