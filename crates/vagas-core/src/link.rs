//! Link canonicalization: collapse tracking and pagination noise so the same
//! posting always yields the same string.

use url::Url;

use crate::profile::SourceProfile;

/// Parses `raw_link` as an absolute http(s) URL, resolving relative links
/// against the profile's base URL.
pub fn parse_link(raw_link: &str, profile: &SourceProfile) -> Option<Url> {
    let trimmed = raw_link.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => profile.base_url.as_ref()?.join(trimmed).ok()?,
        Err(_) => return None,
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str()?;
    Some(parsed)
}

/// Canonical form of a posting link, or `None` when the link cannot be parsed.
///
/// On a host owned by the source whose path starts with the id-bearing pattern,
/// the link is rebuilt from scheme, host and the matched path prefix. Anything
/// else keeps its full path. Query, fragment and credentials are always dropped.
pub fn canonicalize(raw_link: &str, profile: &SourceProfile) -> Option<String> {
    let url = parse_link(raw_link, profile)?;
    let host = url.host_str()?;

    let path = if profile.owns_host(host) {
        profile
            .match_id_path(url.path())
            .map(|(prefix, _)| prefix)
            .unwrap_or_else(|| url.path())
    } else {
        url.path()
    };

    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    Some(format!("{}://{}{}{}", url.scheme(), host, port, path))
}
