//! URL handling module for Harvest-Ripple
//!
//! This module provides link resolution and URL normalization used before
//! discovered links reach the frontier.

mod normalize;

pub use normalize::normalize_url;

use crate::{UrlError, UrlResult};
use url::Url;

/// Resolves a link href against the page it was found on
///
/// Returns `Ok(None)` for links that are skipped on purpose:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links (same page anchors)
///
/// Hrefs that do not resolve to a usable HTTP(S) URL are errors, so callers
/// can count them. Accepted links are returned normalized (see
/// [`normalize_url`]).
///
/// # Examples
///
/// ```
/// use harvest_ripple::url::resolve_link;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/wiki/Category:Rust").unwrap();
/// let link = resolve_link("/wiki/Cargo#History", &base).unwrap().unwrap();
/// assert_eq!(link.as_str(), "https://example.com/wiki/Cargo");
/// assert!(resolve_link("mailto:someone@example.com", &base).unwrap().is_none());
/// assert!(resolve_link("ftp://example.com/file", &base).is_err());
/// ```
pub fn resolve_link(href: &str, base_url: &Url) -> UrlResult<Option<Url>> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return Ok(None);
    }

    let lowered = href.to_ascii_lowercase();
    if lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:")
        || lowered.starts_with("tel:")
        || lowered.starts_with("data:")
    {
        return Ok(None);
    }

    let absolute = base_url
        .join(href)
        .map_err(|e| UrlError::Parse(format!("{}: {}", href, e)))?;
    normalize_url(absolute.as_str()).map(Some)
}
