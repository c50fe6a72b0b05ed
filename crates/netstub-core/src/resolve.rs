//! URL resolution helpers
//!
//! Relative route patterns and client URLs are resolved against a base origin
//! with WHATWG semantics via the `url` crate. When that fails the base and
//! path are joined textually with exactly one `/`.

use tracing::warn;
use url::Url;

/// True when `raw` starts with `http://` or `https://`, ignoring case
pub fn is_absolute_url(raw: &str) -> bool {
    let lower = raw
        .get(..8)
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| raw.to_ascii_lowercase());
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Resolve `path` against `base`, falling back to a textual join
pub fn join_url(base: &str, path: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(path)) {
        Ok(url) => url.to_string(),
        Err(_) => format!(
            "{}/{}",
            base.strip_suffix('/').unwrap_or(base),
            path.strip_prefix('/').unwrap_or(path)
        ),
    }
}

/// Parse `raw` as a URL, resolving relative input against `base`
///
/// Returns `None` if neither the input nor its join against `base` parses.
pub fn parse_against(raw: &str, base: &str) -> Option<Url> {
    let base_url = match Url::parse(base) {
        Ok(url) => url,
        Err(e) => {
            warn!("Base URL '{}' does not parse: {}", base, e);
            return Url::parse(raw).ok();
        }
    };

    match Url::options().base_url(Some(&base_url)).parse(raw) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("Treating '{}' as unmatched: {}", raw, e);
            None
        }
    }
}

/// Serialised origin of `url`, e.g. `http://localhost:3000`
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}
