//! URL masking
//!
//! Rewrites the path of a tracked URL to the first mask pattern it matches,
//! so identifiers embedded in paths (`/user/8812/settings`) never leave the
//! page. Each pattern segment is either a literal or `*`, which matches
//! exactly one path segment. Only the path is compared and replaced; scheme,
//! host, query and fragment are kept.

use crate::error::{Error, Result};
use glob::{MatchOptions, Pattern};
use url::Url;

const WILDCARD: &str = "*";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A compiled mask path such as `/product/*/detail/*`
#[derive(Debug, Clone)]
pub struct MaskPattern {
    raw: String,
    segments: usize,
    /// Indices of `*` segments
    wildcards: Vec<usize>,
    glob: Pattern,
}

impl MaskPattern {
    /// Compile a mask path.
    ///
    /// Only a segment that is exactly `*` is a wildcard. Every other segment
    /// is escaped, so `[`, `]` and `?` are matched literally.
    pub fn new(raw: &str) -> Result<Self> {
        let mut wildcards = Vec::new();
        let escaped: Vec<String> = raw
            .split('/')
            .enumerate()
            .map(|(i, segment)| {
                if segment == WILDCARD {
                    wildcards.push(i);
                    WILDCARD.to_string()
                } else {
                    Pattern::escape(segment)
                }
            })
            .collect();

        let glob = Pattern::new(&escaped.join("/"))
            .map_err(|e| Error::Config(format!("invalid mask path {:?}: {}", raw, e)))?;
        Ok(Self {
            raw: raw.to_string(),
            segments: escaped.len(),
            wildcards,
            glob,
        })
    }

    /// The pattern as written, which is also the replacement path.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `path` has the same number of segments, every literal
    /// segment is equal and every `*` covers a non-empty segment.
    pub fn matches(&self, path: &str) -> bool {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() != self.segments {
            return false;
        }
        if self.wildcards.iter().any(|&i| segments[i].is_empty()) {
            return false;
        }
        self.glob.matches_with(path, MATCH_OPTIONS)
    }

    /// Longer patterns first. Ties keep their configured order.
    pub fn sort_by_specificity(patterns: &mut [MaskPattern]) {
        patterns.sort_by(|a, b| b.raw.len().cmp(&a.raw.len()));
    }
}

/// Mask `url` with the first matching pattern, in the order given.
///
/// Returns the input unchanged when no pattern matches, the list is empty or
/// the URL cannot be parsed.
pub fn mask_url(url: &str, patterns: &[MaskPattern]) -> String {
    if patterns.is_empty() {
        return url.to_string();
    }

    let mut parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return url.to_string(),
    };

    match patterns.iter().find(|p| p.matches(parsed.path())) {
        Some(pattern) => {
            parsed.set_path(pattern.as_str());
            parsed.to_string()
        }
        None => url.to_string(),
    }
}
