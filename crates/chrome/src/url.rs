//! URL filters for matching correlated events.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

/// Predicate over a candidate URL.
///
/// `Any` matches everything, as does `Prefix("")`. `Base` strips everything
/// from the first `?` in the *pattern* (not the candidate) before doing a
/// prefix test.
#[derive(Clone, Default)]
pub enum UrlFilter {
    #[default]
    Any,
    Prefix(String),
    Suffix(String),
    Contains(String),
    Equal(String),
    Base(String),
    Pattern(Regex),
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl UrlFilter {
    /// Externally supplied matcher.
    pub fn custom(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(p) => url.starts_with(p),
            Self::Suffix(s) => url.ends_with(s),
            Self::Contains(s) => url.contains(s),
            Self::Equal(s) => url == s,
            Self::Base(p) => {
                let base = match p.find('?') {
                    Some(i) if i > 0 => &p[..i],
                    _ => p.as_str(),
                };
                url.starts_with(base)
            }
            Self::Pattern(re) => re.is_match(url),
            Self::Custom(f) => f(url),
        }
    }
}

impl From<&str> for UrlFilter {
    fn from(s: &str) -> Self {
        Self::Prefix(s.to_string())
    }
}

impl From<String> for UrlFilter {
    fn from(s: String) -> Self {
        Self::Prefix(s)
    }
}

impl From<Regex> for UrlFilter {
    fn from(re: Regex) -> Self {
        Self::Pattern(re)
    }
}

impl fmt::Debug for UrlFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Prefix(s) => f.debug_tuple("Prefix").field(s).finish(),
            Self::Suffix(s) => f.debug_tuple("Suffix").field(s).finish(),
            Self::Contains(s) => f.debug_tuple("Contains").field(s).finish(),
            Self::Equal(s) => f.debug_tuple("Equal").field(s).finish(),
            Self::Base(s) => f.debug_tuple("Base").field(s).finish(),
            Self::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_match() {
        let url = "https://example.com/files/report.pdf?test=true";
        let cases = [
            UrlFilter::from("https://example.com"),
            UrlFilter::Prefix("https://example.com".into()),
            UrlFilter::Suffix("test=true".into()),
            UrlFilter::Contains("report".into()),
            UrlFilter::Equal("https://example.com/files/report.pdf?test=true".into()),
            UrlFilter::Base("https://example.com/files/report.pdf?base=true".into()),
            UrlFilter::from(Regex::new(r"^https://example\.com/files/report\.pdf\?test=true$").unwrap()),
            UrlFilter::custom(|u| u.starts_with("https://")),
        ];
        for filter in cases {
            assert!(filter.matches(url), "want true, got false: {filter:?}");
        }
    }

    #[test]
    fn empty_and_any_match_everything() {
        for url in ["", "https://example.com", "not a url"] {
            assert!(UrlFilter::Any.matches(url));
            assert!(UrlFilter::from("").matches(url));
        }
    }

    #[test]
    fn base_strips_pattern_query_only() {
        let filter = UrlFilter::Base("https://example.com/path?discarded=1".into());
        assert!(filter.matches("https://example.com/path"));
        assert!(filter.matches("https://example.com/path?other=2"));
        // Candidate still has to carry the pre-`?` prefix.
        assert!(!filter.matches("https://example.com/other"));
        assert!(!filter.matches("https://elsewhere.org/path"));
    }

    #[test]
    fn base_keeps_pattern_with_leading_question_mark() {
        let filter = UrlFilter::Base("?query".into());
        assert!(filter.matches("?query=value"));
        assert!(!filter.matches("query=value"));
    }

    #[test]
    fn mismatches() {
        let url = "https://example.com/a";
        assert!(!UrlFilter::from("https://github.com").matches(url));
        assert!(!UrlFilter::Suffix("/b".into()).matches(url));
        assert!(!UrlFilter::Equal("https://example.com/".into()).matches(url));
    }
}
