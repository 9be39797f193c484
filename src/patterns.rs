//! # URL Match Patterns
//!
//! WebExtension-style match patterns used to filter which page events reach
//! a registered worker. A pattern is either the special `<all_urls>` token or
//! `<scheme>://<host><path>`, where the scheme may be `*` (http or https),
//! the host may be `*` or `*.domain`, and the path is a glob where `*`
//! matches any sequence of characters.
//!
//! Patterns are parsed eagerly at registration time so invalid patterns fail
//! with [`DispatchError::InvalidPattern`] before any worker is spawned.

use serde::{Deserialize, Serialize};

use crate::constants::ALL_URLS;
use crate::error::{DispatchError, DispatchResult};

/// A single parsed match pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MatchPattern {
    raw: String,
    kind: PatternKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternKind {
    AllUrls,
    Parts {
        scheme: String,
        host: String,
        path: String,
    },
}

impl MatchPattern {
    /// Parse a match pattern string.
    pub fn parse(pattern: &str) -> DispatchResult<Self> {
        if pattern.is_empty() {
            return Err(DispatchError::invalid_pattern(pattern, "empty pattern"));
        }

        if pattern == ALL_URLS {
            return Ok(Self {
                raw: pattern.to_string(),
                kind: PatternKind::AllUrls,
            });
        }

        let (scheme, rest) = pattern.split_once("://").ok_or_else(|| {
            DispatchError::invalid_pattern(pattern, "missing scheme separator")
        })?;

        if scheme.is_empty() || (scheme != "*" && !scheme.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(DispatchError::invalid_pattern(pattern, "invalid scheme"));
        }

        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => {
                return Err(DispatchError::invalid_pattern(pattern, "missing path"));
            }
        };

        if host.is_empty() {
            return Err(DispatchError::invalid_pattern(pattern, "empty host"));
        }

        // Only a bare "*" or a leading "*." wildcard is allowed in the host.
        if host != "*" {
            let literal = host.strip_prefix("*.").unwrap_or(host);
            if literal.contains('*') || literal.is_empty() {
                return Err(DispatchError::invalid_pattern(
                    pattern,
                    "host wildcard must be '*' or a leading '*.'",
                ));
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            kind: PatternKind::Parts {
                scheme: scheme.to_ascii_lowercase(),
                host: host.to_ascii_lowercase(),
                path: path.to_string(),
            },
        })
    }

    /// The original pattern string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern matches the given URL.
    ///
    /// URLs that cannot be split into scheme/host/path never match.
    pub fn matches(&self, url: &str) -> bool {
        let Some((scheme, host, path)) = split_url(url) else {
            return false;
        };

        match &self.kind {
            PatternKind::AllUrls => true,
            PatternKind::Parts {
                scheme: pattern_scheme,
                host: pattern_host,
                path: pattern_path,
            } => {
                scheme_matches(pattern_scheme, &scheme)
                    && host_matches(pattern_host, &host)
                    && glob_matches(pattern_path, &path)
            }
        }
    }
}

impl TryFrom<String> for MatchPattern {
    type Error = DispatchError;

    fn try_from(value: String) -> DispatchResult<Self> {
        Self::parse(&value)
    }
}

impl From<MatchPattern> for String {
    fn from(pattern: MatchPattern) -> Self {
        pattern.raw
    }
}

/// A non-empty set of match patterns; a URL matches the set if it matches
/// any member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPatternSet {
    patterns: Vec<MatchPattern>,
}

impl MatchPatternSet {
    /// Parse a set of pattern strings. The set must be non-empty.
    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> DispatchResult<Self> {
        if patterns.is_empty() {
            return Err(DispatchError::invalid_pattern(
                "",
                "match pattern set must be non-empty",
            ));
        }

        let patterns = patterns
            .iter()
            .map(|p| MatchPattern::parse(p.as_ref()))
            .collect::<DispatchResult<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    /// Convenience set matching every URL.
    pub fn all_urls() -> Self {
        Self {
            patterns: vec![MatchPattern {
                raw: ALL_URLS.to_string(),
                kind: PatternKind::AllUrls,
            }],
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(url))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[MatchPattern] {
        &self.patterns
    }
}

/// Split a URL into (scheme, host, path-with-query), dropping any port,
/// userinfo, and fragment.
fn split_url(url: &str) -> Option<(String, String, String)> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty() {
        return None;
    }

    let rest = rest.split('#').next().unwrap_or(rest);
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let host = authority
        .rsplit('@')
        .next()
        .unwrap_or(authority)
        .split(':')
        .next()
        .unwrap_or(authority);

    if host.is_empty() {
        return None;
    }

    Some((
        scheme.to_ascii_lowercase(),
        host.to_ascii_lowercase(),
        path.to_string(),
    ))
}

fn scheme_matches(pattern: &str, scheme: &str) -> bool {
    if pattern == "*" {
        scheme == "http" || scheme == "https"
    } else {
        pattern == scheme
    }
}

fn host_matches(pattern: &str, host: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(suffix) = pattern.strip_prefix("*.") {
        return host == suffix || host.ends_with(&format!(".{suffix}"));
    }

    pattern == host
}

/// Glob matching where `*` matches any sequence of characters.
fn glob_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    // Iterative wildcard matching with backtracking over the last star.
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}
