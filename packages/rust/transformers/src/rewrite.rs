//! CDN rewrite rule and the table of formats exempt from rewriting.

use std::collections::BTreeSet;

use url::Url;

use coursegraph_shared::{CourseGraphError, DEFAULT_CDN_URL, Result};

/// Rewrites video URLs onto a CDN base, keeping only the path.
///
/// `http://origin/a.mp4` becomes `https://edx-video.net/a.mp4`. URLs already
/// under the CDN base come back unchanged, so applying the rule twice is the
/// same as applying it once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    base: String,
}

impl RewriteRule {
    pub fn new(cdn_base: &str) -> Result<Self> {
        let parsed = Url::parse(cdn_base)
            .map_err(|e| CourseGraphError::config(format!("invalid CDN base '{cdn_base}': {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(CourseGraphError::config(format!(
                "CDN base '{cdn_base}' cannot hold a path"
            )));
        }
        Ok(Self {
            base: cdn_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn cdn_base(&self) -> &str {
        &self.base
    }

    /// Whether `url` already points under the CDN base.
    pub fn is_rewritten(&self, url: &str) -> bool {
        url == self.base
            || url
                .strip_prefix(&self.base)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// The CDN form of `original`, or `None` if it cannot be rewritten.
    pub fn rewrite(&self, original: &str) -> Option<String> {
        if original.is_empty() {
            return None;
        }
        if self.is_rewritten(original) {
            return Some(original.to_string());
        }

        let path = match Url::parse(original) {
            Ok(url) => url.path().to_string(),
            // Protocol-relative: the authority is not part of the path.
            Err(url::ParseError::RelativeUrlWithoutBase) if original.starts_with("//") => {
                Url::parse(&format!("http:{original}")).ok()?.path().to_string()
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => original
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
            Err(_) => return None,
        };

        let rewritten = format!("{}/{}", self.base, path.trim_start_matches('/'));
        Url::parse(&rewritten).ok().map(|_| rewritten)
    }
}

impl Default for RewriteRule {
    fn default() -> Self {
        Self {
            base: DEFAULT_CDN_URL.to_string(),
        }
    }
}

/// Formats whose URLs are never rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatExemptions(BTreeSet<String>);

impl FormatExemptions {
    pub fn contains(&self, format: &str) -> bool {
        self.0.contains(format)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for FormatExemptions {
    fn default() -> Self {
        ["youtube", "fallback"].into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for FormatExemptions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
