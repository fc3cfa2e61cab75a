//! Rewrites CSS/JS references in rendered HTML to point at minified copies.

use std::{cell::RefCell, collections::HashSet, rc::Rc, time::Instant};

use aho_corasick::{AhoCorasick, MatchKind};
use lol_html::{RewriteStrSettings, element, rewrite_str};
use metrics::histogram;
use thiserror::Error;
use tracing::{debug, warn};

use super::{
    assets::{AssetCache, AssetOutcome},
    keys::AssetKind,
    resolver,
};

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("failed to parse document: {0}")]
    Parse(String),
    #[error("failed to build substitution patterns: {0}")]
    Pattern(#[from] aho_corasick::BuildError),
}

/// A stylesheet or script reference found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    pub original_url: String,
    pub kind: AssetKind,
}

/// Summary of a rewrite pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub found: usize,
    pub internal: usize,
    pub minified: usize,
    pub reused: usize,
    pub fallback: usize,
}

#[derive(Clone)]
pub struct HtmlRewriter {
    assets: AssetCache,
    site_base: String,
}

impl HtmlRewriter {
    /// `site_base` must end with `/`.
    pub fn new(assets: AssetCache, site_base: impl Into<String>) -> Self {
        Self {
            assets,
            site_base: site_base.into(),
        }
    }

    pub fn assets(&self) -> &AssetCache {
        &self.assets
    }

    /// Rewrite `html`, returning it unchanged when minification is disabled or when
    /// anything goes wrong.
    pub fn rewrite(&self, html: &str, minify_enabled: bool) -> String {
        if !minify_enabled {
            return html.to_string();
        }

        let started_at = Instant::now();
        match self.try_rewrite(html) {
            Ok((rewritten, report)) => {
                let elapsed = started_at.elapsed();
                histogram!("pagestash_rewrite_ms").record(elapsed.as_secs_f64() * 1000.0);
                debug!(
                    target = "pagestash::cache::rewrite",
                    op = "rewrite::rewrite",
                    result = "ok",
                    found = report.found,
                    internal = report.internal,
                    minified = report.minified,
                    reused = report.reused,
                    fallback = report.fallback,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Asset references rewritten"
                );
                rewritten
            }
            Err(err) => {
                warn!(
                    target = "pagestash::cache::rewrite",
                    op = "rewrite::rewrite",
                    result = "error",
                    error = %err,
                    "Failed to rewrite asset references; serving document unchanged"
                );
                html.to_string()
            }
        }
    }

    /// Rewrite without the degrade-to-original fallback.
    pub fn try_rewrite(&self, html: &str) -> Result<(String, RewriteReport), RewriteError> {
        let references = extract_references(html)?;
        let mut report = RewriteReport {
            found: references.len(),
            ..RewriteReport::default()
        };

        let mut originals = Vec::new();
        let mut replacements = Vec::new();
        for reference in references {
            if !resolver::is_internal(&reference.original_url, &self.site_base) {
                continue;
            }
            report.internal += 1;

            let resolved = resolver::resolve(&reference.original_url, &self.site_base);
            let url = self.assets.url_for(&resolved, reference.kind);
            match url.outcome {
                AssetOutcome::Minified => report.minified += 1,
                AssetOutcome::Reused => report.reused += 1,
                AssetOutcome::Fallback => report.fallback += 1,
            }
            originals.push(reference.original_url);
            replacements.push(url.url);
        }

        Ok((substitute(html, &originals, &replacements)?, report))
    }
}

/// Collect `link[href*=".css"]` and `script[src*=".js"]` references in document order.
pub fn extract_references(html: &str) -> Result<Vec<AssetReference>, RewriteError> {
    let found = Rc::new(RefCell::new(Vec::new()));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!(r#"link[href*=".css"]"#, {
                    let found = Rc::clone(&found);
                    move |el| {
                        if let Some(href) = el.get_attribute("href") {
                            found.borrow_mut().push(AssetReference {
                                original_url: href,
                                kind: AssetKind::Css,
                            });
                        }
                        Ok(())
                    }
                }),
                element!(r#"script[src*=".js"]"#, {
                    let found = Rc::clone(&found);
                    move |el| {
                        if let Some(src) = el.get_attribute("src") {
                            found.borrow_mut().push(AssetReference {
                                original_url: src,
                                kind: AssetKind::Js,
                            });
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RewriteError::Parse(err.to_string()))?;

    Ok(found.take())
}

/// Replace every occurrence of each original with its replacement in one pass over
/// `html`. Where originals overlap, the longest match at a position wins, so a URL
/// that is a prefix of another never corrupts it.
fn substitute(
    html: &str,
    originals: &[String],
    replacements: &[String],
) -> Result<String, RewriteError> {
    let mut seen = HashSet::new();
    let mut patterns = Vec::new();
    let mut targets = Vec::new();
    for (original, replacement) in originals.iter().zip(replacements) {
        if original.is_empty() || !seen.insert(original.as_str()) {
            continue;
        }
        patterns.push(original.as_str());
        targets.push(replacement.as_str());
    }

    if patterns.is_empty() {
        return Ok(html.to_string());
    }

    let matcher = AhoCorasick::builder()
        .match_kind(MatchKind::LeftmostLongest)
        .build(&patterns)?;
    Ok(matcher.replace_all(html, &targets))
}
