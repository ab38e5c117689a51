//! Replacement Finder: asks a [`TextGenerator`] for one substitute URL for a
//! dead study link and validates the shape of the answer.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{info, instrument, warn};

use roadmend_shared::LinkOccurrence;

use crate::generator::TextGenerator;

/// Sentinel the model is told to answer when it has nothing to offer.
pub const NO_REPLACEMENT_SENTINEL: &str = "NO_REPLACEMENT_FOUND";

/// Prompt, raw response, and validated URL of one replacement attempt.
///
/// The prompt and response are kept even when no URL survived validation,
/// so the audit ledger can show what was asked and answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementAttempt {
    pub new_url: Option<String>,
    pub prompt: String,
    pub response: String,
}

/// Finds replacement links through an optional text generator.
///
/// Without a generator the finder is disabled: the orchestrator still records
/// dead links but makes no attempt.
pub struct ReplacementFinder {
    generator: Option<Arc<dyn TextGenerator>>,
    delay: Duration,
}

impl ReplacementFinder {
    pub fn new(generator: Arc<dyn TextGenerator>, delay: Duration) -> Self {
        Self {
            generator: Some(generator),
            delay,
        }
    }

    pub fn disabled() -> Self {
        Self {
            generator: None,
            delay: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    /// Ask for a replacement for `occurrence.url`. Never fails: generator
    /// errors are logged and reported as "no replacement".
    ///
    /// Returns `None` only when the finder is disabled.
    #[instrument(skip_all, fields(url = %occurrence.url, roadmap_id = %occurrence.roadmap_id))]
    pub async fn find_replacement(&self, occurrence: &LinkOccurrence) -> Option<ReplacementAttempt> {
        let generator = self.generator.as_ref()?;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let prompt = build_prompt(occurrence);
        info!(title = %occurrence.title, "asking for replacement link");

        let response = match generator.generate(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "replacement request failed");
                return Some(ReplacementAttempt {
                    new_url: None,
                    prompt,
                    response: format!("Error: {e}"),
                });
            }
        };

        let new_url = parse_replacement(&response);
        match &new_url {
            Some(url) => info!(suggested = %url, "replacement suggested"),
            None => info!("no usable replacement in response"),
        }

        Some(ReplacementAttempt {
            new_url,
            prompt,
            response,
        })
    }
}

/// Build the replacement request for one occurrence.
pub fn build_prompt(occurrence: &LinkOccurrence) -> String {
    format!(
        "You maintain a learning curriculum and one of its resource links is broken.\n\
         \n\
         Career path: {domain}\n\
         Step title: {title}\n\
         Step description: {description}\n\
         Broken link: {url}\n\
         \n\
         Suggest ONE publicly accessible, currently valid URL that best replaces the broken \
         link for this step.\n\
         Prefer, in order:\n\
         1. Official documentation (python.org, react.dev, developer.mozilla.org, ...)\n\
         2. Reputable free education platforms (freeCodeCamp, Khan Academy, W3Schools, ...)\n\
         3. Well-known technical tutorial sites (DigitalOcean, Real Python, ...)\n\
         \n\
         Do not suggest search engine result pages.\n\
         Do not suggest paid course platforms unless the page itself is a free article.\n\
         \n\
         Reply with the URL only: no explanation, no markdown, no quotes. \
         If nothing suitable exists, reply exactly {NO_REPLACEMENT_SENTINEL}.",
        domain = occurrence.domain,
        title = occurrence.title,
        description = occurrence.description,
        url = occurrence.url,
    )
}

/// Extract a usable URL from a raw model answer.
///
/// Quote and backtick characters are stripped first. The result is rejected
/// when empty, when it carries the no-replacement sentinel, when it contains
/// whitespace, or when it is not an absolute http(s) URL.
pub fn parse_replacement(raw: &str) -> Option<String> {
    static QUOTES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"[`'"]"#).expect("valid regex"));

    let cleaned = QUOTES_RE.replace_all(raw, "");
    let cleaned = cleaned.trim();

    if cleaned.is_empty()
        || cleaned.to_uppercase().contains(NO_REPLACEMENT_SENTINEL)
        || cleaned.chars().any(char::is_whitespace)
    {
        return None;
    }
    if !(cleaned.starts_with("http://") || cleaned.starts_with("https://")) {
        return None;
    }
    Some(cleaned.to_string())
}
