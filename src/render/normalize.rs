//! Reply normalization: reasoning markup removal and Markdown rendering.

use std::sync::LazyLock;

use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html};
use regex::Regex;

use crate::domain::config::ReasoningMode;

/// Opening tag some models emit around their reasoning.
pub const REASONING_OPEN_TAG: &str = "<think>";

/// URL schemes kept in rendered links and images.
pub const ALLOWED_URL_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

/// Replacement for link targets with any other scheme.
const BLOCKED_URL: &str = "#";

static REASONING_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").ok());

/// Turns raw backend text into display-ready HTML.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseNormalizer {
    mode: ReasoningMode,
}

impl ResponseNormalizer {
    /// Create a normalizer using `mode` for reasoning markup.
    #[must_use]
    pub const fn new(mode: ReasoningMode) -> Self {
        Self { mode }
    }

    /// Strip reasoning markup, then render Markdown to HTML.
    ///
    /// Never fails. Not idempotent: apply once per assistant turn.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> String {
        render_markdown(&strip_reasoning(raw, self.mode))
    }
}

/// Remove reasoning markup according to `mode`.
#[must_use]
pub fn strip_reasoning(raw: &str, mode: ReasoningMode) -> String {
    let text = match (mode, REASONING_BLOCK.as_ref()) {
        (ReasoningMode::StripBlock, Some(block)) => block.replace_all(raw, "").into_owned(),
        _ => raw.to_string(),
    };
    text.replace(REASONING_OPEN_TAG, "")
}

/// Render Markdown into HTML.
///
/// Raw HTML in the input is escaped, and link or image targets outside
/// [`ALLOWED_URL_SCHEMES`] (relative targets excepted) are replaced by `#`.
#[must_use]
pub fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let events = Parser::new_ext(text, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_destination(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_destination(dest_url),
            title,
            id,
        }),
        other => other,
    });

    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

/// Whether `url` is relative or uses an allowed scheme.
#[must_use]
pub fn is_safe_url(url: &str) -> bool {
    match url.trim().split_once(':') {
        Some((scheme, _)) if !scheme.contains(['/', '?', '#']) => ALLOWED_URL_SCHEMES
            .iter()
            .any(|allowed| scheme.eq_ignore_ascii_case(allowed)),
        _ => true,
    }
}

fn safe_destination(dest_url: CowStr<'_>) -> CowStr<'_> {
    if is_safe_url(&dest_url) {
        dest_url
    } else {
        CowStr::Borrowed(BLOCKED_URL)
    }
}
