use std::sync::LazyLock;

use regex::Regex;

use crate::config::SanitizeMode;

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is a valid regex"));

/// Turns user-provided text into something safe to store.
///
/// `Strip` removes markup and stores plaintext, leaving escaping to whoever
/// renders it. `Escape` keeps the text verbatim but entity-encodes the HTML
/// metacharacters.
#[derive(Debug, Clone, Copy)]
pub struct Sanitizer {
    mode: SanitizeMode,
}

impl Sanitizer {
    pub fn new(mode: SanitizeMode) -> Self {
        Self { mode }
    }

    pub fn clean(&self, input: &str) -> String {
        match self.mode {
            SanitizeMode::Strip => strip_html(input),
            SanitizeMode::Escape => escape_html(input.trim()),
        }
    }

    /// Entries that are empty after cleaning are dropped.
    pub fn clean_list(&self, items: &[String]) -> Vec<String> {
        items
            .iter()
            .map(|item| self.clean(item))
            .filter(|item| !item.is_empty())
            .collect()
    }
}

pub fn strip_html(input: &str) -> String {
    TAG_PATTERN
        .replace_all(input, "")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .trim()
        .to_string()
}

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for character in input.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
