//! Figma share-link parsing
//!
//! Extracts the file key and node id from the share links Figma hands out:
//!
//! - `https://www.figma.com/file/<key>/<name>?node-id=123-456`
//! - `https://www.figma.com/design/<key>/<name>?node-id=123%3A456`
//! - `https://www.figma.com/design/<key>/<name>` (no node)
//! - `https://www.figma.com/file/<key>/<name>#node-id=123-456`
//!
//! URLs carry node ids as `123-456`; the REST API wants `123:456`.

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Path markers that precede the file key
const KEY_MARKERS: &[&str] = &["file", "design", "proto", "board"];

/// Result of parsing a share link
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLink {
    pub file_key: Option<String>,
    /// Node id in API form (`123:456`)
    pub node_id: Option<String>,
    /// Same as `node_id`; kept for clients that ask for a component
    pub component_id: Option<String>,
    pub is_valid: bool,
}

/// Parse a Figma URL into file key and node id
///
/// Never fails: unusable input yields `is_valid == false`.
pub fn parse_url(figma_url: &str) -> ParsedLink {
    let trimmed = figma_url.trim();
    let url = Url::parse(trimmed).or_else(|_| Url::parse(&format!("https://{trimmed}")));

    let mut result = ParsedLink::default();
    let Ok(url) = url else {
        return result;
    };

    if let Some(segments) = url.path_segments() {
        let segments: Vec<&str> = segments.collect();
        result.file_key = segments
            .windows(2)
            .find(|pair| KEY_MARKERS.contains(&pair[0]) && !pair[1].is_empty())
            .map(|pair| pair[1].to_string());
    }

    let raw_node = url
        .query_pairs()
        .find(|(k, _)| k == "node-id")
        .map(|(_, v)| v.into_owned())
        .or_else(|| url.fragment().and_then(node_id_from_fragment));

    if let Some(raw) = raw_node.filter(|n| !n.is_empty()) {
        let node = normalize_node_id(&raw);
        result.node_id = Some(node.clone());
        result.component_id = Some(node);
    }

    result.is_valid = result.file_key.is_some();
    result
}

/// Convenience wrapper returning `(file_key, component_id)`
pub fn extract_from_share_link(share_link: &str) -> (Option<String>, Option<String>) {
    let parsed = parse_url(share_link);
    (parsed.file_key, parsed.component_id)
}

/// Build a share link for display
pub fn format_share_link(file_key: &str, node_id: Option<&str>) -> String {
    let base = format!("https://www.figma.com/design/{file_key}/");
    match node_id {
        Some(id) => format!("{base}?node-id={}", to_url_node_id(id)),
        None => base,
    }
}

/// Convert a URL node id (`38-2`) into API form (`38:2`)
pub fn to_api_node_id(id: &str) -> String {
    id.replace('-', ":")
}

/// Convert an API node id (`38:2`) into URL form (`38-2`)
pub fn to_url_node_id(id: &str) -> String {
    id.replace(':', "-")
}

/// Find the most relevant URL in free text
///
/// Prefers a figma.com link; falls back to the first URL of any kind.
pub fn extract_link_from_text(text: &str) -> Option<String> {
    let urls: Vec<&str> = text
        .split_whitespace()
        .filter_map(|token| {
            let start = token.find("http://").or_else(|| token.find("https://"))?;
            Some(token[start..].trim_end_matches(['.', ',', ')', ']', '>', '"', '\'']))
        })
        .collect();

    urls.iter()
        .find(|u| u.contains("figma.com"))
        .or_else(|| urls.first())
        .map(|u| u.to_string())
}

fn normalize_node_id(raw: &str) -> String {
    let decoded = raw.replace("%3A", ":").replace("%3a", ":");
    if decoded.contains('-') && !decoded.contains(':') {
        to_api_node_id(&decoded)
    } else {
        decoded
    }
}

fn node_id_from_fragment(fragment: &str) -> Option<String> {
    fragment
        .split('&')
        .find_map(|pair| pair.strip_prefix("node-id="))
        .map(|v| v.to_string())
}
