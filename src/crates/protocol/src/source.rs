//! Best-effort extraction of source references from connector outputs.

use serde::{Deserialize, Serialize};

/// A cited source surfaced by a connector (document search, web search, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub locator: String,
    pub origin_connector: String,
}

/// Probe tool outputs for something citable.
///
/// Structured outputs win: an object carrying a `url` (or `locator`) field is
/// taken verbatim, with `title` when present. Otherwise the first string
/// output containing an http(s) locator is used, its leading text serving as
/// the title. Connectors that return neither yield `None`; that is not an
/// error, some tools simply have nothing to cite.
pub fn extract_source_ref(connector: &str, outputs: &[serde_json::Value]) -> Option<SourceRef> {
    for output in outputs {
        if let Some(source) = from_structured(connector, output) {
            return Some(source);
        }
    }
    for output in outputs {
        if let Some(source) = from_text(connector, output) {
            return Some(source);
        }
    }
    None
}

fn from_structured(connector: &str, output: &serde_json::Value) -> Option<SourceRef> {
    let object = output.as_object()?;
    let locator = object
        .get("url")
        .or_else(|| object.get("locator"))
        .and_then(|v| v.as_str())?;
    let title = object
        .get("title")
        .and_then(|v| v.as_str())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(locator);
    Some(SourceRef {
        title: title.to_string(),
        locator: locator.to_string(),
        origin_connector: connector.to_string(),
    })
}

fn from_text(connector: &str, output: &serde_json::Value) -> Option<SourceRef> {
    let text = output.as_str()?;
    let locator = find_url(text)?;
    let title = text
        .split(&locator)
        .next()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(&locator)
        .to_string();
    Some(SourceRef {
        title,
        locator,
        origin_connector: connector.to_string(),
    })
}

/// First http(s) locator embedded in `text`, cut at whitespace.
fn find_url(text: &str) -> Option<String> {
    let start = text.find("https://").or_else(|| text.find("http://"))?;
    let tail = &text[start..];
    let end = tail
        .find(|c: char| c.is_whitespace() || c == '"' || c == ')')
        .unwrap_or(tail.len());
    let url = tail[..end].trim_end_matches(['.', ',', ';']);
    if url.len() > "https://".len() {
        Some(url.to_string())
    } else {
        None
    }
}
