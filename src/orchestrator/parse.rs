//! Extraction of asset URLs from free-form coordinator output.
//!
//! Tried in order: the first balanced `{...}` object that parses as a
//! result, a fenced code block, then `<capability>_url: https://...`
//! patterns anywhere in the text.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::ParseError;
use crate::job::{AssetRef, Capability};

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(captions?|image|video)[ _-]?url\W{0,16}?(https?://[^\s"'<>()\[\]{},]+)"#)
        .expect("url regex is valid")
});

static WARNING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*warning:\s*(.+?)\s*$").expect("warning regex is valid"));

static FENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z]*\s*\n(.*?)```").expect("fence regex is valid"));

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub urls: BTreeMap<Capability, String>,
    pub warnings: Vec<String>,
}

impl ParsedOutput {
    /// Asset reference for `capability`, accepted only under `trusted_prefix`.
    pub fn asset(&self, capability: Capability, trusted_prefix: &str) -> Result<AssetRef, ParseError> {
        let url = self
            .urls
            .get(&capability)
            .ok_or(ParseError::MissingAsset(capability))?;
        let prefix = format!("{}/", trusted_prefix.trim_end_matches('/'));
        if !url.starts_with(&prefix) || url.contains("/../") {
            return Err(ParseError::UntrustedUrl {
                capability,
                url: url.clone(),
            });
        }
        Ok(AssetRef {
            url: url.clone(),
            content_type: content_type_for(url).to_string(),
            // Not reported by the engine.
            size_bytes: 0,
        })
    }
}

pub fn parse_engine_output(text: &str) -> Result<ParsedOutput, ParseError> {
    if let Some(parsed) = balanced_objects(text).find_map(from_json_str) {
        return Ok(parsed);
    }
    if let Some(parsed) = FENCE_PATTERN
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .find_map(|m| from_json_str(m.as_str().trim()))
    {
        return Ok(parsed);
    }

    let mut parsed = ParsedOutput::default();
    for caps in URL_PATTERN.captures_iter(text) {
        let Some(capability) = capability_from_name(&caps[1]) else {
            continue;
        };
        let url = caps[2].trim_end_matches(['.', ';', ':']).to_string();
        parsed.urls.entry(capability).or_insert(url);
    }
    if parsed.urls.is_empty() {
        return Err(ParseError::Unparseable);
    }
    parsed.warnings = WARNING_PATTERN
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();
    Ok(parsed)
}

fn capability_from_name(name: &str) -> Option<Capability> {
    match name.to_ascii_lowercase().as_str() {
        "caption" | "captions" => Some(Capability::Captions),
        "image" => Some(Capability::Image),
        "video" => Some(Capability::Video),
        _ => None,
    }
}

fn from_json_str(s: &str) -> Option<ParsedOutput> {
    let value: Value = serde_json::from_str(s).ok()?;
    from_json(&value)
}

/// Accepts `{"image_url": ...}` keys and an `{"assets": {"image": ...}}` map,
/// where an asset is a URL string or an object with a `url` field.
fn from_json(value: &Value) -> Option<ParsedOutput> {
    let obj = value.as_object()?;
    let mut parsed = ParsedOutput::default();
    let mut recognized = false;

    for capability in Capability::all() {
        let flat = obj.get(&format!("{capability}_url")).and_then(Value::as_str);
        let nested = obj
            .get("assets")
            .and_then(|a| a.get(capability.name()))
            .and_then(|a| a.as_str().or_else(|| a.get("url").and_then(Value::as_str)));
        if let Some(url) = flat.or(nested) {
            parsed.urls.insert(capability, url.to_string());
        }
    }
    recognized |= !parsed.urls.is_empty() || obj.contains_key("assets");

    if let Some(w) = obj.get("warning").and_then(Value::as_str) {
        parsed.warnings.push(w.to_string());
        recognized = true;
    }
    if let Some(ws) = obj.get("warnings").and_then(Value::as_array) {
        parsed
            .warnings
            .extend(ws.iter().filter_map(Value::as_str).map(str::to_string));
        recognized = true;
    }

    recognized.then_some(parsed)
}

/// Outermost `{...}` spans with balanced braces, skipping braces in strings.
fn balanced_objects(text: &str) -> impl Iterator<Item = &str> {
    let bytes = text.as_bytes();
    let mut pos = 0;
    std::iter::from_fn(move || {
        while pos < bytes.len() {
            let start = pos + text[pos..].find('{')?;
            match matching_brace(bytes, start) {
                Some(end) => {
                    pos = end + 1;
                    return Some(&text[start..=end]);
                }
                None => pos = start + 1,
            }
        }
        None
    })
}

fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn content_type_for(url: &str) -> &'static str {
    let ext = url
        .rsplit('/')
        .next()
        .and_then(|f| f.rsplit_once('.'))
        .map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("mp4") => "video/mp4",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
