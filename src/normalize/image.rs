use super::aliases::IMAGE_KEY_TERMS;
use super::{MetaEntry, normalize_key};
use once_cell::sync::Lazy;
use regex::Regex;

static SRC_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"src=["'](.*?)["']"#).expect("src pattern"));
static HREF_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href=["'](.*?)["']"#).expect("href pattern"));

pub const DEFAULT_PLACEHOLDER: &str = "https://placehold.co/600x400?text=Görsel+Yok";

fn is_image_key(key: &str) -> bool {
    let key = normalize_key(key);
    IMAGE_KEY_TERMS.iter().any(|term| key.contains(term))
}

/// URL carried by an upload-plugin value: quoted `src`, then `href`, then a bare URL.
pub fn url_from_value(value: &str) -> Option<String> {
    for pattern in [&*SRC_ATTR, &*HREF_ATTR] {
        if let Some(found) = pattern
            .captures(value)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|url| !url.is_empty())
        {
            return Some(found.to_string());
        }
    }
    let trimmed = value.trim();
    trimmed.starts_with("http").then(|| trimmed.to_string())
}

pub fn from_meta(meta: &[MetaEntry]) -> Option<String> {
    meta.iter()
        .filter(|entry| is_image_key(&entry.key))
        .filter_map(|entry| entry.value.as_deref())
        .find_map(url_from_value)
}

pub fn resolve(structured: Option<&str>, meta: &[MetaEntry], placeholder: &str) -> String {
    structured
        .map(str::trim)
        .filter(|src| !src.is_empty())
        .map(str::to_string)
        .or_else(|| from_meta(meta))
        .unwrap_or_else(|| placeholder.to_string())
}
