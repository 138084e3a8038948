pub mod aliases;
pub mod dimensions;
pub mod html;
pub mod image;

use aliases::MetaField;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

pub const DEFAULT_ITEM_NAME: &str = "Ürün";

/// One free-form metadata pair attached to a line item. Values are scalar text;
/// structured JSON values are dropped when the inbound payload is decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub key: String,
    #[serde(default)]
    pub display_key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub display_value: Option<String>,
}

/// Source-agnostic line item handed to the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineItem {
    pub name: Option<String>,
    pub quantity: Option<i64>,
    pub sku: Option<String>,
    pub image: Option<String>,
    pub meta: Vec<MetaEntry>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedItem {
    pub name: String,
    pub quantity: i64,
    pub image_src: String,
    pub sku: Option<String>,
    pub url: Option<String>,
    pub material: Option<String>,
    pub dimensions: Option<String>,
    pub product_note: Option<String>,
    pub sample_data: Option<String>,
}

/// Accent-folded lowercase form used to compare metadata keys with aliases.
pub fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            'İ' => out.push('i'),
            // combining dot left behind by a generic lowercase of İ
            '\u{0307}' => {}
            other => {
                for lower in other.to_lowercase() {
                    out.push(match lower {
                        'ğ' => 'g',
                        'ü' => 'u',
                        'ş' => 's',
                        'ı' => 'i',
                        'ö' => 'o',
                        'ç' => 'c',
                        'â' => 'a',
                        'î' => 'i',
                        'û' => 'u',
                        folded => folded,
                    });
                }
            }
        }
    }
    out.trim().to_string()
}

fn entry_matches(entry: &MetaEntry, alias: &str) -> bool {
    normalize_key(&entry.key) == alias
        || entry
            .display_key
            .as_deref()
            .is_some_and(|display| normalize_key(display) == alias)
}

fn entry_text(entry: &MetaEntry) -> Option<&str> {
    entry
        .display_value
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .or(entry.value.as_deref())
}

/// Sanitized value of the first entry, in metadata order, whose key or
/// display key matches any alias of `field`.
pub fn get_meta(meta: &[MetaEntry], field: MetaField) -> Option<String> {
    let aliases: Vec<String> = field.aliases().iter().map(|alias| normalize_key(alias)).collect();
    meta.iter()
        .filter(|entry| aliases.iter().any(|alias| entry_matches(entry, alias)))
        .find_map(entry_text)
        .and_then(html::sanitize)
}

pub fn normalize_item(item: &LineItem, placeholder: &str) -> NormalizedItem {
    let meta = item.meta.as_slice();

    let dimensions = get_meta(meta, MetaField::Dimensions).or_else(|| {
        dimensions::synthesize(
            get_meta(meta, MetaField::Width).as_deref(),
            get_meta(meta, MetaField::Height).as_deref(),
            get_meta(meta, MetaField::Unit).as_deref(),
        )
    });
    let area = get_meta(meta, MetaField::Area);
    let dimensions = dimensions::annotate_with_area(dimensions, area.as_deref());

    let sku = non_empty(item.sku.as_deref()).or_else(|| get_meta(meta, MetaField::Sku));

    NormalizedItem {
        name: non_empty(item.name.as_deref()).unwrap_or_else(|| DEFAULT_ITEM_NAME.to_string()),
        quantity: item.quantity.filter(|q| *q != 0).unwrap_or(1),
        image_src: image::resolve(item.image.as_deref(), meta, placeholder),
        sku,
        url: get_meta(meta, MetaField::Url),
        material: get_meta(meta, MetaField::Material),
        dimensions,
        product_note: get_meta(meta, MetaField::ProductNote),
        sample_data: get_meta(meta, MetaField::Sample),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
