use once_cell::sync::Lazy;
use regex::Regex;

static SQUARE_METRE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*m2").expect("square metre pattern"));

pub const DEFAULT_UNIT: &str = "cm";

pub fn synthesize(width: Option<&str>, height: Option<&str>, unit: Option<&str>) -> Option<String> {
    let (width, height) = (width?, height?);
    let unit = unit.unwrap_or(DEFAULT_UNIT);
    Some(format!("{width} x {height} {unit}"))
}

/// Rewrites the first `m2` spelling to the `m²` glyph.
pub fn normalize_area(area: &str) -> String {
    SQUARE_METRE
        .replace(area, " m²")
        .trim()
        .to_string()
}

/// Appends `" (area)"` once; calling it again on its own output is a no-op.
pub fn annotate_with_area(dimensions: Option<String>, area: Option<&str>) -> Option<String> {
    let Some(area) = area else {
        return dimensions;
    };
    let area = normalize_area(area);
    match dimensions {
        Some(existing) if existing.contains(&area) => Some(existing),
        Some(existing) => Some(format!("{existing} ({area})")),
        None => Some(area),
    }
}
