use once_cell::sync::Lazy;
use regex::Regex;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>?").expect("tag pattern"));

// `&amp;` is decoded last so `&amp;lt;` stays a literal `&lt;`.
const ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&#039;", "'"),
    ("&sup2;", "2"),
    ("&amp;", "&"),
];

pub fn decode_entities(raw: &str) -> String {
    ENTITIES
        .iter()
        .fold(raw.to_string(), |acc, (entity, plain)| acc.replace(entity, plain))
}

pub fn strip_tags(raw: &str) -> String {
    TAG.replace_all(raw, "").into_owned()
}

/// Plain text for a metadata value: entities decoded first, then tags removed.
pub fn sanitize(raw: &str) -> Option<String> {
    let cleaned = strip_tags(&decode_entities(raw));
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_before_stripping() {
        assert_eq!(
            sanitize("&lt;b&gt;Kalın&lt;/b&gt;").as_deref(),
            Some("Kalın")
        );
    }

    #[test]
    fn strips_real_markup_and_sup_glyph() {
        assert_eq!(
            sanitize("<span class=\"amount\">2,5 m<sup>2</sup></span>").as_deref(),
            Some("2,5 m2")
        );
        assert_eq!(sanitize("3 m&sup2;").as_deref(), Some("3 m2"));
    }

    #[test]
    fn keeps_escaped_ampersand_literal() {
        assert_eq!(sanitize("Mat &amp; Parlak").as_deref(), Some("Mat & Parlak"));
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn blank_values_become_none() {
        assert_eq!(sanitize("&nbsp; <br/>"), None);
        assert_eq!(sanitize(""), None);
    }
}
