use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an order entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[serde(alias = "woo", alias = "wc")]
    WooCommerce,
    Etsy,
    Manual,
}

impl Source {
    pub fn prefix(self) -> &'static str {
        match self {
            Source::WooCommerce => "WC",
            Source::Etsy => "ETSY",
            Source::Manual => "MANUAL",
        }
    }

    /// Label attached to every order ingested from this source.
    pub fn label(self) -> &'static str {
        match self {
            Source::WooCommerce => "WooCommerce",
            Source::Etsy => "Etsy",
            Source::Manual => "Manual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "woocommerce" | "woo" | "wc" => Some(Source::WooCommerce),
            "etsy" => Some(Source::Etsy),
            "manual" => Some(Source::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::WooCommerce => "woocommerce",
            Source::Etsy => "etsy",
            Source::Manual => "manual",
        })
    }
}

/// `{PREFIX}-{external id}`: the only key orders are deduplicated by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalKey(String);

impl ExternalKey {
    pub fn new(source: Source, external_id: impl fmt::Display) -> Self {
        Self(format!("{}-{external_id}", source.prefix()))
    }

    pub fn manual(now: DateTime<Utc>) -> Self {
        Self::new(Source::Manual, now.timestamp_millis())
    }

    pub fn parse(raw: &str) -> Option<(Source, &str)> {
        let (prefix, id) = raw.trim().split_once('-')?;
        let source = [Source::WooCommerce, Source::Etsy, Source::Manual]
            .into_iter()
            .find(|source| source.prefix() == prefix)?;
        (!id.is_empty()).then_some((source, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ExternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
