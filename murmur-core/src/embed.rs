//! Embed snapshots.
//!
//! Embeds arrive as [`EmbedData`] and are checked by [`Embed::parse`] before
//! they reach a message. An embed list is always replaced as a whole, so a
//! single bad embed keeps the message's previous list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CacheError, Result};

/// Largest valid embed color (24-bit RGB).
pub const MAX_COLOR: i64 = 0xFF_FF_FF;

/// An embed as decoded from the wire, unchecked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedData {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: Option<i64>,
    pub timestamp: Option<String>,
    pub author: Option<EmbedAuthor>,
    pub footer: Option<EmbedFooter>,
    pub thumbnail: Option<EmbedThumbnail>,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

/// Thumbnail of an embed. Missing dimensions are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedThumbnail {
    url: Option<String>,
    proxy_url: Option<String>,
    height: Option<u32>,
    width: Option<u32>,
}

impl EmbedThumbnail {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// The thumbnail URL, or `None` when absent or malformed.
    pub fn url(&self) -> Option<Url> {
        parse_url("thumbnail url", self.url.as_deref())
    }

    /// The proxied thumbnail URL, or `None` when absent or malformed.
    pub fn proxy_url(&self) -> Option<Url> {
        parse_url("thumbnail proxy url", self.proxy_url.as_deref())
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }
}

fn parse_url(what: &str, raw: Option<&str>) -> Option<Url> {
    let raw = raw?;
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!(url = raw, "malformed embed {what}: {e}");
            None
        }
    }
}

/// A checked embed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Embed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: Option<u32>,
    pub timestamp: Option<DateTime<Utc>>,
    pub author: Option<EmbedAuthor>,
    pub footer: Option<EmbedFooter>,
    pub thumbnail: Option<EmbedThumbnail>,
    pub fields: Vec<EmbedField>,
}

impl Embed {
    /// Check a wire embed. Fails on a timestamp that is not RFC 3339 or a
    /// color outside 24-bit RGB.
    pub fn parse(data: EmbedData) -> Result<Self> {
        let color = match data.color {
            None => None,
            Some(c) if (0..=MAX_COLOR).contains(&c) => Some(c as u32),
            Some(c) => {
                return Err(CacheError::MalformedDelta(format!(
                    "embed color {c:#x} is out of range"
                )));
            }
        };
        let timestamp = data
            .timestamp
            .as_deref()
            .map(|ts| {
                DateTime::parse_from_rfc3339(ts)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        CacheError::MalformedDelta(format!("embed timestamp {ts:?}: {e}"))
                    })
            })
            .transpose()?;

        Ok(Self {
            title: data.title,
            description: data.description,
            url: data.url,
            color,
            timestamp,
            author: data.author,
            footer: data.footer,
            thumbnail: data.thumbnail,
            fields: data.fields,
        })
    }

    /// Check a whole embed list. The first bad embed fails the list.
    pub fn parse_all(data: Vec<EmbedData>) -> Result<Vec<Self>> {
        data.into_iter().map(Self::parse).collect()
    }
}
