// src/ingest/mod.rs
//! Message normalization: raw payload bytes → canonical [`Message`]s.
//!
//! - `rss`: RSS 2.0 / Atom feeds
//! - `json`: field mapping or heuristic auto-discovery
//! - `timestamp`: shared time coercion
//!
//! Items without title and body are dropped; items that are not objects are
//! skipped. Only an undecodable payload or a missing item list fails the pass.

pub mod json;
pub mod rss;
pub mod timestamp;

use chrono::{DateTime, Utc};

use crate::config::{SourceConfig, SourceKind, Zone};
use crate::model::Message;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("source {source_name}: payload not decodable: {detail}")]
    Decode { source_name: String, detail: String },
    #[error("source {source_name}: no item list found in payload")]
    NoList { source_name: String },
}

/// Normalize one fetched payload for `source`. `now` fills missing timestamps.
pub fn normalize(
    source: &SourceConfig,
    body: &[u8],
    zone: &Zone,
    now: DateTime<Utc>,
) -> Result<Vec<Message>, ParseError> {
    match source.kind.unwrap_or(SourceKind::Json) {
        SourceKind::Rss => rss::parse(&source.name, body, zone, now),
        SourceKind::Json => json::parse(&source.name, body, &source.parser, zone, now),
    }
}
