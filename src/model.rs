// src/model.rs
//! Canonical message shapes that flow through one pipeline pass.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One normalized item from a source. Built once per pass, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: Option<String>,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    /// Publication time; normalization falls back to fetch time.
    pub timestamp: DateTime<Utc>,
    pub source_name: String,
}

impl Message {
    /// A message must carry some text to be worth scoring.
    pub fn has_content(&self) -> bool {
        !self.title.trim().is_empty() || !self.body.trim().is_empty()
    }
}

/// A message plus its relevance evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredMessage {
    pub message: Message,
    pub score: i64,
    /// Rule names in evaluation order.
    pub reasons: Vec<String>,
}

impl std::ops::Deref for ScoredMessage {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}
