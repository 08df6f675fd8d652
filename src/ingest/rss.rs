// src/ingest/rss.rs
//! RSS 2.0 and Atom feeds → messages.
//!
//! RSS is tried first; a document that fails as RSS and has a `<feed>` root
//! is retried as Atom.

use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;

use super::timestamp::{self, RawTime};
use super::ParseError;
use crate::config::Zone;
use crate::model::Message;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// Element text, ignoring attributes such as `isPermaLink` or `type`.
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: Option<String>,
    title: Option<Text>,
    summary: Option<Text>,
    content: Option<Text>,
    #[serde(default)]
    link: Vec<Link>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

pub fn parse(
    source: &str,
    body: &[u8],
    zone: &Zone,
    now: DateTime<Utc>,
) -> Result<Vec<Message>, ParseError> {
    let raw = String::from_utf8_lossy(body);
    let xml = scrub_html_entities_for_xml(&raw);

    let messages = match from_str::<Rss>(&xml) {
        Ok(rss) => rss
            .channel
            .item
            .into_iter()
            .map(|it| from_rss_item(source, it, zone, now))
            .collect::<Vec<_>>(),
        Err(_) if xml.contains("<feed") => from_str::<AtomFeed>(&xml)
            .map_err(|e| ParseError::Decode {
                source_name: source.to_string(),
                detail: format!("atom: {e}"),
            })?
            .entry
            .into_iter()
            .map(|e| from_atom_entry(source, e, zone, now))
            .collect(),
        Err(rss_err) => {
            return Err(ParseError::Decode {
                source_name: source.to_string(),
                detail: format!("rss: {rss_err}"),
            })
        }
    };

    Ok(messages.into_iter().filter(Message::has_content).collect())
}

fn from_rss_item(source: &str, it: Item, zone: &Zone, now: DateTime<Utc>) -> Message {
    Message {
        id: it.guid.and_then(|g| clean(g.value)),
        title: clean(it.title).unwrap_or_default(),
        body: clean(it.description).unwrap_or_default(),
        url: clean(it.link),
        timestamp: it
            .pub_date
            .as_deref()
            .and_then(|s| parse_feed_time(s, zone))
            .unwrap_or(now),
        source_name: source.to_string(),
    }
}

fn from_atom_entry(source: &str, e: Entry, zone: &Zone, now: DateTime<Utc>) -> Message {
    let url = e
        .link
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
        .or_else(|| e.link.first())
        .and_then(|l| clean(l.href.clone()));
    let body = e
        .summary
        .and_then(|t| clean(t.value))
        .or_else(|| e.content.and_then(|t| clean(t.value)));
    Message {
        id: clean(e.id),
        title: e.title.and_then(|t| clean(t.value)).unwrap_or_default(),
        body: body.unwrap_or_default(),
        url,
        timestamp: e
            .published
            .or(e.updated)
            .as_deref()
            .and_then(|s| parse_feed_time(s, zone))
            .unwrap_or(now),
        source_name: source.to_string(),
    }
}

/// RSS dates are RFC 2822; anything else (Atom's RFC 3339 included) goes
/// through the generic coercion.
fn parse_feed_time(s: &str, zone: &Zone) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let raw = match DateTime::parse_from_rfc2822(s) {
        Ok(t) => RawTime::Parsed(t.with_timezone(&Utc)),
        Err(_) => RawTime::Text(s),
    };
    timestamp::coerce(raw, zone)
}

fn clean(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Named HTML entities that feeds emit but XML does not define.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
