// src/ingest/json.rs
//! JSON payloads → messages, via explicit field mapping or heuristic discovery.
//!
//! All traversal is over `serde_json::Value` and bounded: dotted paths only
//! descend through objects, and the list search stops below `MAX_SEARCH_DEPTH`.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::timestamp::{self, RawTime};
use super::ParseError;
use crate::config::{MappingConfig, ParserConfig, ParserMode, Zone};
use crate::model::Message;

/// Well-known container paths, in priority order.
const LIST_PATHS: [&str; 7] = [
    "data.list",
    "data.items",
    "data.result",
    "list",
    "items",
    "result",
    "data",
];

const MAX_SEARCH_DEPTH: usize = 5;

/// Keys whose presence marks an object as message-like.
const CONTENT_KEYS: [&str; 6] = ["title", "headline", "subject", "content", "summary", "brief"];

const TITLE_ALIASES: [&str; 5] = ["title", "headline", "subject", "title.text", "title.rendered"];
const BODY_ALIASES: [&str; 7] = [
    "content",
    "summary",
    "body",
    "brief",
    "description",
    "content.text",
    "content.rendered",
];
const URL_ALIASES: [&str; 3] = ["url", "link", "share_url"];
const ID_ALIASES: [&str; 3] = ["id", "guid", "news_id"];
const TIME_ALIASES: [&str; 4] = ["time", "timestamp", "published_at", "publish_time"];

pub fn parse(
    source: &str,
    body: &[u8],
    parser: &ParserConfig,
    zone: &Zone,
    now: DateTime<Utc>,
) -> Result<Vec<Message>, ParseError> {
    let data: Value = serde_json::from_slice(body).map_err(|e| ParseError::Decode {
        source_name: source.to_string(),
        detail: e.to_string(),
    })?;

    let mapping = match parser.mode {
        ParserMode::Mapping => Some(&parser.mapping),
        ParserMode::Auto => None,
    };

    let items = match mapping {
        Some(m) if !m.list_path.trim().is_empty() => find_by_path(&data, &m.list_path),
        _ => auto_find_list(&data),
    }
    .ok_or_else(|| ParseError::NoList {
        source_name: source.to_string(),
    })?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let msg = match mapping {
            Some(m) => apply_mapping(source, obj, m, zone, now),
            None => apply_auto(source, obj, zone, now),
        };
        if msg.has_content() {
            out.push(msg);
        }
    }
    Ok(out)
}

fn apply_mapping(
    source: &str,
    obj: &Map<String, Value>,
    mapping: &MappingConfig,
    zone: &Zone,
    now: DateTime<Utc>,
) -> Message {
    let field = |name: &str| mapping.fields.get(name).map(String::as_str).unwrap_or("");
    Message {
        id: non_empty(get_string(obj, field("id"))),
        title: get_string(obj, field("title")),
        body: get_string(obj, field("content")),
        url: non_empty(get_string(obj, field("url"))),
        timestamp: get_value(obj, field("time"))
            .and_then(|v| timestamp::coerce(RawTime::Json(v), zone))
            .unwrap_or(now),
        source_name: source.to_string(),
    }
}

fn apply_auto(
    source: &str,
    obj: &Map<String, Value>,
    zone: &Zone,
    now: DateTime<Utc>,
) -> Message {
    let time = TIME_ALIASES
        .iter()
        .filter_map(|k| get_value(obj, k))
        .find(|v| !v.is_null());
    Message {
        id: non_empty(first_non_empty(obj, &ID_ALIASES)),
        title: first_non_empty(obj, &TITLE_ALIASES),
        body: first_non_empty(obj, &BODY_ALIASES),
        url: non_empty(first_non_empty(obj, &URL_ALIASES)),
        timestamp: time
            .and_then(|v| timestamp::coerce(RawTime::Json(v), zone))
            .unwrap_or(now),
        source_name: source.to_string(),
    }
}

/// Locate the item list: known paths, then a bounded search, then the root itself.
pub fn auto_find_list(data: &Value) -> Option<&Vec<Value>> {
    LIST_PATHS
        .iter()
        .find_map(|path| find_by_path(data, path))
        .or_else(|| find_likely_list(data, 0))
        .or_else(|| data.as_array())
}

/// Follow a dotted path through nested objects; only an array at the end counts.
pub fn find_by_path<'a>(data: &'a Value, path: &str) -> Option<&'a Vec<Value>> {
    walk(data, path)?.as_array()
}

fn find_likely_list(data: &Value, depth: usize) -> Option<&Vec<Value>> {
    if depth > MAX_SEARCH_DEPTH {
        return None;
    }
    match data {
        Value::Array(arr) => {
            if arr.is_empty() {
                return None;
            }
            if looks_like_message_array(arr) {
                return Some(arr);
            }
            arr.iter().find_map(|v| find_likely_list(v, depth + 1))
        }
        Value::Object(map) => map.values().find_map(|v| find_likely_list(v, depth + 1)),
        _ => None,
    }
}

fn looks_like_message_array(arr: &[Value]) -> bool {
    arr.iter().filter_map(Value::as_object).any(|obj| {
        CONTENT_KEYS.iter().any(|k| obj.contains_key(*k))
            || obj
                .get("content")
                .and_then(Value::as_object)
                .is_some_and(|c| c.contains_key("text"))
    })
}

fn walk<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|p| !p.is_empty())
        .try_fold(data, |cur, key| cur.as_object()?.get(key))
}

/// Value at `key` (plain or dotted) inside an item. Empty key → nothing.
fn get_value<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if key.is_empty() {
        return None;
    }
    if key.contains('.') {
        let mut parts = key.split('.').filter(|p| !p.is_empty());
        let first = obj.get(parts.next()?)?;
        return parts.try_fold(first, |cur, k| cur.as_object()?.get(k));
    }
    obj.get(key)
}

fn get_string(obj: &Map<String, Value>, key: &str) -> String {
    get_value(obj, key).map(scalar_to_string).unwrap_or_default()
}

/// Strings are trimmed, numbers printed without exponent; everything else is empty.
pub fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                n.as_f64().map(|f| f.to_string()).unwrap_or_default()
            }
        }
        _ => String::new(),
    }
}

fn first_non_empty(obj: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .map(|k| get_string(obj, k))
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_have_no_exponent() {
        assert_eq!(scalar_to_string(&json!(1e21)), "1000000000000000000000");
        assert_eq!(scalar_to_string(&json!(42)), "42");
        assert_eq!(scalar_to_string(&json!(3.25)), "3.25");
        assert_eq!(scalar_to_string(&json!(u64::MAX)), u64::MAX.to_string());
        assert_eq!(scalar_to_string(&json!("  padded ")), "padded");
        assert_eq!(scalar_to_string(&json!(true)), "");
        assert_eq!(scalar_to_string(&json!(null)), "");
    }

    #[test]
    fn priority_paths_beat_search() {
        let v = json!({
            "items": [{"x": 1}],
            "deep": {"nested": [{"title": "t"}]}
        });
        let list = auto_find_list(&v).unwrap();
        assert_eq!(list, &vec![json!({"x": 1})]);
    }

    #[test]
    fn recursive_search_finds_message_like_array() {
        let v = json!({"payload": {"feed": {"entries": [{"headline": "h"}]}}});
        let list = auto_find_list(&v).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn recursive_search_matches_content_text() {
        let v = json!({"payload": [{"content": {"text": "x"}}]});
        assert!(auto_find_list(&v).is_some());
    }

    #[test]
    fn search_is_depth_bounded() {
        // The array sits at depth 7: beyond the search bound.
        let v = json!({"a": {"b": {"c": {"d": {"e": {"f": {"g": [{"title": "t"}]}}}}}}});
        assert!(auto_find_list(&v).is_none());
    }

    #[test]
    fn root_array_is_last_resort() {
        let v = json!([{"x": 1}, {"y": 2}]);
        assert_eq!(auto_find_list(&v).unwrap().len(), 2);
    }

    #[test]
    fn path_through_non_object_fails() {
        let v = json!({"data": [1, 2]});
        assert!(find_by_path(&v, "data.list").is_none());
        assert_eq!(find_by_path(&v, "data").unwrap().len(), 2);
    }

    #[test]
    fn dotted_alias_reaches_nested_title() {
        let v = json!({"title": {"rendered": "Nested"}, "content": {"rendered": "Body"}});
        let obj = v.as_object().unwrap();
        assert_eq!(first_non_empty(obj, &TITLE_ALIASES), "Nested");
        assert_eq!(first_non_empty(obj, &BODY_ALIASES), "Body");
    }
}
