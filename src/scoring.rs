// src/scoring.rs
//! Keyword and time-window relevance scoring.
//!
//! A score is the sum of:
//! - the source's base score (`"base"` when nonzero)
//! - each topic whose keywords hit `title + " " + body` (reason = topic name)
//! - the strong trigger (`"strong"`)
//! - the market-hours bonus or penalty (`"in_session"` / `"off_session"`)
//!
//! Matching is a case-insensitive substring test. The engine is built per
//! generation and never mutated, so scoring is pure.

use chrono::{DateTime, Timelike, Utc};
use std::collections::HashMap;

use crate::config::{Config, ConfigError, Zone};
use crate::model::{Message, ScoredMessage};

pub const REASON_BASE: &str = "base";
pub const REASON_STRONG: &str = "strong";
pub const REASON_IN_SESSION: &str = "in_session";
pub const REASON_OFF_SESSION: &str = "off_session";

/// Inclusive `HH:MM-HH:MM` window, minute granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    start_min: u32,
    end_min: u32,
}

impl SessionWindow {
    pub fn parse(s: &str) -> Option<Self> {
        let (start, end) = s.trim().split_once('-')?;
        let start_min = parse_hhmm(start)?;
        let end_min = parse_hhmm(end)?;
        (start_min <= end_min).then_some(Self { start_min, end_min })
    }

    pub fn contains(&self, minute_of_day: u32) -> bool {
        (self.start_min..=self.end_min).contains(&minute_of_day)
    }
}

fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h < 24 && m < 60).then_some(h * 60 + m)
}

#[derive(Debug, Clone)]
struct KeywordRule {
    name: String,
    weight: i64,
    /// Lowercased, empties removed.
    keywords: Vec<String>,
}

impl KeywordRule {
    fn new(name: &str, weight: i64, keywords: &[String]) -> Self {
        Self {
            name: name.to_string(),
            weight,
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    fn hits(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

#[derive(Debug, Clone)]
struct MarketHours {
    bonus: i64,
    penalty: i64,
    sessions: Vec<SessionWindow>,
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    base_scores: HashMap<String, i64>,
    topics: Vec<KeywordRule>,
    strong: KeywordRule,
    market_hours: Option<MarketHours>,
    zone: Zone,
    push_threshold: i64,
}

impl ScoringEngine {
    /// Build from a validated config. Base scores come from the source list.
    pub fn from_config(cfg: &Config, zone: Zone) -> Result<Self, ConfigError> {
        let base_scores = cfg
            .sources
            .iter()
            .map(|s| (s.name.clone(), s.base_score))
            .collect();
        let topics = cfg
            .topics
            .iter()
            .map(|t| KeywordRule::new(&t.name, t.weight, &t.keywords))
            .collect();
        let strong = &cfg.triggers.strong;
        let mh = &cfg.scoring.market_hours;
        let market_hours = if mh.enabled {
            Some(MarketHours {
                bonus: mh.in_session_bonus,
                penalty: mh.off_session_penalty,
                sessions: cfg.session_windows()?,
            })
        } else {
            None
        };

        Ok(Self {
            base_scores,
            topics,
            strong: KeywordRule::new(REASON_STRONG, strong.weight, &strong.keywords),
            market_hours,
            zone,
            push_threshold: cfg.scoring.push_threshold,
        })
    }

    pub fn push_threshold(&self) -> i64 {
        self.push_threshold
    }

    pub fn score(&self, message: Message) -> ScoredMessage {
        let text = format!("{} {}", message.title, message.body).to_lowercase();
        let mut score = 0i64;
        let mut reasons = Vec::new();

        let base = self
            .base_scores
            .get(&message.source_name)
            .copied()
            .unwrap_or(0);
        if base != 0 {
            score += base;
            reasons.push(REASON_BASE.to_string());
        }

        for rule in self.topics.iter().chain(std::iter::once(&self.strong)) {
            if rule.hits(&text) {
                score += rule.weight;
                reasons.push(rule.name.clone());
            }
        }

        if let Some(mh) = &self.market_hours {
            if self.in_session(mh, message.timestamp) {
                score += mh.bonus;
                reasons.push(REASON_IN_SESSION.to_string());
            } else {
                score -= mh.penalty;
                reasons.push(REASON_OFF_SESSION.to_string());
            }
        }

        ScoredMessage {
            message,
            score,
            reasons,
        }
    }

    pub fn passes(&self, scored: &ScoredMessage) -> bool {
        scored.score >= self.push_threshold
    }

    fn in_session(&self, mh: &MarketHours, ts: DateTime<Utc>) -> bool {
        let local = self.zone.wall_clock(ts);
        let minute = local.hour() * 60 + local.minute();
        mh.sessions.iter().any(|w| w.contains(minute))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourceConfig, TopicConfig};
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn zone() -> Zone {
        Zone::Named(Tz::Asia__Shanghai)
    }

    fn config() -> Config {
        let mut cfg = Config::default();
        cfg.sources.push(SourceConfig {
            name: "wire".into(),
            base_score: 5,
            ..SourceConfig::default()
        });
        cfg.topics = vec![
            TopicConfig {
                name: "rates".into(),
                weight: 10,
                keywords: vec!["Rate Cut".into(), "".into()],
            },
            TopicConfig {
                name: "chips".into(),
                weight: 7,
                keywords: vec!["semiconductor".into()],
            },
        ];
        cfg.triggers.strong.weight = 20;
        cfg.triggers.strong.keywords = vec!["breaking".into()];
        cfg.scoring.push_threshold = 15;
        cfg
    }

    fn msg(source: &str, title: &str, body: &str, ts: DateTime<Utc>) -> Message {
        Message {
            id: None,
            title: title.into(),
            body: body.into(),
            url: None,
            timestamp: ts,
            source_name: source.into(),
        }
    }

    fn at_local(h: u32, m: u32) -> DateTime<Utc> {
        Tz::Asia__Shanghai
            .with_ymd_and_hms(2024, 5, 6, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn reasons_follow_evaluation_order() {
        let engine = ScoringEngine::from_config(&config(), zone()).unwrap();
        let s = engine.score(msg(
            "wire",
            "BREAKING: semiconductor tariffs",
            "central bank signals rate cut",
            at_local(3, 0),
        ));
        assert_eq!(s.score, 5 + 10 + 7 + 20);
        assert_eq!(s.reasons, vec!["base", "rates", "chips", "strong"]);
    }

    #[test]
    fn unknown_source_has_no_base_and_empty_keywords_never_hit() {
        let engine = ScoringEngine::from_config(&config(), zone()).unwrap();
        let s = engine.score(msg("other", "quiet day", "", at_local(3, 0)));
        assert_eq!(s.score, 0);
        assert!(s.reasons.is_empty());
    }

    #[test]
    fn scoring_is_deterministic() {
        let engine = ScoringEngine::from_config(&config(), zone()).unwrap();
        let m = msg("wire", "rate cut", "", at_local(10, 0));
        assert_eq!(engine.score(m.clone()), engine.score(m));
    }

    #[test]
    fn threshold_boundary() {
        let engine = ScoringEngine::from_config(&config(), zone()).unwrap();
        // base 5 + rates 10 = threshold exactly
        let at = engine.score(msg("wire", "rate cut", "", at_local(3, 0)));
        assert_eq!(at.score, 15);
        assert!(engine.passes(&at));

        let mut below = at.clone();
        below.score = 14;
        assert!(!engine.passes(&below));
    }

    #[test]
    fn market_hours_use_injected_zone_inclusively() {
        let mut cfg = config();
        cfg.scoring.market_hours.enabled = true;
        cfg.scoring.market_hours.in_session_bonus = 3;
        cfg.scoring.market_hours.off_session_penalty = 4;
        let engine = ScoringEngine::from_config(&cfg, zone()).unwrap();

        for (h, m) in [(9, 30), (11, 30), (13, 0), (15, 0)] {
            let s = engine.score(msg("x", "t", "", at_local(h, m)));
            assert_eq!(s.reasons, vec!["in_session"], "{h}:{m}");
            assert_eq!(s.score, 3);
        }
        for (h, m) in [(9, 29), (11, 31), (12, 59), (15, 1)] {
            let s = engine.score(msg("x", "t", "", at_local(h, m)));
            assert_eq!(s.reasons, vec!["off_session"], "{h}:{m}");
            assert_eq!(s.score, -4);
        }
    }

    #[test]
    fn market_hours_follow_dst_in_named_zone() {
        let mut cfg = config();
        cfg.scoring.market_hours.enabled = true;
        cfg.scoring.market_hours.sessions = vec!["09:30-16:00".into()];
        let engine = ScoringEngine::from_config(&cfg, Zone::Named(Tz::America__New_York)).unwrap();

        // 13:45 UTC is 08:45 EST before the switch and 09:45 EDT after it.
        let before = Utc.with_ymd_and_hms(2024, 3, 8, 13, 45, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 11, 13, 45, 0).unwrap();
        assert_eq!(engine.score(msg("x", "t", "", before)).reasons, vec!["off_session"]);
        assert_eq!(engine.score(msg("x", "t", "", after)).reasons, vec!["in_session"]);
    }

    #[test]
    fn session_window_parsing() {
        assert!(SessionWindow::parse("09:30-11:30").is_some());
        assert!(SessionWindow::parse(" 21:00 - 23:59 ").is_some());
        assert!(SessionWindow::parse("9-11").is_none());
        assert!(SessionWindow::parse("24:00-24:30").is_none());
        assert!(SessionWindow::parse("15:00-09:00").is_none());
    }
}
