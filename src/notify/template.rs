// src/notify/template.rs
//! `${key}` rendering of scored messages.
//!
//! Keys: `source`, `title`, `content`, `time`, `score`, `reasons`, `link`.
//! Unknown placeholders are left verbatim. Without a template the layout is
//! `[source] title\ncontent\nlink`.

use once_cell::sync::OnceCell;
use regex::{Captures, Regex};

use crate::config::Zone;
use crate::model::ScoredMessage;

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct Renderer {
    template: Option<String>,
    zone: Zone,
}

impl Renderer {
    /// A blank template selects the built-in layout.
    pub fn new(template: &str, zone: Zone) -> Self {
        let template = (!template.trim().is_empty()).then(|| template.to_string());
        Self { template, zone }
    }

    pub fn render(&self, msg: &ScoredMessage) -> String {
        let link = msg.url.as_deref().unwrap_or("");
        let Some(tpl) = &self.template else {
            return format!("[{}] {}\n{}\n{}", msg.source_name, msg.title, msg.body, link);
        };

        static RE_PLACEHOLDER: OnceCell<Regex> = OnceCell::new();
        let re = RE_PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([A-Za-z_]+)\}").unwrap());
        re.replace_all(tpl, |caps: &Captures<'_>| match &caps[1] {
            "source" => msg.source_name.clone(),
            "title" => msg.title.clone(),
            "content" => msg.body.clone(),
            "time" => self
                .zone
                .wall_clock(msg.timestamp)
                .format(TIME_FORMAT)
                .to_string(),
            "score" => msg.score.to_string(),
            "reasons" => msg.reasons.join(","),
            "link" => link.to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
    }
}
