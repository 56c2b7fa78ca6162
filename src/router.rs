//! Per-channel include/exclude rules.

use std::collections::HashMap;
use std::sync::RwLock;

use regex::Regex;

use crate::app::Result;
use crate::domain::{ChannelSetting, Item};

/// A setting with its regexes compiled once. A pattern that does not compile
/// is kept as `None` and never matches.
struct Rules {
    setting: ChannelSetting,
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl Rules {
    fn compile(channel: &str, setting: ChannelSetting) -> Self {
        let compile = |kind: &str, pattern: &str| {
            if pattern.is_empty() {
                return None;
            }
            match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!("Ignoring invalid {} regex for channel {}: {}", kind, channel, e);
                    None
                }
            }
        };

        Self {
            include: compile("include", &setting.include_regex),
            exclude: compile("exclude", &setting.exclude_regex),
            setting,
        }
    }

    fn excludes(&self, item: &Item, text: &str) -> bool {
        let kind = item.post_kind();
        self.setting.exclude_types.iter().any(|t| t == kind)
            || self.exclude.as_ref().is_some_and(|re| re.is_match(text))
    }

    fn includes(&self, text: &str) -> bool {
        self.include.as_ref().is_some_and(|re| re.is_match(text))
    }
}

/// The channel settings table. Ingestion takes read locks; settings updates
/// take the write lock.
#[derive(Default)]
pub struct ChannelRouter {
    rules: RwLock<HashMap<String, Rules>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, settings: Vec<(String, ChannelSetting)>) -> Result<()> {
        let mut rules = self.rules.write()?;
        rules.clear();
        for (uid, setting) in settings {
            let compiled = Rules::compile(&uid, setting);
            rules.insert(uid, compiled);
        }
        Ok(())
    }

    pub fn set(&self, channel_uid: &str, setting: ChannelSetting) -> Result<()> {
        let compiled = Rules::compile(channel_uid, setting);
        self.rules.write()?.insert(channel_uid.to_string(), compiled);
        Ok(())
    }

    pub fn remove(&self, channel_uid: &str) -> Result<()> {
        self.rules.write()?.remove(channel_uid);
        Ok(())
    }

    pub fn get(&self, channel_uid: &str) -> Result<ChannelSetting> {
        Ok(self
            .rules
            .read()?
            .get(channel_uid)
            .map(|r| r.setting.clone())
            .unwrap_or_default())
    }

    /// Channels a post arriving for `home` lands in: `home` unless its
    /// exclude rule drops the post, plus every other channel whose include
    /// rule matches.
    pub fn route(&self, item: &Item, home: &str) -> Result<Vec<String>> {
        let text = item.match_text();
        let rules = self.rules.read()?;

        let mut targets = Vec::new();
        match rules.get(home) {
            Some(r) if r.excludes(item, &text) => {
                tracing::debug!("Item {} excluded from {}", item.id, home);
            }
            _ => targets.push(home.to_string()),
        }

        let mut extra: Vec<&String> = rules
            .iter()
            .filter(|(uid, r)| uid.as_str() != home && r.includes(&text))
            .map(|(uid, _)| uid)
            .collect();
        extra.sort();
        targets.extend(extra.into_iter().cloned());

        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(text: &str) -> Item {
        let mut item = Item::new("note");
        item.content = Some(crate::domain::Content {
            text: text.to_string(),
            html: String::new(),
        });
        item
    }

    fn router(settings: &[(&str, ChannelSetting)]) -> ChannelRouter {
        let router = ChannelRouter::new();
        router
            .load(
                settings
                    .iter()
                    .map(|(uid, s)| (uid.to_string(), s.clone()))
                    .collect(),
            )
            .unwrap();
        router
    }

    #[test]
    fn test_include_regex_fans_out() {
        let router = router(&[
            ("a", ChannelSetting { include_regex: "foo".into(), ..Default::default() }),
            ("b", ChannelSetting::default()),
        ]);

        assert_eq!(router.route(&note("has foo in it"), "b").unwrap(), vec!["b", "a"]);
        assert_eq!(router.route(&note("nothing here"), "b").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_excluded_type_is_dropped_from_home_only() {
        let router = router(&[(
            "c",
            ChannelSetting { exclude_types: vec!["like".into()], ..Default::default() },
        )]);

        let mut like = note("");
        like.like_of = vec!["https://example.com/post".into()];

        assert!(router.route(&like, "c").unwrap().is_empty());
        assert_eq!(router.route(&like, "d").unwrap(), vec!["d"]);
        assert_eq!(router.route(&note("plain"), "c").unwrap(), vec!["c"]);
    }

    #[test]
    fn test_exclude_regex() {
        let router = router(&[(
            "c",
            ChannelSetting { exclude_regex: "(?i)spoiler".into(), ..Default::default() },
        )]);
        assert!(router.route(&note("SPOILER ahead"), "c").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_regexes_fail_safe() {
        let router = router(&[
            ("home", ChannelSetting { exclude_regex: "(".into(), ..Default::default() }),
            ("other", ChannelSetting { include_regex: "(".into(), ..Default::default() }),
        ]);

        // Broken exclude keeps the post, broken include never adds it.
        assert_eq!(router.route(&note("( anything"), "home").unwrap(), vec!["home"]);
    }

    #[test]
    fn test_set_and_remove() {
        let router = ChannelRouter::new();
        let setting = ChannelSetting { include_regex: "x".into(), ..Default::default() };
        router.set("a", setting.clone()).unwrap();
        assert_eq!(router.get("a").unwrap(), setting);

        router.remove("a").unwrap();
        assert_eq!(router.get("a").unwrap(), ChannelSetting::default());
    }
}
