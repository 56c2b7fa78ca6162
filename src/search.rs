//! Search sink. Ranking belongs to whatever index sits behind
//! [`SearchIndex`]; [`MemoryIndex`] does plain substring matching.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::app::Result;
use crate::domain::Item;

/// Channel name that searches every channel.
pub const GLOBAL_CHANNEL: &str = "global";

const MAX_RESULTS: usize = 20;

pub trait SearchIndex: Send + Sync {
    fn index(&self, item: &Item, channel: &str) -> Result<()>;
    fn query(&self, channel: &str, text: &str) -> Result<Vec<Item>>;
}

#[derive(Default)]
pub struct MemoryIndex {
    docs: RwLock<BTreeMap<(String, String), (String, Item)>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SearchIndex for MemoryIndex {
    fn index(&self, item: &Item, channel: &str) -> Result<()> {
        let text = item.match_text().to_lowercase();
        self.docs
            .write()?
            .insert((channel.to_string(), item.id.clone()), (text, item.clone()));
        Ok(())
    }

    fn query(&self, channel: &str, text: &str) -> Result<Vec<Item>> {
        let needle = text.to_lowercase();
        let docs = self.docs.read()?;
        Ok(docs
            .iter()
            .filter(|((ch, _), _)| channel == GLOBAL_CHANNEL || ch == channel)
            .filter(|(_, (haystack, _))| haystack.contains(&needle))
            .map(|(_, (_, item))| item.clone())
            .take(MAX_RESULTS)
            .collect())
    }
}
