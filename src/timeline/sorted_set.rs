use std::sync::Arc;

use crate::app::Result;
use crate::domain::{Item, Timeline};
use crate::keyspace::{Keyspace, Scored};
use crate::timeline::{paging, published_score, Cursor, TimelineBackend, PAGE_SIZE};

/// Unread posts in a sorted set scored by publish time, plus a set of read
/// item ids. Marking a post read takes it out of the timeline for good and
/// drops its stored body.
pub struct SortedSetTimeline {
    keyspace: Arc<Keyspace>,
    prefix: String,
    posts_key: String,
    read_key: String,
}

impl SortedSetTimeline {
    pub fn new(keyspace: Arc<Keyspace>, channel_uid: &str) -> Self {
        Self {
            keyspace,
            prefix: format!("zchannel:{}", channel_uid),
            posts_key: format!("zchannel:{}:posts", channel_uid),
            read_key: format!("zchannel:{}:read", channel_uid),
        }
    }

    /// Bodies are stored per channel so that trimming one channel never
    /// touches another's copy.
    fn body_key(&self, id: &str) -> String {
        format!("{}:item:{}", self.prefix, id)
    }

    fn load(&self, id: &str) -> Result<Option<Item>> {
        match self.keyspace.get(&self.body_key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl TimelineBackend for SortedSetTimeline {
    fn items(&self, before: Option<&str>, after: Option<&str>) -> Result<Timeline> {
        let positions: Vec<Scored> = match (before, after) {
            (_, Some(after)) => {
                let c = Cursor::decode(after)?;
                self.keyspace
                    .zrev_range_below(&self.posts_key, Some(&(c.score, c.key)), PAGE_SIZE)?
            }
            (Some(before), None) => {
                let c = Cursor::decode(before)?;
                let mut newer = self
                    .keyspace
                    .zrange_above(&self.posts_key, &(c.score, c.key), PAGE_SIZE)?;
                newer.reverse();
                newer
            }
            (None, None) => self
                .keyspace
                .zrev_range_below(&self.posts_key, None, PAGE_SIZE)?,
        };

        let mut items = Vec::with_capacity(positions.len());
        for (_, id) in &positions {
            match self.load(id)? {
                Some(mut item) => {
                    item.read = false;
                    items.push(item);
                }
                None => tracing::warn!("Missing body for {} in {}", id, self.posts_key),
            }
        }

        let cursor = |p: &Scored| Cursor::new(p.0, &p.1).encode();
        Ok(Timeline {
            items,
            paging: paging(positions.first().map(cursor), positions.last().map(cursor)),
        })
    }

    fn count(&self) -> Result<i64> {
        Ok(self.keyspace.zcard(&self.posts_key)? as i64)
    }

    fn add_item(&self, item: &Item) -> Result<bool> {
        let score = published_score(item)?;

        if self.keyspace.sismember(&self.read_key, &item.id)? {
            return Ok(false);
        }

        self.keyspace
            .set(&self.body_key(&item.id), serde_json::to_vec(item)?, None)?;
        self.keyspace.zadd(&self.posts_key, &item.id, score)
    }

    fn mark_read(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            if self.keyspace.zrem(&self.posts_key, id)? {
                self.keyspace.del(&self.body_key(id))?;
            }
            self.keyspace.sadd(&self.read_key, id)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for id in self.keyspace.zmembers(&self.posts_key)? {
            self.keyspace.del(&self.body_key(&id))?;
        }
        self.keyspace.del(&self.posts_key)?;
        self.keyspace.del(&self.read_key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TributaryError;
    use crate::store::SqliteStore;
    use crate::timeline::tests::{sample_item, walk_all};

    fn timeline() -> SortedSetTimeline {
        SortedSetTimeline::new(Arc::new(Keyspace::in_memory().unwrap()), "inbox")
    }

    #[test]
    fn test_add_item_is_idempotent() {
        let timeline = timeline();
        let item = sample_item("a", 0);

        assert!(timeline.add_item(&item).unwrap());
        assert!(!timeline.add_item(&item).unwrap());
        assert_eq!(timeline.count().unwrap(), 1);
        assert_eq!(timeline.items(None, None).unwrap().items, vec![item]);
    }

    #[test]
    fn test_read_item_is_not_resurrected() {
        let timeline = timeline();
        let item = sample_item("a", 0);
        timeline.add_item(&item).unwrap();

        timeline.mark_read(&[item.id.clone(), "unknown".to_string()]).unwrap();
        assert_eq!(timeline.count().unwrap(), 0);

        assert!(!timeline.add_item(&item).unwrap());
        assert!(timeline.items(None, None).unwrap().items.is_empty());
    }

    #[test]
    fn test_read_and_clear_drop_bodies() {
        let timeline = timeline();
        let a = sample_item("a", 0);
        let b = sample_item("b", 1);
        timeline.add_item(&a).unwrap();
        timeline.add_item(&b).unwrap();

        timeline.mark_read(&[a.id.clone()]).unwrap();
        assert_eq!(timeline.keyspace.get(&timeline.body_key(&a.id)).unwrap(), None);
        assert!(timeline.keyspace.get(&timeline.body_key(&b.id)).unwrap().is_some());

        timeline.clear().unwrap();
        assert_eq!(timeline.keyspace.get(&timeline.body_key(&b.id)).unwrap(), None);
        assert_eq!(timeline.count().unwrap(), 0);
    }

    #[test]
    fn test_read_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tributary.db");
        let item = sample_item("a", 0);

        {
            let store = Arc::new(SqliteStore::new(&path).unwrap());
            let timeline = SortedSetTimeline::new(Arc::new(Keyspace::new(store)), "inbox");
            timeline.add_item(&item).unwrap();
            timeline.add_item(&sample_item("b", 1)).unwrap();
            timeline.mark_read(&[item.id.clone()]).unwrap();
        }

        let store = Arc::new(SqliteStore::new(&path).unwrap());
        let timeline = SortedSetTimeline::new(Arc::new(Keyspace::new(store)), "inbox");
        assert_eq!(timeline.count().unwrap(), 1);
        assert!(!timeline.add_item(&item).unwrap());
        assert_eq!(timeline.count().unwrap(), 1);
        assert_eq!(timeline.items(None, None).unwrap().items[0].uid, "b");
    }

    #[test]
    fn test_pagination_is_complete_and_ordered() {
        let timeline = timeline();
        // Pairs share a publish time to exercise tie breaking.
        for i in 0..45 {
            timeline.add_item(&sample_item(&format!("post-{}", i), i / 2)).unwrap();
        }

        let ids = walk_all(&timeline);
        assert_eq!(ids.len(), 45);

        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 45);

        let scores: Vec<i64> = ids
            .iter()
            .map(|id| {
                timeline
                    .keyspace
                    .zscore(&timeline.posts_key, id)
                    .unwrap()
                    .unwrap()
            })
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_before_cursor_returns_newer_page() {
        let timeline = timeline();
        for i in 0..30 {
            timeline.add_item(&sample_item(&format!("post-{}", i), i)).unwrap();
        }

        let first = timeline.items(None, None).unwrap();
        let second = timeline
            .items(None, first.paging.after.as_deref())
            .unwrap();
        assert_eq!(second.items.len(), 10);

        let back = timeline
            .items(second.paging.before.as_deref(), None)
            .unwrap();
        assert_eq!(back.items, first.items);
    }

    #[test]
    fn test_unparseable_published_is_rejected() {
        let timeline = timeline();
        let mut item = sample_item("a", 0);
        item.published = "not a date".into();

        assert!(matches!(
            timeline.add_item(&item),
            Err(TributaryError::TimeParse(_))
        ));
        assert_eq!(timeline.count().unwrap(), 0);
    }
}
