use std::sync::Arc;

use crate::app::{Result, TributaryError};
use crate::domain::{Item, Timeline, Unread};
use crate::keyspace::Keyspace;
use crate::timeline::{paging, published_score, TimelineBackend, PAGE_SIZE};

/// Entries kept per channel log.
pub const STREAM_MAX_LEN: usize = 250;

/// Capped append log in arrival order. There is no read state: what is in
/// the log is the history. Bodies live only as long as their log entry.
pub struct StreamTimeline {
    keyspace: Arc<Keyspace>,
    key: String,
}

impl StreamTimeline {
    pub fn new(keyspace: Arc<Keyspace>, channel_uid: &str) -> Self {
        Self {
            keyspace,
            key: format!("stream:{}", channel_uid),
        }
    }

    fn body_key(&self, id: &str) -> String {
        format!("{}:item:{}", self.key, id)
    }

    fn parse_cursor(s: &str) -> Result<u64> {
        s.parse()
            .map_err(|_| TributaryError::BadRequest(format!("invalid cursor '{}'", s)))
    }
}

impl TimelineBackend for StreamTimeline {
    fn items(&self, before: Option<&str>, after: Option<&str>) -> Result<Timeline> {
        let entries = match (before, after) {
            (_, Some(after)) => {
                self.keyspace
                    .xrev_range(&self.key, Some(Self::parse_cursor(after)?), PAGE_SIZE)?
            }
            (Some(before), None) => {
                let mut newer = self
                    .keyspace
                    .xrange(&self.key, Self::parse_cursor(before)?, PAGE_SIZE)?;
                newer.reverse();
                newer
            }
            (None, None) => self.keyspace.xrev_range(&self.key, None, PAGE_SIZE)?,
        };

        let mut items = Vec::with_capacity(entries.len());
        for (_, id) in &entries {
            match self.keyspace.get(&self.body_key(id))? {
                Some(bytes) => items.push(serde_json::from_slice::<Item>(&bytes)?),
                None => tracing::warn!("Missing body for item {} in {}", id, self.key),
            }
        }

        Ok(Timeline {
            items,
            paging: paging(
                entries.first().map(|(seq, _)| seq.to_string()),
                entries.last().map(|(seq, _)| seq.to_string()),
            ),
        })
    }

    fn count(&self) -> Result<i64> {
        Ok(self.keyspace.xlen(&self.key)? as i64)
    }

    fn add_item(&self, item: &Item) -> Result<bool> {
        published_score(item)?;

        if self.keyspace.xcontains(&self.key, &item.id)? {
            return Ok(false);
        }

        self.keyspace
            .set(&self.body_key(&item.id), serde_json::to_vec(item)?, None)?;
        let (_, evicted) = self.keyspace.xadd(&self.key, &item.id, STREAM_MAX_LEN)?;
        for id in evicted {
            self.keyspace.del(&self.body_key(&id))?;
        }
        Ok(true)
    }

    fn mark_read(&self, _ids: &[String]) -> Result<()> {
        Ok(())
    }

    fn unread(&self) -> Result<Unread> {
        Ok(Unread::Unknown)
    }

    fn clear(&self) -> Result<()> {
        for id in self.keyspace.xvalues(&self.key)? {
            self.keyspace.del(&self.body_key(&id))?;
        }
        self.keyspace.del(&self.key)?;
        Ok(())
    }
}
