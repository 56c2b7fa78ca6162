use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::app::Result;
use crate::domain::{Item, Timeline};
use crate::store::SqliteStore;
use crate::timeline::{paging, published_score, Cursor, TimelineBackend, PAGE_SIZE};

/// Rows in the `items` table, unique per `(channel, uid)`, with an explicit
/// read flag. Read posts stay listed; the count is the unread count.
pub struct SqliteTimeline {
    store: Arc<SqliteStore>,
    channel_uid: String,
}

impl SqliteTimeline {
    pub fn new(store: Arc<SqliteStore>, channel_uid: &str) -> Self {
        Self {
            store,
            channel_uid: channel_uid.to_string(),
        }
    }
}

type Row = (i64, String, bool, String);

impl TimelineBackend for SqliteTimeline {
    fn items(&self, before: Option<&str>, after: Option<&str>) -> Result<Timeline> {
        let conn = self.store.lock()?;
        let channel_id = SqliteStore::channel_id(&conn, &self.channel_uid)?;

        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<Row> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get::<_, i32>(2)? != 0,
                row.get(3)?,
            ))
        };

        let rows: Vec<Row> = match (before, after) {
            (_, Some(after)) => {
                let c = Cursor::decode(after)?;
                let mut stmt = conn.prepare(
                    "SELECT published_at, uid, is_read, data FROM items
                     WHERE channel_id = ?1 AND (published_at < ?2 OR (published_at = ?2 AND uid < ?3))
                     ORDER BY published_at DESC, uid DESC LIMIT ?4",
                )?;
                let rows = stmt
                    .query_map(params![channel_id, c.score, c.key, PAGE_SIZE as i64], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            (Some(before), None) => {
                let c = Cursor::decode(before)?;
                let mut stmt = conn.prepare(
                    "SELECT published_at, uid, is_read, data FROM items
                     WHERE channel_id = ?1 AND (published_at > ?2 OR (published_at = ?2 AND uid > ?3))
                     ORDER BY published_at ASC, uid ASC LIMIT ?4",
                )?;
                let mut rows = stmt
                    .query_map(params![channel_id, c.score, c.key, PAGE_SIZE as i64], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.reverse();
                rows
            }
            (None, None) => {
                let mut stmt = conn.prepare(
                    "SELECT published_at, uid, is_read, data FROM items
                     WHERE channel_id = ?1
                     ORDER BY published_at DESC, uid DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![channel_id, PAGE_SIZE as i64], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };

        let mut items = Vec::with_capacity(rows.len());
        for (_, _, is_read, data) in &rows {
            let mut item: Item = serde_json::from_str(data)?;
            item.read = *is_read;
            items.push(item);
        }

        let cursor = |r: &Row| Cursor::new(r.0, &r.1).encode();
        Ok(Timeline {
            items,
            paging: paging(rows.first().map(cursor), rows.last().map(cursor)),
        })
    }

    fn count(&self) -> Result<i64> {
        let conn = self.store.lock()?;
        let channel_id = SqliteStore::channel_id(&conn, &self.channel_uid)?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE channel_id = ?1 AND is_read = 0",
            params![channel_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn add_item(&self, item: &Item) -> Result<bool> {
        let published = published_score(item)?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.store.lock()?;
        let channel_id = SqliteStore::channel_id(&conn, &self.channel_uid)?;

        let tx = conn.transaction()?;
        let existing: Option<i32> = tx
            .query_row(
                "SELECT is_read FROM items WHERE channel_id = ?1 AND uid = ?2",
                params![channel_id, item.id],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            "INSERT INTO items (channel_id, uid, is_read, data, published_at, created_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?4, ?5, ?5)
             ON CONFLICT(channel_id, uid) DO UPDATE SET updated_at = excluded.updated_at",
            params![channel_id, item.id, serde_json::to_string(item)?, published, now],
        )?;
        tx.commit()?;

        Ok(existing.is_none())
    }

    fn mark_read(&self, ids: &[String]) -> Result<()> {
        let mut conn = self.store.lock()?;
        let channel_id = SqliteStore::channel_id(&conn, &self.channel_uid)?;

        let tx = conn.transaction()?;
        for id in ids {
            tx.execute(
                "UPDATE items SET is_read = 1, updated_at = ?3 WHERE channel_id = ?1 AND uid = ?2",
                params![channel_id, id, Utc::now().to_rfc3339()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.store.lock()?;
        conn.execute(
            "DELETE FROM items WHERE channel_id = (SELECT id FROM channels WHERE uid = ?1)",
            params![self.channel_uid],
        )?;
        Ok(())
    }
}
