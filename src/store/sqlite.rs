use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{Result, TributaryError};
use crate::domain::{Channel, ChannelSetting, Feed, FeedUpdate};
use crate::store::Store;

const FEED_COLUMNS: &str = "f.id, c.uid, f.kind, f.url, f.name, f.photo, f.hub, f.callback, \
     f.secret, f.lease_seconds, f.resubscribe_at, f.created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![
            M::up(include_str!("../../migrations/001-initial/up.sql")),
            M::up(include_str!("../../migrations/002-keyspace/up.sql")),
        ]);

        let mut conn = self.lock()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| TributaryError::Storage(format!("migration failed: {}", e)))?;

        Ok(())
    }

    /// Exclusive access to the connection. Shared with the relational
    /// timeline backend.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        Ok(self.conn.lock()?)
    }

    pub(crate) fn channel_id(conn: &Connection, uid: &str) -> Result<i64> {
        conn.query_row(
            "SELECT id FROM channels WHERE uid = ?1",
            params![uid],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| TributaryError::ChannelNotFound(uid.to_string()))
    }

    pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
        Ok(Feed {
            id: row.get(0)?,
            channel_uid: row.get(1)?,
            kind: row.get(2)?,
            url: row.get(3)?,
            name: row.get(4)?,
            photo: row.get(5)?,
            hub: row.get(6)?,
            callback: row.get(7)?,
            secret: row.get(8)?,
            lease_seconds: row.get(9)?,
            resubscribe_at: row
                .get::<_, Option<String>>(10)?
                .and_then(|s| Self::parse_datetime(&s)),
            created_at: row
                .get::<_, String>(11)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
        })
    }

    fn query_feeds(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Feed>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM feeds f JOIN channels c ON c.id = f.channel_id {} ORDER BY f.id",
            FEED_COLUMNS, filter
        ))?;

        let feeds = stmt
            .query_map(args, Self::feed_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(feeds)
    }
}

impl Store for SqliteStore {
    fn add_channel(&self, uid: &str, name: &str) -> Result<Channel> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO channels (uid, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(uid) DO NOTHING",
            params![uid, name, Utc::now().to_rfc3339()],
        )?;
        let name: String = conn.query_row(
            "SELECT name FROM channels WHERE uid = ?1",
            params![uid],
            |row| row.get(0),
        )?;
        Ok(Channel::new(uid, &name))
    }

    fn get_channel(&self, uid: &str) -> Result<Option<Channel>> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                "SELECT uid, name FROM channels WHERE uid = ?1",
                params![uid],
                |row| {
                    let uid: String = row.get(0)?;
                    let name: String = row.get(1)?;
                    Ok(Channel::new(&uid, &name))
                },
            )
            .optional()?;

        Ok(result)
    }

    fn get_all_channels(&self) -> Result<Vec<Channel>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT uid, name FROM channels ORDER BY id")?;

        let channels = stmt
            .query_map([], |row| {
                let uid: String = row.get(0)?;
                let name: String = row.get(1)?;
                Ok(Channel::new(&uid, &name))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(channels)
    }

    fn rename_channel(&self, uid: &str, name: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE channels SET name = ?1 WHERE uid = ?2",
            params![name, uid],
        )?;
        if changed == 0 {
            return Err(TributaryError::ChannelNotFound(uid.to_string()));
        }
        Ok(())
    }

    fn delete_channel(&self, uid: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM channels WHERE uid = ?1", params![uid])?;
        Ok(())
    }

    fn get_setting(&self, channel_uid: &str) -> Result<ChannelSetting> {
        let conn = self.lock()?;
        let channel_id = Self::channel_id(&conn, channel_uid)?;
        let result = conn
            .query_row(
                "SELECT backend, include_regex, exclude_regex, exclude_types
                 FROM channel_settings WHERE channel_id = ?1",
                params![channel_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match result {
            Some((backend, include_regex, exclude_regex, exclude_types)) => Ok(ChannelSetting {
                backend,
                include_regex,
                exclude_regex,
                exclude_types: serde_json::from_str(&exclude_types)?,
            }),
            None => Ok(ChannelSetting::default()),
        }
    }

    fn save_setting(&self, channel_uid: &str, setting: &ChannelSetting) -> Result<()> {
        let conn = self.lock()?;
        let channel_id = Self::channel_id(&conn, channel_uid)?;
        conn.execute(
            "INSERT INTO channel_settings (channel_id, backend, include_regex, exclude_regex, exclude_types)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(channel_id) DO UPDATE SET
                backend = ?2, include_regex = ?3, exclude_regex = ?4, exclude_types = ?5",
            params![
                channel_id,
                setting.backend,
                setting.include_regex,
                setting.exclude_regex,
                serde_json::to_string(&setting.exclude_types)?
            ],
        )?;
        Ok(())
    }

    fn get_all_settings(&self) -> Result<Vec<(String, ChannelSetting)>> {
        let uids: Vec<String> = self
            .get_all_channels()?
            .into_iter()
            .map(|c| c.uid)
            .collect();

        uids.into_iter()
            .map(|uid| {
                let setting = self.get_setting(&uid)?;
                Ok((uid, setting))
            })
            .collect()
    }

    fn add_feed(&self, feed: &Feed) -> Result<i64> {
        let conn = self.lock()?;
        let channel_id = Self::channel_id(&conn, &feed.channel_uid)?;

        conn.execute(
            "INSERT INTO feeds (channel_id, url, kind, name, photo, hub, callback, secret,
                                lease_seconds, resubscribe_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(channel_id, url) DO NOTHING",
            params![
                channel_id,
                feed.url,
                feed.kind,
                feed.name,
                feed.photo,
                feed.hub,
                feed.callback,
                feed.secret,
                feed.lease_seconds,
                feed.resubscribe_at.map(|dt| dt.to_rfc3339()),
                feed.created_at.to_rfc3339()
            ],
        )?;

        let id = conn.query_row(
            "SELECT id FROM feeds WHERE channel_id = ?1 AND url = ?2",
            params![channel_id, feed.url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        Ok(self.query_feeds("WHERE f.id = ?1", &[&id])?.into_iter().next())
    }

    fn get_feed_by_url(&self, channel_uid: &str, url: &str) -> Result<Option<Feed>> {
        Ok(self
            .query_feeds("WHERE c.uid = ?1 AND f.url = ?2", &[&channel_uid, &url])?
            .into_iter()
            .next())
    }

    fn get_feeds_by_channel(&self, channel_uid: &str) -> Result<Vec<Feed>> {
        self.query_feeds("WHERE c.uid = ?1", &[&channel_uid])
    }

    fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        self.query_feeds("", &[])
    }

    fn update_feed(&self, id: i64, update: &FeedUpdate) -> Result<()> {
        let conn = self.lock()?;

        if let Some(ref name) = update.name {
            conn.execute("UPDATE feeds SET name = ?1 WHERE id = ?2", params![name, id])?;
        }
        if let Some(ref photo) = update.photo {
            conn.execute("UPDATE feeds SET photo = ?1 WHERE id = ?2", params![photo, id])?;
        }
        if let Some(ref hub) = update.hub {
            conn.execute("UPDATE feeds SET hub = ?1 WHERE id = ?2", params![hub, id])?;
        }
        if let Some(ref callback) = update.callback {
            conn.execute(
                "UPDATE feeds SET callback = ?1 WHERE id = ?2",
                params![callback, id],
            )?;
        }
        if let Some(ref secret) = update.secret {
            conn.execute("UPDATE feeds SET secret = ?1 WHERE id = ?2", params![secret, id])?;
        }
        if let Some(lease_seconds) = update.lease_seconds {
            conn.execute(
                "UPDATE feeds SET lease_seconds = ?1 WHERE id = ?2",
                params![lease_seconds, id],
            )?;
        }
        if let Some(ref resubscribe_at) = update.resubscribe_at {
            conn.execute(
                "UPDATE feeds SET resubscribe_at = ?1 WHERE id = ?2",
                params![resubscribe_at.to_rfc3339(), id],
            )?;
        }

        Ok(())
    }

    fn delete_feed(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_channel(uid: &str) -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.add_channel(uid, "Inbox").unwrap();
        store
    }

    #[test]
    fn test_add_and_get_channel() {
        let store = store_with_channel("inbox");
        let channel = store.get_channel("inbox").unwrap().unwrap();
        assert_eq!(channel.name, "Inbox");

        // Re-adding keeps the existing name.
        let again = store.add_channel("inbox", "Other").unwrap();
        assert_eq!(again.name, "Inbox");
        assert_eq!(store.get_all_channels().unwrap().len(), 1);
    }

    #[test]
    fn test_rename_and_delete_channel() {
        let store = store_with_channel("inbox");
        store.rename_channel("inbox", "Home").unwrap();
        assert_eq!(store.get_channel("inbox").unwrap().unwrap().name, "Home");

        assert!(matches!(
            store.rename_channel("missing", "x"),
            Err(TributaryError::ChannelNotFound(_))
        ));

        store.delete_channel("inbox").unwrap();
        assert!(store.get_channel("inbox").unwrap().is_none());
    }

    #[test]
    fn test_settings_round_trip() {
        let store = store_with_channel("inbox");
        assert_eq!(store.get_setting("inbox").unwrap(), ChannelSetting::default());

        let setting = ChannelSetting {
            backend: "sorted-set".into(),
            include_regex: "rust".into(),
            exclude_regex: String::new(),
            exclude_types: vec!["like".into(), "repost".into()],
        };
        store.save_setting("inbox", &setting).unwrap();

        assert_eq!(store.get_setting("inbox").unwrap(), setting);
        let all = store.get_all_settings().unwrap();
        assert_eq!(all, vec![("inbox".to_string(), setting)]);
    }

    #[test]
    fn test_add_and_get_feed() {
        let store = store_with_channel("inbox");
        let feed = Feed::new("inbox", "https://example.com/feed.xml".into());
        let id = store.add_feed(&feed).unwrap();

        let retrieved = store.get_feed(id).unwrap().unwrap();
        assert_eq!(retrieved.url, "https://example.com/feed.xml");
        assert_eq!(retrieved.channel_uid, "inbox");

        // Following the same url twice yields the same record.
        assert_eq!(store.add_feed(&feed).unwrap(), id);
    }

    #[test]
    fn test_feed_requires_channel() {
        let store = SqliteStore::in_memory().unwrap();
        let feed = Feed::new("nowhere", "https://example.com/feed.xml".into());
        assert!(matches!(
            store.add_feed(&feed),
            Err(TributaryError::ChannelNotFound(_))
        ));
    }

    #[test]
    fn test_get_feed_by_url() {
        let store = store_with_channel("inbox");
        store
            .add_feed(&Feed::new("inbox", "https://example.com/feed.xml".into()))
            .unwrap();

        let found = store
            .get_feed_by_url("inbox", "https://example.com/feed.xml")
            .unwrap();
        assert!(found.is_some());

        let missing = store
            .get_feed_by_url("inbox", "https://example.com/nonexistent.xml")
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_feeds_by_channel() {
        let store = store_with_channel("inbox");
        store.add_channel("news", "News").unwrap();
        store
            .add_feed(&Feed::new("inbox", "https://a.example/".into()))
            .unwrap();
        store
            .add_feed(&Feed::new("news", "https://b.example/".into()))
            .unwrap();

        assert_eq!(store.get_feeds_by_channel("news").unwrap().len(), 1);
        assert_eq!(store.get_all_feeds().unwrap().len(), 2);
    }

    #[test]
    fn test_update_feed_partial() {
        let store = store_with_channel("inbox");
        let id = store
            .add_feed(&Feed::new("inbox", "https://example.com/feed.xml".into()))
            .unwrap();

        let at = Utc::now();
        store
            .update_feed(
                id,
                &FeedUpdate {
                    hub: Some("https://hub.example/".into()),
                    secret: Some("s3cret".into()),
                    lease_seconds: Some(86400),
                    resubscribe_at: Some(at),
                    ..Default::default()
                },
            )
            .unwrap();

        let retrieved = store.get_feed(id).unwrap().unwrap();
        assert_eq!(retrieved.hub.as_deref(), Some("https://hub.example/"));
        assert_eq!(retrieved.secret.as_deref(), Some("s3cret"));
        assert_eq!(retrieved.lease_seconds, Some(86400));
        assert_eq!(retrieved.name, None);
        assert_eq!(
            retrieved.resubscribe_at.map(|d| d.timestamp()),
            Some(at.timestamp())
        );
    }

    #[test]
    fn test_delete_channel_cascades_to_feeds() {
        let store = store_with_channel("inbox");
        store
            .add_feed(&Feed::new("inbox", "https://example.com/feed.xml".into()))
            .unwrap();
        store.delete_channel("inbox").unwrap();
        assert!(store.get_all_feeds().unwrap().is_empty());
    }
}
