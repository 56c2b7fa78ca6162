//! Key space with sorted sets, sets, capped logs and expiring strings, kept
//! in the `kv_*` tables of the SQLite database.
//!
//! The sorted-set and stream timelines each hold an `Arc<Keyspace>` and the
//! fetch cache sits on the same instance. Every call takes the store's
//! connection lock for its own duration; nothing is held across an `.await`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::app::Result;
use crate::fetcher::ResponseCache;
use crate::store::SqliteStore;

/// Sorted-set member position: score first, member as tie breaker.
pub type Scored = (i64, String);

pub struct Keyspace {
    store: Arc<SqliteStore>,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl Keyspace {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(SqliteStore::in_memory()?)))
    }

    // Strings

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.store.lock()?;
        let row: Option<(Vec<u8>, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM kv_strings WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((_, Some(expires))) if expires <= now_millis() => {
                conn.execute("DELETE FROM kv_strings WHERE key = ?1", params![key])?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    /// Store a value. Expired strings are swept on every write.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let now = now_millis();
        let expires = ttl.map(|ttl| now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)));

        let conn = self.store.lock()?;
        conn.execute(
            "DELETE FROM kv_strings WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        conn.execute(
            "INSERT INTO kv_strings (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires],
        )?;
        Ok(())
    }

    /// Remove a key of any type.
    pub fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        for table in ["kv_strings", "kv_zsets", "kv_sets", "kv_logs"] {
            removed += tx.execute(&format!("DELETE FROM {} WHERE key = ?1", table), params![key])?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    // Sorted sets

    /// Insert or re-score a member. Returns true when the member is new.
    pub fn zadd(&self, key: &str, member: &str, score: i64) -> Result<bool> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction()?;
        let existed = tx
            .query_row(
                "SELECT 1 FROM kv_zsets WHERE key = ?1 AND member = ?2",
                params![key, member],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        tx.execute(
            "INSERT INTO kv_zsets (key, member, score) VALUES (?1, ?2, ?3)
             ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
            params![key, member, score],
        )?;
        tx.commit()?;
        Ok(!existed)
    }

    pub fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let conn = self.store.lock()?;
        let removed = conn.execute(
            "DELETE FROM kv_zsets WHERE key = ?1 AND member = ?2",
            params![key, member],
        )?;
        Ok(removed > 0)
    }

    pub fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>> {
        let conn = self.store.lock()?;
        Ok(conn
            .query_row(
                "SELECT score FROM kv_zsets WHERE key = ?1 AND member = ?2",
                params![key, member],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn zcard(&self, key: &str) -> Result<usize> {
        let conn = self.store.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv_zsets WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn zmembers(&self, key: &str) -> Result<Vec<String>> {
        let conn = self.store.lock()?;
        let mut stmt = conn.prepare("SELECT member FROM kv_zsets WHERE key = ?1")?;
        let members = stmt
            .query_map(params![key], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(members)
    }

    /// Highest-ranked members strictly below `below` (or from the top),
    /// in descending order.
    pub fn zrev_range_below(&self, key: &str, below: Option<&Scored>, limit_to: usize) -> Result<Vec<Scored>> {
        let conn = self.store.lock()?;
        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<Scored> { Ok((row.get(0)?, row.get(1)?)) };

        let rows = match below {
            Some((score, member)) => {
                let mut stmt = conn.prepare(
                    "SELECT score, member FROM kv_zsets
                     WHERE key = ?1 AND (score < ?2 OR (score = ?2 AND member < ?3))
                     ORDER BY score DESC, member DESC LIMIT ?4",
                )?;
                let rows = stmt
                    .query_map(params![key, score, member, limit(limit_to)], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT score, member FROM kv_zsets WHERE key = ?1
                     ORDER BY score DESC, member DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![key, limit(limit_to)], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// Lowest-ranked members strictly above `above`, in ascending order.
    pub fn zrange_above(&self, key: &str, above: &Scored, limit_to: usize) -> Result<Vec<Scored>> {
        let conn = self.store.lock()?;
        let mut stmt = conn.prepare(
            "SELECT score, member FROM kv_zsets
             WHERE key = ?1 AND (score > ?2 OR (score = ?2 AND member > ?3))
             ORDER BY score ASC, member ASC LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(params![key, above.0, above.1, limit(limit_to)], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // Sets

    pub fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let conn = self.store.lock()?;
        let added = conn.execute(
            "INSERT INTO kv_sets (key, member) VALUES (?1, ?2) ON CONFLICT(key, member) DO NOTHING",
            params![key, member],
        )?;
        Ok(added > 0)
    }

    pub fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let conn = self.store.lock()?;
        Ok(conn
            .query_row(
                "SELECT 1 FROM kv_sets WHERE key = ?1 AND member = ?2",
                params![key, member],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    // Logs

    /// Append to a log, trimming it to the newest `max_len` entries.
    /// Returns the new entry id and the values trimmed off the front.
    pub fn xadd(&self, key: &str, value: &str, max_len: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction()?;

        let last: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM kv_logs WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        let id = last + 1;
        tx.execute(
            "INSERT INTO kv_logs (key, seq, value) VALUES (?1, ?2, ?3)",
            params![key, id, value],
        )?;

        let evicted = {
            let mut stmt = tx.prepare(
                "SELECT seq, value FROM kv_logs WHERE key = ?1
                 ORDER BY seq DESC LIMIT -1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![key, limit(max_len)], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        if let Some((newest_evicted, _)) = evicted.first() {
            tx.execute(
                "DELETE FROM kv_logs WHERE key = ?1 AND seq <= ?2",
                params![key, newest_evicted],
            )?;
        }
        tx.commit()?;

        Ok((id as u64, evicted.into_iter().map(|(_, v)| v).collect()))
    }

    pub fn xlen(&self, key: &str) -> Result<usize> {
        let conn = self.store.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv_logs WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Newest entries with an id below `before` (or from the end), newest first.
    pub fn xrev_range(&self, key: &str, before: Option<u64>, limit_to: usize) -> Result<Vec<(u64, String)>> {
        let conn = self.store.lock()?;
        let before = before.map_or(i64::MAX, |b| i64::try_from(b).unwrap_or(i64::MAX));
        let mut stmt = conn.prepare(
            "SELECT seq, value FROM kv_logs WHERE key = ?1 AND seq < ?2
             ORDER BY seq DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![key, before, limit(limit_to)], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Oldest entries with an id above `after`, oldest first.
    pub fn xrange(&self, key: &str, after: u64, limit_to: usize) -> Result<Vec<(u64, String)>> {
        let conn = self.store.lock()?;
        let after = i64::try_from(after).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT seq, value FROM kv_logs WHERE key = ?1 AND seq > ?2
             ORDER BY seq ASC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![key, after, limit(limit_to)], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn xcontains(&self, key: &str, value: &str) -> Result<bool> {
        let conn = self.store.lock()?;
        Ok(conn
            .query_row(
                "SELECT 1 FROM kv_logs WHERE key = ?1 AND value = ?2 LIMIT 1",
                params![key, value],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// Every value in a log, oldest first.
    pub fn xvalues(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .xrange(key, 0, usize::MAX)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }
}

impl ResponseCache for Keyspace {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Keyspace::get(self, key)
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        Keyspace::set(self, key, value, Some(ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyspace() -> Keyspace {
        Keyspace::in_memory().unwrap()
    }

    #[test]
    fn test_zadd_reports_new_members_and_rescores() {
        let ks = keyspace();
        assert!(ks.zadd("z", "a", 10).unwrap());
        assert!(!ks.zadd("z", "a", 20).unwrap());
        assert_eq!(ks.zscore("z", "a").unwrap(), Some(20));
        assert_eq!(ks.zcard("z").unwrap(), 1);
    }

    #[test]
    fn test_zrange_walks_both_directions() {
        let ks = keyspace();
        ks.zadd("z", "a", 1).unwrap();
        ks.zadd("z", "b", 2).unwrap();
        ks.zadd("z", "c", 2).unwrap();
        ks.zadd("z", "d", 3).unwrap();

        let top = ks.zrev_range_below("z", None, 2).unwrap();
        assert_eq!(top, vec![(3, "d".to_string()), (2, "c".to_string())]);

        let next = ks.zrev_range_below("z", top.last(), 10).unwrap();
        assert_eq!(next, vec![(2, "b".to_string()), (1, "a".to_string())]);

        let newer = ks.zrange_above("z", &(1, "a".to_string()), 2).unwrap();
        assert_eq!(newer, vec![(2, "b".to_string()), (2, "c".to_string())]);
    }

    #[test]
    fn test_zrem() {
        let ks = keyspace();
        ks.zadd("z", "a", 1).unwrap();
        assert!(ks.zrem("z", "a").unwrap());
        assert!(!ks.zrem("z", "a").unwrap());
        assert!(ks.zrev_range_below("z", None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_log_is_capped_and_reports_evictions() {
        let ks = keyspace();
        let mut evicted = Vec::new();
        for i in 0..10 {
            let (_, gone) = ks.xadd("log", &i.to_string(), 4).unwrap();
            evicted.extend(gone);
        }
        assert_eq!(ks.xlen("log").unwrap(), 4);
        assert_eq!(evicted, vec!["0", "1", "2", "3", "4", "5"]);

        let newest = ks.xrev_range("log", None, 2).unwrap();
        assert_eq!(newest, vec![(10, "9".to_string()), (9, "8".to_string())]);
        assert!(!ks.xcontains("log", "0").unwrap());
        assert_eq!(ks.xrange("log", 8, 10).unwrap().len(), 2);
        assert_eq!(ks.xvalues("log").unwrap(), vec!["6", "7", "8", "9"]);
    }

    #[test]
    fn test_string_expiry() {
        let ks = keyspace();
        ks.set("k", b"v".to_vec(), Some(Duration::from_millis(0))).unwrap();
        assert_eq!(ks.get("k").unwrap(), None);

        ks.set("k", b"v".to_vec(), None).unwrap();
        assert_eq!(ks.get("k").unwrap(), Some(b"v".to_vec()));
        assert!(ks.del("k").unwrap());
        assert!(!ks.del("k").unwrap());
    }

    #[test]
    fn test_sets() {
        let ks = keyspace();
        assert!(ks.sadd("s", "x").unwrap());
        assert!(!ks.sadd("s", "x").unwrap());
        assert!(ks.sismember("s", "x").unwrap());
        assert!(!ks.sismember("s", "y").unwrap());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tributary.db");

        {
            let ks = Keyspace::new(Arc::new(SqliteStore::new(&path).unwrap()));
            ks.zadd("z", "a", 1).unwrap();
            ks.sadd("s", "x").unwrap();
            ks.xadd("log", "first", 10).unwrap();
            ks.set("k", b"v".to_vec(), None).unwrap();
        }

        let ks = Keyspace::new(Arc::new(SqliteStore::new(&path).unwrap()));
        assert_eq!(ks.zscore("z", "a").unwrap(), Some(1));
        assert!(ks.sismember("s", "x").unwrap());
        assert_eq!(ks.xadd("log", "second", 10).unwrap().0, 2);
        assert_eq!(ks.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
