use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tempfile::TempDir;

use super::{Backend, Entry};
use crate::error::Result;

/// Backend over an embedded sqlite database living in its own temporary
/// directory. The directory is removed when the backend is closed or
/// dropped.
pub struct SqliteBackend {
    conn: Connection,
    dir: TempDir,
}

impl SqliteBackend {
    /// Create a fresh database under `parent`, or under the system temp dir.
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tabflow-store-");
        let dir = match parent {
            Some(p) => {
                std::fs::create_dir_all(p)?;
                builder.tempdir_in(p)?
            }
            None => builder.tempdir()?,
        };

        let conn = Connection::open(dir.path().join("store.db"))?;
        // Entries are transient; durability buys nothing here.
        conn.pragma_update_and_check(None, "journal_mode", "OFF", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS d (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
            [],
        )?;

        #[cfg(feature = "tracing")]
        tracing::debug!(path = %dir.path().display(), "created sqlite store");

        Ok(Self { conn, dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Backend for SqliteBackend {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row("SELECT value FROM d WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put_batch(&mut self, entries: Vec<Entry>) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT OR REPLACE INTO d (key, value) VALUES (?1, ?2)")?;
            for (key, value) in &entries {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM d WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn scan(&mut self, after: Option<&str>, reverse: bool, limit: usize) -> Result<Vec<Entry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = match (after.is_some(), reverse) {
            (false, false) => "SELECT key, value FROM d ORDER BY key ASC LIMIT ?1",
            (false, true) => "SELECT key, value FROM d ORDER BY key DESC LIMIT ?1",
            (true, false) => "SELECT key, value FROM d WHERE key > ?2 ORDER BY key ASC LIMIT ?1",
            (true, true) => "SELECT key, value FROM d WHERE key < ?2 ORDER BY key DESC LIMIT ?1",
        };
        let mut stmt = self.conn.prepare_cached(sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Entry> {
            Ok((row.get(0)?, row.get(1)?))
        };
        let rows = match after {
            Some(a) => stmt.query_map(params![limit, a], map_row)?,
            None => stmt.query_map(params![limit], map_row)?,
        };
        let mut page = Vec::new();
        for row in rows {
            page.push(row?);
        }
        Ok(page)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let SqliteBackend { conn, dir } = *self;
        conn.close().map_err(|(_, e)| e)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(path = %dir.path().display(), "closed sqlite store");
        dir.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_in_key_order_with_keyset_pagination() {
        let mut b = SqliteBackend::create(None).unwrap();
        let entries = ["b", "d", "a", "c", "e"]
            .iter()
            .map(|k| (k.to_string(), k.as_bytes().to_vec()))
            .collect();
        b.put_batch(entries).unwrap();

        let first = b.scan(None, false, 2).unwrap();
        assert_eq!(first.iter().map(|e| e.0.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        let next = b.scan(Some("b"), false, 10).unwrap();
        assert_eq!(next.iter().map(|e| e.0.as_str()).collect::<Vec<_>>(), ["c", "d", "e"]);
        let back = b.scan(Some("c"), true, 10).unwrap();
        assert_eq!(back.iter().map(|e| e.0.as_str()).collect::<Vec<_>>(), ["b", "a"]);
    }

    #[test]
    fn close_removes_the_temp_dir() {
        let parent = tempfile::tempdir().unwrap();
        let b = SqliteBackend::create(Some(parent.path())).unwrap();
        let path = b.path().to_path_buf();
        assert!(path.exists());
        Box::new(b).close().unwrap();
        assert!(!path.exists());
    }
}
