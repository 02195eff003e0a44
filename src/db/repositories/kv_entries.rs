use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{helpers::parse_datetime, Database};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvRow {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

fn row_to_kv(row: &Row) -> Result<KvRow, rusqlite::Error> {
    let updated_at: String = row.get("updated_at")?;

    Ok(KvRow {
        key: row.get("key")?,
        value: row.get("value")?,
        updated_at: parse_datetime(&updated_at, "updated_at").map_err(|e| {
            rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            )))
        })?,
    })
}

impl Database {
    pub async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("failed to read kv entry")
        })
        .await
    }

    pub async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO kv_entries (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .context("failed to upsert kv entry")?;
            Ok(())
        })
        .await
    }

    /// Returns whether a row was removed.
    pub async fn kv_delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.execute(move |conn| {
            let removed = conn
                .execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
                .context("failed to delete kv entry")?;
            Ok(removed > 0)
        })
        .await
    }

    pub async fn kv_delete_many(&self, keys: Vec<String>) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM kv_entries WHERE key = ?1")?;
                for key in &keys {
                    removed += stmt.execute(params![key])?;
                }
            }
            tx.commit().context("failed to commit bulk kv delete")?;
            Ok(removed)
        })
        .await
    }

    pub async fn kv_rows_with_prefix(&self, prefix: &str) -> Result<Vec<KvRow>> {
        let pattern = format!("{}%", escape_like(prefix));
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, updated_at
                 FROM kv_entries
                 WHERE key LIKE ?1 ESCAPE '\\'
                 ORDER BY key",
            )?;
            let rows = stmt
                .query_map(params![pattern], row_to_kv)?
                .collect::<Result<Vec<_>, _>>()
                .context("failed to list kv entries")?;
            Ok(rows)
        })
        .await
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("nested").join("adskip.db")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn upsert_read_and_delete() {
        let (_dir, db) = open_temp();

        assert_eq!(db.kv_get("adskip_BV1").await.unwrap(), None);
        db.kv_set("adskip_BV1", "one").await.unwrap();
        db.kv_set("adskip_BV1", "two").await.unwrap();
        assert_eq!(db.kv_get("adskip_BV1").await.unwrap().as_deref(), Some("two"));

        assert!(db.kv_delete("adskip_BV1").await.unwrap());
        assert!(!db.kv_delete("adskip_BV1").await.unwrap());
    }

    #[tokio::test]
    async fn prefix_listing_treats_underscore_literally() {
        let (_dir, db) = open_temp();

        db.kv_set("adskip_BV1", "a").await.unwrap();
        db.kv_set("adskip_ep2", "b").await.unwrap();
        db.kv_set("adskipXother", "c").await.unwrap();

        let keys: Vec<String> = db
            .kv_rows_with_prefix("adskip_")
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.key)
            .collect();
        assert_eq!(keys, vec!["adskip_BV1", "adskip_ep2"]);

        let removed = db
            .kv_delete_many(vec!["adskip_BV1".into(), "adskip_missing".into()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adskip.db");
        {
            let db = Database::new(path.clone()).unwrap();
            db.kv_set("adskip_enabled", "false").await.unwrap();
        }
        let db = Database::new(path).unwrap();
        assert_eq!(db.kv_get("adskip_enabled").await.unwrap().as_deref(), Some("false"));
    }
}
