//! SQLite-backed dataset store with transactional saves

use async_trait::async_trait;
use clima_core::{Dataset, DatasetStore, DayBucket, StoreError, StoreResult};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

/// One row per day holding the day bucket as JSON. `save` swaps the whole
/// table inside a single transaction, so a crash never leaves a half-written
/// dataset behind.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(backend)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dias (
                fecha TEXT PRIMARY KEY,
                doc TEXT NOT NULL
            );",
        )
        .map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".into()))?;
        f(&mut conn)
    }
}

// Connection calls are synchronous; the database is local and small.
#[async_trait]
impl DatasetStore for SqliteStore {
    async fn load(&self) -> StoreResult<Dataset> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT fecha, doc FROM dias ORDER BY fecha")
                .map_err(backend)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(backend)?;

            let mut days = Vec::new();
            for row in rows {
                let (fecha, doc) = row.map_err(backend)?;
                match serde_json::from_str::<DayBucket>(&doc) {
                    Ok(day) => days.push(day),
                    Err(e) => warn!(%fecha, error = %e, "skipping unreadable day row"),
                }
            }
            Ok(Dataset::from_days(days))
        })
    }

    async fn save(&self, dataset: &Dataset) -> StoreResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(backend)?;
            tx.execute("DELETE FROM dias", []).map_err(backend)?;
            for day in dataset.days() {
                let doc = serde_json::to_string(day)?;
                tx.execute(
                    "INSERT INTO dias (fecha, doc) VALUES (?1, ?2)",
                    params![day.date.to_string(), doc],
                )
                .map_err(backend)?;
            }
            tx.commit().map_err(backend)?;
            debug!(days = dataset.len(), "dataset written to sqlite");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn save_replaces_previous_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("clima.db")).unwrap();
        assert!(store.load().await.unwrap().is_empty());

        let first = Dataset::from_days(vec![
            DayBucket::new(NaiveDate::from_ymd_opt(2025, 6, 8).unwrap()),
            DayBucket::new(NaiveDate::from_ymd_opt(2025, 6, 9).unwrap()),
        ]);
        store.save(&first).await.unwrap();
        assert_eq!(store.load().await.unwrap(), first);

        let second = Dataset::from_days(vec![DayBucket::new(
            NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
        )]);
        store.save(&second).await.unwrap();
        assert_eq!(store.load().await.unwrap(), second);
    }
}
