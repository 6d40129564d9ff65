//! Cold storage - SQLite database for overflow and long-term persistence.
//!
//! Holds rules that no longer fit in warm storage. Unbounded capacity.
//! Simple schema: rule_id (PRIMARY KEY) + anchors (BLOB) + stored_at_ms,
//! with a secondary index on stored_at_ms for time-ordered scans.

use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;

use crate::error::{StoreError, StoreResult};
use crate::rule_vector::{decode, encode, RuleVector};
use crate::storage::StorageTier;
use crate::types::now_ms;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rule_anchors (
    rule_id TEXT PRIMARY KEY,
    anchors BLOB NOT NULL,
    stored_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stored_at ON rule_anchors(stored_at_ms);
";

const UPSERT_SQL: &str =
    "INSERT OR REPLACE INTO rule_anchors (rule_id, anchors, stored_at_ms) VALUES (?1, ?2, ?3)";

fn cold_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::io(StorageTier::Cold, e)
}

/// SQLite-backed cold storage.
///
/// Every call goes through one owned connection; concurrent callers queue on
/// the mutex.
#[derive(Debug)]
pub struct ColdStorage {
    conn: Mutex<Connection>,
}

impl ColdStorage {
    /// Open or create cold storage database.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| cold_err(format!("Failed to create directory: {}", e)))?;
            }
        }

        let conn =
            Connection::open(path).map_err(|e| cold_err(format!("Open DB failed: {}", e)))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| cold_err(format!("Create schema failed: {}", e)))?;

        info!("Cold storage opened at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get a rule vector by rule_id. A miss is `Ok(None)`.
    pub fn get(&self, rule_id: &str) -> StoreResult<Option<RuleVector>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare_cached("SELECT anchors FROM rule_anchors WHERE rule_id = ?1")
            .map_err(|e| cold_err(format!("Prepare failed: {}", e)))?;

        let result = stmt.query_row(params![rule_id], |row| {
            let blob: Vec<u8> = row.get(0)?;
            Ok(blob)
        });

        match result {
            Ok(blob) => {
                let (vector, _) = decode(&blob)?;
                if vector.rule_id != rule_id {
                    return Err(StoreError::serialization(format!(
                        "cold row '{}' holds record for '{}'",
                        rule_id, vector.rule_id
                    )));
                }
                Ok(Some(vector))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(cold_err(format!("Query failed: {}", e))),
        }
    }

    /// Insert or overwrite a rule vector. Idempotent per rule_id.
    pub fn upsert(&self, vector: &RuleVector) -> StoreResult<()> {
        let blob = encode(vector)?;
        let conn = self.conn.lock();

        conn.execute(
            UPSERT_SQL,
            params![vector.rule_id, blob, now_ms() as i64],
        )
        .map_err(|e| cold_err(format!("Insert failed: {}", e)))?;

        Ok(())
    }

    /// Insert or overwrite many rule vectors in one transaction.
    pub fn upsert_batch(&self, vectors: &[RuleVector]) -> StoreResult<()> {
        let records = vectors
            .iter()
            .map(|v| encode(v).map(|blob| (v.rule_id.clone(), blob)))
            .collect::<StoreResult<Vec<_>>>()?;

        self.upsert_records(&records)
    }

    /// Insert or overwrite already-encoded records in one transaction.
    ///
    /// Blobs are stored as given; a record that does not decode fails only
    /// later lookups of its own id.
    pub fn upsert_records(&self, records: &[(String, Vec<u8>)]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| cold_err(format!("Begin transaction failed: {}", e)))?;

        {
            let mut stmt = tx
                .prepare_cached(UPSERT_SQL)
                .map_err(|e| cold_err(format!("Prepare failed: {}", e)))?;
            let stored_at = now_ms() as i64;
            for (rule_id, blob) in records {
                stmt.execute(params![rule_id, blob, stored_at])
                    .map_err(|e| cold_err(format!("Insert failed: {}", e)))?;
            }
        }

        tx.commit()
            .map_err(|e| cold_err(format!("Commit failed: {}", e)))?;

        debug!("Cold storage upserted {} rules", records.len());
        Ok(())
    }

    /// Remove a rule. Returns whether a row existed.
    pub fn remove(&self, rule_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();

        let rows = conn
            .execute(
                "DELETE FROM rule_anchors WHERE rule_id = ?1",
                params![rule_id],
            )
            .map_err(|e| cold_err(format!("Delete failed: {}", e)))?;

        Ok(rows > 0)
    }

    /// Check whether a row exists without decoding it.
    pub fn contains(&self, rule_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();

        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM rule_anchors WHERE rule_id = ?1)",
            params![rule_id],
            |row| row.get::<_, bool>(0),
        )
        .map_err(|e| cold_err(format!("Query failed: {}", e)))
    }

    /// Remove all rules from cold storage.
    pub fn clear(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM rule_anchors", [])
            .map_err(|e| cold_err(format!("Clear failed: {}", e)))?;
        Ok(())
    }

    /// List all rule IDs, oldest first.
    pub fn list_ids(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare("SELECT rule_id FROM rule_anchors ORDER BY stored_at_ms, rule_id")
            .map_err(|e| cold_err(format!("Prepare failed: {}", e)))?;

        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| cold_err(format!("Query failed: {}", e)))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| cold_err(format!("Collect failed: {}", e)))?;

        Ok(ids)
    }

    /// Rule IDs stored strictly before `cutoff_ms`, oldest first.
    pub fn ids_stored_before(&self, cutoff_ms: u64) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(
                "SELECT rule_id FROM rule_anchors WHERE stored_at_ms < ?1 \
                 ORDER BY stored_at_ms, rule_id",
            )
            .map_err(|e| cold_err(format!("Prepare failed: {}", e)))?;

        let ids = stmt
            .query_map(params![cutoff_ms as i64], |row| row.get(0))
            .map_err(|e| cold_err(format!("Query failed: {}", e)))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| cold_err(format!("Collect failed: {}", e)))?;

        Ok(ids)
    }

    /// Count total rules in cold storage.
    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM rule_anchors", [], |row| row.get(0))
            .map_err(|e| cold_err(format!("Count failed: {}", e)))?;

        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_vector::SliceAnchors;

    fn vector(rule_id: &str, marker: f32) -> RuleVector {
        let mut anchors = SliceAnchors::default();
        anchors.data[0] = marker;
        RuleVector::new(rule_id, anchors, [0.7; 4])
    }

    #[test]
    fn test_cold_storage_create_and_open() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("nested").join("test.db");

        let _ = ColdStorage::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_cold_storage_upsert_and_get() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let storage = ColdStorage::open(tmp_dir.path().join("test.db")).unwrap();

        let original = vector("rule-1", 0.25);
        storage.upsert(&original).unwrap();

        assert_eq!(storage.get("rule-1").unwrap(), Some(original));
        assert_eq!(storage.get("missing").unwrap(), None);
    }

    #[test]
    fn test_cold_storage_upsert_is_idempotent() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let storage = ColdStorage::open(tmp_dir.path().join("test.db")).unwrap();

        storage.upsert(&vector("rule-1", 1.0)).unwrap();
        storage.upsert(&vector("rule-1", 2.0)).unwrap();

        assert_eq!(storage.count().unwrap(), 1);
        let stored = storage.get("rule-1").unwrap().unwrap();
        assert_eq!(stored.anchors.data[0], 2.0);
    }

    #[test]
    fn test_cold_storage_remove() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let storage = ColdStorage::open(tmp_dir.path().join("test.db")).unwrap();

        storage.upsert(&vector("rule-1", 0.0)).unwrap();
        assert!(storage.contains("rule-1").unwrap());
        assert!(storage.remove("rule-1").unwrap());
        assert!(!storage.remove("rule-1").unwrap());
        assert!(!storage.contains("rule-1").unwrap());
        assert!(storage.get("rule-1").unwrap().is_none());
    }

    #[test]
    fn test_cold_storage_batch_and_listing() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let storage = ColdStorage::open(tmp_dir.path().join("test.db")).unwrap();

        let batch: Vec<RuleVector> = ["rule-b", "rule-a", "rule-c"]
            .iter()
            .map(|id| vector(id, 0.0))
            .collect();
        storage.upsert_batch(&batch).unwrap();

        assert_eq!(storage.count().unwrap(), 3);
        // Same timestamp within a batch: ties break by id
        assert_eq!(
            storage.list_ids().unwrap(),
            vec!["rule-a", "rule-b", "rule-c"]
        );
        assert_eq!(storage.ids_stored_before(u64::MAX >> 2).unwrap().len(), 3);
        assert!(storage.ids_stored_before(0).unwrap().is_empty());

        storage.clear().unwrap();
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn test_cold_storage_raw_records_fail_only_their_own_lookup() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let storage = ColdStorage::open(tmp_dir.path().join("test.db")).unwrap();

        let good = vector("good", 4.0);
        let records = vec![
            ("good".to_string(), encode(&good).unwrap()),
            ("bad".to_string(), vec![0xEE; 9]),
        ];
        storage.upsert_records(&records).unwrap();

        assert_eq!(storage.get("good").unwrap(), Some(good));
        assert!(matches!(
            storage.get("bad"),
            Err(StoreError::Serialization { .. })
        ));
        assert!(storage.remove("bad").unwrap());
    }

    #[test]
    fn test_cold_storage_rejects_corrupt_file() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("corrupt.db");
        std::fs::write(&path, vec![0xA5u8; 4096]).unwrap();

        let result = ColdStorage::open(&path);
        assert!(matches!(
            result,
            Err(StoreError::StorageIo {
                tier: StorageTier::Cold,
                ..
            })
        ));
    }

    #[test]
    fn test_cold_storage_persists_across_reopen() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("test.db");

        {
            let storage = ColdStorage::open(&path).unwrap();
            storage.upsert(&vector("rule-1", 4.0)).unwrap();
        }

        let storage = ColdStorage::open(&path).unwrap();
        assert_eq!(storage.get("rule-1").unwrap().unwrap().anchors.data[0], 4.0);
    }
}
