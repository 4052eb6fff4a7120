use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use orka_types::{OrkaError, OrkaResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

/// Envelope stored alongside every entity: the optimistic-lock `version`
/// column and bookkeeping timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row<T> {
    pub data: T,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<T> Row<T> {
    pub fn new(data: T) -> Self {
        let now = Utc::now();
        Row {
            data,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single durable collection backed by one JSON snapshot file. Mutations
/// happen against the in-memory map under the write lock, then the whole
/// collection is flushed to disk via a write-to-temp-then-rename so a crash
/// mid-flush never corrupts the previous snapshot.
pub struct Collection<T> {
    name: &'static str,
    path: PathBuf,
    rows: RwLock<HashMap<String, Row<T>>>,
}

impl<T> Collection<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn open(base: &Path, name: &'static str) -> anyhow::Result<Self> {
        let path = base.join(format!("{name}.json"));
        let rows = if path.exists() {
            let raw = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {name} snapshot"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {name} snapshot"))?
        } else {
            HashMap::new()
        };
        Ok(Collection {
            name,
            path,
            rows: RwLock::new(rows),
        })
    }

    async fn flush(&self, rows: &HashMap<String, Row<T>>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(rows)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .await
            .with_context(|| format!("writing {} snapshot", self.name))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("committing {} snapshot", self.name))?;
        Ok(())
    }

    pub async fn insert(&self, id: impl Into<String>, data: T) -> OrkaResult<Row<T>> {
        let id = id.into();
        let mut rows = self.rows.write().await;
        let row = Row::new(data);
        rows.insert(id, row.clone());
        self.flush(&rows)
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        Ok(row)
    }

    pub async fn get(&self, id: &str) -> Option<Row<T>> {
        self.rows.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<(String, Row<T>)> {
        self.rows
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn remove(&self, id: &str) -> OrkaResult<()> {
        let mut rows = self.rows.write().await;
        rows.remove(id);
        self.flush(&rows)
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        Ok(())
    }

    /// Atomic update predicated on `version == expected_version`.
    pub async fn update_with_optimistic_lock(
        &self,
        id: &str,
        expected_version: u64,
        mutate: impl FnOnce(&mut T),
    ) -> OrkaResult<Row<T>> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| OrkaError::not_found(self.name, id))?;
        if row.version != expected_version {
            return Err(OrkaError::OptimisticLockConflict {
                table: self.name,
                id: id.to_string(),
                expected: expected_version,
                actual: row.version,
            });
        }
        mutate(&mut row.data);
        row.version += 1;
        row.updated_at = Utc::now();
        let updated = row.clone();
        self.flush(&rows)
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        Ok(updated)
    }

    /// Unconditional update used only where optimistic locking does not
    /// apply (e.g. append-only session nodes); still bumps `version`.
    pub async fn update(&self, id: &str, mutate: impl FnOnce(&mut T)) -> OrkaResult<Row<T>> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| OrkaError::not_found(self.name, id))?;
        mutate(&mut row.data);
        row.version += 1;
        row.updated_at = Utc::now();
        let updated = row.clone();
        self.flush(&rows)
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        Ok(updated)
    }

    /// Atomic increment specialized to an `i64` field reachable through
    /// `get`/`set` closures, so it works across the several entities that
    /// carry a `consumed` counter.
    pub async fn atomic_increment(
        &self,
        id: &str,
        get: impl Fn(&T) -> i64,
        set: impl FnOnce(&mut T, i64),
        delta: i64,
    ) -> OrkaResult<i64> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| OrkaError::not_found(self.name, id))?;
        let new_value = get(&row.data) + delta;
        set(&mut row.data, new_value);
        row.version += 1;
        row.updated_at = Utc::now();
        self.flush(&rows)
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        Ok(new_value)
    }

    /// Compare-and-swap: returns the old row on success, `None` on mismatch.
    pub async fn compare_and_swap(
        &self,
        id: &str,
        get: impl Fn(&T) -> bool,
        set: impl FnOnce(&mut T),
    ) -> OrkaResult<Option<Row<T>>> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| OrkaError::not_found(self.name, id))?;
        if !get(&row.data) {
            return Ok(None);
        }
        let old = row.clone();
        set(&mut row.data);
        row.version += 1;
        row.updated_at = Utc::now();
        self.flush(&rows)
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        Ok(Some(old))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let dir = std::env::temp_dir().join(format!("orka-storage-{}", uuid::Uuid::new_v4()));
        let col: Collection<String> = Collection::open(&dir, "widgets").await.unwrap();
        col.insert("a", "hello".to_string()).await.unwrap();
        let row = col.get("a").await.unwrap();
        assert_eq!(row.data, "hello");
        assert_eq!(row.version, 0);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn optimistic_lock_conflict_on_stale_version() {
        let dir = std::env::temp_dir().join(format!("orka-storage-{}", uuid::Uuid::new_v4()));
        let col: Collection<i32> = Collection::open(&dir, "counters").await.unwrap();
        col.insert("c", 0).await.unwrap();
        col.update_with_optimistic_lock("c", 0, |v| *v += 1)
            .await
            .unwrap();
        let err = col
            .update_with_optimistic_lock("c", 0, |v| *v += 1)
            .await
            .unwrap_err();
        assert!(matches!(err, OrkaError::OptimisticLockConflict { .. }));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn reopening_collection_reloads_persisted_rows() {
        let dir = std::env::temp_dir().join(format!("orka-storage-{}", uuid::Uuid::new_v4()));
        {
            let col: Collection<String> = Collection::open(&dir, "widgets").await.unwrap();
            col.insert("a", "hello".to_string()).await.unwrap();
        }
        let reopened: Collection<String> = Collection::open(&dir, "widgets").await.unwrap();
        let row = reopened.get("a").await.unwrap();
        assert_eq!(row.data, "hello");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
