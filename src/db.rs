use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use sled::Transactional;
use uuid::Uuid;

use crate::models::ContractRecord;
use crate::repository::{collect_page, ContractStore, ContractUpdate, OwnerPage, OwnerQuery, PageKey};

const RECORDS_TREE: &str = "contracts";
const OWNER_INDEX_TREE: &str = "contracts_by_owner";
const KEY_SEPARATOR: u8 = 0;
const OWNER_LEN_BYTES: usize = 4;

/// Embedded metadata store backed by sled.
///
/// Records live in one tree keyed by contract id and are encoded as JSON.
/// A second tree indexes `(user_id, created_at, contract_id)` so owner
/// queries come back in creation order without scanning every record.
pub struct Database {
    db: sled::Db,
    records: sled::Tree,
    owner_index: sled::Tree,
}

impl Database {
    /// Open (or create) the store at `path`
    pub fn new(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create store directory {}", path.display()))?;

        let db = sled::open(path).context("Failed to open metadata store")?;
        Self::from_db(db)
    }

    /// Throwaway store that is deleted when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context("Failed to open temporary metadata store")?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let records = db.open_tree(RECORDS_TREE).context("Failed to open records tree")?;
        let owner_index = db
            .open_tree(OWNER_INDEX_TREE)
            .context("Failed to open owner index")?;
        Ok(Self { db, records, owner_index })
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.context("Failed to flush metadata store")?;
        Ok(())
    }

    // Length-prefixed so no owner's prefix can extend into another's.
    fn owner_prefix(user_id: &str) -> Vec<u8> {
        let owner = user_id.as_bytes();
        let len = u32::try_from(owner.len()).unwrap_or(u32::MAX);
        let mut key = Vec::with_capacity(OWNER_LEN_BYTES + owner.len() + 1);
        key.extend_from_slice(&len.to_be_bytes());
        key.extend_from_slice(owner);
        key.push(KEY_SEPARATOR);
        key
    }

    // Fixed-width timestamps keep lexicographic order equal to time order.
    fn owner_key(key: &PageKey) -> Vec<u8> {
        let mut bytes = Self::owner_prefix(&key.user_id);
        bytes.extend_from_slice(key.created_at.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string().as_bytes());
        bytes.push(KEY_SEPARATOR);
        bytes.extend_from_slice(key.contract_id.as_hyphenated().to_string().as_bytes());
        bytes
    }

    fn decode(bytes: &[u8]) -> Result<ContractRecord> {
        serde_json::from_slice(bytes).context("Failed to decode contract record")
    }
}

#[async_trait]
impl ContractStore for Database {
    async fn get(&self, contract_id: Uuid) -> Result<Option<ContractRecord>> {
        self.records
            .get(contract_id.as_bytes())
            .context("Failed to read contract record")?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    async fn create(&self, record: &ContractRecord) -> Result<()> {
        let key = record.contract_id.as_bytes().to_vec();
        let value = serde_json::to_vec(record).context("Failed to encode contract record")?;
        let index_key = Self::owner_key(&PageKey::of(record));

        let result: TransactionResult<(), String> =
            (&self.records, &self.owner_index).transaction(|(records, index)| {
                if records.get(key.as_slice())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(format!(
                        "Contract {} already exists",
                        record.contract_id
                    )));
                }
                records.insert(key.as_slice(), value.as_slice())?;
                index.insert(index_key.as_slice(), key.as_slice())?;
                Ok(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(message)) => Err(anyhow!(message)),
            Err(TransactionError::Storage(err)) => {
                Err(anyhow!(err).context("Failed to store contract record"))
            }
        }
    }

    async fn update(&self, contract_id: Uuid, update: &ContractUpdate) -> Result<ContractRecord> {
        let key = contract_id.as_bytes();
        loop {
            let current = self
                .records
                .get(key)
                .context("Failed to read contract record")?
                .ok_or_else(|| anyhow!("Contract {contract_id} does not exist"))?;

            let mut record = Self::decode(&current)?;
            update.check(&record)?;
            update.apply(&mut record);
            let next = serde_json::to_vec(&record).context("Failed to encode contract record")?;

            let swapped = self
                .records
                .compare_and_swap(key, Some(&current), Some(next))
                .context("Failed to write contract record")?;
            if swapped.is_ok() {
                return Ok(record);
            }
            tracing::debug!(%contract_id, "Concurrent record write detected, retrying update");
        }
    }

    async fn query_by_owner(&self, query: &OwnerQuery) -> Result<OwnerPage> {
        let prefix = Self::owner_prefix(&query.user_id);
        let start = query.start_after.as_ref().map(Self::owner_key);

        let mut records = Vec::new();
        for entry in self.owner_index.scan_prefix(&prefix).rev() {
            let (index_key, record_key) = entry.context("Failed to scan owner index")?;
            if start.as_deref().is_some_and(|start| &index_key[..] >= start) {
                continue;
            }
            let Some(bytes) = self.records.get(&record_key).context("Failed to read contract record")? else {
                continue;
            };
            let record = Self::decode(&bytes)?;
            if record.user_id != query.user_id {
                continue;
            }
            let matches = query.status.map_or(true, |status| record.status == status);
            if matches {
                records.push(record);
                if records.len() > query.limit.max(1) {
                    break;
                }
            }
        }

        Ok(collect_page(records, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ContractStatus;
    use chrono::{Duration, Utc};

    fn record(user: &str, minutes: i64) -> ContractRecord {
        ContractRecord::new(
            Uuid::new_v4(),
            user,
            "msa.docx",
            2048,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "key".to_string(),
            Utc::now() - Duration::minutes(100 - minutes),
        )
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let db = Database::temporary().expect("Failed to open store");
        let rec = record("u1", 0);
        db.create(&rec).await.expect("create");
        assert!(db.create(&rec).await.is_err());

        let fetched = db.get(rec.contract_id).await.expect("get");
        assert_eq!(fetched, Some(rec.clone()));

        let mut update = ContractUpdate::status(ContractStatus::ProcessingTextExtraction, Utc::now());
        update.page_count = Some(3);
        let updated = db.update(rec.contract_id, &update).await.expect("update");
        assert_eq!(updated.status, ContractStatus::ProcessingTextExtraction);
        assert_eq!(updated.page_count, Some(3));
        assert!(updated.updated_at >= rec.updated_at);

        assert!(db.get(Uuid::new_v4()).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_owner_index_orders_and_pages() {
        let db = Database::temporary().expect("Failed to open store");
        for minute in 0..3 {
            db.create(&record("owner", minute)).await.expect("create");
        }
        db.create(&record("owner-2", 50)).await.expect("create");

        let mut query = OwnerQuery {
            user_id: "owner".to_string(),
            limit: 2,
            status: None,
            start_after: None,
        };
        let first = db.query_by_owner(&query).await.expect("query");
        assert_eq!(first.items.len(), 2);
        assert!(first.items.iter().all(|r| r.user_id == "owner"));
        assert!(first.items[0].created_at > first.items[1].created_at);

        query.start_after = first.last_key;
        let second = db.query_by_owner(&query).await.expect("query");
        assert_eq!(second.items.len(), 1);
        assert!(second.last_key.is_none());
    }

    #[tokio::test]
    async fn test_owner_query_never_crosses_owners() {
        let db = Database::temporary().expect("Failed to open store");
        let own = record("alice", 1);
        db.create(&own).await.expect("create");
        for other in ["alice\0mallory", "alice\0", "alicex", "ali"] {
            db.create(&record(other, 2)).await.expect("create");
        }

        let page = db
            .query_by_owner(&OwnerQuery {
                user_id: "alice".to_string(),
                limit: 10,
                status: None,
                start_after: None,
            })
            .await
            .expect("query");
        let ids: Vec<_> = page.items.iter().map(|r| r.contract_id).collect();
        assert_eq!(ids, vec![own.contract_id]);

        let page = db
            .query_by_owner(&OwnerQuery {
                user_id: "alice\0mallory".to_string(),
                limit: 10,
                status: None,
                start_after: None,
            })
            .await
            .expect("query");
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].user_id, "alice\0mallory");
    }

    #[tokio::test]
    async fn test_conditional_update_is_checked_against_stored_status() {
        let db = Database::temporary().expect("Failed to open store");
        let rec = record("u1", 0);
        db.create(&rec).await.expect("create");

        let update = ContractUpdate::status(ContractStatus::TextExtracted, Utc::now())
            .when_status(ContractStatus::ProcessingTextExtraction);
        assert!(db.update(rec.contract_id, &update).await.is_err());
        assert_eq!(
            db.get(rec.contract_id).await.expect("get").map(|r| r.status),
            Some(ContractStatus::Uploaded)
        );
    }

    #[tokio::test]
    async fn test_reopen_persists_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rec = record("u1", 0);
        {
            let db = Database::new(dir.path()).expect("open");
            db.create(&rec).await.expect("create");
            db.flush().await.expect("flush");
        }
        let db = Database::new(dir.path()).expect("reopen");
        assert_eq!(db.get(rec.contract_id).await.expect("get"), Some(rec));
    }
}
