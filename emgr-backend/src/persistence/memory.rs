//! In-process status store.
//!
//! Keeps the latest row per (transaction, device) and, per device, the full
//! sequence of statuses written. The history is what operators and tests use
//! to check that a device only moved forward.
//!
//! Only the most recent transactions are retained; rows and history of older
//! ones are dropped once the limit is exceeded. EM info is never dropped.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

use emgr_shared::{DeviceStatusRow, EmInfoRow, OrderType, ProcessStatus, StatusWrite};

use super::{StatusStore, StoreError, now_millis};

type EmInfoKey = (String, u16);

/// Transactions whose rows are kept by [`MemoryStatusStore::new`]
pub const DEFAULT_RETAINED_TRANSACTIONS: usize = 1024;

/// RwLock'd maps behind the [`StatusStore`] facade
pub struct MemoryStatusStore {
    /// Upper bound on transactions kept in `rows` and `history`
    retention: usize,
    /// transaction -> device -> row
    rows: RwLock<HashMap<String, BTreeMap<String, DeviceStatusRow>>>,
    /// Transactions in first-write order, oldest at the front
    retained: RwLock<VecDeque<String>>,
    /// (transaction, device) -> statuses in write order
    history: RwLock<HashMap<(String, String), Vec<ProcessStatus>>>,
    /// device -> (slice, vlan) -> row
    em_info: RwLock<HashMap<String, BTreeMap<EmInfoKey, EmInfoRow>>>,
    /// Statuses whose writes are refused, for exercising failure paths
    rejected: RwLock<HashSet<ProcessStatus>>,
}

impl Default for MemoryStatusStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_TRANSACTIONS)
    }
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep rows and history of at most `transactions` transactions (minimum 1)
    pub fn with_retention(transactions: usize) -> Self {
        Self {
            retention: transactions.max(1),
            rows: RwLock::default(),
            retained: RwLock::default(),
            history: RwLock::default(),
            em_info: RwLock::default(),
            rejected: RwLock::default(),
        }
    }

    /// Transactions currently holding rows, oldest first
    pub async fn retained_transactions(&self) -> Vec<String> {
        self.retained.read().await.iter().cloned().collect()
    }

    /// Refuse every future write of `status`
    pub async fn reject_status(&self, status: ProcessStatus) {
        self.rejected.write().await.insert(status);
    }

    /// Statuses written for a device within a transaction, oldest first
    pub async fn history(&self, transaction_id: &str, device: &str) -> Vec<ProcessStatus> {
        self.history
            .read()
            .await
            .get(&(transaction_id.to_string(), device.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Latest persisted status of one device
    pub async fn status_of(&self, transaction_id: &str, device: &str) -> Option<ProcessStatus> {
        self.rows
            .read()
            .await
            .get(transaction_id)
            .and_then(|devices| devices.get(device))
            .map(|row| row.status)
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn write_transaction_device_status(
        &self,
        op: StatusWrite,
        device: &str,
        transaction_id: &str,
        status: ProcessStatus,
    ) -> Result<(), StoreError> {
        if self.rejected.read().await.contains(&status) {
            return Err(StoreError::WriteRejected {
                device: device.to_string(),
                transaction_id: transaction_id.to_string(),
                reason: format!("writes of {} are refused", status),
            });
        }

        let row = DeviceStatusRow {
            transaction_id: transaction_id.to_string(),
            device: device.to_string(),
            status,
            op,
            updated_at: now_millis(),
        };

        let evicted = {
            let mut rows = self.rows.write().await;
            let first_write = !rows.contains_key(transaction_id);
            rows.entry(transaction_id.to_string())
                .or_default()
                .insert(device.to_string(), row);

            let mut evicted = None;
            if first_write {
                let mut retained = self.retained.write().await;
                retained.push_back(transaction_id.to_string());
                if retained.len() > self.retention {
                    evicted = retained.pop_front();
                }
            }
            if let Some(old) = &evicted {
                rows.remove(old);
            }
            evicted
        };

        let mut history = self.history.write().await;
        if let Some(old) = &evicted {
            history.retain(|(tx, _), _| tx != old);
            debug!("[STORE] dropped rows of transaction {}", old);
        }
        history
            .entry((transaction_id.to_string(), device.to_string()))
            .or_default()
            .push(status);

        debug!("[STORE] {:?} {}/{} -> {}", op, transaction_id, device, status);
        Ok(())
    }

    async fn read_transaction_device_status(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Vec<DeviceStatusRow>>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .get(transaction_id)
            .map(|devices| devices.values().cloned().collect()))
    }

    async fn write_em_info(&self, row: EmInfoRow) -> Result<(), StoreError> {
        let mut em_info = self.em_info.write().await;
        let rows = em_info.entry(row.device.clone()).or_default();
        let key = (row.slice_id.clone(), row.vlan_id);

        if row.order_type == OrderType::Delete {
            rows.remove(&key);
            debug!(
                "[STORE] removed EM info {}/{}/{}",
                row.device, row.slice_id, row.vlan_id
            );
        } else {
            debug!(
                "[STORE] recorded EM info {}/{}/{}",
                row.device, row.slice_id, row.vlan_id
            );
            rows.insert(key, row);
        }
        Ok(())
    }

    async fn read_em_info(&self, device: &str) -> Result<Vec<EmInfoRow>, StoreError> {
        Ok(self
            .em_info
            .read()
            .await
            .get(device)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn em_row(device: &str, vlan_id: u16, order_type: OrderType) -> EmInfoRow {
        EmInfoRow {
            device: device.to_string(),
            slice_id: "slice-a".to_string(),
            vlan_id,
            service: "l2-slice".to_string(),
            order_type,
            ec_body: json!({"vlan_id": vlan_id}),
        }
    }

    async fn write(
        store: &MemoryStatusStore,
        op: StatusWrite,
        device: &str,
        transaction_id: &str,
        status: ProcessStatus,
    ) {
        store
            .write_transaction_device_status(op, device, transaction_id, status)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_upsert_and_history() {
        let store = MemoryStatusStore::new();

        write(&store, StatusWrite::Insert, "leaf-1", "tx-1", ProcessStatus::ProcRun).await;
        write(&store, StatusWrite::Update, "leaf-1", "tx-1", ProcessStatus::EditConf).await;

        let rows = store
            .read_transaction_device_status("tx-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ProcessStatus::EditConf);
        assert_eq!(rows[0].op, StatusWrite::Update);

        assert_eq!(
            store.history("tx-1", "leaf-1").await,
            vec![ProcessStatus::ProcRun, ProcessStatus::EditConf]
        );
        assert_eq!(
            store.status_of("tx-1", "leaf-1").await,
            Some(ProcessStatus::EditConf)
        );
    }

    #[tokio::test]
    async fn test_unknown_transaction_reads_none() {
        let store = MemoryStatusStore::new();
        assert!(
            store
                .read_transaction_device_status("missing")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_rows_are_per_device() {
        let store = MemoryStatusStore::new();
        for device in ["b", "a"] {
            write(&store, StatusWrite::Insert, device, "tx-1", ProcessStatus::ProcRun).await;
        }

        let rows = store
            .read_transaction_device_status("tx-1")
            .await
            .unwrap()
            .unwrap();
        let devices: Vec<&str> = rows.iter().map(|r| r.device.as_str()).collect();
        assert_eq!(devices, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_rejected_status_write() {
        let store = MemoryStatusStore::new();
        store.reject_status(ProcessStatus::ConfCommit).await;

        let result = store
            .write_transaction_device_status(
                StatusWrite::Update,
                "leaf-1",
                "tx-1",
                ProcessStatus::ConfCommit,
            )
            .await;
        assert!(matches!(result, Err(StoreError::WriteRejected { .. })));
        assert!(store.history("tx-1", "leaf-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_em_info_merge_then_delete() {
        let store = MemoryStatusStore::new();
        store.write_em_info(em_row("leaf-1", 100, OrderType::Merge)).await.unwrap();
        store.write_em_info(em_row("leaf-1", 200, OrderType::Merge)).await.unwrap();
        assert_eq!(store.read_em_info("leaf-1").await.unwrap().len(), 2);

        store.write_em_info(em_row("leaf-1", 100, OrderType::Delete)).await.unwrap();
        let rows = store.read_em_info("leaf-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vlan_id, 200);

        assert!(store.read_em_info("leaf-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oldest_transactions_are_dropped_past_retention() {
        let store = MemoryStatusStore::with_retention(2);
        store.write_em_info(em_row("leaf-1", 100, OrderType::Merge)).await.unwrap();

        for tx in ["tx-1", "tx-2"] {
            write(&store, StatusWrite::Insert, "leaf-1", tx, ProcessStatus::ProcRun).await;
        }
        // Later writes to a retained transaction do not renew or evict anything
        write(&store, StatusWrite::Update, "leaf-1", "tx-1", ProcessStatus::EditConf).await;
        assert_eq!(store.retained_transactions().await, vec!["tx-1", "tx-2"]);

        write(&store, StatusWrite::Insert, "leaf-2", "tx-3", ProcessStatus::ProcRun).await;

        assert_eq!(store.retained_transactions().await, vec!["tx-2", "tx-3"]);
        assert!(store.read_transaction_device_status("tx-1").await.unwrap().is_none());
        assert!(store.history("tx-1", "leaf-1").await.is_empty());
        assert_eq!(store.history("tx-2", "leaf-1").await, vec![ProcessStatus::ProcRun]);
        assert_eq!(store.status_of("tx-3", "leaf-2").await, Some(ProcessStatus::ProcRun));
        assert_eq!(store.read_em_info("leaf-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retention_of_zero_keeps_the_latest_transaction() {
        let store = MemoryStatusStore::with_retention(0);
        write(&store, StatusWrite::Insert, "leaf-1", "tx-1", ProcessStatus::ProcRun).await;
        write(&store, StatusWrite::Insert, "leaf-1", "tx-2", ProcessStatus::ProcRun).await;

        assert_eq!(store.retained_transactions().await, vec!["tx-2"]);
        assert_eq!(store.status_of("tx-2", "leaf-1").await, Some(ProcessStatus::ProcRun));
    }
}
