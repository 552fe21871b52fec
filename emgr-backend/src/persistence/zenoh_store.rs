//! Zenoh-based status storage.
//!
//! Rows are stored as JSON values through Zenoh key/value storage with keys like:
//! - `emgr/storage/{backend}/status/{transaction}/{device}`
//! - `emgr/storage/{backend}/em_info/{device}/{slice}/{vlan}`
//!
//! A Zenoh storage (e.g. the router's memory or RocksDB backend) must be
//! configured on `emgr/storage/**` for reads to return anything.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zenoh::Session;

use emgr_shared::{DeviceStatusRow, EmInfoRow, OrderType, ProcessStatus, StatusWrite};

use super::{StatusStore, StoreError, now_millis};

/// Zenoh-backed implementation of [`StatusStore`]
pub struct ZenohStatusStore {
    session: Arc<Session>,
    /// Storage key prefix (e.g. "emgr/storage/default")
    storage_prefix: String,
}

impl ZenohStatusStore {
    pub fn new(session: Arc<Session>, backend_name: &str) -> Self {
        let storage_prefix = storage_prefix(backend_name);
        info!("Initializing status storage with prefix: {}", storage_prefix);
        Self {
            session,
            storage_prefix,
        }
    }

    fn status_key(&self, transaction_id: &str, device: &str) -> String {
        status_key(&self.storage_prefix, transaction_id, device)
    }

    fn em_info_key(&self, row: &EmInfoRow) -> String {
        format!(
            "{}/em_info/{}/{}/{}",
            self.storage_prefix,
            key_segment(&row.device),
            key_segment(&row.slice_id),
            row.vlan_id
        )
    }

    async fn put_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(value)?;
        debug!("Storing {} bytes at key: {}", payload.len(), key);
        self.session
            .put(key, payload)
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("Failed to store '{}': {}", key, e),
            })
    }

    /// Collect every decodable value matching a selector
    async fn get_all<T: DeserializeOwned>(&self, selector: &str) -> Result<Vec<T>, StoreError> {
        let replies = self
            .session
            .get(selector)
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("Failed to query '{}': {}", selector, e),
            })?;

        let mut values = Vec::new();
        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => {
                    match serde_json::from_slice::<T>(sample.payload().to_bytes().as_ref()) {
                        Ok(value) => values.push(value),
                        Err(e) => warn!(
                            "Failed to deserialize value from key '{}': {}",
                            sample.key_expr(),
                            e
                        ),
                    }
                }
                Err(e) => warn!("Error in get reply for '{}': {}", selector, e),
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl StatusStore for ZenohStatusStore {
    async fn write_transaction_device_status(
        &self,
        op: StatusWrite,
        device: &str,
        transaction_id: &str,
        status: ProcessStatus,
    ) -> Result<(), StoreError> {
        let row = DeviceStatusRow {
            transaction_id: transaction_id.to_string(),
            device: device.to_string(),
            status,
            op,
            updated_at: now_millis(),
        };
        self.put_json(&self.status_key(transaction_id, device), &row)
            .await
    }

    async fn read_transaction_device_status(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Vec<DeviceStatusRow>>, StoreError> {
        let selector = format!(
            "{}/status/{}/*",
            self.storage_prefix,
            key_segment(transaction_id)
        );
        let mut rows: Vec<DeviceStatusRow> = self.get_all(&selector).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        rows.sort_by(|a, b| a.device.cmp(&b.device));
        Ok(Some(rows))
    }

    async fn write_em_info(&self, row: EmInfoRow) -> Result<(), StoreError> {
        let key = self.em_info_key(&row);
        if row.order_type == OrderType::Delete {
            debug!("Deleting EM info at key: {}", key);
            return self
                .session
                .delete(&key)
                .await
                .map_err(|e| StoreError::Unavailable {
                    message: format!("Failed to delete '{}': {}", key, e),
                });
        }
        self.put_json(&key, &row).await
    }

    async fn read_em_info(&self, device: &str) -> Result<Vec<EmInfoRow>, StoreError> {
        let selector = format!("{}/em_info/{}/**", self.storage_prefix, key_segment(device));
        let mut rows: Vec<EmInfoRow> = self.get_all(&selector).await?;
        rows.sort_by(|a, b| (&a.slice_id, a.vlan_id).cmp(&(&b.slice_id, b.vlan_id)));
        Ok(rows)
    }
}

fn storage_prefix(backend_name: &str) -> String {
    format!("emgr/storage/{}", key_segment(backend_name))
}

fn status_key(prefix: &str, transaction_id: &str, device: &str) -> String {
    format!(
        "{}/status/{}/{}",
        prefix,
        key_segment(transaction_id),
        key_segment(device)
    )
}

/// Replace characters that carry meaning in key expressions
fn key_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '*' | '$' | '?' | '#' => '_',
            other => other,
        })
        .collect()
}
