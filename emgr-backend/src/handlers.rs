//! Zenoh surface of the element manager.
//!
//! Order intake is a queryable; device status updates and transaction reports
//! are published; external completion events arrive on a subscriber owned by
//! the main loop and are routed with [`route_device_event`].

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use zenoh::{Session, query::Query};
use zenoh_ext::{AdvancedPublisherBuilderExt, CacheConfig, MissDetectionConfig};

use emgr_shared::{
    DeviceEvent, DeviceStatusUpdate, OrderRequest, OrderResponse, TransactionReport, qos, topics,
};

use crate::scenario::ScenarioRunner;

/// Zenoh handlers for order intake and result publication
pub struct OrderZenohHandlers {
    runner: Arc<ScenarioRunner>,
    session: Arc<Session>,
    backend_name: String,
}

impl OrderZenohHandlers {
    pub fn new(runner: Arc<ScenarioRunner>, session: Arc<Session>, backend_name: String) -> Self {
        info!("[BACKEND] Creating order handlers for backend: {}", backend_name);
        Self {
            runner,
            session,
            backend_name,
        }
    }

    /// Start the order intake query handler
    #[instrument(skip(self))]
    pub async fn start_query_handler(&self) -> Result<()> {
        let order_topic = topics::order_query_service(&self.backend_name);
        let queryable = self
            .session
            .declare_queryable(&order_topic)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to declare order queryable: {}", e))?;

        info!(
            "[BACKEND] Order query handler started on topic: {}",
            order_topic.as_str()
        );

        let runner = self.runner.clone();
        tokio::spawn(async move {
            while let Ok(query) = queryable.recv_async().await {
                let runner = runner.clone();
                tokio::spawn(async move {
                    if let Err(e) = Self::handle_order_query(&runner, query).await {
                        error!("Error handling order query: {}", e);
                    }
                });
            }
        });

        Ok(())
    }

    #[instrument(skip(runner, query))]
    async fn handle_order_query(runner: &Arc<ScenarioRunner>, query: Query) -> Result<()> {
        debug!("Received order query on key: {}", query.key_expr().as_str());

        let response = match query.payload() {
            Some(payload) => match serde_json::from_slice::<OrderRequest>(
                payload.to_bytes().as_ref(),
            ) {
                Ok(request) => process_order_request(runner, request).await,
                Err(e) => {
                    warn!("Malformed order request: {}", e);
                    OrderResponse::Error {
                        message: format!("Malformed request: {}", e),
                    }
                }
            },
            None => {
                warn!("Received order query without payload");
                OrderResponse::Error {
                    message: "Missing request payload".to_string(),
                }
            }
        };

        let response_payload = serde_json::to_vec(&response)?;
        query
            .reply(query.key_expr().clone(), response_payload)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send order response: {}", e))?;

        Ok(())
    }

    /// Publish every persisted device status on its status topic
    pub fn start_status_publisher(&self, mut updates: mpsc::UnboundedReceiver<DeviceStatusUpdate>) {
        info!("[BACKEND] Starting device status publisher");
        let session = self.session.clone();

        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                let topic = topics::device_status(
                    &update.backend_name,
                    &update.transaction_id,
                    &update.device,
                );
                match serde_json::to_vec(&update) {
                    Ok(payload) => {
                        if let Err(e) = session.put(&topic, payload).await {
                            error!(
                                "Failed to publish status {} for {}/{}: {}",
                                update.status, update.transaction_id, update.device, e
                            );
                        }
                    }
                    Err(e) => error!("Failed to serialize status update: {}", e),
                }
            }
            debug!("Device status publisher stopped");
        });
    }

    /// Publish finished transaction reports with a history cache for late
    /// joiners
    pub async fn start_report_publisher(
        &self,
        mut reports: mpsc::UnboundedReceiver<TransactionReport>,
    ) -> Result<()> {
        let report_topic = topics::transaction_reports(&self.backend_name);
        let publisher = self
            .session
            .declare_publisher(report_topic.clone())
            .cache(CacheConfig::default().max_samples(qos::REPORT_HISTORY))
            .sample_miss_detection(
                MissDetectionConfig::default()
                    .heartbeat(Duration::from_millis(qos::REPORT_HEARTBEAT_MS)),
            )
            .publisher_detection()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create report publisher: {}", e))?;

        info!(
            "[BACKEND] Created report publisher on topic: {}",
            report_topic.as_str()
        );

        tokio::spawn(async move {
            while let Some(report) = reports.recv().await {
                match serde_json::to_string(&report) {
                    Ok(payload) => {
                        if let Err(e) = publisher.put(payload).await {
                            error!(
                                "Failed to publish report for {}: {}",
                                report.transaction_id, e
                            );
                        } else {
                            info!(
                                "Published report for {}: {}",
                                report.transaction_id, report.status
                            );
                        }
                    }
                    Err(e) => error!("Failed to serialize transaction report: {}", e),
                }
            }
        });

        Ok(())
    }
}

/// Answer one order intake request
pub async fn process_order_request(
    runner: &Arc<ScenarioRunner>,
    request: OrderRequest,
) -> OrderResponse {
    match request {
        OrderRequest::Submit(order) => {
            info!(
                "Submitting {} order for {} device(s)",
                order.order_type,
                order.messages.len()
            );
            match runner.submit(order).await {
                Ok(transaction_id) => OrderResponse::Accepted { transaction_id },
                Err(e) => {
                    warn!("Order rejected: {}", e);
                    OrderResponse::Error {
                        message: format!("Order rejected: {}", e),
                    }
                }
            }
        }
        OrderRequest::Status { transaction_id } => {
            match runner
                .store()
                .read_transaction_device_status(&transaction_id)
                .await
            {
                Ok(Some(rows)) => OrderResponse::Status { rows },
                Ok(None) => OrderResponse::Error {
                    message: format!("Unknown transaction: {}", transaction_id),
                },
                Err(e) => {
                    error!("Failed to read status of {}: {}", transaction_id, e);
                    OrderResponse::Error {
                        message: format!("Failed to read status: {}", e),
                    }
                }
            }
        }
        OrderRequest::ListActive => OrderResponse::Active {
            transactions: runner.active_transactions().await,
        },
    }
}

/// Decode an external completion event and hand it to its device scenario
pub async fn route_device_event(runner: &ScenarioRunner, payload: &[u8]) -> bool {
    match serde_json::from_slice::<DeviceEvent>(payload) {
        Ok(event) => {
            debug!(
                "Device event {} for {}/{}",
                event.step, event.transaction_id, event.device
            );
            runner.signals().notify(&event).await
        }
        Err(e) => {
            warn!("Ignoring malformed device event: {}", e);
            false
        }
    }
}
