//! Transaction dispatch: one concurrent device scenario per target device.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use emgr_shared::{
    DeviceEvent, DeviceOutcome, DeviceStatusUpdate, Order, OrderError, ProcessStatus, StatusWrite,
    TransactionId, TransactionReport,
};

use super::machine::DeviceScenario;
use super::signal::SignalNotifier;
use super::task::DeviceTask;
use crate::config::TimerSettings;
use crate::driver::{DeviceContext, DriverFactory};
use crate::persistence::{StatusStore, now_millis};

/// Live notifiers keyed by (transaction, device).
///
/// External completion events are routed through here; entries exist only
/// while the device scenario runs.
#[derive(Clone, Default)]
pub struct SignalRegistry {
    notifiers: Arc<RwLock<HashMap<(TransactionId, String), SignalNotifier>>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, transaction_id: &str, device: &str, notifier: SignalNotifier) {
        self.notifiers
            .write()
            .await
            .insert((transaction_id.to_string(), device.to_string()), notifier);
    }

    pub async fn remove(&self, transaction_id: &str, device: &str) {
        self.notifiers
            .write()
            .await
            .remove(&(transaction_id.to_string(), device.to_string()));
    }

    /// Deliver `event` to its device scenario. Returns false when no scenario
    /// for that (transaction, device) is running.
    pub async fn notify(&self, event: &DeviceEvent) -> bool {
        let notifier = {
            let notifiers = self.notifiers.read().await;
            notifiers
                .get(&(event.transaction_id.clone(), event.device.clone()))
                .cloned()
        };

        match notifier {
            Some(notifier) => {
                notifier.notify(event.step).await;
                true
            }
            None => {
                debug!(
                    "[SCENARIO] Dropping {} event for {}/{}: no running scenario",
                    event.step, event.transaction_id, event.device
                );
                false
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.notifiers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.notifiers.read().await.is_empty()
    }
}

/// Runs orders. Each device gets its own task and its own driver; the runner
/// never retries, it only reports terminal statuses.
pub struct ScenarioRunner {
    backend_name: String,
    timers: TimerSettings,
    drivers: Arc<dyn DriverFactory>,
    store: Arc<dyn StatusStore>,
    signals: SignalRegistry,
    /// Running transactions and their devices
    active: Arc<RwLock<BTreeMap<TransactionId, Vec<String>>>>,
    status_updates: Option<mpsc::UnboundedSender<DeviceStatusUpdate>>,
    reports: Option<mpsc::UnboundedSender<TransactionReport>>,
    sequence: AtomicU64,
}

impl ScenarioRunner {
    pub fn new(
        backend_name: &str,
        timers: TimerSettings,
        drivers: Arc<dyn DriverFactory>,
        store: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            backend_name: backend_name.to_string(),
            timers,
            drivers,
            store,
            signals: SignalRegistry::new(),
            active: Arc::new(RwLock::new(BTreeMap::new())),
            status_updates: None,
            reports: None,
            sequence: AtomicU64::new(0),
        }
    }

    /// Forward every persisted device status to `sender`
    pub fn with_status_updates(
        mut self,
        sender: mpsc::UnboundedSender<DeviceStatusUpdate>,
    ) -> Self {
        self.status_updates = Some(sender);
        self
    }

    /// Forward every finished transaction report to `sender`
    pub fn with_reports(mut self, sender: mpsc::UnboundedSender<TransactionReport>) -> Self {
        self.reports = Some(sender);
        self
    }

    pub fn signals(&self) -> &SignalRegistry {
        &self.signals
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    pub async fn active_transactions(&self) -> Vec<TransactionId> {
        self.active.read().await.keys().cloned().collect()
    }

    fn next_transaction_id(&self) -> TransactionId {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", self.backend_name, now_millis(), sequence)
    }

    /// Validate, assign an id when missing and mark the transaction active
    async fn admit(&self, mut order: Order) -> Result<Order, OrderError> {
        order.validate()?;
        if order.transaction_id.is_empty() {
            order.transaction_id = self.next_transaction_id();
        }

        let mut active = self.active.write().await;
        if active.contains_key(&order.transaction_id) {
            return Err(OrderError::TransactionInProgress {
                transaction_id: order.transaction_id,
            });
        }
        let devices = order.devices().iter().map(|d| d.to_string()).collect();
        active.insert(order.transaction_id.clone(), devices);
        Ok(order)
    }

    /// Run an order to completion and return its report
    #[instrument(
        skip(self, order),
        fields(service = %order.service, order_type = %order.order_type)
    )]
    pub async fn run(&self, order: Order) -> Result<TransactionReport, OrderError> {
        let order = self.admit(order).await?;
        Ok(self.execute(order).await)
    }

    /// Run an order in the background; the report goes to the report channel
    pub async fn submit(self: &Arc<Self>, order: Order) -> Result<TransactionId, OrderError> {
        let order = self.admit(order).await?;
        let transaction_id = order.transaction_id.clone();

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.execute(order).await;
        });

        info!("[SCENARIO] Transaction {} accepted", transaction_id);
        Ok(transaction_id)
    }

    async fn execute(&self, order: Order) -> TransactionReport {
        let started_at = now_millis();
        let transaction_id = order.transaction_id.clone();
        let devices: Vec<String> = order.devices().iter().map(|d| d.to_string()).collect();

        info!(
            "[SCENARIO] Transaction {} ({} {}) dispatching {} device(s)",
            transaction_id,
            order.order_type,
            order.service,
            devices.len()
        );

        let mut tasks = JoinSet::new();
        for message in order.messages {
            let device = message.device.clone();
            let ctx =
                DeviceContext::new(&transaction_id, &device, &order.service, order.order_type);
            let task = DeviceTask::new(ctx, message);
            let driver = self.drivers.create(&device);

            let mut scenario =
                DeviceScenario::new(task, driver, Arc::clone(&self.store), self.timers);
            if let Some(sender) = &self.status_updates {
                scenario = scenario.with_status_updates(&self.backend_name, sender.clone());
            }

            self.signals
                .register(&transaction_id, &device, scenario.notifier())
                .await;

            let signals = self.signals.clone();
            let transaction = transaction_id.clone();
            tasks.spawn(async move {
                let outcome = scenario.run().await;
                signals.remove(&transaction, &device).await;
                outcome
            });
        }

        let mut outcomes: BTreeMap<String, DeviceOutcome> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    outcomes.insert(outcome.device.clone(), outcome);
                }
                Err(e) => error!("[SCENARIO] Device task in {} aborted: {}", transaction_id, e),
            }
        }

        for device in &devices {
            if !outcomes.contains_key(device) {
                let outcome = self.abandoned(&transaction_id, device).await;
                outcomes.insert(device.clone(), outcome);
            }
        }

        let outcomes: Vec<DeviceOutcome> = outcomes.into_values().collect();
        let report = TransactionReport {
            transaction_id: transaction_id.clone(),
            order_type: order.order_type,
            service: order.service,
            status: TransactionReport::aggregate_status(&outcomes),
            outcomes,
            started_at,
            finished_at: now_millis(),
        };

        self.active.write().await.remove(&transaction_id);

        info!(
            "[SCENARIO] Transaction {} finished with {}",
            transaction_id, report.status
        );

        if let Some(sender) = &self.reports {
            if sender.send(report.clone()).is_err() {
                debug!("[SCENARIO] Report receiver dropped");
            }
        }

        report
    }

    /// A device task that ended without an outcome (it panicked)
    async fn abandoned(&self, transaction_id: &str, device: &str) -> DeviceOutcome {
        warn!(
            "[SCENARIO] No outcome from {}/{}, recording PROC_ERR_OTH",
            transaction_id, device
        );
        self.signals.remove(transaction_id, device).await;

        if let Err(e) = self
            .store
            .write_transaction_device_status(
                StatusWrite::Update,
                device,
                transaction_id,
                ProcessStatus::ProcErrOth,
            )
            .await
        {
            error!("[STORE] Failed to persist PROC_ERR_OTH for {}: {}", device, e);
        }

        DeviceOutcome {
            device: device.to_string(),
            status: ProcessStatus::ProcErrOth,
            rolled_back: false,
            retryable: false,
            reason: Some("device task aborted".to_string()),
        }
    }
}
