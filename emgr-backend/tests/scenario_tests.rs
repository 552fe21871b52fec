//! End-to-end device scenarios against a scripted driver and the in-memory
//! store. Timers run on paused tokio time, so 600 s waits finish instantly.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use emgr_backend::config::TimerSettings;
use emgr_backend::driver::netconf::NetconfDriverDeps;
use emgr_backend::driver::templates::BuilderRegistry;
use emgr_backend::driver::transport::{NetconfReply, NetconfRequest, RpcErrorInfo};
use emgr_backend::driver::{
    ConnectResult, DeviceContext, DeviceDriver, DisconnectResult, DriverError, DriverFactory,
    KnownBenignBackendError, NetconfDriverFactory, NetconfTransport, TransportError,
    UpdateResult,
};
use emgr_backend::persistence::{MemoryStatusStore, StatusStore};
use emgr_backend::scenario::{ScenarioRunner, SignalNotifier};
use emgr_shared::em_config::parse_em_config;
use emgr_shared::{
    DeviceEvent, EcMessage, Order, OrderError, OrderType, ProcessStatus, TransactionReport,
    WaitStep,
};

#[derive(Clone)]
struct Script {
    start_error: Option<DriverError>,
    connect: ConnectResult,
    update: UpdateResult,
    reserve: bool,
    enable: bool,
    disconnect: DisconnectResult,
    rollback: bool,
    write_em_info: bool,
    /// Completions the driver never reports
    withhold: Vec<WaitStep>,
    panic_on_connect: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            start_error: None,
            connect: ConnectResult::Ok,
            update: UpdateResult::Ok,
            reserve: true,
            enable: true,
            disconnect: DisconnectResult::Ok,
            rollback: true,
            write_em_info: true,
            withhold: vec![],
            panic_on_connect: false,
        }
    }
}

type CallLog = Arc<Mutex<Vec<(String, &'static str)>>>;

struct ScriptedDriver {
    device: String,
    script: Script,
    calls: CallLog,
    notifier: Option<SignalNotifier>,
}

impl ScriptedDriver {
    fn log(&self, call: &'static str) {
        self.calls.lock().unwrap().push((self.device.clone(), call));
    }

    async fn complete(&self, step: WaitStep) {
        if self.script.withhold.contains(&step) {
            return;
        }
        if let Some(notifier) = &self.notifier {
            notifier.notify(step).await;
        }
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    async fn start(&mut self, _: &DeviceContext, _: &EcMessage) -> Result<(), DriverError> {
        self.log("start");
        match &self.script.start_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn attach_notifier(&mut self, notifier: SignalNotifier) {
        self.notifier = Some(notifier);
    }

    async fn connect(&mut self, _: &DeviceContext, _: &EcMessage) -> ConnectResult {
        self.log("connect");
        if self.script.panic_on_connect {
            panic!("driver bug");
        }
        if self.script.connect == ConnectResult::Ok {
            self.complete(WaitStep::ConnectReady).await;
        }
        self.script.connect
    }

    async fn update_device_setting(&mut self, _: &DeviceContext, _: &EcMessage) -> UpdateResult {
        self.log("update");
        self.script.update
    }

    async fn reserve_device_setting(&mut self, _: &DeviceContext) -> bool {
        self.log("reserve");
        if self.script.reserve {
            self.complete(WaitStep::ConfirmedCommit).await;
        }
        self.script.reserve
    }

    async fn enable_device_setting(&mut self, _: &DeviceContext) -> bool {
        self.log("enable");
        self.script.enable
    }

    async fn disconnect_device(&mut self, _: &DeviceContext) -> DisconnectResult {
        self.log("disconnect");
        self.complete(WaitStep::DisconnectComplete).await;
        self.script.disconnect
    }

    async fn rollback_device_setting(&mut self, _: &DeviceContext) -> bool {
        self.log("rollback");
        self.script.rollback
    }

    async fn write_em_info(&mut self, _: &DeviceContext, _: &EcMessage) -> bool {
        self.log("write_em_info");
        self.script.write_em_info
    }
}

#[derive(Default)]
struct ScriptedFactory {
    scripts: HashMap<String, Script>,
    calls: CallLog,
}

impl ScriptedFactory {
    fn with(mut self, device: &str, script: Script) -> Self {
        self.scripts.insert(device.to_string(), script);
        self
    }

    fn calls_for(&self, device: &str) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == device)
            .map(|(_, call)| *call)
            .collect()
    }
}

impl DriverFactory for ScriptedFactory {
    fn create(&self, device: &str) -> Box<dyn DeviceDriver> {
        Box::new(ScriptedDriver {
            device: device.to_string(),
            script: self.scripts.get(device).cloned().unwrap_or_default(),
            calls: self.calls.clone(),
            notifier: None,
        })
    }
}

struct Harness {
    runner: Arc<ScenarioRunner>,
    factory: Arc<ScriptedFactory>,
    store: Arc<MemoryStatusStore>,
}

impl Harness {
    fn new(factory: ScriptedFactory) -> Self {
        Self::with_timers(factory, TimerSettings::default())
    }

    fn with_timers(factory: ScriptedFactory, timers: TimerSettings) -> Self {
        let factory = Arc::new(factory);
        let store = Arc::new(MemoryStatusStore::new());
        let runner = Arc::new(ScenarioRunner::new(
            "test",
            timers,
            factory.clone(),
            store.clone(),
        ));
        Self {
            runner,
            factory,
            store,
        }
    }

    async fn run(&self, devices: &[&str]) -> TransactionReport {
        self.runner.run(order("tx-1", devices)).await.unwrap()
    }

    async fn history(&self, device: &str) -> Vec<ProcessStatus> {
        self.store.history("tx-1", device).await
    }
}

fn order(transaction_id: &str, devices: &[&str]) -> Order {
    let messages = devices
        .iter()
        .map(|d| EcMessage::new(d, "l2-slice", json!({"slice_id": "slice-a", "vlan_id": 100})))
        .collect();
    let mut order = Order::new(OrderType::Merge, "l2-slice", messages);
    order.transaction_id = transaction_id.to_string();
    order
}

fn withholding(step: WaitStep) -> Script {
    Script {
        withhold: vec![step],
        ..Script::default()
    }
}

/// Persisted statuses climb the success path and branch at most once
fn assert_monotonic(history: &[ProcessStatus]) {
    let failures = history.iter().filter(|s| s.is_failure()).count();
    assert!(failures <= 1, "more than one failure status: {:?}", history);
    if failures == 1 {
        assert!(history.last().unwrap().is_failure(), "advanced after failing: {:?}", history);
    }

    let ranks: Vec<usize> = history.iter().filter_map(|s| s.success_rank()).collect();
    let expected: Vec<usize> = (0..ranks.len()).collect();
    assert_eq!(ranks, expected, "not a prefix of the success path: {:?}", history);
}

#[tokio::test(start_paused = true)]
async fn test_successful_scenario_ends_in_proc_end() {
    let harness = Harness::new(ScriptedFactory::default());

    let report = harness.run(&["leaf-1"]).await;

    assert!(report.is_success());
    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcEnd);
    assert!(!outcome.rolled_back);
    assert_eq!(harness.history("leaf-1").await, ProcessStatus::SUCCESS_PATH.to_vec());
    assert_eq!(
        harness.factory.calls_for("leaf-1"),
        vec!["start", "connect", "update", "reserve", "enable", "disconnect", "write_em_info"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_rolls_back_while_connected() {
    let factory = ScriptedFactory::default().with(
        "leaf-1",
        Script {
            update: UpdateResult::ValidationNg,
            ..Script::default()
        },
    );
    let harness = Harness::new(factory);

    let report = harness.run(&["leaf-1"]).await;

    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrCheck);
    assert!(outcome.rolled_back);
    assert!(!outcome.retryable);
    assert_eq!(
        harness.history("leaf-1").await,
        vec![ProcessStatus::ProcRun, ProcessStatus::EditConf, ProcessStatus::ProcErrCheck]
    );
    assert_eq!(
        harness.factory.calls_for("leaf-1"),
        vec!["start", "connect", "update", "rollback", "disconnect"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_device_rejection_is_set_dev_error() {
    let factory = ScriptedFactory::default().with(
        "leaf-1",
        Script {
            update: UpdateResult::UpdateNg,
            ..Script::default()
        },
    );
    let harness = Harness::new(factory);

    let report = harness.run(&["leaf-1"]).await;
    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrSetDev);
    assert!(outcome.rolled_back);
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_commit_timeout_is_retryable_and_rolled_back() {
    let harness = Harness::new(
        ScriptedFactory::default().with("leaf-1", withholding(WaitStep::ConfirmedCommit)),
    );
    let started = Instant::now();

    let report = harness.run(&["leaf-1"]).await;

    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrStopRetry);
    assert!(outcome.retryable);
    assert!(outcome.rolled_back);
    // Device window plus the EM offset, both on the 600 s fallback
    assert!(started.elapsed() >= Duration::from_secs(1200));
    assert_eq!(
        harness.history("leaf-1").await,
        vec![
            ProcessStatus::ProcRun,
            ProcessStatus::EditConf,
            ProcessStatus::ConfCommit,
            ProcessStatus::Commit,
            ProcessStatus::ProcErrStopRetry,
        ]
    );
    assert!(!harness.factory.calls_for("leaf-1").contains(&"enable"));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_confirmed_commit_rolls_back_once() {
    let factory = ScriptedFactory::default().with(
        "leaf-1",
        Script {
            reserve: false,
            ..Script::default()
        },
    );
    let harness = Harness::new(factory);

    let report = harness.run(&["leaf-1"]).await;

    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrSetDev);
    assert!(outcome.rolled_back);
    assert!(!outcome.retryable);
    assert_eq!(
        harness.history("leaf-1").await,
        vec![
            ProcessStatus::ProcRun,
            ProcessStatus::EditConf,
            ProcessStatus::ConfCommit,
            ProcessStatus::ProcErrSetDev,
        ]
    );
    assert_eq!(
        harness.factory.calls_for("leaf-1"),
        vec!["start", "connect", "update", "reserve", "rollback", "disconnect"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_session_close_failure_still_ends_in_proc_end() {
    let factory = ScriptedFactory::default().with(
        "leaf-1",
        Script {
            disconnect: DisconnectResult::CloseFailed,
            ..Script::default()
        },
    );
    let harness = Harness::new(factory);

    let report = harness.run(&["leaf-1"]).await;

    assert!(report.is_success());
    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcEnd);
    assert!(!outcome.rolled_back);
    assert_eq!(harness.history("leaf-1").await, ProcessStatus::SUCCESS_PATH.to_vec());
    let calls = harness.factory.calls_for("leaf-1");
    assert!(!calls.contains(&"rollback"));
    assert_eq!(calls.last(), Some(&"write_em_info"));
}

#[tokio::test(start_paused = true)]
async fn test_read_back_failure_is_not_rolled_back() {
    let factory = ScriptedFactory::default().with(
        "leaf-1",
        Script {
            disconnect: DisconnectResult::ReadBackFailed,
            ..Script::default()
        },
    );
    let harness = Harness::new(factory);

    let report = harness.run(&["leaf-1"]).await;

    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrGetAftConf);
    assert!(!outcome.rolled_back);
    let calls = harness.factory.calls_for("leaf-1");
    assert!(!calls.contains(&"rollback"));
    assert!(!calls.contains(&"write_em_info"));
    assert_eq!(calls.iter().filter(|c| **c == "disconnect").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_wait_falls_back_to_600_seconds() {
    let timers = TimerSettings::resolve(None);
    assert_eq!(timers.connect_get_before_config, Duration::from_secs(600));

    let harness = Harness::with_timers(
        ScriptedFactory::default().with("leaf-1", withholding(WaitStep::ConnectReady)),
        timers,
    );
    let started = Instant::now();

    let report = harness.run(&["leaf-1"]).await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(600));
    assert!(elapsed < Duration::from_secs(601));
    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrStopRetry);
    assert!(outcome.rolled_back);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_wait_timeout_is_terminal_without_rollback() {
    let harness = Harness::new(
        ScriptedFactory::default().with("leaf-1", withholding(WaitStep::DisconnectComplete)),
    );

    let report = harness.run(&["leaf-1"]).await;

    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrStopNoRetry);
    assert!(!outcome.retryable);
    assert!(!outcome.rolled_back);
    assert!(!harness.factory.calls_for("leaf-1").contains(&"rollback"));

    let history = harness.history("leaf-1").await;
    assert_eq!(history[history.len() - 2], ProcessStatus::ProcEnd);
    assert_eq!(history.last(), Some(&ProcessStatus::ProcErrStopNoRetry));
}

#[tokio::test(start_paused = true)]
async fn test_connect_refused_never_rolls_back() {
    let factory = ScriptedFactory::default().with(
        "leaf-1",
        Script {
            connect: ConnectResult::Ng,
            ..Script::default()
        },
    );
    let harness = Harness::new(factory);

    let report = harness.run(&["leaf-1"]).await;

    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrInf);
    assert!(!outcome.rolled_back);
    assert_eq!(harness.factory.calls_for("leaf-1"), vec!["start", "connect"]);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_device_is_temporary() {
    let factory = ScriptedFactory::default().with(
        "leaf-1",
        Script {
            connect: ConnectResult::NoReply,
            ..Script::default()
        },
    );
    let harness = Harness::new(factory);

    let report = harness.run(&["leaf-1"]).await;

    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrTemp);
    assert!(outcome.retryable);
    assert!(!outcome.rolled_back);
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_touches_nothing() {
    let factory = ScriptedFactory::default().with(
        "leaf-1",
        Script {
            start_error: Some(DriverError::UnknownDevice {
                device: "leaf-1".to_string(),
            }),
            ..Script::default()
        },
    );
    let harness = Harness::new(factory);

    let report = harness.run(&["leaf-1"]).await;

    assert_eq!(report.status, ProcessStatus::ProcErrInf);
    assert_eq!(harness.factory.calls_for("leaf-1"), vec!["start"]);
    assert_eq!(
        harness.history("leaf-1").await,
        vec![ProcessStatus::ProcRun, ProcessStatus::ProcErrInf]
    );
}

#[tokio::test(start_paused = true)]
async fn test_malformed_message_is_order_error() {
    let harness = Harness::new(ScriptedFactory::default());
    let mut order = order("tx-1", &["leaf-1"]);
    order.messages[0].body = json!("not an object");

    let report = harness.runner.run(order).await.unwrap();

    assert_eq!(report.status, ProcessStatus::ProcErrOrder);
    assert!(harness.factory.calls_for("leaf-1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_final_commit_rolls_back_once() {
    let factory = ScriptedFactory::default().with(
        "leaf-1",
        Script {
            enable: false,
            rollback: false,
            ..Script::default()
        },
    );
    let harness = Harness::new(factory);

    let report = harness.run(&["leaf-1"]).await;

    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrOth);
    assert!(outcome.rolled_back);
    // A failed rollback is not retried
    let calls = harness.factory.calls_for("leaf-1");
    assert_eq!(calls.iter().filter(|c| **c == "rollback").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_status_write_failure_after_connect_rolls_back() {
    let harness = Harness::new(ScriptedFactory::default());
    harness.store.reject_status(ProcessStatus::ConfCommit).await;

    let report = harness.run(&["leaf-1"]).await;

    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrOth);
    assert!(outcome.rolled_back);
    assert_eq!(
        harness.history("leaf-1").await,
        vec![ProcessStatus::ProcRun, ProcessStatus::EditConf, ProcessStatus::ProcErrOth]
    );
}

#[tokio::test(start_paused = true)]
async fn test_write_back_failure_is_bookkeeping_only() {
    let factory = ScriptedFactory::default().with(
        "leaf-1",
        Script {
            write_em_info: false,
            ..Script::default()
        },
    );
    let harness = Harness::new(factory);

    let report = harness.run(&["leaf-1"]).await;

    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrOth);
    assert!(!outcome.rolled_back);
    assert!(!harness.factory.calls_for("leaf-1").contains(&"rollback"));
}

#[tokio::test(start_paused = true)]
async fn test_persisted_statuses_only_move_forward() {
    let factory = ScriptedFactory::default()
        .with(
            "leaf-2",
            Script {
                update: UpdateResult::ValidationNg,
                ..Script::default()
            },
        )
        .with("leaf-3", withholding(WaitStep::ConfirmedCommit))
        .with("leaf-4", withholding(WaitStep::DisconnectComplete))
        .with(
            "leaf-5",
            Script {
                disconnect: DisconnectResult::ReadBackFailed,
                ..Script::default()
            },
        );
    let harness = Harness::new(factory);
    let devices = ["leaf-1", "leaf-2", "leaf-3", "leaf-4", "leaf-5"];

    harness.run(&devices).await;

    for device in devices {
        assert_monotonic(&harness.history(device).await);
    }
}

#[tokio::test(start_paused = true)]
async fn test_devices_run_independently() {
    let factory = ScriptedFactory::default()
        .with("leaf-1", withholding(WaitStep::ConfirmedCommit))
        .with(
            "leaf-2",
            Script {
                update: UpdateResult::ValidationNg,
                ..Script::default()
            },
        );
    let harness = Harness::new(factory);
    let started = Instant::now();

    let report = harness.run(&["leaf-3", "leaf-1", "leaf-2"]).await;

    // Outcomes sorted by device; aggregate is the first failure by name
    let devices: Vec<&str> = report.outcomes.iter().map(|o| o.device.as_str()).collect();
    assert_eq!(devices, vec!["leaf-1", "leaf-2", "leaf-3"]);
    assert_eq!(report.status, ProcessStatus::ProcErrStopRetry);
    assert_eq!(report.outcome("leaf-2").unwrap().status, ProcessStatus::ProcErrCheck);
    assert!(report.outcome("leaf-3").unwrap().is_success());
    // One device's wait never delays the others beyond its own timer
    assert!(started.elapsed() < Duration::from_secs(1300));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_device_task_is_reported_as_oth() {
    let factory = ScriptedFactory::default().with(
        "leaf-1",
        Script {
            panic_on_connect: true,
            ..Script::default()
        },
    );
    let harness = Harness::new(factory);

    let report = harness.run(&["leaf-1", "leaf-2"]).await;

    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcErrOth);
    assert!(report.outcome("leaf-2").unwrap().is_success());
    assert_eq!(
        harness.store.status_of("tx-1", "leaf-1").await,
        Some(ProcessStatus::ProcErrOth)
    );
    assert!(harness.runner.signals().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_external_event_completes_pending_wait() {
    let harness = Harness::new(
        ScriptedFactory::default().with("leaf-1", withholding(WaitStep::ConfirmedCommit)),
    );
    let runner = harness.runner.clone();
    let started = Instant::now();

    let (report, delivered) = tokio::join!(runner.run(order("tx-ext", &["leaf-1"])), async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        harness
            .runner
            .signals()
            .notify(&DeviceEvent {
                transaction_id: "tx-ext".to_string(),
                device: "leaf-1".to_string(),
                step: WaitStep::ConfirmedCommit,
            })
            .await
    });

    assert!(delivered);
    assert!(report.unwrap().is_success());
    assert!(started.elapsed() < Duration::from_secs(600));
}

#[tokio::test(start_paused = true)]
async fn test_late_event_after_timeout_is_dropped() {
    let harness = Harness::new(
        ScriptedFactory::default().with("leaf-1", withholding(WaitStep::ConnectReady)),
    );

    let report = harness.run(&["leaf-1"]).await;
    assert_eq!(report.status, ProcessStatus::ProcErrStopRetry);

    let delivered = harness
        .runner
        .signals()
        .notify(&DeviceEvent {
            transaction_id: "tx-1".to_string(),
            device: "leaf-1".to_string(),
            step: WaitStep::ConnectReady,
        })
        .await;
    assert!(!delivered);
    assert_eq!(
        harness.store.status_of("tx-1", "leaf-1").await,
        Some(ProcessStatus::ProcErrStopRetry)
    );
}

#[tokio::test(start_paused = true)]
async fn test_submit_reports_on_channel() {
    let factory = Arc::new(ScriptedFactory::default());
    let store = Arc::new(MemoryStatusStore::new());
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let runner = Arc::new(
        ScenarioRunner::new("test", TimerSettings::default(), factory, store)
            .with_status_updates(status_tx)
            .with_reports(report_tx),
    );

    let transaction_id = runner.submit(order("", &["leaf-1"])).await.unwrap();
    assert!(transaction_id.starts_with("test-"));

    let report = report_rx.recv().await.unwrap();
    assert_eq!(report.transaction_id, transaction_id);
    assert!(report.is_success());
    assert!(runner.active_transactions().await.is_empty());

    let mut published = vec![];
    while let Ok(update) = status_rx.try_recv() {
        assert_eq!(update.backend_name, "test");
        published.push(update.status);
    }
    assert_eq!(published, ProcessStatus::SUCCESS_PATH.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_transaction_is_rejected() {
    let harness = Harness::new(
        ScriptedFactory::default().with("leaf-1", withholding(WaitStep::ConnectReady)),
    );

    harness.runner.submit(order("tx-dup", &["leaf-1"])).await.unwrap();
    let second = harness.runner.submit(order("tx-dup", &["leaf-1"])).await;

    assert!(matches!(
        second,
        Err(OrderError::TransactionInProgress { transaction_id }) if transaction_id == "tx-dup"
    ));
    assert_eq!(harness.runner.active_transactions().await, vec!["tx-dup".to_string()]);
}

#[tokio::test]
async fn test_invalid_order_is_rejected_before_dispatch() {
    let harness = Harness::new(ScriptedFactory::default());

    let result = harness.runner.run(order("tx-1", &["leaf-1", "leaf-1"])).await;

    assert!(matches!(result, Err(OrderError::DuplicateDevice { .. })));
    assert!(harness.factory.calls.lock().unwrap().is_empty());
}

/// NETCONF agent that answers the first commit of a session with the
/// backend error some firmware reports for an applied confirmed commit
#[derive(Default)]
struct FlakyCommitAgent {
    calls: Mutex<Vec<&'static str>>,
}

impl FlakyCommitAgent {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetconfTransport for FlakyCommitAgent {
    async fn rpc(&self, request: NetconfRequest) -> Result<NetconfReply, TransportError> {
        let name = request.rpc.name();
        let first_commit = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(name);
            name == "commit" && calls.iter().filter(|c| **c == "commit").count() == 1
        };

        Ok(match name {
            "commit" if first_commit => NetconfReply::RpcError {
                errors: vec![RpcErrorInfo {
                    error_tag: "operation-failed".to_string(),
                    error_message: "ME_BACKEND_ERROR_OP_FAILED".to_string(),
                }],
            },
            "get-config" => NetconfReply::Data {
                content: "<configuration/>".to_string(),
            },
            _ => NetconfReply::Ok,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_benign_backend_error_on_confirmed_commit_completes_scenario() {
    let em = parse_em_config(
        r#"{ devices: [ { name: "leaf-1", vendor: "juniper", address: "192.0.2.11" } ] }"#,
    )
    .unwrap();
    let agent = Arc::new(FlakyCommitAgent::default());
    let store = Arc::new(MemoryStatusStore::new());
    let timers = TimerSettings::default();
    let factory = Arc::new(NetconfDriverFactory::new(NetconfDriverDeps {
        em: Arc::new(em),
        transport: agent.clone(),
        store: store.clone(),
        builders: Arc::new(BuilderRegistry::with_defaults()),
        benign_errors: Arc::new(KnownBenignBackendError::default()),
        timers,
    }));
    let runner = ScenarioRunner::new("test", timers, factory, store.clone());

    let message = EcMessage::new(
        "leaf-1",
        "l2-slice",
        json!({"slice_id": "slice-a", "vlan_id": 100, "interface": "ge-0/0/1"}),
    );
    let mut order = Order::new(OrderType::Merge, "l2-slice", vec![message]);
    order.transaction_id = "tx-nc".to_string();
    let started = Instant::now();

    let report = runner.run(order).await.unwrap();

    assert!(report.is_success());
    let outcome = report.outcome("leaf-1").unwrap();
    assert_eq!(outcome.status, ProcessStatus::ProcEnd);
    assert!(!outcome.rolled_back);
    // The confirmed-commit wait was completed by the driver, not by its timer
    assert!(started.elapsed() < Duration::from_secs(600));
    assert_eq!(store.history("tx-nc", "leaf-1").await, ProcessStatus::SUCCESS_PATH.to_vec());
    assert_eq!(
        agent.calls(),
        vec![
            "hello",
            "lock",
            "edit-config",
            "validate",
            "commit",
            "commit",
            "unlock",
            "get-config",
            "close-session",
        ]
    );

    let recorded = store.read_em_info("leaf-1").await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].slice_id, "slice-a");
    assert_eq!(recorded[0].vlan_id, 100);
}
