use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};
use zenoh::Session;

use emgr_shared::{errors::EmError, topics};

use emgr_backend::config::{AppConfig, CliConfig, ConfigManager, StorageBackend};
use emgr_backend::driver::{
    KnownBenignBackendError, NetconfDriverFactory, ZenohNetconfTransport,
    netconf::NetconfDriverDeps, templates::BuilderRegistry,
};
use emgr_backend::handlers::{self, OrderZenohHandlers};
use emgr_backend::persistence::memory::DEFAULT_RETAINED_TRANSACTIONS;
use emgr_backend::persistence::{MemoryStatusStore, StatusStore, ZenohStatusStore};
use emgr_backend::scenario::ScenarioRunner;

struct EmBackend {
    session: Arc<Session>,
    _liveliness_token: zenoh::liveliness::LivelinessToken,
    runner: Arc<ScenarioRunner>,
    backend_name: String,
}

impl EmBackend {
    #[instrument(skip(config), fields(backend_name = %config.app.backend_name))]
    async fn new(config: &ConfigManager) -> Result<Self> {
        let backend_name = config.app.backend_name.clone();

        let zenoh_config = config
            .zenoh
            .to_zenoh_config()
            .map_err(|e| EmError::zenoh("configuration", e))?;

        let session = zenoh::open(zenoh_config)
            .await
            .map_err(|e| EmError::zenoh("session open", e))?;
        let session = Arc::new(session);
        info!(
            "[BACKEND] Zenoh session opened with mode: {:?}, endpoints: {:?}",
            config.zenoh.mode, config.zenoh.endpoints
        );

        let backend_health_topic = topics::backend_health(&backend_name);
        let liveliness_token = session
            .liveliness()
            .declare_token(&backend_health_topic)
            .await
            .map_err(|e| EmError::zenoh("liveliness declaration", e))?;
        info!(
            "[BACKEND] Backend '{}' health liveliness declared on topic: {}",
            backend_name,
            backend_health_topic.as_str()
        );

        let store: Arc<dyn StatusStore> = match config.app.storage {
            StorageBackend::Memory => {
                warn!(
                    "[STORE] Using in-memory status store, nothing survives a restart \
                     and only the last {} transactions are kept",
                    DEFAULT_RETAINED_TRANSACTIONS
                );
                Arc::new(MemoryStatusStore::new())
            }
            StorageBackend::Zenoh => {
                info!("[STORE] Using Zenoh key/value status store");
                Arc::new(ZenohStatusStore::new(session.clone(), &backend_name))
            }
        };

        let rpc_timeout = Duration::from_millis(config.em.netconf.rpc_timeout_ms);
        let transport = Arc::new(ZenohNetconfTransport::new(session.clone(), rpc_timeout));
        let benign_errors =
            KnownBenignBackendError::from_patterns(&config.em.netconf.benign_backend_errors)
                .map_err(|e| anyhow::anyhow!("Invalid benign backend error pattern: {}", e))?;

        let factory = NetconfDriverFactory::new(NetconfDriverDeps {
            em: config.em.clone(),
            transport,
            store: store.clone(),
            builders: Arc::new(BuilderRegistry::with_defaults()),
            benign_errors: Arc::new(benign_errors),
            timers: config.timers,
        });
        info!(
            "[BACKEND] NETCONF driver ready for {} device(s), rpc timeout {:?}",
            config.em.devices.len(),
            rpc_timeout
        );

        let (status_sender, status_receiver) = mpsc::unbounded_channel();
        let (report_sender, report_receiver) = mpsc::unbounded_channel();

        let runner = Arc::new(
            ScenarioRunner::new(&backend_name, config.timers, Arc::new(factory), store)
                .with_status_updates(status_sender)
                .with_reports(report_sender),
        );

        let handlers =
            OrderZenohHandlers::new(runner.clone(), session.clone(), backend_name.clone());
        handlers.start_query_handler().await?;
        handlers.start_status_publisher(status_receiver);
        handlers.start_report_publisher(report_receiver).await?;

        Ok(Self {
            session,
            _liveliness_token: liveliness_token,
            runner,
            backend_name,
        })
    }

    async fn run(&mut self) -> Result<()> {
        let events_topic = topics::backend_device_events_pattern(&self.backend_name);
        let events = self
            .session
            .declare_subscriber(&events_topic)
            .await
            .map_err(|e| EmError::zenoh("device event subscription", e))?;
        info!(
            "[BACKEND] Listening for device events on: {}",
            events_topic.as_str()
        );

        info!("[BACKEND] Backend '{}' ready", self.backend_name);

        loop {
            tokio::select! {
                sample = events.recv_async() => {
                    match sample {
                        Ok(sample) => {
                            let payload = sample.payload().to_bytes();
                            handlers::route_device_event(&self.runner, payload.as_ref()).await;
                        }
                        Err(e) => {
                            error!("Error receiving device event: {}", e);
                            break;
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("[BACKEND] Shutdown requested");
                    break;
                }
            }
        }

        let active = self.runner.active_transactions().await;
        if !active.is_empty() {
            warn!(
                "[BACKEND] Stopping with {} transaction(s) still running: {:?}",
                active.len(),
                active
            );
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_config = CliConfig::from_args()?;
    cli_config.validate()?;

    // Logging first: loading the EM configuration warns about missing timers
    let app_config = AppConfig::from_cli(&cli_config)?;
    app_config.init_logging()?;

    let config_manager = ConfigManager::from_app(app_config, &cli_config)?;
    config_manager.validate()?;

    info!(
        "[BACKEND] Starting emgr-backend with name: {}",
        config_manager.app.backend_name
    );
    info!(
        "[BACKEND] Timers - connect: {:?}, confirmed-commit: {:?} (+{:?}), disconnect: {:?}",
        config_manager.timers.connect_get_before_config,
        config_manager.timers.confirmed_commit,
        config_manager.timers.confirmed_commit_em_offset,
        config_manager.timers.disconnect_get_after_config
    );

    let mut backend = EmBackend::new(&config_manager).await?;
    backend.run().await?;

    Ok(())
}
