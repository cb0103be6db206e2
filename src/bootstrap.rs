use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::engine::{BackgroundService, Resolver};
use crate::error::{AppError, AppResult};
use crate::gasbank::{GasBankService, GasTransaction, WithdrawalSettlement};
use crate::oracle::{OracleDispatch, OracleRequest, OracleService};
use crate::resolver::{HttpResolver, TimeoutResolver};
use crate::store::{GasBankStore, MemoryStore, OracleStore, PgStore};

/// Wired services plus the background engines that settle their pending work
pub struct App {
    pub gasbank: Arc<GasBankService>,
    pub oracle: Arc<OracleService>,
    services: Vec<Arc<dyn BackgroundService>>,
    shutdown_grace: Duration,
}

impl App {
    /// Start every engine in order. If one fails, the ones already started
    /// are stopped again before the error is returned.
    pub async fn start(&self) -> AppResult<()> {
        for (index, service) in self.services.iter().enumerate() {
            if let Err(err) = service.start().await {
                error!(service = service.name(), error = %err, "service failed to start");
                for started in self.services[..index].iter().rev() {
                    if let Err(stop_err) = started.stop(self.shutdown_grace).await {
                        warn!(service = started.name(), error = %stop_err, "rollback stop failed");
                    }
                }
                return Err(err);
            }
        }
        info!(services = self.services.len(), "🚀 Background services started");
        Ok(())
    }

    /// Stop every engine, in reverse start order. Each gets the full grace period.
    pub async fn shutdown(&self) -> AppResult<()> {
        let mut failed = Vec::new();
        for service in self.services.iter().rev() {
            if let Err(err) = service.stop(self.shutdown_grace).await {
                error!(service = service.name(), error = %err, "service did not stop cleanly");
                failed.push(err);
            }
        }

        match failed.len() {
            0 => {
                info!("✅ Background services stopped");
                Ok(())
            }
            1 => Err(failed.remove(0)),
            n => Err(AppError::Internal(format!(
                "{} services did not stop cleanly: {}",
                n,
                failed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            ))),
        }
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.name())
    }
}

async fn initialize_stores(
    config: &AppConfig,
) -> AppResult<(Arc<dyn GasBankStore>, Arc<dyn OracleStore>)> {
    match config.database_url() {
        Some(url) => {
            let store = Arc::new(PgStore::connect(url, config.database_max_connections).await?);
            store.migrate().await?;
            let gas_store: Arc<dyn GasBankStore> = store.clone();
            Ok((gas_store, store))
        }
        None => {
            warn!("⚠️  database_url not set - using in-memory store, state is lost on restart");
            let store = Arc::new(MemoryStore::new());
            let gas_store: Arc<dyn GasBankStore> = store.clone();
            Ok((gas_store, store))
        }
    }
}

fn http_resolver(
    config: &AppConfig,
    endpoint: &str,
    token: &Option<String>,
) -> AppResult<HttpResolver> {
    HttpResolver::new(endpoint, token.clone(), config.resolver_timeout())
}

pub async fn initialize(config: &AppConfig) -> AppResult<App> {
    info!("Initializing settlement components ...");

    let (gas_store, oracle_store) = initialize_stores(config).await?;

    let gasbank = Arc::new(
        GasBankService::new(gas_store).with_pending_batch(config.pending_batch_size),
    );
    let oracle = Arc::new(
        OracleService::new(oracle_store).with_pending_batch(config.pending_batch_size),
    );

    let mut services: Vec<Arc<dyn BackgroundService>> = Vec::new();

    if config.gasbank.enabled {
        let settings = &config.gasbank;
        let resolver: Arc<dyn Resolver<GasTransaction>> = match settings.resolver_endpoint() {
            Some(endpoint) => {
                info!(endpoint, "✅ Withdrawals resolved by HTTP status endpoint");
                Arc::new(http_resolver(config, endpoint, &settings.resolver_token)?)
            }
            None => {
                info!(
                    timeout_secs = settings.confirmation_timeout_secs,
                    "✅ Withdrawals resolved by confirmation timeout"
                );
                Arc::new(TimeoutResolver::new(settings.confirmation_timeout()))
            }
        };
        services.push(Arc::new(WithdrawalSettlement::engine(
            gasbank.clone(),
            resolver,
            settings.poll_interval(),
        )));
    } else {
        warn!("⚠️  Gas bank settlement disabled by configuration");
    }

    if config.oracle.enabled {
        let settings = &config.oracle;
        let resolver: Option<Arc<dyn Resolver<OracleRequest>>> = match settings.resolver_endpoint()
        {
            Some(endpoint) => {
                info!(endpoint, "✅ Oracle requests resolved by HTTP runner");
                Some(Arc::new(http_resolver(config, endpoint, &settings.resolver_token)?))
            }
            None => None,
        };
        services.push(Arc::new(OracleDispatch::engine(
            oracle.clone(),
            resolver,
            settings.poll_interval(),
        )));
    } else {
        warn!("⚠️  Oracle dispatcher disabled by configuration");
    }

    info!(services = services.len(), "✅ Settlement components initialized");

    Ok(App {
        gasbank,
        oracle,
        services,
        shutdown_grace: config.shutdown_grace(),
    })
}
