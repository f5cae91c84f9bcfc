mod audit;
mod config;
mod dynamodb;
mod http;
mod ids;
mod locks;
mod store;
#[cfg(test)]
mod testing;
mod users;
mod utils;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::anyhow;

use audit::AuditSink;
use config::{config, StoreKind, COOKIE_SECRET_ENV_VAR};
use locks::{HandoverCoordinator, LeaseManager, LockSettings, Reconciler};
use store::{DynamoStore, LockStore, MemoryStore};
use users::{DynamoUserDirectory, StaticUserDirectory, UserDirectory};
use utils::time::{Clock, SystemClock};

/// Everything the HTTP handlers need. Built once in `main` and shared by every worker.
pub struct BackendService {
    pub leases: LeaseManager,
    pub handover: HandoverCoordinator,
    pub audit: AuditSink,
    pub users: Arc<dyn UserDirectory>,
}

impl BackendService {
    pub fn new(
        store: Arc<dyn LockStore>,
        clock: Arc<dyn Clock>,
        settings: LockSettings,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let audit = AuditSink::new(store.clone(), clock.clone());
        let leases = LeaseManager::new(store.clone(), audit.clone(), clock, settings);
        let handover = HandoverCoordinator::new(store, leases.clone(), audit.clone());
        Self {
            leases,
            handover,
            audit,
            users,
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = config();
    simple_logger::SimpleLogger::new()
        .with_level(config.log_level)
        .init()?;

    let cookie_secret = std::env::var(COOKIE_SECRET_ENV_VAR)
        .map_err(|_| anyhow!("Could not find environment var {}", COOKIE_SECRET_ENV_VAR))?;
    if cookie_secret.len() < 32 {
        return Err(anyhow!("{} must be at least 32 bytes", COOKIE_SECRET_ENV_VAR));
    }

    let (store, users): (Arc<dyn LockStore>, Arc<dyn UserDirectory>) = match config.store {
        StoreKind::DynamoDb => {
            let dynamodb_client = dynamodb::create_dynamodb_client(
                &config.dynamodb_region,
                config.dynamodb_endpoint.as_deref(),
            )?;
            log::info!(
                "Using DynamoDB tables with prefix \"{}\"",
                &config.dynamodb_env
            );
            (
                Arc::new(DynamoStore::new(
                    dynamodb_client.clone(),
                    &config.dynamodb_env,
                )),
                Arc::new(DynamoUserDirectory::new(
                    dynamodb_client,
                    &config.dynamodb_env,
                )),
            )
        }
        StoreKind::Memory => {
            log::warn!("Using the in-memory store. Locks do not survive a restart.");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(StaticUserDirectory::default()),
            )
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = BackendService::new(store.clone(), clock, config.lock_settings(), users);
    let reconciler = Arc::new(Reconciler::new(
        store,
        service.leases.clone(),
        service.handover.clone(),
        Duration::from_secs(config.reconcile_interval_secs),
    ));
    let reconciler_handle = Reconciler::start(reconciler.clone());

    let service = web::Data::new(service);
    let cookie_secure = config.cookie_secure;
    log::info!("Starting HTTP server on port {}", config.http_port);
    HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .wrap(http::create_cookie_session(
                cookie_secret.as_bytes(),
                cookie_secure,
            ))
            .configure(http::api::configure)
    })
    .bind(("0.0.0.0", config.http_port))?
    .run()
    .await?;

    reconciler.stop();
    reconciler_handle.await?;
    Ok(())
}
