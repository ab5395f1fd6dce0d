// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rideshare_earnings::api::{self, AppState};
use rideshare_earnings::auth::KeyProvider;
use rideshare_earnings::clock::SystemClock;
use rideshare_earnings::config::{Config, LogFormat, StorageBackend};
use rideshare_earnings::db::Database;
use rideshare_earnings::metrics::Metrics;
use rideshare_earnings::notify::LogNotifier;
use rideshare_earnings::services::ServiceContext;
use rideshare_earnings::store::{LedgerStore, MemoryLedgerStore, PgLedgerStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (also reads .env)
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rideshare_earnings=debug".into()),
    );
    match config.logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
    info!("Initialized configuration");

    let store: Arc<dyn LedgerStore> = match config.database.backend {
        StorageBackend::Postgres => {
            let db = Arc::new(Database::new(&config.database).await?);
            info!("Connected to database");
            Arc::new(PgLedgerStore::new(db))
        }
        StorageBackend::Memory => {
            warn!("Using the in-memory ledger; nothing survives a restart");
            Arc::new(MemoryLedgerStore::new())
        }
    };

    let ctx = ServiceContext {
        store,
        clock: Arc::new(SystemClock),
        notifier: Arc::new(LogNotifier),
        metrics: Arc::new(Metrics::new()?),
    };
    let keys = Arc::new(KeyProvider::new(&config.auth.keys));
    let state = AppState::new(ctx, &config.ledger, keys, config.server.request_timeout);

    api::start_api_server(state, &config.server).await?;

    info!("Rideshare earnings service shutdown complete");
    Ok(())
}
