// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use deadpool::Runtime;
use diesel::{Connection, PgConnection};
use diesel_async::{
    pooled_connection::{AsyncDieselConnectionManager, PoolError},
    AsyncPgConnection,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

pub type DbPool = deadpool::managed::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;
pub type DbConnection = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;
pub type DbPoolError = deadpool::managed::PoolError<PoolError>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Connection pool for the ledger database
pub struct Database {
    pool: DbPool,
    url: String,
}

impl Database {
    /// Create the pool, check connectivity and apply pending migrations
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.url);

        let pool = DbPool::builder(manager)
            .max_size(config.max_connections)
            .runtime(Runtime::Tokio1)
            .build()
            .context("failed to build database pool")?;

        let db = Self {
            pool,
            url: config.url.clone(),
        };
        db.initialize().await?;

        Ok(db)
    }

    async fn initialize(&self) -> Result<()> {
        let _conn = self.get_connection().await?;
        info!("Successfully connected to the database");

        self.run_migrations().await?;

        Ok(())
    }

    /// Migrations use a blocking connection, so they run off the async workers
    async fn run_migrations(&self) -> Result<()> {
        let url = self.url.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = PgConnection::establish(&url)?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| anyhow::anyhow!("failed to apply migrations: {e}"))?;
            Ok(())
        })
        .await??;
        info!("Database migrations applied successfully");

        Ok(())
    }

    pub async fn get_connection(&self) -> Result<DbConnection, DbPoolError> {
        self.pool.get().await
    }

    pub fn get_pool(&self) -> &DbPool {
        &self.pool
    }
}
