// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

mod handlers;
mod routes;

pub use routes::{ApiResponse, UTC_OFFSET_HEADER};

use anyhow::Result;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use chrono::FixedOffset;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::KeyProvider;
use crate::clock::Clock;
use crate::config::{LedgerConfig, ServerConfig};
use crate::metrics::Metrics;
use crate::services::{
    EarningsService, GiftCardService, LoyaltyService, RideHistoryService, ServiceContext,
};
use crate::store::LedgerStore;

/// Everything a handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub earnings: Arc<EarningsService>,
    pub gift_cards: Arc<GiftCardService>,
    pub loyalty: Arc<LoyaltyService>,
    pub rides: Arc<RideHistoryService>,
    pub store: Arc<dyn LedgerStore>,
    pub keys: Arc<KeyProvider>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
    pub default_zone: FixedOffset,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        ctx: ServiceContext,
        ledger: &LedgerConfig,
        keys: Arc<KeyProvider>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            earnings: Arc::new(EarningsService::new(ctx.clone(), ledger)),
            gift_cards: Arc::new(GiftCardService::new(ctx.clone(), ledger.default_currency.clone())),
            loyalty: Arc::new(LoyaltyService::new(ctx.clone())),
            rides: Arc::new(RideHistoryService::new(ctx.clone())),
            store: ctx.store,
            keys,
            clock: ctx.clock,
            metrics: ctx.metrics,
            default_zone: ledger.default_utc_offset,
            request_timeout,
        }
    }
}

/// All routes, with tracing and optional CORS.
pub fn router(state: AppState, enable_cors: bool) -> Router {
    let app = Router::new()
        // General routes
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        // Earnings routes
        .route("/earnings/summary", get(handlers::earnings::summary))
        .route("/earnings/daily", get(handlers::earnings::daily))
        .route("/earnings/breakdown", get(handlers::earnings::breakdown))
        .route("/earnings/history", get(handlers::earnings::history))
        .route("/earnings/balance", get(handlers::earnings::balance))
        .route("/earnings/tips", post(handlers::earnings::tip))
        .route(
            "/earnings/payouts",
            post(handlers::earnings::request_payout).get(handlers::earnings::list_payouts),
        )
        .route("/earnings/payouts/:id", get(handlers::earnings::get_payout))
        .route(
            "/earnings/bank-accounts",
            post(handlers::earnings::add_bank_account).get(handlers::earnings::list_bank_accounts),
        )
        .route("/earnings/bank-accounts/:id", delete(handlers::earnings::delete_bank_account))
        .route(
            "/earnings/goals",
            post(handlers::earnings::set_goal).get(handlers::earnings::goals),
        )
        .route("/earnings/goals/:id", delete(handlers::earnings::delete_goal))
        // Admin routes
        .route("/admin/earnings/bonus", post(handlers::admin::bonus))
        .route(
            "/admin/earnings/payouts/:id/status",
            put(handlers::admin::update_payout_status),
        )
        .route("/admin/loyalty/award", post(handlers::admin::award_points))
        // Gift card routes
        .route(
            "/gift-cards",
            post(handlers::gift_cards::purchase).get(handlers::gift_cards::list),
        )
        .route("/gift-cards/redeem", post(handlers::gift_cards::redeem))
        .route("/gift-cards/balance", get(handlers::gift_cards::balance))
        .route("/gift-cards/apply", post(handlers::gift_cards::apply))
        .route("/gift-cards/:id/transactions", get(handlers::gift_cards::transactions))
        // Loyalty routes
        .route("/loyalty", get(handlers::loyalty::status))
        .route("/loyalty/points/history", get(handlers::loyalty::history))
        .route("/loyalty/points/redeem", post(handlers::loyalty::redeem))
        // Ride history routes
        .route("/rides/history", get(handlers::ride_history::history))
        .route("/rides/history/stats", get(handlers::ride_history::stats))
        .route(
            "/rides/history/frequent-routes",
            get(handlers::ride_history::frequent_routes),
        )
        .route("/rides/history/:id/receipt", get(handlers::ride_history::receipt))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        app
    }
}

/// Serves until Ctrl-C, then drains in-flight requests.
pub async fn start_api_server(state: AppState, config: &ServerConfig) -> Result<()> {
    let app = router(state, config.enable_cors);

    let addr = format!("{}:{}", config.host, config.port).parse::<SocketAddr>()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Starting API server on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("API server stopped");

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, initiating graceful shutdown"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await
        }
    }
}
