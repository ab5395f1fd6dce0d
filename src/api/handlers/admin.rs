// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

//! Operator endpoints; every route requires the admin role.

use axum::{extract::State, response::Response};
use tracing::info;
use uuid::Uuid;

use crate::api::routes::{created, ok, with_deadline, ApiJson, ApiPath};
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::services::earnings::{BonusRequest, PayoutStatusUpdate};
use crate::services::loyalty::AwardPointsRequest;

pub async fn bonus(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<BonusRequest>,
) -> AppResult<Response> {
    user.require_admin()?;
    info!("Admin {} awarding bonus to driver {}", user.id, request.driver_id);
    let earning = with_deadline(&state, state.earnings.record_bonus(request)).await?;
    Ok(created(earning))
}

pub async fn update_payout_status(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(payout_id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<PayoutStatusUpdate>,
) -> AppResult<Response> {
    user.require_admin()?;
    let payout = with_deadline(&state, state.earnings.update_payout_status(payout_id, update)).await?;
    Ok(ok(payout))
}

pub async fn award_points(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<AwardPointsRequest>,
) -> AppResult<Response> {
    user.require_admin()?;
    let transaction = with_deadline(&state, state.loyalty.award_for_ride(request)).await?;
    Ok(created(transaction))
}
