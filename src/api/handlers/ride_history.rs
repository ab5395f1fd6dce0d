// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use axum::{extract::State, response::Response};
use uuid::Uuid;

use crate::api::routes::{ok, with_deadline, ApiPath, ApiQuery, CallerZone, HistoryQuery, PeriodQuery};
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::AppResult;

pub async fn history(
    State(state): State<AppState>,
    user: AuthUser,
    CallerZone(zone): CallerZone,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> AppResult<Response> {
    let period = query.period_or("this_month");
    let page = with_deadline(
        &state,
        state
            .rides
            .history(user.id, &period, query.status, query.page_request(), zone),
    )
    .await?;
    Ok(ok(page))
}

pub async fn stats(
    State(state): State<AppState>,
    user: AuthUser,
    CallerZone(zone): CallerZone,
    ApiQuery(query): ApiQuery<PeriodQuery>,
) -> AppResult<Response> {
    let period = query.period_or("this_month");
    let stats = with_deadline(&state, state.rides.stats(user.id, &period, zone)).await?;
    Ok(ok(stats))
}

pub async fn frequent_routes(State(state): State<AppState>, user: AuthUser) -> AppResult<Response> {
    let routes = with_deadline(&state, state.rides.frequent_routes(user.id)).await?;
    Ok(ok(routes))
}

pub async fn receipt(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(ride_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    let receipt = with_deadline(&state, state.rides.receipt(user.id, ride_id)).await?;
    Ok(ok(receipt))
}
