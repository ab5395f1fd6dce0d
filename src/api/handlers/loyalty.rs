// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use axum::{extract::State, response::Response};

use crate::api::routes::{created, ok, with_deadline, ApiJson, ApiQuery, PageQuery};
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::services::loyalty::RedeemPointsRequest;

pub async fn status(State(state): State<AppState>, user: AuthUser) -> AppResult<Response> {
    let status = with_deadline(&state, state.loyalty.status(user.id)).await?;
    Ok(ok(status))
}

pub async fn history(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> AppResult<Response> {
    let page = with_deadline(&state, state.loyalty.history(user.id, query.page_request())).await?;
    Ok(ok(page))
}

pub async fn redeem(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<RedeemPointsRequest>,
) -> AppResult<Response> {
    let transaction = with_deadline(&state, state.loyalty.redeem(user.id, request)).await?;
    Ok(created(transaction))
}
