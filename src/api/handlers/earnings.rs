// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

//! Driver-facing earnings endpoints. Every route acts on the caller's own rows.

use axum::{extract::State, response::Response};
use serde_json::json;
use uuid::Uuid;

use crate::api::routes::{
    created, ok, with_deadline, ApiJson, ApiPath, ApiQuery, CallerZone, PageQuery, PeriodPageQuery,
    PeriodQuery,
};
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::services::earnings::{AddBankAccountRequest, PayoutRequest, SetGoalRequest, TipRequest};

pub async fn summary(
    State(state): State<AppState>,
    user: AuthUser,
    CallerZone(zone): CallerZone,
    ApiQuery(query): ApiQuery<PeriodQuery>,
) -> AppResult<Response> {
    let period = query.period_or("today");
    let summary = with_deadline(&state, state.earnings.summary(user.id, &period, zone)).await?;
    Ok(ok(summary))
}

pub async fn daily(
    State(state): State<AppState>,
    user: AuthUser,
    CallerZone(zone): CallerZone,
    ApiQuery(query): ApiQuery<PeriodQuery>,
) -> AppResult<Response> {
    let period = query.period_or("this_week");
    let daily = with_deadline(&state, state.earnings.daily(user.id, &period, zone)).await?;
    Ok(ok(daily))
}

pub async fn breakdown(
    State(state): State<AppState>,
    user: AuthUser,
    CallerZone(zone): CallerZone,
    ApiQuery(query): ApiQuery<PeriodQuery>,
) -> AppResult<Response> {
    let period = query.period_or("today");
    let breakdown = with_deadline(&state, state.earnings.breakdown(user.id, &period, zone)).await?;
    Ok(ok(breakdown))
}

pub async fn history(
    State(state): State<AppState>,
    user: AuthUser,
    CallerZone(zone): CallerZone,
    ApiQuery(query): ApiQuery<PeriodPageQuery>,
) -> AppResult<Response> {
    let period = query.period_or("this_month");
    let page = with_deadline(
        &state,
        state
            .earnings
            .history(user.id, &period, query.page_request(), zone),
    )
    .await?;
    Ok(ok(page))
}

pub async fn balance(State(state): State<AppState>, user: AuthUser) -> AppResult<Response> {
    let balance = with_deadline(&state, state.earnings.balance(user.id)).await?;
    Ok(ok(balance))
}

pub async fn tip(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<TipRequest>,
) -> AppResult<Response> {
    let earning = with_deadline(&state, state.earnings.record_tip(user.id, request)).await?;
    Ok(created(earning))
}

pub async fn request_payout(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<PayoutRequest>,
) -> AppResult<Response> {
    let payout = with_deadline(&state, state.earnings.request_payout(user.id, request)).await?;
    Ok(created(payout))
}

pub async fn list_payouts(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> AppResult<Response> {
    let page = with_deadline(
        &state,
        state.earnings.list_payouts(user.id, query.page_request()),
    )
    .await?;
    Ok(ok(page))
}

pub async fn get_payout(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(payout_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    let payout = with_deadline(&state, state.earnings.get_payout(user.id, payout_id)).await?;
    Ok(ok(payout))
}

pub async fn add_bank_account(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<AddBankAccountRequest>,
) -> AppResult<Response> {
    let account = with_deadline(&state, state.earnings.add_bank_account(user.id, request)).await?;
    Ok(created(account))
}

pub async fn list_bank_accounts(State(state): State<AppState>, user: AuthUser) -> AppResult<Response> {
    let accounts = with_deadline(&state, state.earnings.list_bank_accounts(user.id)).await?;
    Ok(ok(accounts))
}

pub async fn delete_bank_account(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(account_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    with_deadline(&state, state.earnings.delete_bank_account(user.id, account_id)).await?;
    Ok(ok(json!({ "id": account_id, "deleted": true })))
}

pub async fn set_goal(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<SetGoalRequest>,
) -> AppResult<Response> {
    let goal = with_deadline(&state, state.earnings.set_goal(user.id, request)).await?;
    Ok(created(goal))
}

pub async fn goals(
    State(state): State<AppState>,
    user: AuthUser,
    CallerZone(zone): CallerZone,
) -> AppResult<Response> {
    let goals = with_deadline(&state, state.earnings.goals(user.id, zone)).await?;
    Ok(ok(goals))
}

pub async fn delete_goal(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(goal_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    with_deadline(&state, state.earnings.delete_goal(user.id, goal_id)).await?;
    Ok(ok(json!({ "id": goal_id, "deleted": true })))
}
