// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use axum::{extract::State, response::Response};
use serde_json::json;
use uuid::Uuid;

use crate::api::routes::{created, ok, with_deadline, ApiJson, ApiPath};
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::services::gift_cards::{
    ApplyGiftCardRequest, PurchaseGiftCardRequest, RedeemGiftCardRequest,
};

pub async fn purchase(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<PurchaseGiftCardRequest>,
) -> AppResult<Response> {
    let card = with_deadline(&state, state.gift_cards.purchase(user.id, request)).await?;
    Ok(created(card))
}

pub async fn redeem(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<RedeemGiftCardRequest>,
) -> AppResult<Response> {
    let card = with_deadline(&state, state.gift_cards.redeem(user.id, request)).await?;
    Ok(ok(card))
}

pub async fn list(State(state): State<AppState>, user: AuthUser) -> AppResult<Response> {
    let cards = with_deadline(&state, state.gift_cards.list(user.id)).await?;
    Ok(ok(json!({ "count": cards.len(), "cards": cards })))
}

pub async fn balance(State(state): State<AppState>, user: AuthUser) -> AppResult<Response> {
    let balance = with_deadline(&state, state.gift_cards.balance(user.id)).await?;
    Ok(ok(balance))
}

pub async fn apply(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<ApplyGiftCardRequest>,
) -> AppResult<Response> {
    let application = with_deadline(&state, state.gift_cards.apply(user.id, request)).await?;
    Ok(ok(application))
}

pub async fn transactions(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(card_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    let transactions = with_deadline(&state, state.gift_cards.transactions(user.id, card_id)).await?;
    Ok(ok(transactions))
}
