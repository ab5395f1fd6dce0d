// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{gift_card_transactions, gift_cards};

text_enum! {
    /// `redeemed` means the balance has been fully spent.
    pub enum GiftCardStatus {
        Active => "active",
        Redeemed => "redeemed",
        Expired => "expired",
        Cancelled => "cancelled",
    }
}

/// A prepaid balance. While active,
/// `remaining_amount == original_amount - sum(transactions.amount)`.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = gift_cards)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GiftCard {
    pub id: Uuid,
    pub code: String,
    pub purchaser_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub original_amount: BigDecimal,
    pub remaining_amount: BigDecimal,
    pub currency: String,
    pub status: GiftCardStatus,
    pub message: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GiftCard {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = gift_card_transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GiftCardTransaction {
    pub id: Uuid,
    pub card_id: Uuid,
    pub user_id: Uuid,
    pub ride_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
