// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::payouts;

text_enum! {
    pub enum PayoutMethod {
        BankTransfer => "bank_transfer",
        InstantPay => "instant_pay",
        Wallet => "wallet",
    }
}

text_enum! {
    /// `pending -> processing -> completed`, with `failed` reachable from
    /// either non-terminal state.
    pub enum PayoutStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

impl PayoutStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PayoutStatus::Completed | PayoutStatus::Failed)
    }

    pub fn can_transition_to(self, next: PayoutStatus) -> bool {
        use PayoutStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = payouts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Payout {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub method: PayoutMethod,
    pub status: PayoutStatus,
    pub bank_account_id: Option<Uuid>,
    pub reference: String,
    pub earning_count: i32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
