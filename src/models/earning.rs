// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{cents, zero_cents};
use crate::schema::earnings;

text_enum! {
    /// Source of a driver credit.
    pub enum EarningType {
        RideFare => "ride_fare",
        Tip => "tip",
        Bonus => "bonus",
        Surge => "surge",
        Promo => "promo",
        Referral => "referral",
        Delivery => "delivery",
        WaitTime => "wait_time",
        Adjustment => "adjustment",
        CancellationFee => "cancellation_fee",
    }
}

/// A single recorded credit to a driver. Append-only apart from the
/// `(is_paid_out, payout_id)` pair, which flips once when a payout consumes it.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = earnings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Earning {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub ride_id: Option<Uuid>,
    pub delivery_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub earning_type: EarningType,
    pub gross_amount: BigDecimal,
    pub commission: BigDecimal,
    pub net_amount: BigDecimal,
    pub currency: String,
    pub description: String,
    pub is_paid_out: bool,
    pub payout_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Earning {
    /// Splits `gross` into `(commission, net)` at `rate`, rounding the
    /// commission to cents so that `net + commission == gross` exactly.
    pub fn split(gross: &BigDecimal, rate: &BigDecimal) -> (BigDecimal, BigDecimal) {
        let gross = cents(gross);
        let commission = cents(&(&gross * rate));
        let net = &gross - &commission;
        (commission, net)
    }
}

/// Gross/commission/net totals over a set of earnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningTotals {
    pub gross: BigDecimal,
    pub commission: BigDecimal,
    pub net: BigDecimal,
}

impl Default for EarningTotals {
    fn default() -> Self {
        Self {
            gross: zero_cents(),
            commission: zero_cents(),
            net: zero_cents(),
        }
    }
}

/// Net amount and row count for one earning type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningBreakdown {
    #[serde(rename = "type")]
    pub earning_type: EarningType,
    pub amount: BigDecimal,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsSummary {
    pub period: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub gross_earnings: BigDecimal,
    pub commission: BigDecimal,
    pub net_earnings: BigDecimal,
    pub tips: BigDecimal,
    pub bonuses: BigDecimal,
    pub ride_count: i64,
    pub delivery_count: i64,
    pub currency: String,
    pub breakdown: Vec<EarningBreakdown>,
}

/// Earnings rolled up onto one calendar day in the caller's zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyEarning {
    pub date: NaiveDate,
    pub gross: BigDecimal,
    pub commission: BigDecimal,
    pub net: BigDecimal,
    pub count: i64,
}
