// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::earning_goals;

text_enum! {
    pub enum GoalPeriod {
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
    }
}

/// At most one active goal exists per `(driver_id, period)`.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = earning_goals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EarningGoal {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub target_amount: BigDecimal,
    pub period: GoalPeriod,
    pub current_amount: BigDecimal,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalProgress {
    pub goal: EarningGoal,
    pub current: BigDecimal,
    pub progress_pct: f64,
    pub remaining: BigDecimal,
    pub on_track: bool,
}
