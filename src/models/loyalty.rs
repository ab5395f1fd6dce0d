// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{points_transactions, rider_loyalty};

text_enum! {
    pub enum PointsTransactionType {
        Earn => "earn",
        Redeem => "redeem",
        Bonus => "bonus",
        Adjustment => "adjustment",
    }
}

text_enum! {
    pub enum LoyaltyTier {
        Bronze => "bronze",
        Silver => "silver",
        Gold => "gold",
        Platinum => "platinum",
    }
}

impl LoyaltyTier {
    pub fn for_lifetime_points(points: i64) -> Self {
        match points {
            p if p >= 15_000 => LoyaltyTier::Platinum,
            p if p >= 5_000 => LoyaltyTier::Gold,
            p if p >= 1_000 => LoyaltyTier::Silver,
            _ => LoyaltyTier::Bronze,
        }
    }
}

/// Balance view over a rider's points ledger:
/// `available_points == sum(points_transactions.points)`.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = rider_loyalty)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RiderLoyalty {
    pub rider_id: Uuid,
    pub available_points: i64,
    pub lifetime_points: i64,
    pub tier: LoyaltyTier,
    pub updated_at: DateTime<Utc>,
}

impl RiderLoyalty {
    pub fn empty(rider_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            rider_id,
            available_points: 0,
            lifetime_points: 0,
            tier: LoyaltyTier::Bronze,
            updated_at: now,
        }
    }
}

/// Signed ledger row; `points` is negative for redemptions.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = points_transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PointsTransaction {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub transaction_type: PointsTransactionType,
    pub points: i64,
    pub balance_after: i64,
    pub source_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_follow_lifetime_points() {
        assert_eq!(LoyaltyTier::for_lifetime_points(0), LoyaltyTier::Bronze);
        assert_eq!(LoyaltyTier::for_lifetime_points(999), LoyaltyTier::Bronze);
        assert_eq!(LoyaltyTier::for_lifetime_points(1_000), LoyaltyTier::Silver);
        assert_eq!(LoyaltyTier::for_lifetime_points(5_000), LoyaltyTier::Gold);
        assert_eq!(LoyaltyTier::for_lifetime_points(20_000), LoyaltyTier::Platinum);
    }
}
