// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use bigdecimal::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::ServiceContext;
use crate::error::{AppError, AppResult};
use crate::models::{
    LoyaltyTier, Page, PageRequest, PointsTransaction, PointsTransactionType, RideStatus,
    RiderLoyalty,
};
use crate::store::{LedgerStore, PointsMovement};

/// Points earned per whole unit of fare.
pub const POINTS_PER_FARE_UNIT: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct LoyaltyStatus {
    #[serde(flatten)]
    pub account: RiderLoyalty,
    pub next_tier: Option<LoyaltyTier>,
    pub points_to_next_tier: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemPointsRequest {
    pub points: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwardPointsRequest {
    pub ride_id: Uuid,
}

/// Lifetime points needed to reach the tier after `tier`.
pub fn next_tier(tier: LoyaltyTier) -> Option<(LoyaltyTier, i64)> {
    match tier {
        LoyaltyTier::Bronze => Some((LoyaltyTier::Silver, 1_000)),
        LoyaltyTier::Silver => Some((LoyaltyTier::Gold, 5_000)),
        LoyaltyTier::Gold => Some((LoyaltyTier::Platinum, 15_000)),
        LoyaltyTier::Platinum => None,
    }
}

pub struct LoyaltyService {
    ctx: ServiceContext,
}

impl LoyaltyService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn store(&self) -> &dyn LedgerStore {
        self.ctx.store.as_ref()
    }

    pub async fn status(&self, rider_id: Uuid) -> AppResult<LoyaltyStatus> {
        let account = self
            .store()
            .loyalty_account(rider_id)
            .await?
            .unwrap_or_else(|| RiderLoyalty::empty(rider_id, self.ctx.clock.now()));
        let next = next_tier(account.tier);
        Ok(LoyaltyStatus {
            next_tier: next.map(|(tier, _)| tier),
            points_to_next_tier: next.map(|(_, at)| (at - account.lifetime_points).max(0)),
            account,
        })
    }

    /// Credits the rider of a completed ride once per ride.
    pub async fn award_for_ride(&self, request: AwardPointsRequest) -> AppResult<PointsTransaction> {
        let ride = self.store().get_ride(request.ride_id).await?;
        if ride.status != RideStatus::Completed {
            return Err(AppError::bad_request("points are only awarded for completed rides"));
        }
        // with_scale(0) truncates, which is floor for a non-negative fare
        let points = ride
            .total_fare
            .with_scale(0)
            .to_i64()
            .unwrap_or_default()
            * POINTS_PER_FARE_UNIT;
        if points <= 0 {
            return Err(AppError::bad_request("ride fare earns no points"));
        }

        let transaction = self
            .store()
            .credit_points(PointsMovement {
                transaction_id: Uuid::new_v4(),
                rider_id: ride.rider_id,
                transaction_type: PointsTransactionType::Earn,
                points,
                source_id: Some(ride.id),
                description: format!("Ride {}", ride.id),
                at: self.ctx.clock.now(),
            })
            .await?;
        self.ctx
            .metrics
            .points_movements
            .with_label_values(&[PointsTransactionType::Earn.as_str()])
            .inc();
        info!("Awarded {} points to rider {} for ride {}", points, ride.rider_id, ride.id);
        Ok(transaction)
    }

    pub async fn redeem(&self, rider_id: Uuid, request: RedeemPointsRequest) -> AppResult<PointsTransaction> {
        if request.points <= 0 {
            return Err(AppError::bad_request("points must be greater than zero"));
        }
        let movement = PointsMovement {
            transaction_id: Uuid::new_v4(),
            rider_id,
            transaction_type: PointsTransactionType::Redeem,
            points: request.points,
            source_id: None,
            description: request
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "Points redeemed".to_string()),
            at: self.ctx.clock.now(),
        };

        match self.store().debit_points(movement).await? {
            Some(transaction) => {
                self.ctx
                    .metrics
                    .points_movements
                    .with_label_values(&[PointsTransactionType::Redeem.as_str()])
                    .inc();
                info!("Rider {} redeemed {} points", rider_id, request.points);
                Ok(transaction)
            }
            None => {
                let available = self
                    .store()
                    .loyalty_account(rider_id)
                    .await?
                    .map(|a| a.available_points)
                    .unwrap_or(0);
                Err(AppError::bad_request(format!(
                    "insufficient points: {} requested, {} available",
                    request.points, available
                )))
            }
        }
    }

    pub async fn history(&self, rider_id: Uuid, page: PageRequest) -> AppResult<Page<PointsTransaction>> {
        let (rows, total) = self
            .store()
            .points_history(rider_id, page.limit(), page.offset())
            .await?;
        Ok(Page::new(rows, total, page))
    }
}
