// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use chrono::FixedOffset;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::ServiceContext;
use crate::error::{AppError, AppResult};
use crate::models::{FrequentRoute, Page, PageRequest, Receipt, Ride, RideStatus, RiderStats};
use crate::projections::build_receipt;
use crate::reference;
use crate::store::{LedgerStore, RideFilter};

const FREQUENT_ROUTE_LIMIT: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct FrequentRoutes {
    pub routes: Vec<FrequentRoute>,
    pub count: usize,
}

/// Read-only projections over a rider's trips.
pub struct RideHistoryService {
    ctx: ServiceContext,
}

impl RideHistoryService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn store(&self) -> &dyn LedgerStore {
        self.ctx.store.as_ref()
    }

    /// Visible to the ride's rider and its assigned driver.
    pub async fn receipt(&self, caller: Uuid, ride_id: Uuid) -> AppResult<Receipt> {
        let ride = self.store().get_ride(ride_id).await?;
        if ride.rider_id != caller && ride.driver_id != Some(caller) {
            return Err(AppError::forbidden("you are not part of this ride"));
        }
        if ride.status != RideStatus::Completed {
            return Err(AppError::bad_request(format!(
                "receipt is only available for completed rides, ride is {}",
                ride.status
            )));
        }
        debug!("Building receipt for ride {}", ride.id);
        Ok(build_receipt(&ride, reference::receipt_id()))
    }

    pub async fn stats(&self, rider_id: Uuid, period: &str, zone: FixedOffset) -> AppResult<RiderStats> {
        let range = self.ctx.resolve_period(period, zone)?;
        Ok(self.store().rider_stats(rider_id, range, period).await?)
    }

    pub async fn frequent_routes(&self, rider_id: Uuid) -> AppResult<FrequentRoutes> {
        let routes = self
            .store()
            .frequent_routes(rider_id, FREQUENT_ROUTE_LIMIT)
            .await?;
        Ok(FrequentRoutes {
            count: routes.len(),
            routes,
        })
    }

    pub async fn history(
        &self,
        rider_id: Uuid,
        period: &str,
        status: Option<RideStatus>,
        page: PageRequest,
        zone: FixedOffset,
    ) -> AppResult<Page<Ride>> {
        let filter = RideFilter {
            range: Some(self.ctx.resolve_period(period, zone)?),
            status,
        };
        let (rows, total) = self
            .store()
            .list_rides(rider_id, filter, page.limit(), page.offset())
            .await?;
        Ok(Page::new(rows, total, page))
    }
}
