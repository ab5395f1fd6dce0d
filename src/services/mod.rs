// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

//! Business rules over the ledger store. Handlers stay thin; everything that
//! validates, coordinates rows or talks to collaborators lives here.

pub mod earnings;
pub mod gift_cards;
pub mod loyalty;
pub mod ride_history;

pub use earnings::EarningsService;
pub use gift_cards::GiftCardService;
pub use loyalty::LoyaltyService;
pub use ride_history::RideHistoryService;

use chrono::{DateTime, FixedOffset};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::notify::Notifier;
use crate::period::{self, DateRange};
use crate::store::LedgerStore;

/// Collaborators shared by every service.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn LedgerStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Arc<Metrics>,
}

impl ServiceContext {
    pub fn local_now(&self, zone: FixedOffset) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(&zone)
    }

    pub fn resolve_period(&self, label: &str, zone: FixedOffset) -> AppResult<DateRange> {
        Ok(period::resolve_label(label, &self.local_now(zone))?)
    }
}

pub(crate) fn require(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}
