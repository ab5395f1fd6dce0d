// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

//! Ledger Store: the only layer that touches persisted rows.
//!
//! Every method is one logical unit of work. Multi-row writes
//! (`issue_payout`, `add_bank_account`, `upsert_goal`, `deduct_gift_card`,
//! points movements) are atomic in every backend.

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    BankAccount, DailyEarning, Earning, EarningBreakdown, EarningGoal, EarningTotals,
    FrequentRoute, GiftCard, GiftCardTransaction, Payout, PayoutMethod, PayoutStatus,
    PointsTransaction, PointsTransactionType, Ride, RideStatus, RiderLoyalty, RiderStats,
};
use crate::period::DateRange;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("serialization failure persisted after {0} attempts")]
    RetriesExhausted(u32),
}

/// Sums plus the per-type net/count split for one driver and range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSummary {
    pub totals: EarningTotals,
    pub by_type: Vec<EarningBreakdown>,
}

/// Everything a payout row needs except what the store derives from the
/// earnings it consumes (`amount`, `earning_count`, `status`).
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayout {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub currency: String,
    pub method: PayoutMethod,
    pub bank_account_id: Option<Uuid>,
    pub reference: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Ledger row written alongside a successful gift-card deduction.
#[derive(Debug, Clone, PartialEq)]
pub struct GiftCardUsage {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub ride_id: Option<Uuid>,
    pub description: String,
    pub at: DateTime<Utc>,
}

/// A points credit or debit; `points` is the magnitude.
#[derive(Debug, Clone, PartialEq)]
pub struct PointsMovement {
    pub transaction_id: Uuid,
    pub rider_id: Uuid,
    pub transaction_type: PointsTransactionType,
    pub points: i64,
    pub source_id: Option<Uuid>,
    pub description: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RideFilter {
    pub range: Option<DateRange>,
    pub status: Option<RideStatus>,
}

#[async_trait]
pub trait EarningStore: Send + Sync {
    /// Fails with `Conflict` on a duplicate id.
    async fn append_earning(&self, earning: &Earning) -> StoreResult<()>;

    /// Newest first, with the unpaged row count.
    async fn list_earnings(
        &self,
        driver_id: Uuid,
        range: DateRange,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<Earning>, i64)>;

    async fn summarize(&self, driver_id: Uuid, range: DateRange) -> StoreResult<LedgerSummary>;

    /// One row per local calendar day with at least one earning, oldest first.
    async fn daily_rollup(
        &self,
        driver_id: Uuid,
        range: DateRange,
        zone: FixedOffset,
    ) -> StoreResult<Vec<DailyEarning>>;

    /// Sum of net over unpaid rows; zero when there are none.
    async fn unpaid_total(&self, driver_id: Uuid) -> StoreResult<BigDecimal>;

    async fn earnings_for_payout(&self, payout_id: Uuid) -> StoreResult<Vec<Earning>>;
}

#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Atomically inserts a `pending` payout and marks every unpaid earning of
    /// the driver created at or before `cutoff` as paid by it. `amount` and
    /// `earning_count` are the sum and count of exactly those rows. Fails with
    /// `Conflict` when no row is left to mark.
    ///
    /// The cutoff is inclusive (`created_at <= cutoff`): callers pass the
    /// payout's own creation instant, and an earning stamped at that same
    /// instant is paid by it rather than left for the next payout.
    async fn issue_payout(&self, payout: NewPayout, cutoff: DateTime<Utc>) -> StoreResult<Payout>;

    async fn get_payout(&self, id: Uuid) -> StoreResult<Payout>;

    async fn list_payouts(
        &self,
        driver_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<Payout>, i64)>;

    /// Moves a payout from `from` to `to` only if it is still in `from`;
    /// stamps `processed_at` when `to` is terminal.
    async fn update_payout_status(
        &self,
        id: Uuid,
        from: PayoutStatus,
        to: PayoutStatus,
        failure_reason: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Payout>;
}

#[async_trait]
pub trait BankAccountStore: Send + Sync {
    /// When `account.is_primary`, clears the flag on the driver's other
    /// accounts in the same unit of work.
    async fn add_bank_account(&self, account: &BankAccount) -> StoreResult<BankAccount>;

    async fn list_bank_accounts(&self, driver_id: Uuid) -> StoreResult<Vec<BankAccount>>;

    async fn get_bank_account(&self, id: Uuid) -> StoreResult<BankAccount>;

    async fn primary_bank_account(&self, driver_id: Uuid) -> StoreResult<Option<BankAccount>>;

    async fn delete_bank_account(&self, id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait GoalStore: Send + Sync {
    /// Updates the active goal for `(driver, period)` in place, or inserts
    /// `candidate` when there is none.
    async fn upsert_goal(&self, candidate: &EarningGoal) -> StoreResult<EarningGoal>;

    async fn active_goals(&self, driver_id: Uuid) -> StoreResult<Vec<EarningGoal>>;

    async fn get_goal(&self, id: Uuid) -> StoreResult<EarningGoal>;

    /// `current_amount += delta`, floored at zero.
    async fn bump_goal_progress(
        &self,
        goal_id: Uuid,
        delta: &BigDecimal,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn deactivate_goal(&self, goal_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
}

#[async_trait]
pub trait GiftCardStore: Send + Sync {
    async fn create_gift_card(&self, card: &GiftCard) -> StoreResult<()>;

    async fn get_gift_card(&self, id: Uuid) -> StoreResult<GiftCard>;

    async fn find_gift_card_by_code(&self, code: &str) -> StoreResult<Option<GiftCard>>;

    /// Sets the recipient only if the card is still unclaimed.
    async fn claim_gift_card(
        &self,
        card_id: Uuid,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<GiftCard>;

    /// All cards the holder has claimed, oldest first.
    async fn list_gift_cards(&self, holder_id: Uuid) -> StoreResult<Vec<GiftCard>>;

    /// Active cards with a positive balance, oldest first.
    async fn active_gift_cards(&self, holder_id: Uuid) -> StoreResult<Vec<GiftCard>>;

    /// Compare-and-swap deduction: applies only while the card is active and
    /// holds at least `amount`, flipping it to `redeemed` when the balance
    /// reaches zero, and records the matching transaction. `None` when the
    /// precondition no longer held.
    async fn deduct_gift_card(
        &self,
        card_id: Uuid,
        amount: &BigDecimal,
        usage: GiftCardUsage,
    ) -> StoreResult<Option<GiftCardTransaction>>;

    async fn gift_card_transactions(&self, card_id: Uuid) -> StoreResult<Vec<GiftCardTransaction>>;
}

#[async_trait]
pub trait LoyaltyStore: Send + Sync {
    async fn loyalty_account(&self, rider_id: Uuid) -> StoreResult<Option<RiderLoyalty>>;

    /// Adds points (creating the account on first use) and appends the ledger row.
    async fn credit_points(&self, movement: PointsMovement) -> StoreResult<PointsTransaction>;

    /// Removes points only while `available_points >= movement.points`.
    async fn debit_points(&self, movement: PointsMovement)
        -> StoreResult<Option<PointsTransaction>>;

    async fn points_history(
        &self,
        rider_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<PointsTransaction>, i64)>;
}

#[async_trait]
pub trait RideStore: Send + Sync {
    async fn get_ride(&self, id: Uuid) -> StoreResult<Ride>;

    /// Rides requested by the rider, newest first.
    async fn list_rides(
        &self,
        rider_id: Uuid,
        filter: RideFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<Ride>, i64)>;

    async fn rider_stats(
        &self,
        rider_id: Uuid,
        range: DateRange,
        period: &str,
    ) -> StoreResult<RiderStats>;

    /// Completed `(pickup, dropoff)` pairs seen at least twice, most used first.
    async fn frequent_routes(&self, rider_id: Uuid, limit: i64) -> StoreResult<Vec<FrequentRoute>>;
}

/// The full ledger surface the services are written against.
#[async_trait]
pub trait LedgerStore:
    EarningStore + PayoutStore + BankAccountStore + GoalStore + GiftCardStore + LoyaltyStore + RideStore
{
    async fn ping(&self) -> StoreResult<()>;
}
