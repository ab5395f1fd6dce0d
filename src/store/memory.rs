// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{
    BankAccountStore, EarningStore, GiftCardStore, GiftCardUsage, GoalStore, LedgerStore,
    LedgerSummary, LoyaltyStore, NewPayout, PayoutStore, PointsMovement, RideFilter, RideStore,
    StoreError, StoreResult,
};
use crate::models::{
    cents, zero_cents, BankAccount, DailyEarning, Earning, EarningGoal, FrequentRoute, GiftCard,
    GiftCardStatus, GiftCardTransaction, LoyaltyTier, Payout, PayoutStatus,
    PointsTransaction, PointsTransactionType, Ride, RiderLoyalty, RiderStats,
};
use crate::period::DateRange;
use crate::projections;

#[derive(Debug, Default)]
struct MemoryState {
    earnings: Vec<Earning>,
    payouts: HashMap<Uuid, Payout>,
    bank_accounts: Vec<BankAccount>,
    goals: Vec<EarningGoal>,
    gift_cards: Vec<GiftCard>,
    gift_card_transactions: Vec<GiftCardTransaction>,
    loyalty: HashMap<Uuid, RiderLoyalty>,
    points_transactions: Vec<PointsTransaction>,
    rides: HashMap<Uuid, Ride>,
}

/// In-process ledger with the same unit-of-work guarantees as the Postgres
/// store: every method runs under one lock, so multi-row writes are atomic
/// and the conditional updates behave as compare-and-swap.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call first waits `latency`, standing in for a
    /// database round-trip.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    async fn round_trip(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Rides are written by the dispatch side of the backend; this is the
    /// in-process equivalent of that insert.
    pub fn insert_ride(&self, ride: Ride) {
        self.state.lock().rides.insert(ride.id, ride);
    }
}

fn page<T: Clone>(rows: Vec<&T>, limit: i64, offset: i64) -> (Vec<T>, i64) {
    let total = rows.len() as i64;
    let items = rows
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .cloned()
        .collect();
    (items, total)
}

#[async_trait]
impl EarningStore for MemoryLedgerStore {
    async fn append_earning(&self, earning: &Earning) -> StoreResult<()> {
        self.round_trip().await;
        let mut state = self.state.lock();
        if state.earnings.iter().any(|e| e.id == earning.id) {
            return Err(StoreError::Conflict(format!("earning {} already exists", earning.id)));
        }
        state.earnings.push(earning.clone());
        Ok(())
    }

    async fn list_earnings(
        &self,
        driver_id: Uuid,
        range: DateRange,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<Earning>, i64)> {
        self.round_trip().await;
        let state = self.state.lock();
        let mut rows: Vec<&Earning> = state
            .earnings
            .iter()
            .filter(|e| e.driver_id == driver_id && range.contains(e.created_at))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, limit, offset))
    }

    async fn summarize(&self, driver_id: Uuid, range: DateRange) -> StoreResult<LedgerSummary> {
        self.round_trip().await;
        let state = self.state.lock();
        Ok(projections::summarize(
            state
                .earnings
                .iter()
                .filter(|e| e.driver_id == driver_id && range.contains(e.created_at)),
        ))
    }

    async fn daily_rollup(
        &self,
        driver_id: Uuid,
        range: DateRange,
        zone: FixedOffset,
    ) -> StoreResult<Vec<DailyEarning>> {
        self.round_trip().await;
        let state = self.state.lock();
        Ok(projections::rollup_daily(
            state
                .earnings
                .iter()
                .filter(|e| e.driver_id == driver_id && range.contains(e.created_at)),
            zone,
        ))
    }

    async fn unpaid_total(&self, driver_id: Uuid) -> StoreResult<BigDecimal> {
        self.round_trip().await;
        let state = self.state.lock();
        let total = state
            .earnings
            .iter()
            .filter(|e| e.driver_id == driver_id && !e.is_paid_out)
            .fold(zero_cents(), |acc, e| acc + &e.net_amount);
        Ok(cents(&total))
    }

    async fn earnings_for_payout(&self, payout_id: Uuid) -> StoreResult<Vec<Earning>> {
        self.round_trip().await;
        let state = self.state.lock();
        Ok(state
            .earnings
            .iter()
            .filter(|e| e.payout_id == Some(payout_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PayoutStore for MemoryLedgerStore {
    async fn issue_payout(&self, payout: NewPayout, cutoff: DateTime<Utc>) -> StoreResult<Payout> {
        self.round_trip().await;
        let mut state = self.state.lock();
        let consumed: Vec<usize> = state
            .earnings
            .iter()
            .enumerate()
            .filter(|(_, e)| e.driver_id == payout.driver_id && !e.is_paid_out && e.created_at <= cutoff)
            .map(|(idx, _)| idx)
            .collect();
        let amount = consumed
            .iter()
            .fold(zero_cents(), |acc, idx| acc + &state.earnings[*idx].net_amount);
        if consumed.is_empty() || amount <= BigDecimal::zero() {
            return Err(StoreError::Conflict(
                "no unpaid earnings left to pay out".to_string(),
            ));
        }

        for idx in &consumed {
            let earning = &mut state.earnings[*idx];
            earning.is_paid_out = true;
            earning.payout_id = Some(payout.id);
        }

        let row = Payout {
            id: payout.id,
            driver_id: payout.driver_id,
            amount: cents(&amount),
            currency: payout.currency,
            method: payout.method,
            status: PayoutStatus::Pending,
            bank_account_id: payout.bank_account_id,
            reference: payout.reference,
            earning_count: consumed.len() as i32,
            period_start: payout.period_start,
            period_end: payout.period_end,
            processed_at: None,
            failure_reason: None,
            created_at: payout.created_at,
            updated_at: payout.created_at,
        };
        state.payouts.insert(row.id, row.clone());
        debug!("Issued payout {} consuming {} earnings", row.id, row.earning_count);
        Ok(row)
    }

    async fn get_payout(&self, id: Uuid) -> StoreResult<Payout> {
        self.round_trip().await;
        self.state
            .lock()
            .payouts
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("payout"))
    }

    async fn list_payouts(
        &self,
        driver_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<Payout>, i64)> {
        self.round_trip().await;
        let state = self.state.lock();
        let mut rows: Vec<&Payout> = state
            .payouts
            .values()
            .filter(|p| p.driver_id == driver_id)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, limit, offset))
    }

    async fn update_payout_status(
        &self,
        id: Uuid,
        from: PayoutStatus,
        to: PayoutStatus,
        failure_reason: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Payout> {
        self.round_trip().await;
        let mut state = self.state.lock();
        let payout = state
            .payouts
            .get_mut(&id)
            .ok_or(StoreError::NotFound("payout"))?;
        if payout.status != from {
            return Err(StoreError::Conflict(format!(
                "payout {id} is {} not {from}",
                payout.status
            )));
        }
        payout.status = to;
        payout.updated_at = at;
        if to.is_terminal() {
            payout.processed_at = Some(at);
        }
        if failure_reason.is_some() {
            payout.failure_reason = failure_reason;
        }
        Ok(payout.clone())
    }
}

#[async_trait]
impl BankAccountStore for MemoryLedgerStore {
    async fn add_bank_account(&self, account: &BankAccount) -> StoreResult<BankAccount> {
        self.round_trip().await;
        let mut state = self.state.lock();
        if account.is_primary {
            for sibling in state
                .bank_accounts
                .iter_mut()
                .filter(|b| b.driver_id == account.driver_id)
            {
                sibling.is_primary = false;
                sibling.updated_at = account.created_at;
            }
        }
        state.bank_accounts.push(account.clone());
        Ok(account.clone())
    }

    async fn list_bank_accounts(&self, driver_id: Uuid) -> StoreResult<Vec<BankAccount>> {
        self.round_trip().await;
        let state = self.state.lock();
        let mut rows: Vec<BankAccount> = state
            .bank_accounts
            .iter()
            .filter(|b| b.driver_id == driver_id)
            .cloned()
            .collect();
        // primary first, then newest
        rows.sort_by(|a, b| {
            b.is_primary
                .cmp(&a.is_primary)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(rows)
    }

    async fn get_bank_account(&self, id: Uuid) -> StoreResult<BankAccount> {
        self.round_trip().await;
        self.state
            .lock()
            .bank_accounts
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(StoreError::NotFound("bank account"))
    }

    async fn primary_bank_account(&self, driver_id: Uuid) -> StoreResult<Option<BankAccount>> {
        self.round_trip().await;
        Ok(self
            .state
            .lock()
            .bank_accounts
            .iter()
            .find(|b| b.driver_id == driver_id && b.is_primary)
            .cloned())
    }

    async fn delete_bank_account(&self, id: Uuid) -> StoreResult<()> {
        self.round_trip().await;
        let mut state = self.state.lock();
        let before = state.bank_accounts.len();
        state.bank_accounts.retain(|b| b.id != id);
        if state.bank_accounts.len() == before {
            return Err(StoreError::NotFound("bank account"));
        }
        for payout in state.payouts.values_mut() {
            if payout.bank_account_id == Some(id) {
                payout.bank_account_id = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GoalStore for MemoryLedgerStore {
    async fn upsert_goal(&self, candidate: &EarningGoal) -> StoreResult<EarningGoal> {
        self.round_trip().await;
        let mut state = self.state.lock();
        if let Some(existing) = state.goals.iter_mut().find(|g| {
            g.driver_id == candidate.driver_id && g.period == candidate.period && g.is_active
        }) {
            existing.target_amount = candidate.target_amount.clone();
            existing.currency = candidate.currency.clone();
            existing.updated_at = candidate.updated_at;
            return Ok(existing.clone());
        }
        state.goals.push(candidate.clone());
        Ok(candidate.clone())
    }

    async fn active_goals(&self, driver_id: Uuid) -> StoreResult<Vec<EarningGoal>> {
        self.round_trip().await;
        Ok(self
            .state
            .lock()
            .goals
            .iter()
            .filter(|g| g.driver_id == driver_id && g.is_active)
            .cloned()
            .collect())
    }

    async fn get_goal(&self, id: Uuid) -> StoreResult<EarningGoal> {
        self.round_trip().await;
        self.state
            .lock()
            .goals
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or(StoreError::NotFound("earning goal"))
    }

    async fn bump_goal_progress(
        &self,
        goal_id: Uuid,
        delta: &BigDecimal,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.round_trip().await;
        let mut state = self.state.lock();
        let goal = state
            .goals
            .iter_mut()
            .find(|g| g.id == goal_id)
            .ok_or(StoreError::NotFound("earning goal"))?;
        let next = &goal.current_amount + delta;
        goal.current_amount = if next < BigDecimal::zero() {
            zero_cents()
        } else {
            cents(&next)
        };
        goal.updated_at = at;
        Ok(())
    }

    async fn deactivate_goal(&self, goal_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.round_trip().await;
        let mut state = self.state.lock();
        let goal = state
            .goals
            .iter_mut()
            .find(|g| g.id == goal_id)
            .ok_or(StoreError::NotFound("earning goal"))?;
        goal.is_active = false;
        goal.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl GiftCardStore for MemoryLedgerStore {
    async fn create_gift_card(&self, card: &GiftCard) -> StoreResult<()> {
        self.round_trip().await;
        let mut state = self.state.lock();
        if state.gift_cards.iter().any(|c| c.code == card.code || c.id == card.id) {
            return Err(StoreError::Conflict(format!("gift card {} already exists", card.code)));
        }
        state.gift_cards.push(card.clone());
        Ok(())
    }

    async fn get_gift_card(&self, id: Uuid) -> StoreResult<GiftCard> {
        self.round_trip().await;
        self.state
            .lock()
            .gift_cards
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(StoreError::NotFound("gift card"))
    }

    async fn find_gift_card_by_code(&self, code: &str) -> StoreResult<Option<GiftCard>> {
        self.round_trip().await;
        Ok(self
            .state
            .lock()
            .gift_cards
            .iter()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn claim_gift_card(
        &self,
        card_id: Uuid,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<GiftCard> {
        self.round_trip().await;
        let mut state = self.state.lock();
        let card = state
            .gift_cards
            .iter_mut()
            .find(|c| c.id == card_id)
            .ok_or(StoreError::NotFound("gift card"))?;
        if card.recipient_id.is_some() || card.status != GiftCardStatus::Active {
            return Err(StoreError::Conflict("gift card has already been claimed".to_string()));
        }
        card.recipient_id = Some(recipient_id);
        card.claimed_at = Some(at);
        card.updated_at = at;
        Ok(card.clone())
    }

    async fn list_gift_cards(&self, holder_id: Uuid) -> StoreResult<Vec<GiftCard>> {
        self.round_trip().await;
        Ok(self
            .state
            .lock()
            .gift_cards
            .iter()
            .filter(|c| c.recipient_id == Some(holder_id))
            .cloned()
            .collect())
    }

    async fn active_gift_cards(&self, holder_id: Uuid) -> StoreResult<Vec<GiftCard>> {
        self.round_trip().await;
        Ok(self
            .state
            .lock()
            .gift_cards
            .iter()
            .filter(|c| {
                c.recipient_id == Some(holder_id)
                    && c.status == GiftCardStatus::Active
                    && c.remaining_amount > BigDecimal::zero()
            })
            .cloned()
            .collect())
    }

    async fn deduct_gift_card(
        &self,
        card_id: Uuid,
        amount: &BigDecimal,
        usage: GiftCardUsage,
    ) -> StoreResult<Option<GiftCardTransaction>> {
        self.round_trip().await;
        let mut state = self.state.lock();
        let card = state
            .gift_cards
            .iter_mut()
            .find(|c| c.id == card_id)
            .ok_or(StoreError::NotFound("gift card"))?;
        if card.status != GiftCardStatus::Active || card.remaining_amount < *amount {
            return Ok(None);
        }

        let before = card.remaining_amount.clone();
        let after = cents(&(&before - amount));
        card.remaining_amount = after.clone();
        if after.is_zero() {
            card.status = GiftCardStatus::Redeemed;
        }
        card.updated_at = usage.at;

        let transaction = GiftCardTransaction {
            id: usage.transaction_id,
            card_id,
            user_id: usage.user_id,
            ride_id: usage.ride_id,
            amount: cents(amount),
            balance_before: before,
            balance_after: after,
            description: usage.description,
            created_at: usage.at,
        };
        state.gift_card_transactions.push(transaction.clone());
        Ok(Some(transaction))
    }

    async fn gift_card_transactions(&self, card_id: Uuid) -> StoreResult<Vec<GiftCardTransaction>> {
        self.round_trip().await;
        Ok(self
            .state
            .lock()
            .gift_card_transactions
            .iter()
            .filter(|t| t.card_id == card_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LoyaltyStore for MemoryLedgerStore {
    async fn loyalty_account(&self, rider_id: Uuid) -> StoreResult<Option<RiderLoyalty>> {
        self.round_trip().await;
        Ok(self.state.lock().loyalty.get(&rider_id).cloned())
    }

    async fn credit_points(&self, movement: PointsMovement) -> StoreResult<PointsTransaction> {
        self.round_trip().await;
        let mut state = self.state.lock();
        if movement.transaction_type == PointsTransactionType::Earn
            && movement.source_id.is_some()
            && state.points_transactions.iter().any(|t| {
                t.transaction_type == PointsTransactionType::Earn && t.source_id == movement.source_id
            })
        {
            return Err(StoreError::Conflict("points already earned for this source".to_string()));
        }
        let account = state
            .loyalty
            .entry(movement.rider_id)
            .or_insert_with(|| RiderLoyalty::empty(movement.rider_id, movement.at));
        account.available_points += movement.points;
        account.lifetime_points += movement.points;
        account.tier = LoyaltyTier::for_lifetime_points(account.lifetime_points);
        account.updated_at = movement.at;
        let balance_after = account.available_points;

        let transaction = PointsTransaction {
            id: movement.transaction_id,
            rider_id: movement.rider_id,
            transaction_type: movement.transaction_type,
            points: movement.points,
            balance_after,
            source_id: movement.source_id,
            description: movement.description,
            created_at: movement.at,
        };
        state.points_transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn debit_points(
        &self,
        movement: PointsMovement,
    ) -> StoreResult<Option<PointsTransaction>> {
        self.round_trip().await;
        let mut state = self.state.lock();
        let Some(account) = state.loyalty.get_mut(&movement.rider_id) else {
            return Ok(None);
        };
        if account.available_points < movement.points {
            return Ok(None);
        }
        account.available_points -= movement.points;
        account.updated_at = movement.at;
        let balance_after = account.available_points;

        let transaction = PointsTransaction {
            id: movement.transaction_id,
            rider_id: movement.rider_id,
            transaction_type: movement.transaction_type,
            points: -movement.points,
            balance_after,
            source_id: movement.source_id,
            description: movement.description,
            created_at: movement.at,
        };
        state.points_transactions.push(transaction.clone());
        Ok(Some(transaction))
    }

    async fn points_history(
        &self,
        rider_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<PointsTransaction>, i64)> {
        self.round_trip().await;
        let state = self.state.lock();
        let mut rows: Vec<&PointsTransaction> = state
            .points_transactions
            .iter()
            .filter(|t| t.rider_id == rider_id)
            .collect();
        rows.reverse();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, limit, offset))
    }
}

#[async_trait]
impl RideStore for MemoryLedgerStore {
    async fn get_ride(&self, id: Uuid) -> StoreResult<Ride> {
        self.round_trip().await;
        self.state
            .lock()
            .rides
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("ride"))
    }

    async fn list_rides(
        &self,
        rider_id: Uuid,
        filter: RideFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<Ride>, i64)> {
        self.round_trip().await;
        let state = self.state.lock();
        let mut rows: Vec<&Ride> = state
            .rides
            .values()
            .filter(|r| r.rider_id == rider_id)
            .filter(|r| filter.range.map_or(true, |range| range.contains(r.requested_at)))
            .filter(|r| filter.status.map_or(true, |status| r.status == status))
            .collect();
        rows.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(page(rows, limit, offset))
    }

    async fn rider_stats(
        &self,
        rider_id: Uuid,
        range: DateRange,
        period: &str,
    ) -> StoreResult<RiderStats> {
        self.round_trip().await;
        let state = self.state.lock();
        Ok(projections::rider_stats(
            state
                .rides
                .values()
                .filter(|r| r.rider_id == rider_id && range.contains(r.requested_at)),
            period,
        ))
    }

    async fn frequent_routes(&self, rider_id: Uuid, limit: i64) -> StoreResult<Vec<FrequentRoute>> {
        self.round_trip().await;
        let state = self.state.lock();
        Ok(projections::frequent_routes(
            state.rides.values().filter(|r| r.rider_id == rider_id),
            limit.max(0) as usize,
        ))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn ping(&self) -> StoreResult<()> {
        self.round_trip().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EarningType, GoalPeriod, PayoutMethod, PointsTransactionType, RideStatus};
    use crate::projections::fixtures::{completed_ride, dec};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap()
    }

    fn earning(driver_id: Uuid, net: &str, at: DateTime<Utc>) -> Earning {
        Earning {
            id: Uuid::new_v4(),
            driver_id,
            ride_id: None,
            delivery_id: None,
            earning_type: EarningType::RideFare,
            gross_amount: dec(net),
            commission: zero_cents(),
            net_amount: dec(net),
            currency: "USD".into(),
            description: "fare".into(),
            is_paid_out: false,
            payout_id: None,
            created_at: at,
        }
    }

    fn new_payout(driver_id: Uuid) -> NewPayout {
        NewPayout {
            id: Uuid::new_v4(),
            driver_id,
            currency: "USD".into(),
            method: PayoutMethod::BankTransfer,
            bank_account_id: None,
            reference: crate::reference::payout_reference(),
            period_start: t0() - Duration::days(7),
            period_end: t0(),
            created_at: t0(),
        }
    }

    fn card(holder: Uuid, amount: &str) -> GiftCard {
        GiftCard {
            id: Uuid::new_v4(),
            code: crate::reference::gift_card_code(),
            purchaser_id: Uuid::new_v4(),
            recipient_id: Some(holder),
            original_amount: dec(amount),
            remaining_amount: dec(amount),
            currency: "USD".into(),
            status: GiftCardStatus::Active,
            message: None,
            expires_at: None,
            claimed_at: Some(t0()),
            created_at: t0(),
            updated_at: t0(),
        }
    }

    fn usage(user_id: Uuid) -> GiftCardUsage {
        GiftCardUsage {
            transaction_id: Uuid::new_v4(),
            user_id,
            ride_id: None,
            description: "ride payment".into(),
            at: t0(),
        }
    }

    fn bank_account(driver_id: Uuid, primary: bool, at: DateTime<Utc>) -> BankAccount {
        BankAccount {
            id: Uuid::new_v4(),
            driver_id,
            bank_name: "First Bank".into(),
            account_holder: "Sam Driver".into(),
            account_number_encrypted: "opaque".into(),
            account_number_last4: "6789".into(),
            routing_number: None,
            iban: None,
            swift_code: None,
            currency: "USD".into(),
            is_primary: primary,
            is_verified: false,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn duplicate_earning_is_a_conflict() {
        let store = MemoryLedgerStore::new();
        let row = earning(Uuid::new_v4(), "10.00", t0());
        store.append_earning(&row).await.unwrap();
        assert!(matches!(
            store.append_earning(&row).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn payout_consumes_only_rows_before_cutoff() {
        let store = MemoryLedgerStore::new();
        let driver = Uuid::new_v4();
        store.append_earning(&earning(driver, "20.00", t0() - Duration::hours(2))).await.unwrap();
        store.append_earning(&earning(driver, "18.00", t0() - Duration::hours(1))).await.unwrap();
        store.append_earning(&earning(driver, "7.50", t0() + Duration::minutes(1))).await.unwrap();

        let payout = store.issue_payout(new_payout(driver), t0()).await.unwrap();
        assert_eq!(payout.amount, dec("38.00"));
        assert_eq!(payout.earning_count, 2);
        assert_eq!(payout.status, PayoutStatus::Pending);

        let consumed = store.earnings_for_payout(payout.id).await.unwrap();
        assert_eq!(consumed.len(), 2);
        assert!(consumed.iter().all(|e| e.is_paid_out));
        assert_eq!(store.unpaid_total(driver).await.unwrap(), dec("7.50"));

        // everything before the cutoff is already paid
        assert!(matches!(
            store.issue_payout(new_payout(driver), t0()).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn payout_cutoff_is_inclusive() {
        let store = MemoryLedgerStore::new();
        let driver = Uuid::new_v4();
        store.append_earning(&earning(driver, "9.00", t0())).await.unwrap();
        store
            .append_earning(&earning(driver, "4.00", t0() + Duration::milliseconds(1)))
            .await
            .unwrap();

        let payout = store.issue_payout(new_payout(driver), t0()).await.unwrap();
        assert_eq!(payout.amount, dec("9.00"));
        assert_eq!(payout.earning_count, 1);
        assert_eq!(store.unpaid_total(driver).await.unwrap(), dec("4.00"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_payouts_never_double_pay() {
        let store = Arc::new(MemoryLedgerStore::new());
        let driver = Uuid::new_v4();
        for _ in 0..5 {
            store.append_earning(&earning(driver, "10.00", t0() - Duration::hours(1))).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.issue_payout(new_payout(driver), t0()).await
            }));
        }
        let mut issued = Vec::new();
        for handle in handles {
            if let Ok(payout) = handle.await.unwrap() {
                issued.push(payout);
            }
        }
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].amount, dec("50.00"));
        assert_eq!(store.unpaid_total(driver).await.unwrap(), dec("0.00"));
    }

    #[tokio::test]
    async fn payout_status_is_compare_and_swap() {
        let store = MemoryLedgerStore::new();
        let driver = Uuid::new_v4();
        store.append_earning(&earning(driver, "12.00", t0() - Duration::hours(1))).await.unwrap();
        let payout = store.issue_payout(new_payout(driver), t0()).await.unwrap();

        let later = t0() + Duration::minutes(5);
        let processing = store
            .update_payout_status(payout.id, PayoutStatus::Pending, PayoutStatus::Processing, None, later)
            .await
            .unwrap();
        assert_eq!(processing.processed_at, None);

        let stale = store
            .update_payout_status(payout.id, PayoutStatus::Pending, PayoutStatus::Failed, None, later)
            .await;
        assert!(matches!(stale, Err(StoreError::Conflict(_))));

        let done = store
            .update_payout_status(payout.id, PayoutStatus::Processing, PayoutStatus::Completed, None, later)
            .await
            .unwrap();
        assert_eq!(done.processed_at, Some(later));
    }

    #[tokio::test]
    async fn new_primary_account_clears_siblings() {
        let store = MemoryLedgerStore::new();
        let driver = Uuid::new_v4();
        let account = |primary: bool, at: DateTime<Utc>| bank_account(driver, primary, at);
        let first = store.add_bank_account(&account(true, t0())).await.unwrap();
        let second = store
            .add_bank_account(&account(true, t0() + Duration::minutes(1)))
            .await
            .unwrap();

        let accounts = store.list_bank_accounts(driver).await.unwrap();
        assert_eq!(accounts.iter().filter(|a| a.is_primary).count(), 1);
        assert_eq!(accounts[0].id, second.id);
        assert_eq!(
            store.primary_bank_account(driver).await.unwrap().map(|a| a.id),
            Some(second.id)
        );

        store.delete_bank_account(first.id).await.unwrap();
        assert!(matches!(
            store.delete_bank_account(first.id).await,
            Err(StoreError::NotFound("bank account"))
        ));
    }

    #[tokio::test]
    async fn goal_upsert_keeps_progress_and_floors_at_zero() {
        let store = MemoryLedgerStore::new();
        let driver = Uuid::new_v4();
        let goal = EarningGoal {
            id: Uuid::new_v4(),
            driver_id: driver,
            target_amount: dec("500.00"),
            period: GoalPeriod::Weekly,
            current_amount: zero_cents(),
            currency: "USD".into(),
            is_active: true,
            created_at: t0(),
            updated_at: t0(),
        };
        store.upsert_goal(&goal).await.unwrap();
        store.bump_goal_progress(goal.id, &dec("120.00"), t0()).await.unwrap();

        let replacement = EarningGoal {
            id: Uuid::new_v4(),
            target_amount: dec("700.00"),
            ..goal.clone()
        };
        let kept = store.upsert_goal(&replacement).await.unwrap();
        assert_eq!(kept.id, goal.id);
        assert_eq!(kept.target_amount, dec("700.00"));
        assert_eq!(kept.current_amount, dec("120.00"));
        assert_eq!(store.active_goals(driver).await.unwrap().len(), 1);

        store.bump_goal_progress(goal.id, &dec("-500.00"), t0()).await.unwrap();
        assert_eq!(store.get_goal(goal.id).await.unwrap().current_amount, dec("0.00"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_primary_accounts_leave_one_primary() {
        let store = Arc::new(MemoryLedgerStore::new());
        let driver = Uuid::new_v4();
        let add = |store: Arc<MemoryLedgerStore>, offset: i64| {
            tokio::spawn(async move {
                store
                    .add_bank_account(&bank_account(driver, true, t0() + Duration::seconds(offset)))
                    .await
            })
        };
        let (a, b, c) = tokio::join!(
            add(store.clone(), 0),
            add(store.clone(), 1),
            add(store.clone(), 2)
        );
        for added in [a, b, c] {
            added.unwrap().unwrap();
        }

        let accounts = store.list_bank_accounts(driver).await.unwrap();
        assert_eq!(accounts.len(), 3);
        assert_eq!(accounts.iter().filter(|a| a.is_primary).count(), 1);
        assert!(store.primary_bank_account(driver).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn one_active_goal_per_driver_and_period() {
        let store = MemoryLedgerStore::new();
        let driver = Uuid::new_v4();
        let goal = |period: GoalPeriod, target: &str| EarningGoal {
            id: Uuid::new_v4(),
            driver_id: driver,
            target_amount: dec(target),
            period,
            current_amount: zero_cents(),
            currency: "USD".into(),
            is_active: true,
            created_at: t0(),
            updated_at: t0(),
        };

        let weekly = store.upsert_goal(&goal(GoalPeriod::Weekly, "700.00")).await.unwrap();
        store.upsert_goal(&goal(GoalPeriod::Daily, "100.00")).await.unwrap();
        store.upsert_goal(&goal(GoalPeriod::Weekly, "800.00")).await.unwrap();

        let active = store.active_goals(driver).await.unwrap();
        assert_eq!(active.len(), 2);
        let weeklies: Vec<_> = active.iter().filter(|g| g.period == GoalPeriod::Weekly).collect();
        assert_eq!(weeklies.len(), 1);
        assert_eq!(weeklies[0].id, weekly.id);
        assert_eq!(weeklies[0].target_amount, dec("800.00"));

        // a deactivated goal frees its period for a fresh row
        store.deactivate_goal(weekly.id, t0()).await.unwrap();
        let fresh = store.upsert_goal(&goal(GoalPeriod::Weekly, "650.00")).await.unwrap();
        assert_ne!(fresh.id, weekly.id);
        let active = store.active_goals(driver).await.unwrap();
        assert_eq!(active.iter().filter(|g| g.period == GoalPeriod::Weekly).count(), 1);
        assert!(!store.get_goal(weekly.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn gift_card_deduction_flips_to_redeemed_at_zero() {
        let store = MemoryLedgerStore::new();
        let holder = Uuid::new_v4();
        let gift = card(holder, "25.00");
        store.create_gift_card(&gift).await.unwrap();

        let first = store
            .deduct_gift_card(gift.id, &dec("10.00"), usage(holder))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.balance_before, dec("25.00"));
        assert_eq!(first.balance_after, dec("15.00"));

        // more than the balance leaves the card untouched
        assert!(store
            .deduct_gift_card(gift.id, &dec("20.00"), usage(holder))
            .await
            .unwrap()
            .is_none());

        store
            .deduct_gift_card(gift.id, &dec("15.00"), usage(holder))
            .await
            .unwrap()
            .unwrap();
        let spent = store.get_gift_card(gift.id).await.unwrap();
        assert_eq!(spent.status, GiftCardStatus::Redeemed);
        assert!(store.active_gift_cards(holder).await.unwrap().is_empty());

        let ledger = store.gift_card_transactions(gift.id).await.unwrap();
        let spent_total = ledger.iter().fold(zero_cents(), |acc, t| acc + &t.amount);
        assert_eq!(spent_total, spent.original_amount);
    }

    #[tokio::test]
    async fn claimed_card_cannot_be_claimed_again() {
        let store = MemoryLedgerStore::new();
        let mut gift = card(Uuid::new_v4(), "50.00");
        gift.recipient_id = None;
        gift.claimed_at = None;
        store.create_gift_card(&gift).await.unwrap();

        let rider = Uuid::new_v4();
        let claimed = store.claim_gift_card(gift.id, rider, t0()).await.unwrap();
        assert_eq!(claimed.recipient_id, Some(rider));
        assert!(matches!(
            store.claim_gift_card(gift.id, Uuid::new_v4(), t0()).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(
            store.find_gift_card_by_code(&gift.code).await.unwrap().map(|c| c.id),
            Some(gift.id)
        );
    }

    #[tokio::test]
    async fn points_debit_requires_balance() {
        let store = MemoryLedgerStore::new();
        let rider = Uuid::new_v4();
        let movement = |kind, points| PointsMovement {
            transaction_id: Uuid::new_v4(),
            rider_id: rider,
            transaction_type: kind,
            points,
            source_id: None,
            description: "test".into(),
            at: t0(),
        };

        assert!(store
            .debit_points(movement(PointsTransactionType::Redeem, 10))
            .await
            .unwrap()
            .is_none());

        let credit = store
            .credit_points(movement(PointsTransactionType::Earn, 1_200))
            .await
            .unwrap();
        assert_eq!(credit.balance_after, 1_200);

        let debit = store
            .debit_points(movement(PointsTransactionType::Redeem, 500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(debit.points, -500);
        assert_eq!(debit.balance_after, 700);

        let account = store.loyalty_account(rider).await.unwrap().unwrap();
        assert_eq!(account.available_points, 700);
        assert_eq!(account.lifetime_points, 1_200);
        assert_eq!(account.tier, LoyaltyTier::Silver);

        let (history, total) = store.points_history(rider, 10, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(history.iter().map(|t| t.points).sum::<i64>(), 700);
    }

    #[tokio::test]
    async fn rides_filter_by_status_and_range() {
        let store = MemoryLedgerStore::new();
        let rider = Uuid::new_v4();
        let ride = completed_ride(rider, Uuid::new_v4());
        let mut cancelled = completed_ride(rider, Uuid::new_v4());
        cancelled.status = RideStatus::Cancelled;
        cancelled.requested_at = ride.requested_at + Duration::hours(1);
        store.insert_ride(ride.clone());
        store.insert_ride(cancelled.clone());
        store.insert_ride(completed_ride(Uuid::new_v4(), Uuid::new_v4()));

        let (all, total) = store.list_rides(rider, RideFilter::default(), 10, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(all[0].id, cancelled.id);

        let filter = RideFilter {
            range: None,
            status: Some(RideStatus::Completed),
        };
        let (completed, _) = store.list_rides(rider, filter, 10, 0).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, ride.id);

        assert!(matches!(
            store.get_ride(Uuid::new_v4()).await,
            Err(StoreError::NotFound("ride"))
        ));
    }
}
