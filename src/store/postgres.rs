// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, FixedOffset, Utc};
use diesel::dsl::{count_star, sum};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{BigInt, Numeric, Text, Timestamptz};
use diesel_async::scoped_futures::{ScopedBoxFuture, ScopedFutureExt};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    BankAccountStore, EarningStore, GiftCardStore, GiftCardUsage, GoalStore, LedgerStore,
    LedgerSummary, LoyaltyStore, NewPayout, PayoutStore, PointsMovement, RideFilter, RideStore,
    StoreError, StoreResult,
};
use crate::db::{Database, DbPoolError};
use crate::models::{
    cents, zero_cents, BankAccount, DailyEarning, Earning, EarningBreakdown, EarningGoal,
    EarningTotals, EarningType, FrequentRoute, GiftCard, GiftCardStatus, GiftCardTransaction,
    LoyaltyTier, Payout, PayoutStatus, PointsTransaction, Ride, RideStatus,
    RiderLoyalty, RiderStats,
};
use crate::period::DateRange;
use crate::projections;
use crate::schema::{
    bank_accounts, earning_goals, earnings, gift_card_transactions, gift_cards,
    points_transactions, rider_loyalty, rides,
};

/// Attempts per unit of work before a serialization failure is surfaced.
const SERIALIZABLE_ATTEMPTS: u32 = 3;

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict(info.message().to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<DbPoolError> for StoreError {
    fn from(err: DbPoolError) -> Self {
        StoreError::Pool(err.to_string())
    }
}

/// Outcome of one attempt inside a serializable transaction.
#[derive(Debug)]
enum TxError {
    Retry,
    Store(StoreError),
}

impl From<DieselError> for TxError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => TxError::Retry,
            other => TxError::Store(other.into()),
        }
    }
}

impl From<StoreError> for TxError {
    fn from(err: StoreError) -> Self {
        TxError::Store(err)
    }
}

#[derive(QueryableByName)]
struct RouteRow {
    #[diesel(sql_type = Text)]
    pickup_address: String,
    #[diesel(sql_type = Text)]
    dropoff_address: String,
    #[diesel(sql_type = BigInt)]
    ride_count: i64,
    #[diesel(sql_type = Numeric)]
    average_fare: BigDecimal,
    #[diesel(sql_type = Timestamptz)]
    last_ride_at: DateTime<Utc>,
}

/// Ledger store backed by PostgreSQL through the shared connection pool.
pub struct PgLedgerStore {
    db: Arc<Database>,
}

impl PgLedgerStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Runs `op` in a SERIALIZABLE transaction, retrying serialization
    /// failures up to [`SERIALIZABLE_ATTEMPTS`] times.
    async fn serializable<'a, T, F>(&self, op: F) -> StoreResult<T>
    where
        F: for<'r> Fn(&'r mut AsyncPgConnection) -> ScopedBoxFuture<'a, 'r, Result<T, TxError>>
            + Send
            + Sync
            + 'a,
        T: Send + 'a,
    {
        let mut conn = self.db.get_connection().await?;
        for attempt in 1..=SERIALIZABLE_ATTEMPTS {
            let outcome = conn
                .build_transaction()
                .serializable()
                .run(|conn| op(conn))
                .await;
            match outcome {
                Ok(value) => return Ok(value),
                Err(TxError::Retry) => {
                    warn!("Serialization failure on attempt {}, retrying", attempt);
                }
                Err(TxError::Store(err)) => return Err(err),
            }
        }
        Err(StoreError::RetriesExhausted(SERIALIZABLE_ATTEMPTS))
    }

    async fn earnings_in_range(&self, driver_id: Uuid, range: DateRange) -> StoreResult<Vec<Earning>> {
        let mut conn = self.db.get_connection().await?;
        let rows = earnings::table
            .filter(earnings::driver_id.eq(driver_id))
            .filter(earnings::created_at.ge(range.from))
            .filter(earnings::created_at.lt(range.to))
            .order(earnings::created_at.asc())
            .select(Earning::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl EarningStore for PgLedgerStore {
    async fn append_earning(&self, earning: &Earning) -> StoreResult<()> {
        let mut conn = self.db.get_connection().await?;
        diesel::insert_into(earnings::table)
            .values(earning)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_earnings(
        &self,
        driver_id: Uuid,
        range: DateRange,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<Earning>, i64)> {
        let mut conn = self.db.get_connection().await?;
        let query = earnings::table
            .filter(earnings::driver_id.eq(driver_id))
            .filter(earnings::created_at.ge(range.from))
            .filter(earnings::created_at.lt(range.to));

        let total = query.clone().count().get_result::<i64>(&mut conn).await?;
        let rows = query
            .order((earnings::created_at.desc(), earnings::id.asc()))
            .limit(limit)
            .offset(offset)
            .select(Earning::as_select())
            .load(&mut conn)
            .await?;
        Ok((rows, total))
    }

    async fn summarize(&self, driver_id: Uuid, range: DateRange) -> StoreResult<LedgerSummary> {
        let mut conn = self.db.get_connection().await?;
        let groups: Vec<(
            EarningType,
            Option<BigDecimal>,
            Option<BigDecimal>,
            Option<BigDecimal>,
            i64,
        )> = earnings::table
            .filter(earnings::driver_id.eq(driver_id))
            .filter(earnings::created_at.ge(range.from))
            .filter(earnings::created_at.lt(range.to))
            .group_by(earnings::earning_type)
            .select((
                earnings::earning_type,
                sum(earnings::gross_amount),
                sum(earnings::commission),
                sum(earnings::net_amount),
                count_star(),
            ))
            .load(&mut conn)
            .await?;

        let mut totals = EarningTotals::default();
        let mut by_type = Vec::with_capacity(groups.len());
        for (earning_type, gross, commission, net, count) in groups {
            let net = cents(&net.unwrap_or_default());
            totals.gross += cents(&gross.unwrap_or_default());
            totals.commission += cents(&commission.unwrap_or_default());
            totals.net += &net;
            by_type.push(EarningBreakdown {
                earning_type,
                amount: net,
                count,
            });
        }
        Ok(LedgerSummary {
            totals,
            by_type: projections::sort_breakdown(by_type),
        })
    }

    async fn daily_rollup(
        &self,
        driver_id: Uuid,
        range: DateRange,
        zone: FixedOffset,
    ) -> StoreResult<Vec<DailyEarning>> {
        let rows = self.earnings_in_range(driver_id, range).await?;
        Ok(projections::rollup_daily(&rows, zone))
    }

    async fn unpaid_total(&self, driver_id: Uuid) -> StoreResult<BigDecimal> {
        let mut conn = self.db.get_connection().await?;
        let total: Option<BigDecimal> = earnings::table
            .filter(earnings::driver_id.eq(driver_id))
            .filter(earnings::is_paid_out.eq(false))
            .select(sum(earnings::net_amount))
            .get_result(&mut conn)
            .await?;
        Ok(total.map(|t| cents(&t)).unwrap_or_else(zero_cents))
    }

    async fn earnings_for_payout(&self, payout_id: Uuid) -> StoreResult<Vec<Earning>> {
        let mut conn = self.db.get_connection().await?;
        let rows = earnings::table
            .filter(earnings::payout_id.eq(payout_id))
            .order(earnings::created_at.asc())
            .select(Earning::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl PayoutStore for PgLedgerStore {
    async fn issue_payout(&self, payout: NewPayout, cutoff: DateTime<Utc>) -> StoreResult<Payout> {
        use crate::schema::payouts;

        let payout = &payout;
        let issued = self
            .serializable(move |conn| {
                async move {
                    let unpaid = earnings::table
                        .filter(earnings::driver_id.eq(payout.driver_id))
                        .filter(earnings::is_paid_out.eq(false))
                        .filter(earnings::created_at.le(cutoff));

                    let (amount, count): (Option<BigDecimal>, i64) = unpaid
                        .clone()
                        .select((sum(earnings::net_amount), count_star()))
                        .get_result(conn)
                        .await?;
                    let amount = cents(&amount.unwrap_or_default());
                    if count == 0 || amount <= BigDecimal::zero() {
                        return Err(StoreError::Conflict(
                            "no unpaid earnings left to pay out".to_string(),
                        )
                        .into());
                    }

                    let row = Payout {
                        id: payout.id,
                        driver_id: payout.driver_id,
                        amount,
                        currency: payout.currency.clone(),
                        method: payout.method,
                        status: PayoutStatus::Pending,
                        bank_account_id: payout.bank_account_id,
                        reference: payout.reference.clone(),
                        earning_count: count as i32,
                        period_start: payout.period_start,
                        period_end: payout.period_end,
                        processed_at: None,
                        failure_reason: None,
                        created_at: payout.created_at,
                        updated_at: payout.created_at,
                    };
                    diesel::insert_into(payouts::table)
                        .values(&row)
                        .execute(conn)
                        .await?;

                    let marked = diesel::update(unpaid)
                        .set((
                            earnings::is_paid_out.eq(true),
                            earnings::payout_id.eq(Some(payout.id)),
                        ))
                        .execute(conn)
                        .await?;
                    if marked as i64 != count {
                        return Err(StoreError::Conflict(
                            "unpaid earnings changed while issuing payout".to_string(),
                        )
                        .into());
                    }
                    Ok(row)
                }
                .scope_boxed()
            })
            .await?;

        debug!("Issued payout {} consuming {} earnings", issued.id, issued.earning_count);
        Ok(issued)
    }

    async fn get_payout(&self, id: Uuid) -> StoreResult<Payout> {
        use crate::schema::payouts;

        let mut conn = self.db.get_connection().await?;
        payouts::table
            .find(id)
            .select(Payout::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or(StoreError::NotFound("payout"))
    }

    async fn list_payouts(
        &self,
        driver_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<Payout>, i64)> {
        use crate::schema::payouts;

        let mut conn = self.db.get_connection().await?;
        let query = payouts::table.filter(payouts::driver_id.eq(driver_id));
        let total = query.clone().count().get_result::<i64>(&mut conn).await?;
        let rows = query
            .order(payouts::created_at.desc())
            .limit(limit)
            .offset(offset)
            .select(Payout::as_select())
            .load(&mut conn)
            .await?;
        Ok((rows, total))
    }

    async fn update_payout_status(
        &self,
        id: Uuid,
        from: PayoutStatus,
        to: PayoutStatus,
        failure_reason: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Payout> {
        use crate::schema::payouts;

        let mut conn = self.db.get_connection().await?;
        let processed_at = to.is_terminal().then_some(at);
        let updated = diesel::update(
            payouts::table
                .filter(payouts::id.eq(id))
                .filter(payouts::status.eq(from)),
        )
        .set((
            payouts::status.eq(to),
            payouts::processed_at.eq(processed_at),
            payouts::failure_reason.eq(failure_reason),
            payouts::updated_at.eq(at),
        ))
        .returning(Payout::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;

        match updated {
            Some(payout) => Ok(payout),
            None => {
                let current = self.get_payout(id).await?;
                Err(StoreError::Conflict(format!(
                    "payout {id} is {} not {from}",
                    current.status
                )))
            }
        }
    }
}

#[async_trait]
impl BankAccountStore for PgLedgerStore {
    async fn add_bank_account(&self, account: &BankAccount) -> StoreResult<BankAccount> {
        self.serializable(move |conn| {
            async move {
                if account.is_primary {
                    diesel::update(
                        bank_accounts::table
                            .filter(bank_accounts::driver_id.eq(account.driver_id))
                            .filter(bank_accounts::is_primary.eq(true)),
                    )
                    .set((
                        bank_accounts::is_primary.eq(false),
                        bank_accounts::updated_at.eq(account.created_at),
                    ))
                    .execute(conn)
                    .await?;
                }
                let row = diesel::insert_into(bank_accounts::table)
                    .values(account)
                    .returning(BankAccount::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(row)
            }
            .scope_boxed()
        })
        .await
    }

    async fn list_bank_accounts(&self, driver_id: Uuid) -> StoreResult<Vec<BankAccount>> {
        let mut conn = self.db.get_connection().await?;
        let rows = bank_accounts::table
            .filter(bank_accounts::driver_id.eq(driver_id))
            .order((bank_accounts::is_primary.desc(), bank_accounts::created_at.desc()))
            .select(BankAccount::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn get_bank_account(&self, id: Uuid) -> StoreResult<BankAccount> {
        let mut conn = self.db.get_connection().await?;
        bank_accounts::table
            .find(id)
            .select(BankAccount::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or(StoreError::NotFound("bank account"))
    }

    async fn primary_bank_account(&self, driver_id: Uuid) -> StoreResult<Option<BankAccount>> {
        let mut conn = self.db.get_connection().await?;
        let row = bank_accounts::table
            .filter(bank_accounts::driver_id.eq(driver_id))
            .filter(bank_accounts::is_primary.eq(true))
            .select(BankAccount::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    async fn delete_bank_account(&self, id: Uuid) -> StoreResult<()> {
        let mut conn = self.db.get_connection().await?;
        let deleted = diesel::delete(bank_accounts::table.find(id))
            .execute(&mut conn)
            .await?;
        if deleted == 0 {
            return Err(StoreError::NotFound("bank account"));
        }
        Ok(())
    }
}

#[async_trait]
impl GoalStore for PgLedgerStore {
    async fn upsert_goal(&self, candidate: &EarningGoal) -> StoreResult<EarningGoal> {
        self.serializable(move |conn| {
            async move {
                let existing = earning_goals::table
                    .filter(earning_goals::driver_id.eq(candidate.driver_id))
                    .filter(earning_goals::period.eq(candidate.period))
                    .filter(earning_goals::is_active.eq(true))
                    .select(earning_goals::id)
                    .first::<Uuid>(conn)
                    .await
                    .optional()?;

                let row = match existing {
                    Some(goal_id) => {
                        diesel::update(earning_goals::table.find(goal_id))
                            .set((
                                earning_goals::target_amount.eq(&candidate.target_amount),
                                earning_goals::currency.eq(&candidate.currency),
                                earning_goals::updated_at.eq(candidate.updated_at),
                            ))
                            .returning(EarningGoal::as_returning())
                            .get_result(conn)
                            .await?
                    }
                    None => {
                        diesel::insert_into(earning_goals::table)
                            .values(candidate)
                            .returning(EarningGoal::as_returning())
                            .get_result(conn)
                            .await?
                    }
                };
                Ok(row)
            }
            .scope_boxed()
        })
        .await
    }

    async fn active_goals(&self, driver_id: Uuid) -> StoreResult<Vec<EarningGoal>> {
        let mut conn = self.db.get_connection().await?;
        let rows = earning_goals::table
            .filter(earning_goals::driver_id.eq(driver_id))
            .filter(earning_goals::is_active.eq(true))
            .order(earning_goals::created_at.asc())
            .select(EarningGoal::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn get_goal(&self, id: Uuid) -> StoreResult<EarningGoal> {
        let mut conn = self.db.get_connection().await?;
        earning_goals::table
            .find(id)
            .select(EarningGoal::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or(StoreError::NotFound("earning goal"))
    }

    async fn bump_goal_progress(
        &self,
        goal_id: Uuid,
        delta: &BigDecimal,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut conn = self.db.get_connection().await?;
        let updated = diesel::sql_query(
            "UPDATE earning_goals \
             SET current_amount = GREATEST(ROUND(current_amount + $1, 2), 0), updated_at = $2 \
             WHERE id = $3",
        )
        .bind::<Numeric, _>(delta)
        .bind::<Timestamptz, _>(at)
        .bind::<diesel::sql_types::Uuid, _>(goal_id)
        .execute(&mut conn)
        .await?;
        if updated == 0 {
            return Err(StoreError::NotFound("earning goal"));
        }
        Ok(())
    }

    async fn deactivate_goal(&self, goal_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut conn = self.db.get_connection().await?;
        let updated = diesel::update(earning_goals::table.find(goal_id))
            .set((
                earning_goals::is_active.eq(false),
                earning_goals::updated_at.eq(at),
            ))
            .execute(&mut conn)
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound("earning goal"));
        }
        Ok(())
    }
}

#[async_trait]
impl GiftCardStore for PgLedgerStore {
    async fn create_gift_card(&self, card: &GiftCard) -> StoreResult<()> {
        let mut conn = self.db.get_connection().await?;
        diesel::insert_into(gift_cards::table)
            .values(card)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_gift_card(&self, id: Uuid) -> StoreResult<GiftCard> {
        let mut conn = self.db.get_connection().await?;
        gift_cards::table
            .find(id)
            .select(GiftCard::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or(StoreError::NotFound("gift card"))
    }

    async fn find_gift_card_by_code(&self, code: &str) -> StoreResult<Option<GiftCard>> {
        let mut conn = self.db.get_connection().await?;
        let row = gift_cards::table
            .filter(gift_cards::code.eq(code))
            .select(GiftCard::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    async fn claim_gift_card(
        &self,
        card_id: Uuid,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<GiftCard> {
        let mut conn = self.db.get_connection().await?;
        let claimed = diesel::update(
            gift_cards::table
                .filter(gift_cards::id.eq(card_id))
                .filter(gift_cards::recipient_id.is_null())
                .filter(gift_cards::status.eq(GiftCardStatus::Active)),
        )
        .set((
            gift_cards::recipient_id.eq(Some(recipient_id)),
            gift_cards::claimed_at.eq(Some(at)),
            gift_cards::updated_at.eq(at),
        ))
        .returning(GiftCard::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;

        match claimed {
            Some(card) => Ok(card),
            None => {
                // distinguishes a lost race from an unknown card
                self.get_gift_card(card_id).await?;
                Err(StoreError::Conflict("gift card has already been claimed".to_string()))
            }
        }
    }

    async fn list_gift_cards(&self, holder_id: Uuid) -> StoreResult<Vec<GiftCard>> {
        let mut conn = self.db.get_connection().await?;
        let rows = gift_cards::table
            .filter(gift_cards::recipient_id.eq(holder_id))
            .order((gift_cards::created_at.asc(), gift_cards::id.asc()))
            .select(GiftCard::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn active_gift_cards(&self, holder_id: Uuid) -> StoreResult<Vec<GiftCard>> {
        let mut conn = self.db.get_connection().await?;
        let rows = gift_cards::table
            .filter(gift_cards::recipient_id.eq(holder_id))
            .filter(gift_cards::status.eq(GiftCardStatus::Active))
            .filter(gift_cards::remaining_amount.gt(BigDecimal::zero()))
            .order((gift_cards::created_at.asc(), gift_cards::id.asc()))
            .select(GiftCard::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn deduct_gift_card(
        &self,
        card_id: Uuid,
        amount: &BigDecimal,
        usage: GiftCardUsage,
    ) -> StoreResult<Option<GiftCardTransaction>> {
        let usage = &usage;
        let outcome = self
            .serializable(move |conn| {
                async move {
                    let updated = diesel::update(
                        gift_cards::table
                            .filter(gift_cards::id.eq(card_id))
                            .filter(gift_cards::status.eq(GiftCardStatus::Active))
                            .filter(gift_cards::remaining_amount.ge(amount)),
                    )
                    .set((
                        gift_cards::remaining_amount.eq(gift_cards::remaining_amount - amount),
                        gift_cards::updated_at.eq(usage.at),
                    ))
                    .returning(gift_cards::remaining_amount)
                    .get_result::<BigDecimal>(conn)
                    .await
                    .optional()?;

                    let Some(after) = updated else {
                        let exists = gift_cards::table
                            .find(card_id)
                            .count()
                            .get_result::<i64>(conn)
                            .await?;
                        if exists == 0 {
                            return Err(StoreError::NotFound("gift card").into());
                        }
                        return Ok(None);
                    };

                    let after = cents(&after);
                    if after.is_zero() {
                        diesel::update(gift_cards::table.find(card_id))
                            .set(gift_cards::status.eq(GiftCardStatus::Redeemed))
                            .execute(conn)
                            .await?;
                    }

                    let transaction = GiftCardTransaction {
                        id: usage.transaction_id,
                        card_id,
                        user_id: usage.user_id,
                        ride_id: usage.ride_id,
                        amount: cents(amount),
                        balance_before: cents(&(&after + amount)),
                        balance_after: after,
                        description: usage.description.clone(),
                        created_at: usage.at,
                    };
                    diesel::insert_into(gift_card_transactions::table)
                        .values(&transaction)
                        .execute(conn)
                        .await?;
                    Ok(Some(transaction))
                }
                .scope_boxed()
            })
            .await?;
        Ok(outcome)
    }

    async fn gift_card_transactions(&self, card_id: Uuid) -> StoreResult<Vec<GiftCardTransaction>> {
        let mut conn = self.db.get_connection().await?;
        let rows = gift_card_transactions::table
            .filter(gift_card_transactions::card_id.eq(card_id))
            .order(gift_card_transactions::created_at.asc())
            .select(GiftCardTransaction::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl LoyaltyStore for PgLedgerStore {
    async fn loyalty_account(&self, rider_id: Uuid) -> StoreResult<Option<RiderLoyalty>> {
        let mut conn = self.db.get_connection().await?;
        let row = rider_loyalty::table
            .find(rider_id)
            .select(RiderLoyalty::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    async fn credit_points(&self, movement: PointsMovement) -> StoreResult<PointsTransaction> {
        let movement = &movement;
        self.serializable(move |conn| {
            async move {
                let mut account = rider_loyalty::table
                    .find(movement.rider_id)
                    .select(RiderLoyalty::as_select())
                    .first(conn)
                    .await
                    .optional()?
                    .unwrap_or_else(|| RiderLoyalty::empty(movement.rider_id, movement.at));
                account.available_points += movement.points;
                account.lifetime_points += movement.points;
                account.tier = LoyaltyTier::for_lifetime_points(account.lifetime_points);
                account.updated_at = movement.at;

                diesel::insert_into(rider_loyalty::table)
                    .values(&account)
                    .on_conflict(rider_loyalty::rider_id)
                    .do_update()
                    .set((
                        rider_loyalty::available_points.eq(account.available_points),
                        rider_loyalty::lifetime_points.eq(account.lifetime_points),
                        rider_loyalty::tier.eq(account.tier),
                        rider_loyalty::updated_at.eq(account.updated_at),
                    ))
                    .execute(conn)
                    .await?;

                let transaction = PointsTransaction {
                    id: movement.transaction_id,
                    rider_id: movement.rider_id,
                    transaction_type: movement.transaction_type,
                    points: movement.points,
                    balance_after: account.available_points,
                    source_id: movement.source_id,
                    description: movement.description.clone(),
                    created_at: movement.at,
                };
                diesel::insert_into(points_transactions::table)
                    .values(&transaction)
                    .execute(conn)
                    .await?;
                Ok(transaction)
            }
            .scope_boxed()
        })
        .await
    }

    async fn debit_points(
        &self,
        movement: PointsMovement,
    ) -> StoreResult<Option<PointsTransaction>> {
        let movement = &movement;
        self.serializable(move |conn| {
            async move {
                let balance = diesel::update(
                    rider_loyalty::table
                        .filter(rider_loyalty::rider_id.eq(movement.rider_id))
                        .filter(rider_loyalty::available_points.ge(movement.points)),
                )
                .set((
                    rider_loyalty::available_points
                        .eq(rider_loyalty::available_points - movement.points),
                    rider_loyalty::updated_at.eq(movement.at),
                ))
                .returning(rider_loyalty::available_points)
                .get_result::<i64>(conn)
                .await
                .optional()?;

                let Some(balance_after) = balance else {
                    return Ok(None);
                };
                let transaction = PointsTransaction {
                    id: movement.transaction_id,
                    rider_id: movement.rider_id,
                    transaction_type: movement.transaction_type,
                    points: -movement.points,
                    balance_after,
                    source_id: movement.source_id,
                    description: movement.description.clone(),
                    created_at: movement.at,
                };
                diesel::insert_into(points_transactions::table)
                    .values(&transaction)
                    .execute(conn)
                    .await?;
                Ok(Some(transaction))
            }
            .scope_boxed()
        })
        .await
    }

    async fn points_history(
        &self,
        rider_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<PointsTransaction>, i64)> {
        let mut conn = self.db.get_connection().await?;
        let query = points_transactions::table.filter(points_transactions::rider_id.eq(rider_id));
        let total = query.clone().count().get_result::<i64>(&mut conn).await?;
        let rows = query
            .order(points_transactions::created_at.desc())
            .limit(limit)
            .offset(offset)
            .select(PointsTransaction::as_select())
            .load(&mut conn)
            .await?;
        Ok((rows, total))
    }
}

#[async_trait]
impl RideStore for PgLedgerStore {
    async fn get_ride(&self, id: Uuid) -> StoreResult<Ride> {
        let mut conn = self.db.get_connection().await?;
        rides::table
            .find(id)
            .select(Ride::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or(StoreError::NotFound("ride"))
    }

    async fn list_rides(
        &self,
        rider_id: Uuid,
        filter: RideFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<Ride>, i64)> {
        let mut conn = self.db.get_connection().await?;
        let filtered = || {
            let mut query: rides::BoxedQuery<'_, Pg> = rides::table
                .filter(rides::rider_id.eq(rider_id))
                .into_boxed();
            if let Some(range) = filter.range {
                query = query
                    .filter(rides::requested_at.ge(range.from))
                    .filter(rides::requested_at.lt(range.to));
            }
            if let Some(status) = filter.status {
                query = query.filter(rides::status.eq(status));
            }
            query
        };

        let total = filtered().count().get_result::<i64>(&mut conn).await?;
        let rows = filtered()
            .order(rides::requested_at.desc())
            .limit(limit)
            .offset(offset)
            .select(Ride::as_select())
            .load(&mut conn)
            .await?;
        Ok((rows, total))
    }

    async fn rider_stats(
        &self,
        rider_id: Uuid,
        range: DateRange,
        period: &str,
    ) -> StoreResult<RiderStats> {
        let mut conn = self.db.get_connection().await?;
        let rows = rides::table
            .filter(rides::rider_id.eq(rider_id))
            .filter(rides::requested_at.ge(range.from))
            .filter(rides::requested_at.lt(range.to))
            .select(Ride::as_select())
            .load(&mut conn)
            .await?;
        Ok(projections::rider_stats(&rows, period))
    }

    async fn frequent_routes(&self, rider_id: Uuid, limit: i64) -> StoreResult<Vec<FrequentRoute>> {
        let mut conn = self.db.get_connection().await?;
        let rows = diesel::sql_query(
            "SELECT pickup_address, dropoff_address, COUNT(*) AS ride_count, \
                    AVG(total_fare) AS average_fare, \
                    MAX(COALESCE(completed_at, requested_at)) AS last_ride_at \
             FROM rides \
             WHERE rider_id = $1 AND status = $2 \
             GROUP BY pickup_address, dropoff_address \
             HAVING COUNT(*) >= 2 \
             ORDER BY ride_count DESC, last_ride_at DESC \
             LIMIT $3",
        )
        .bind::<diesel::sql_types::Uuid, _>(rider_id)
        .bind::<Text, _>(RideStatus::Completed.as_str())
        .bind::<BigInt, _>(limit)
        .load::<RouteRow>(&mut conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| FrequentRoute {
                pickup_address: row.pickup_address,
                dropoff_address: row.dropoff_address,
                ride_count: row.ride_count,
                average_fare: cents(&row.average_fare),
                last_ride_at: row.last_ride_at,
            })
            .collect())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.db.get_connection().await?;
        diesel::sql_query("SELECT 1").execute(&mut conn).await?;
        Ok(())
    }
}
