// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{require, ServiceContext};
use crate::config::LedgerConfig;
use crate::crypto::{last4, AccountCipher};
use crate::error::{AppError, AppResult};
use crate::models::{
    cents, zero_cents, BankAccount, BankAccountView, DailyEarning, Earning, EarningBreakdown,
    EarningGoal, EarningType, EarningsSummary, GoalPeriod, GoalProgress, Page, PageRequest,
    Payout, PayoutMethod, PayoutStatus, RideStatus,
};
use crate::notify::{fire_and_forget, Notification};
use crate::period::{expected_progress_fraction, ProgressFraction};
use crate::reference;
use crate::store::{LedgerStore, NewPayout, StoreError};

/// Window stamped on a payout as the period it settles.
const PAYOUT_WINDOW_DAYS: i64 = 30;

/// One earning event before commission is applied.
#[derive(Debug, Clone)]
pub struct NewEarning {
    pub driver_id: Uuid,
    pub earning_type: EarningType,
    pub gross_amount: BigDecimal,
    /// Overrides the configured rate for this event only.
    pub commission_rate: Option<BigDecimal>,
    pub ride_id: Option<Uuid>,
    pub delivery_id: Option<Uuid>,
    pub description: String,
}

impl NewEarning {
    pub fn new(driver_id: Uuid, earning_type: EarningType, gross_amount: BigDecimal) -> Self {
        Self {
            driver_id,
            earning_type,
            gross_amount,
            commission_rate: None,
            ride_id: None,
            delivery_id: None,
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutRequest {
    pub method: PayoutMethod,
    #[serde(default)]
    pub bank_account_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutStatusUpdate {
    pub status: PayoutStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddBankAccountRequest {
    pub bank_name: String,
    pub account_holder: String,
    pub account_number: String,
    #[serde(default)]
    pub routing_number: Option<String>,
    #[serde(default)]
    pub iban: Option<String>,
    #[serde(default)]
    pub swift_code: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetGoalRequest {
    pub target_amount: BigDecimal,
    pub period: String,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BonusRequest {
    pub driver_id: Uuid,
    pub amount: BigDecimal,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TipRequest {
    pub ride_id: Uuid,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyEarnings {
    pub period: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub daily: Vec<DailyEarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EarningsBreakdownView {
    pub period: String,
    pub breakdown: Vec<EarningBreakdown>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Balance {
    pub unpaid_balance: BigDecimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BankAccountList {
    pub accounts: Vec<BankAccountView>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalList {
    pub goals: Vec<GoalProgress>,
}

/// Driver earnings, payouts, payout destinations and goals.
pub struct EarningsService {
    ctx: ServiceContext,
    cipher: AccountCipher,
    commission_rate: BigDecimal,
    min_payout: BigDecimal,
    currency: String,
}

impl EarningsService {
    pub fn new(ctx: ServiceContext, config: &LedgerConfig) -> Self {
        Self {
            ctx,
            cipher: AccountCipher::new(&config.account_encryption_key),
            commission_rate: config.default_commission_rate.clone(),
            min_payout: cents(&config.min_payout_amount),
            currency: config.default_currency.clone(),
        }
    }

    fn store(&self) -> &dyn LedgerStore {
        self.ctx.store.as_ref()
    }

    pub async fn record_earning(&self, new: NewEarning) -> AppResult<Earning> {
        let zero = BigDecimal::zero();
        if new.gross_amount < zero {
            return Err(AppError::bad_request("amount must not be negative"));
        }
        if new.earning_type == EarningType::Tip && new.gross_amount <= zero {
            return Err(AppError::bad_request("tip amount must be greater than zero"));
        }
        let rate = new
            .commission_rate
            .clone()
            .unwrap_or_else(|| self.commission_rate.clone());
        if rate < zero || rate > BigDecimal::from(1) {
            return Err(AppError::bad_request("commission rate must be between 0 and 1"));
        }

        let gross = cents(&new.gross_amount);
        let (commission, net) = Earning::split(&gross, &rate);
        let earning = Earning {
            id: Uuid::new_v4(),
            driver_id: new.driver_id,
            ride_id: new.ride_id,
            delivery_id: new.delivery_id,
            earning_type: new.earning_type,
            gross_amount: gross,
            commission,
            net_amount: net,
            currency: self.currency.clone(),
            description: new.description,
            is_paid_out: false,
            payout_id: None,
            created_at: self.ctx.clock.now(),
        };
        self.store().append_earning(&earning).await?;
        self.ctx
            .metrics
            .earnings_recorded
            .with_label_values(&[earning.earning_type.as_str()])
            .inc();
        info!(
            "Recorded {} earning {} for driver {}: net {}",
            earning.earning_type, earning.id, earning.driver_id, earning.net_amount
        );

        if !earning.net_amount.is_zero() {
            let store = self.ctx.store.clone();
            let (driver_id, delta, at) = (earning.driver_id, earning.net_amount.clone(), earning.created_at);
            tokio::spawn(async move {
                advance_goals(store.as_ref(), driver_id, &delta, at).await;
            });
        }
        Ok(earning)
    }

    /// A rider tipping the driver of one of their completed rides.
    pub async fn record_tip(&self, rider_id: Uuid, request: TipRequest) -> AppResult<Earning> {
        let ride = self.store().get_ride(request.ride_id).await?;
        if ride.rider_id != rider_id {
            return Err(AppError::forbidden("only the rider of this ride can tip"));
        }
        if ride.status != RideStatus::Completed {
            return Err(AppError::bad_request("only completed rides can be tipped"));
        }
        let driver_id = ride
            .driver_id
            .ok_or_else(|| AppError::bad_request("ride has no assigned driver"))?;

        self.record_earning(NewEarning {
            commission_rate: Some(BigDecimal::zero()),
            ride_id: Some(ride.id),
            description: "Tip from rider".to_string(),
            ..NewEarning::new(driver_id, EarningType::Tip, request.amount)
        })
        .await
    }

    pub async fn record_bonus(&self, request: BonusRequest) -> AppResult<Earning> {
        if request.amount <= BigDecimal::zero() {
            return Err(AppError::bad_request("bonus amount must be greater than zero"));
        }
        let description = require(&request.description, "description")?;
        let earning = self
            .record_earning(NewEarning {
                commission_rate: Some(BigDecimal::zero()),
                description: description.clone(),
                ..NewEarning::new(request.driver_id, EarningType::Bonus, request.amount)
            })
            .await?;

        fire_and_forget(
            &self.ctx.notifier,
            Notification::BonusAwarded {
                driver_id: earning.driver_id,
                amount: earning.net_amount.clone(),
                description,
            },
        );
        Ok(earning)
    }

    pub async fn summary(
        &self,
        driver_id: Uuid,
        period: &str,
        zone: FixedOffset,
    ) -> AppResult<EarningsSummary> {
        let range = self.ctx.resolve_period(period, zone)?;
        let summary = self.store().summarize(driver_id, range).await?;
        debug!("Summarized {} earning types for driver {}", summary.by_type.len(), driver_id);

        let amount_of = |kind: EarningType| {
            summary
                .by_type
                .iter()
                .find(|b| b.earning_type == kind)
                .map(|b| cents(&b.amount))
                .unwrap_or_else(zero_cents)
        };
        let count_of = |kind: EarningType| {
            summary
                .by_type
                .iter()
                .find(|b| b.earning_type == kind)
                .map(|b| b.count)
                .unwrap_or(0)
        };

        Ok(EarningsSummary {
            period: period.to_string(),
            from: range.from,
            to: range.to,
            gross_earnings: cents(&summary.totals.gross),
            commission: cents(&summary.totals.commission),
            net_earnings: cents(&summary.totals.net),
            tips: amount_of(EarningType::Tip),
            bonuses: amount_of(EarningType::Bonus),
            ride_count: count_of(EarningType::RideFare),
            delivery_count: count_of(EarningType::Delivery),
            currency: self.currency.clone(),
            breakdown: summary.by_type,
        })
    }

    pub async fn breakdown(
        &self,
        driver_id: Uuid,
        period: &str,
        zone: FixedOffset,
    ) -> AppResult<EarningsBreakdownView> {
        let range = self.ctx.resolve_period(period, zone)?;
        let summary = self.store().summarize(driver_id, range).await?;
        Ok(EarningsBreakdownView {
            period: period.to_string(),
            breakdown: summary.by_type,
        })
    }

    pub async fn daily(
        &self,
        driver_id: Uuid,
        period: &str,
        zone: FixedOffset,
    ) -> AppResult<DailyEarnings> {
        let range = self.ctx.resolve_period(period, zone)?;
        let daily = self.store().daily_rollup(driver_id, range, zone).await?;
        Ok(DailyEarnings {
            period: period.to_string(),
            from: range.from,
            to: range.to,
            daily,
        })
    }

    pub async fn history(
        &self,
        driver_id: Uuid,
        period: &str,
        page: PageRequest,
        zone: FixedOffset,
    ) -> AppResult<Page<Earning>> {
        let range = self.ctx.resolve_period(period, zone)?;
        let (rows, total) = self
            .store()
            .list_earnings(driver_id, range, page.limit(), page.offset())
            .await?;
        Ok(Page::new(rows, total, page))
    }

    pub async fn balance(&self, driver_id: Uuid) -> AppResult<Balance> {
        Ok(Balance {
            unpaid_balance: cents(&self.store().unpaid_total(driver_id).await?),
            currency: self.currency.clone(),
        })
    }

    pub async fn request_payout(&self, driver_id: Uuid, request: PayoutRequest) -> AppResult<Payout> {
        // advisory: the store recomputes the amount from the rows it consumes
        let balance = cents(&self.store().unpaid_total(driver_id).await?);
        if balance < self.min_payout {
            return Err(AppError::bad_request(format!(
                "minimum payout amount is {}, current balance: {}",
                self.min_payout, balance
            )));
        }

        let bank_account_id = match request.method {
            PayoutMethod::BankTransfer => Some(self.payout_destination(driver_id, request.bank_account_id).await?.id),
            _ => None,
        };

        let now = self.ctx.clock.now();
        let payout = self
            .store()
            .issue_payout(
                NewPayout {
                    id: Uuid::new_v4(),
                    driver_id,
                    currency: self.currency.clone(),
                    method: request.method,
                    bank_account_id,
                    reference: reference::payout_reference(),
                    period_start: now - Duration::days(PAYOUT_WINDOW_DAYS),
                    period_end: now,
                    created_at: now,
                },
                now,
            )
            .await?;

        self.ctx.metrics.payouts_issued.inc();
        info!(
            "Issued payout {} ({}) of {} to driver {} over {} earnings",
            payout.id, payout.reference, payout.amount, driver_id, payout.earning_count
        );
        fire_and_forget(
            &self.ctx.notifier,
            Notification::PayoutIssued {
                driver_id,
                payout_id: payout.id,
                amount: payout.amount.clone(),
                reference: payout.reference.clone(),
            },
        );
        Ok(payout)
    }

    async fn payout_destination(&self, driver_id: Uuid, explicit: Option<Uuid>) -> AppResult<BankAccount> {
        let account = match explicit {
            Some(id) => match self.store().get_bank_account(id).await {
                Ok(account) if account.driver_id == driver_id => Some(account),
                Ok(_) | Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
            None => self.store().primary_bank_account(driver_id).await?,
        };
        account.ok_or_else(|| AppError::bad_request("no bank account found for payout"))
    }

    pub async fn list_payouts(&self, driver_id: Uuid, page: PageRequest) -> AppResult<Page<Payout>> {
        let (rows, total) = self
            .store()
            .list_payouts(driver_id, page.limit(), page.offset())
            .await?;
        Ok(Page::new(rows, total, page))
    }

    pub async fn get_payout(&self, driver_id: Uuid, payout_id: Uuid) -> AppResult<Payout> {
        let payout = self.store().get_payout(payout_id).await?;
        if payout.driver_id != driver_id {
            return Err(AppError::NotFound("payout"));
        }
        Ok(payout)
    }

    pub async fn update_payout_status(
        &self,
        payout_id: Uuid,
        update: PayoutStatusUpdate,
    ) -> AppResult<Payout> {
        let current = self.store().get_payout(payout_id).await?;
        if !current.status.can_transition_to(update.status) {
            return Err(AppError::bad_request(format!(
                "cannot move payout from {} to {}",
                current.status, update.status
            )));
        }
        let failure_reason = match update.status {
            PayoutStatus::Failed => Some(
                update
                    .failure_reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| {
                        AppError::bad_request("failure_reason is required when a payout fails")
                    })?
                    .to_string(),
            ),
            _ => None,
        };

        let payout = self
            .store()
            .update_payout_status(
                payout_id,
                current.status,
                update.status,
                failure_reason,
                self.ctx.clock.now(),
            )
            .await?;
        self.ctx
            .metrics
            .payout_status_changes
            .with_label_values(&[payout.status.as_str()])
            .inc();
        info!("Payout {} moved from {} to {}", payout.id, current.status, payout.status);
        Ok(payout)
    }

    pub async fn add_bank_account(
        &self,
        driver_id: Uuid,
        request: AddBankAccountRequest,
    ) -> AppResult<BankAccountView> {
        let bank_name = require(&request.bank_name, "bank_name")?;
        let account_holder = require(&request.account_holder, "account_holder")?;
        let account_number = require(&request.account_number, "account_number")?;
        if account_number.chars().count() < 4 {
            return Err(AppError::bad_request("account_number must have at least 4 characters"));
        }
        let currency = request
            .currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.currency.clone());

        // the first destination a driver adds is always primary
        let is_primary = request.is_primary
            || self.store().list_bank_accounts(driver_id).await?.is_empty();

        let encrypted = self
            .cipher
            .encrypt(&account_number)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let now = self.ctx.clock.now();
        let account = BankAccount {
            id: Uuid::new_v4(),
            driver_id,
            bank_name,
            account_holder,
            account_number_encrypted: encrypted,
            account_number_last4: last4(&account_number),
            routing_number: non_blank(request.routing_number),
            iban: non_blank(request.iban),
            swift_code: non_blank(request.swift_code),
            currency,
            is_primary,
            is_verified: false,
            created_at: now,
            updated_at: now,
        };
        let saved = self.store().add_bank_account(&account).await?;
        info!("Added bank account {} for driver {} (primary: {})", saved.id, driver_id, saved.is_primary);
        Ok(BankAccountView::from(&saved))
    }

    pub async fn list_bank_accounts(&self, driver_id: Uuid) -> AppResult<BankAccountList> {
        let accounts: Vec<BankAccountView> = self
            .store()
            .list_bank_accounts(driver_id)
            .await?
            .iter()
            .map(BankAccountView::from)
            .collect();
        Ok(BankAccountList {
            count: accounts.len(),
            accounts,
        })
    }

    pub async fn delete_bank_account(&self, driver_id: Uuid, account_id: Uuid) -> AppResult<()> {
        let account = self.store().get_bank_account(account_id).await?;
        if account.driver_id != driver_id {
            return Err(AppError::forbidden("bank account belongs to another driver"));
        }
        self.store().delete_bank_account(account_id).await?;
        info!("Deleted bank account {} of driver {}", account_id, driver_id);
        Ok(())
    }

    pub async fn set_goal(&self, driver_id: Uuid, request: SetGoalRequest) -> AppResult<EarningGoal> {
        if request.target_amount <= BigDecimal::zero() {
            return Err(AppError::bad_request("target_amount must be greater than zero"));
        }
        let period: GoalPeriod = request
            .period
            .parse()
            .map_err(|_| AppError::bad_request("period must be one of: daily, weekly, monthly"))?;

        let now = self.ctx.clock.now();
        let candidate = EarningGoal {
            id: Uuid::new_v4(),
            driver_id,
            target_amount: cents(&request.target_amount),
            period,
            current_amount: zero_cents(),
            currency: request
                .currency
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| self.currency.clone()),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let goal = self.store().upsert_goal(&candidate).await?;
        info!("Set {} goal {} of {} for driver {}", goal.period, goal.id, goal.target_amount, driver_id);
        Ok(goal)
    }

    pub async fn goals(&self, driver_id: Uuid, zone: FixedOffset) -> AppResult<GoalList> {
        let now = self.ctx.local_now(zone);
        let goals = self
            .store()
            .active_goals(driver_id)
            .await?
            .into_iter()
            .map(|goal| {
                let fraction = expected_progress_fraction(goal.period, &now);
                goal_progress(goal, fraction)
            })
            .collect();
        Ok(GoalList { goals })
    }

    pub async fn delete_goal(&self, driver_id: Uuid, goal_id: Uuid) -> AppResult<()> {
        let goal = self.store().get_goal(goal_id).await?;
        if goal.driver_id != driver_id {
            return Err(AppError::forbidden("earning goal belongs to another driver"));
        }
        self.store()
            .deactivate_goal(goal_id, self.ctx.clock.now())
            .await?;
        Ok(())
    }
}

/// Adds `delta` to every active goal of the driver. Failures are logged and
/// otherwise ignored; goals are a progress hint, not a ledger.
pub async fn advance_goals(store: &dyn LedgerStore, driver_id: Uuid, delta: &BigDecimal, at: DateTime<Utc>) {
    let goals = match store.active_goals(driver_id).await {
        Ok(goals) => goals,
        Err(e) => {
            warn!("Failed to load goals of driver {}: {}", driver_id, e);
            return;
        }
    };
    for goal in goals {
        if let Err(e) = store.bump_goal_progress(goal.id, delta, at).await {
            warn!("Failed to advance goal {}: {}", goal.id, e);
        }
    }
}

pub fn goal_progress(goal: EarningGoal, fraction: ProgressFraction) -> GoalProgress {
    let hundred = BigDecimal::from(100);
    let current = cents(&goal.current_amount);
    let target = goal.target_amount.clone();

    let pct = if target.is_zero() {
        hundred.clone()
    } else {
        (&current * &hundred / &target).min(hundred)
    };
    let remaining = &target - &current;
    let remaining = if remaining < BigDecimal::zero() {
        zero_cents()
    } else {
        cents(&remaining)
    };
    let threshold =
        &target * BigDecimal::from(fraction.numerator) / BigDecimal::from(fraction.denominator);

    GoalProgress {
        progress_pct: cents(&pct).to_f64().unwrap_or_default(),
        remaining,
        on_track: current >= threshold,
        current,
        goal,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::store::{BankAccountStore, EarningStore, GoalStore};
    use crate::projections::fixtures::{completed_ride, dec};
    use crate::services::testing::{harness, ledger_config, utc, Harness};
    use std::sync::Arc;

    fn service(h: &Harness) -> EarningsService {
        EarningsService::new(h.ctx.clone(), &ledger_config())
    }

    async fn record_net(service: &EarningsService, driver: Uuid, amount: &str) -> Earning {
        service
            .record_earning(NewEarning {
                commission_rate: Some(BigDecimal::zero()),
                ..NewEarning::new(driver, EarningType::RideFare, dec(amount))
            })
            .await
            .unwrap()
    }

    fn bank_request(primary: bool) -> AddBankAccountRequest {
        AddBankAccountRequest {
            bank_name: "First Bank".into(),
            account_holder: "Sam Driver".into(),
            account_number: "000123456789".into(),
            routing_number: Some("110000000".into()),
            iban: None,
            swift_code: Some("  ".into()),
            currency: None,
            is_primary: primary,
        }
    }

    #[tokio::test]
    async fn record_then_summarize() {
        let h = harness();
        let service = service(&h);
        let driver = Uuid::new_v4();

        let earning = service
            .record_earning(NewEarning::new(driver, EarningType::RideFare, dec("25.00")))
            .await
            .unwrap();
        assert_eq!(earning.commission, dec("5.00"));
        assert_eq!(earning.net_amount, dec("20.00"));
        h.clock.advance(Duration::seconds(1));

        let summary = service.summary(driver, "today", utc()).await.unwrap();
        assert_eq!(summary.gross_earnings, dec("25.00"));
        assert_eq!(summary.commission, dec("5.00"));
        assert_eq!(summary.net_earnings, dec("20.00"));
        assert_eq!(summary.ride_count, 1);
        assert_eq!(summary.tips, dec("0.00"));
        assert_eq!(summary.breakdown.len(), 1);
        assert_eq!(summary.breakdown[0].earning_type, EarningType::RideFare);
        assert_eq!(summary.breakdown[0].amount, dec("20.00"));
        assert_eq!(summary.breakdown[0].count, 1);

        assert_eq!(service.balance(driver).await.unwrap().unpaid_balance, dec("20.00"));
    }

    #[tokio::test]
    async fn empty_summary_is_zeroed() {
        let h = harness();
        let summary = service(&h).summary(Uuid::new_v4(), "this_week", utc()).await.unwrap();
        assert_eq!(summary.net_earnings, dec("0.00"));
        assert!(summary.breakdown.is_empty());
    }

    #[tokio::test]
    async fn rejects_bad_amounts_and_rates() {
        let h = harness();
        let service = service(&h);
        let driver = Uuid::new_v4();

        let tip = NewEarning::new(driver, EarningType::Tip, dec("0"));
        assert!(matches!(service.record_earning(tip).await, Err(AppError::BadRequest(_))));

        let negative = NewEarning::new(driver, EarningType::RideFare, dec("-1.00"));
        assert!(matches!(service.record_earning(negative).await, Err(AppError::BadRequest(_))));

        let greedy = NewEarning {
            commission_rate: Some(dec("1.5")),
            ..NewEarning::new(driver, EarningType::Surge, dec("10.00"))
        };
        assert!(matches!(service.record_earning(greedy).await, Err(AppError::BadRequest(_))));

        let err = service.summary(driver, "fortnight", utc()).await.unwrap_err();
        assert!(err.to_string().starts_with("period must be one of"));
    }

    #[tokio::test]
    async fn payout_below_minimum_changes_nothing() {
        let h = harness();
        let service = service(&h);
        let driver = Uuid::new_v4();
        record_net(&service, driver, "2.50").await;
        service.add_bank_account(driver, bank_request(true)).await.unwrap();

        let err = service
            .request_payout(
                driver,
                PayoutRequest {
                    method: PayoutMethod::BankTransfer,
                    bank_account_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(err
            .to_string()
            .contains("minimum payout amount is 5.00, current balance: 2.50"));
        assert_eq!(service.balance(driver).await.unwrap().unpaid_balance, dec("2.50"));
    }

    #[tokio::test]
    async fn payout_consumes_every_unpaid_earning() {
        let h = harness();
        let service = service(&h);
        let driver = Uuid::new_v4();
        let other = Uuid::new_v4();
        for amount in ["10.00", "7.50", "5.00"] {
            record_net(&service, driver, amount).await;
        }
        record_net(&service, other, "40.00").await;
        service.add_bank_account(driver, bank_request(true)).await.unwrap();

        let payout = service
            .request_payout(
                driver,
                PayoutRequest {
                    method: PayoutMethod::BankTransfer,
                    bank_account_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(payout.amount, dec("22.50"));
        assert_eq!(payout.earning_count, 3);
        assert_eq!(payout.status, PayoutStatus::Pending);
        assert!(payout.bank_account_id.is_some());
        assert_eq!(payout.reference.len(), 14);
        assert!(payout.reference.starts_with("PAY-"));
        assert!(payout.reference[4..]
            .bytes()
            .all(|b| reference::UNAMBIGUOUS_ALPHABET.contains(&b)));

        assert_eq!(service.balance(driver).await.unwrap().unpaid_balance, dec("0.00"));
        assert_eq!(service.balance(other).await.unwrap().unpaid_balance, dec("40.00"));
        let consumed = h.store.earnings_for_payout(payout.id).await.unwrap();
        assert_eq!(consumed.len(), 3);
        assert!(consumed.iter().all(|e| e.payout_id == Some(payout.id)));
    }

    #[tokio::test]
    async fn bank_transfer_needs_a_destination() {
        let h = harness();
        let service = service(&h);
        let driver = Uuid::new_v4();
        record_net(&service, driver, "50.00").await;

        let err = service
            .request_payout(
                driver,
                PayoutRequest {
                    method: PayoutMethod::BankTransfer,
                    bank_account_id: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no bank account found for payout");

        // someone else's account is not a destination either
        let stranger = service.add_bank_account(Uuid::new_v4(), bank_request(true)).await.unwrap();
        let err = service
            .request_payout(
                driver,
                PayoutRequest {
                    method: PayoutMethod::BankTransfer,
                    bank_account_id: Some(stranger.id),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let wallet = service
            .request_payout(
                driver,
                PayoutRequest {
                    method: PayoutMethod::Wallet,
                    bank_account_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(wallet.bank_account_id, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_payouts_pay_once() {
        let h = harness();
        let service = Arc::new(service(&h));
        let driver = Uuid::new_v4();
        record_net(&service, driver, "100.00").await;

        let request = || PayoutRequest {
            method: PayoutMethod::Wallet,
            bank_account_id: None,
        };
        let (first, second) = tokio::join!(
            tokio::spawn({
                let service = service.clone();
                let request = request();
                async move { service.request_payout(driver, request).await }
            }),
            tokio::spawn({
                let service = service.clone();
                let request = request();
                async move { service.request_payout(driver, request).await }
            }),
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        let paid: Vec<&Payout> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].amount, dec("100.00"));
        for failure in outcomes.iter().filter_map(|o| o.as_ref().err()) {
            assert!(matches!(failure, AppError::BadRequest(_) | AppError::Conflict(_)));
        }
    }

    #[tokio::test]
    async fn payout_state_machine() {
        let h = harness();
        let service = service(&h);
        let driver = Uuid::new_v4();
        record_net(&service, driver, "30.00").await;
        let payout = service
            .request_payout(
                driver,
                PayoutRequest {
                    method: PayoutMethod::InstantPay,
                    bank_account_id: None,
                },
            )
            .await
            .unwrap();

        let skip = PayoutStatusUpdate {
            status: PayoutStatus::Completed,
            failure_reason: None,
        };
        assert!(matches!(
            service.update_payout_status(payout.id, skip).await,
            Err(AppError::BadRequest(_))
        ));

        let silent_failure = PayoutStatusUpdate {
            status: PayoutStatus::Failed,
            failure_reason: Some(" ".into()),
        };
        assert!(matches!(
            service.update_payout_status(payout.id, silent_failure).await,
            Err(AppError::BadRequest(_))
        ));

        let failed = service
            .update_payout_status(
                payout.id,
                PayoutStatusUpdate {
                    status: PayoutStatus::Failed,
                    failure_reason: Some("account closed".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("account closed"));
        assert!(failed.processed_at.is_some());

        assert!(matches!(
            service.get_payout(Uuid::new_v4(), payout.id).await,
            Err(AppError::NotFound("payout"))
        ));
    }

    #[tokio::test]
    async fn first_bank_account_is_primary_and_masked() {
        let h = harness();
        let service = service(&h);
        let driver = Uuid::new_v4();

        let first = service.add_bank_account(driver, bank_request(false)).await.unwrap();
        assert!(first.is_primary);
        assert_eq!(first.account_number, "****6789");
        assert_eq!(first.currency, "USD");
        assert_eq!(first.swift_code, None);

        let second = service.add_bank_account(driver, bank_request(false)).await.unwrap();
        assert!(!second.is_primary);

        let list = service.list_bank_accounts(driver).await.unwrap();
        assert_eq!(list.count, 2);
        assert_eq!(list.accounts.iter().filter(|a| a.is_primary).count(), 1);

        let stored = h.store.get_bank_account(first.id).await.unwrap();
        assert_ne!(stored.account_number_encrypted, "000123456789");

        assert!(matches!(
            service.delete_bank_account(Uuid::new_v4(), first.id).await,
            Err(AppError::Forbidden(_))
        ));
        service.delete_bank_account(driver, first.id).await.unwrap();

        let missing = AddBankAccountRequest {
            bank_name: " ".into(),
            ..bank_request(false)
        };
        let err = service.add_bank_account(driver, missing).await.unwrap_err();
        assert_eq!(err.to_string(), "bank_name is required");
    }

    #[test]
    fn weekly_goal_on_track_threshold() {
        let goal = |current: &str| EarningGoal {
            id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            target_amount: dec("700.00"),
            period: GoalPeriod::Weekly,
            current_amount: dec(current),
            currency: "USD".into(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let wednesday = ProgressFraction {
            numerator: 3,
            denominator: 7,
        };

        let progress = goal_progress(goal("300.00"), wednesday);
        assert!(progress.on_track);
        assert_eq!(progress.remaining, dec("400.00"));
        assert!((progress.progress_pct - 42.86).abs() < 1e-9);

        assert!(!goal_progress(goal("299.00"), wednesday).on_track);

        let exceeded = goal_progress(goal("900.00"), wednesday);
        assert_eq!(exceeded.progress_pct, 100.0);
        assert_eq!(exceeded.remaining, dec("0.00"));
    }

    #[tokio::test]
    async fn goals_replace_and_validate() {
        let h = harness();
        let service = service(&h);
        let driver = Uuid::new_v4();

        let bad_period = SetGoalRequest {
            target_amount: dec("100"),
            period: "yearly".into(),
            currency: None,
        };
        assert!(matches!(service.set_goal(driver, bad_period).await, Err(AppError::BadRequest(_))));
        let zero = SetGoalRequest {
            target_amount: dec("0"),
            period: "daily".into(),
            currency: None,
        };
        assert!(matches!(service.set_goal(driver, zero).await, Err(AppError::BadRequest(_))));

        let goal = service
            .set_goal(
                driver,
                SetGoalRequest {
                    target_amount: dec("500"),
                    period: "weekly".into(),
                    currency: None,
                },
            )
            .await
            .unwrap();
        advance_goals(h.store.as_ref(), driver, &dec("120.00"), h.clock.now()).await;

        let replaced = service
            .set_goal(
                driver,
                SetGoalRequest {
                    target_amount: dec("700"),
                    period: "weekly".into(),
                    currency: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(replaced.id, goal.id);

        let goals = service.goals(driver, utc()).await.unwrap().goals;
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].current, dec("120.00"));
        assert_eq!(goals[0].goal.target_amount, dec("700.00"));

        service.delete_goal(driver, goal.id).await.unwrap();
        assert!(service.goals(driver, utc()).await.unwrap().goals.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn recording_advances_goals_in_background() {
        let h = harness();
        let service = service(&h);
        let driver = Uuid::new_v4();
        let goal = service
            .set_goal(
                driver,
                SetGoalRequest {
                    target_amount: dec("200"),
                    period: "daily".into(),
                    currency: None,
                },
            )
            .await
            .unwrap();

        record_net(&service, driver, "40.00").await;
        let mut current = zero_cents();
        for _ in 0..50 {
            current = h.store.get_goal(goal.id).await.unwrap().current_amount;
            if current == dec("40.00") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(current, dec("40.00"));
    }

    #[tokio::test]
    async fn tips_go_to_the_rides_driver() {
        let h = harness();
        let service = service(&h);
        let rider = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let ride = completed_ride(rider, driver);
        h.store.insert_ride(ride.clone());

        let tip = service
            .record_tip(
                rider,
                TipRequest {
                    ride_id: ride.id,
                    amount: dec("3.00"),
                },
            )
            .await
            .unwrap();
        assert_eq!(tip.driver_id, driver);
        assert_eq!(tip.earning_type, EarningType::Tip);
        assert_eq!(tip.net_amount, dec("3.00"));
        assert_eq!(tip.commission, dec("0.00"));

        assert!(matches!(
            service
                .record_tip(
                    Uuid::new_v4(),
                    TipRequest {
                        ride_id: ride.id,
                        amount: dec("3.00"),
                    },
                )
                .await,
            Err(AppError::Forbidden(_))
        ));

        let mut open = completed_ride(rider, driver);
        open.status = RideStatus::InProgress;
        h.store.insert_ride(open.clone());
        assert!(matches!(
            service
                .record_tip(
                    rider,
                    TipRequest {
                        ride_id: open.id,
                        amount: dec("3.00"),
                    },
                )
                .await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn bonus_is_commission_free() {
        let h = harness();
        let service = service(&h);
        let bonus = service
            .record_bonus(BonusRequest {
                driver_id: Uuid::new_v4(),
                amount: dec("15.00"),
                description: "Weekend streak".into(),
            })
            .await
            .unwrap();
        assert_eq!(bonus.earning_type, EarningType::Bonus);
        assert_eq!(bonus.net_amount, dec("15.00"));
    }
}
