// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ServiceContext;
use crate::error::{AppError, AppResult};
use crate::models::{cents, zero_cents, GiftCard, GiftCardStatus, GiftCardTransaction};
use crate::reference;
use crate::store::{GiftCardUsage, LedgerStore, StoreError};

const CARD_VALIDITY_DAYS: i64 = 365;
const CODE_ATTEMPTS: u32 = 5;
/// Re-reads of a card after a lost compare-and-swap before it is skipped.
const DEDUCT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseGiftCardRequest {
    pub amount: BigDecimal,
    #[serde(default)]
    pub message: Option<String>,
    /// Delivers the card straight to this rider instead of leaving it to be
    /// redeemed by code.
    #[serde(default)]
    pub recipient_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemGiftCardRequest {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyGiftCardRequest {
    pub ride_id: Uuid,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct GiftCardBalance {
    pub balance: BigDecimal,
    pub currency: String,
    pub card_count: usize,
}

/// Outcome of spending gift-card credit against an amount owed.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceApplication {
    pub requested: BigDecimal,
    pub applied: BigDecimal,
    pub remaining_due: BigDecimal,
    pub transactions: Vec<GiftCardTransaction>,
}

pub struct GiftCardService {
    ctx: ServiceContext,
    min_amount: BigDecimal,
    max_amount: BigDecimal,
    currency: String,
}

impl GiftCardService {
    pub fn new(ctx: ServiceContext, currency: impl Into<String>) -> Self {
        Self {
            ctx,
            min_amount: BigDecimal::from(5),
            max_amount: BigDecimal::from(500),
            currency: currency.into(),
        }
    }

    fn store(&self) -> &dyn LedgerStore {
        self.ctx.store.as_ref()
    }

    pub async fn purchase(&self, purchaser_id: Uuid, request: PurchaseGiftCardRequest) -> AppResult<GiftCard> {
        if request.amount < self.min_amount || request.amount > self.max_amount {
            return Err(AppError::bad_request(format!(
                "gift card amount must be between {} and {}",
                self.min_amount, self.max_amount
            )));
        }

        let now = self.ctx.clock.now();
        let amount = cents(&request.amount);
        let mut card = GiftCard {
            id: Uuid::new_v4(),
            code: reference::gift_card_code(),
            purchaser_id,
            recipient_id: request.recipient_id,
            original_amount: amount.clone(),
            remaining_amount: amount,
            currency: self.currency.clone(),
            status: GiftCardStatus::Active,
            message: request
                .message
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
            expires_at: Some(now + Duration::days(CARD_VALIDITY_DAYS)),
            claimed_at: request.recipient_id.map(|_| now),
            created_at: now,
            updated_at: now,
        };

        for attempt in 1..=CODE_ATTEMPTS {
            match self.store().create_gift_card(&card).await {
                Ok(()) => {
                    info!(
                        "Gift card {} of {} purchased by {}",
                        card.id, card.original_amount, purchaser_id
                    );
                    return Ok(card);
                }
                Err(StoreError::Conflict(_)) if attempt < CODE_ATTEMPTS => {
                    debug!("Gift card code collision, drawing a new code");
                    card.code = reference::gift_card_code();
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::conflict("could not allocate a unique gift card code"))
    }

    pub async fn redeem(&self, holder_id: Uuid, request: RedeemGiftCardRequest) -> AppResult<GiftCard> {
        let code = reference::normalize_code(&request.code);
        if code.is_empty() {
            return Err(AppError::bad_request("code is required"));
        }
        let card = self
            .store()
            .find_gift_card_by_code(&code)
            .await?
            .ok_or(AppError::NotFound("gift card"))?;

        let now = self.ctx.clock.now();
        if card.is_expired(now) {
            return Err(AppError::bad_request("gift card has expired"));
        }
        if card.recipient_id.is_some() {
            return Err(AppError::conflict("gift card has already been claimed"));
        }
        if card.status != GiftCardStatus::Active {
            return Err(AppError::bad_request(format!("gift card is {}", card.status)));
        }

        let claimed = self.store().claim_gift_card(card.id, holder_id, now).await?;
        info!("Gift card {} claimed by {}", claimed.id, holder_id);
        Ok(claimed)
    }

    pub async fn list(&self, holder_id: Uuid) -> AppResult<Vec<GiftCard>> {
        Ok(self.store().list_gift_cards(holder_id).await?)
    }

    pub async fn balance(&self, holder_id: Uuid) -> AppResult<GiftCardBalance> {
        let now = self.ctx.clock.now();
        let cards = self.spendable(holder_id, now).await?;
        let balance = cards
            .iter()
            .fold(zero_cents(), |sum, card| sum + &card.remaining_amount);
        Ok(GiftCardBalance {
            balance: cents(&balance),
            currency: self.currency.clone(),
            card_count: cards.len(),
        })
    }

    pub async fn apply(&self, holder_id: Uuid, request: ApplyGiftCardRequest) -> AppResult<BalanceApplication> {
        let ride = self.store().get_ride(request.ride_id).await?;
        if ride.rider_id != holder_id {
            return Err(AppError::forbidden("gift card credit can only pay for your own rides"));
        }
        self.use_balance(holder_id, Some(ride.id), &request.amount).await
    }

    /// Spends the holder's active cards oldest first until `amount` is covered
    /// or the credit runs out. A card that loses a concurrent race is re-read
    /// and retried with what it has left, then skipped.
    pub async fn use_balance(
        &self,
        holder_id: Uuid,
        ride_id: Option<Uuid>,
        amount: &BigDecimal,
    ) -> AppResult<BalanceApplication> {
        if *amount <= BigDecimal::zero() {
            return Err(AppError::bad_request("amount must be greater than zero"));
        }
        let requested = cents(amount);
        let mut owed = requested.clone();
        let mut transactions = Vec::new();
        let now = self.ctx.clock.now();

        for card in self.spendable(holder_id, now).await? {
            if owed.is_zero() {
                break;
            }
            let usage = GiftCardUsage {
                transaction_id: Uuid::new_v4(),
                user_id: holder_id,
                ride_id,
                description: match ride_id {
                    Some(id) => format!("Applied to ride {id}"),
                    None => "Applied to balance".to_string(),
                },
                at: now,
            };
            if let Some(transaction) = self.deduct_from(card, &owed, usage).await? {
                owed = cents(&(&owed - &transaction.amount));
                transactions.push(transaction);
            }
        }

        let applied = cents(&(&requested - &owed));
        info!(
            "Applied {} of {} gift card credit for {} across {} cards",
            applied,
            requested,
            holder_id,
            transactions.len()
        );
        Ok(BalanceApplication {
            requested,
            applied,
            remaining_due: owed,
            transactions,
        })
    }

    async fn deduct_from(
        &self,
        mut card: GiftCard,
        owed: &BigDecimal,
        usage: GiftCardUsage,
    ) -> AppResult<Option<GiftCardTransaction>> {
        for attempt in 1..=DEDUCT_ATTEMPTS {
            let delta = cents(&card.remaining_amount.clone().min(owed.clone()));
            if delta <= BigDecimal::zero() {
                return Ok(None);
            }
            if let Some(transaction) = self
                .store()
                .deduct_gift_card(card.id, &delta, usage.clone())
                .await?
            {
                self.ctx.metrics.gift_card_deductions.inc();
                return Ok(Some(transaction));
            }

            debug!("Lost the race on gift card {} (attempt {})", card.id, attempt);
            card = self.store().get_gift_card(card.id).await?;
            if card.status != GiftCardStatus::Active {
                return Ok(None);
            }
        }
        warn!("Skipping gift card {} after {} contended attempts", card.id, DEDUCT_ATTEMPTS);
        Ok(None)
    }

    pub async fn transactions(&self, holder_id: Uuid, card_id: Uuid) -> AppResult<Vec<GiftCardTransaction>> {
        let card = self.store().get_gift_card(card_id).await?;
        if card.recipient_id != Some(holder_id) && card.purchaser_id != holder_id {
            return Err(AppError::forbidden("gift card belongs to another rider"));
        }
        Ok(self.store().gift_card_transactions(card_id).await?)
    }

    async fn spendable(&self, holder_id: Uuid, now: DateTime<Utc>) -> AppResult<Vec<GiftCard>> {
        Ok(self
            .store()
            .active_gift_cards(holder_id)
            .await?
            .into_iter()
            .filter(|card| !card.is_expired(now))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::store::GiftCardStore;
    use crate::projections::fixtures::{completed_ride, dec};
    use crate::services::testing::{harness, Harness};
    use std::sync::Arc;

    fn service(h: &Harness) -> GiftCardService {
        GiftCardService::new(h.ctx.clone(), "USD")
    }

    async fn card_for(service: &GiftCardService, holder: Uuid, amount: &str) -> GiftCard {
        service
            .purchase(
                Uuid::new_v4(),
                PurchaseGiftCardRequest {
                    amount: dec(amount),
                    message: None,
                    recipient_id: Some(holder),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn purchase_validates_amount_and_shapes_code() {
        let h = harness();
        let service = service(&h);
        let buyer = Uuid::new_v4();

        for amount in ["4.99", "500.01"] {
            let request = PurchaseGiftCardRequest {
                amount: dec(amount),
                message: None,
                recipient_id: None,
            };
            assert!(matches!(service.purchase(buyer, request).await, Err(AppError::BadRequest(_))));
        }

        let card = service
            .purchase(
                buyer,
                PurchaseGiftCardRequest {
                    amount: dec("25"),
                    message: Some("  Happy birthday ".into()),
                    recipient_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(card.remaining_amount, dec("25.00"));
        assert_eq!(card.status, GiftCardStatus::Active);
        assert_eq!(card.message.as_deref(), Some("Happy birthday"));
        assert_eq!(card.expires_at, Some(h.clock.now() + Duration::days(365)));
        let groups: Vec<&str> = card.code.split('-').collect();
        assert_eq!(groups.len(), 4);
        assert!(groups.iter().all(|g| g.len() == 4));
    }

    #[tokio::test]
    async fn redeem_claims_once() {
        let h = harness();
        let service = service(&h);
        let card = service
            .purchase(
                Uuid::new_v4(),
                PurchaseGiftCardRequest {
                    amount: dec("50"),
                    message: None,
                    recipient_id: None,
                },
            )
            .await
            .unwrap();
        let rider = Uuid::new_v4();

        let sloppy = card.code.to_lowercase().replace('-', " ");
        let claimed = service
            .redeem(rider, RedeemGiftCardRequest { code: sloppy })
            .await
            .unwrap();
        assert_eq!(claimed.recipient_id, Some(rider));
        assert_eq!(service.balance(rider).await.unwrap().balance, dec("50.00"));

        let again = service
            .redeem(Uuid::new_v4(), RedeemGiftCardRequest { code: card.code.clone() })
            .await;
        assert!(matches!(again, Err(AppError::Conflict(_))));

        let unknown = service
            .redeem(rider, RedeemGiftCardRequest { code: "AAAA-BBBB-CCCC-DDDD".into() })
            .await;
        assert!(matches!(unknown, Err(AppError::NotFound("gift card"))));
    }

    #[tokio::test]
    async fn expired_cards_cannot_be_redeemed_or_spent() {
        let h = harness();
        let service = service(&h);
        let rider = Uuid::new_v4();
        let delivered = card_for(&service, rider, "20").await;
        let loose = service
            .purchase(
                Uuid::new_v4(),
                PurchaseGiftCardRequest {
                    amount: dec("20"),
                    message: None,
                    recipient_id: None,
                },
            )
            .await
            .unwrap();

        h.clock.advance(Duration::days(366));
        let err = service
            .redeem(rider, RedeemGiftCardRequest { code: loose.code })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "gift card has expired");

        let applied = service.use_balance(rider, None, &dec("5")).await.unwrap();
        assert_eq!(applied.applied, dec("0.00"));
        assert_eq!(applied.remaining_due, dec("5.00"));
        assert_eq!(service.balance(rider).await.unwrap().card_count, 0);
        assert_eq!(
            h.store.get_gift_card(delivered.id).await.unwrap().remaining_amount,
            dec("20.00")
        );
    }

    #[tokio::test]
    async fn use_balance_spends_oldest_card_first() {
        let h = harness();
        let service = service(&h);
        let rider = Uuid::new_v4();
        let older = card_for(&service, rider, "10").await;
        h.clock.advance(Duration::minutes(1));
        let newer = card_for(&service, rider, "30").await;

        let application = service.use_balance(rider, None, &dec("25")).await.unwrap();
        assert_eq!(application.applied, dec("25.00"));
        assert_eq!(application.remaining_due, dec("0.00"));
        assert_eq!(application.transactions.len(), 2);
        assert_eq!(application.transactions[0].card_id, older.id);
        assert_eq!(application.transactions[0].amount, dec("10.00"));
        assert_eq!(application.transactions[1].card_id, newer.id);
        assert_eq!(application.transactions[1].balance_before, dec("30.00"));
        assert_eq!(application.transactions[1].balance_after, dec("15.00"));

        let older = h.store.get_gift_card(older.id).await.unwrap();
        assert_eq!(older.status, GiftCardStatus::Redeemed);
        assert_eq!(service.balance(rider).await.unwrap().balance, dec("15.00"));

        let short = service.use_balance(rider, None, &dec("40")).await.unwrap();
        assert_eq!(short.applied, dec("15.00"));
        assert_eq!(short.remaining_due, dec("25.00"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_spends_never_overdraw() {
        let h = harness();
        let service = Arc::new(service(&h));
        let rider = Uuid::new_v4();
        let card = card_for(&service, rider, "10").await;

        let spend = |service: Arc<GiftCardService>| {
            tokio::spawn(async move { service.use_balance(rider, None, &dec("8")).await })
        };
        let (first, second) = tokio::join!(spend(service.clone()), spend(service.clone()));
        let total = [first.unwrap().unwrap(), second.unwrap().unwrap()]
            .iter()
            .fold(zero_cents(), |sum, a| sum + &a.applied);
        assert_eq!(total, dec("10.00"));

        let card = h.store.get_gift_card(card.id).await.unwrap();
        assert_eq!(card.status, GiftCardStatus::Redeemed);
        assert_eq!(card.remaining_amount, dec("0.00"));

        let mut amounts: Vec<BigDecimal> = h
            .store
            .gift_card_transactions(card.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.amount)
            .collect();
        amounts.sort();
        assert_eq!(amounts, vec![dec("2.00"), dec("8.00")]);
    }

    #[tokio::test]
    async fn concurrent_purchases_get_distinct_codes() {
        let h = harness();
        let service = service(&h);
        let (buyer, holder) = (Uuid::new_v4(), Uuid::new_v4());

        let cards = futures::future::join_all((0..20).map(|_| {
            service.purchase(
                buyer,
                PurchaseGiftCardRequest {
                    amount: dec("10"),
                    message: None,
                    recipient_id: Some(holder),
                },
            )
        }))
        .await;
        let mut codes: Vec<String> = cards.into_iter().map(|c| c.unwrap().code).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 20);
        assert_eq!(service.list(holder).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn apply_requires_own_ride_and_transactions_are_private() {
        let h = harness();
        let service = service(&h);
        let rider = Uuid::new_v4();
        let card = card_for(&service, rider, "30").await;
        let ride = completed_ride(rider, Uuid::new_v4());
        h.store.insert_ride(ride.clone());

        let stranger = Uuid::new_v4();
        let err = service
            .apply(
                stranger,
                ApplyGiftCardRequest {
                    ride_id: ride.id,
                    amount: dec("5"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let applied = service
            .apply(
                rider,
                ApplyGiftCardRequest {
                    ride_id: ride.id,
                    amount: dec("26.42"),
                },
            )
            .await
            .unwrap();
        assert_eq!(applied.transactions[0].ride_id, Some(ride.id));

        let ledger = service.transactions(rider, card.id).await.unwrap();
        let spent = ledger.iter().fold(zero_cents(), |sum, t| sum + &t.amount);
        let card = h.store.get_gift_card(card.id).await.unwrap();
        assert_eq!(&card.original_amount - &spent, card.remaining_amount);
        assert!(matches!(
            service.transactions(stranger, card.id).await,
            Err(AppError::Forbidden(_))
        ));
    }
}
