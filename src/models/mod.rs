// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

/// Declares a closed set of string-tagged values stored in a `VARCHAR` column.
///
/// The generated enum serializes to the same snake_case tags it is stored
/// with, so JSON bodies and rows agree on spelling.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize,
            diesel::AsExpression, diesel::FromSqlRow,
        )]
        #[diesel(sql_type = diesel::sql_types::Text)]
        $vis enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} {other:?}", stringify!($name))),
                }
            }
        }

        impl diesel::serialize::ToSql<diesel::sql_types::Text, diesel::pg::Pg> for $name {
            fn to_sql<'b>(
                &'b self,
                out: &mut diesel::serialize::Output<'b, '_, diesel::pg::Pg>,
            ) -> diesel::serialize::Result {
                <str as diesel::serialize::ToSql<diesel::sql_types::Text, diesel::pg::Pg>>::to_sql(
                    self.as_str(),
                    out,
                )
            }
        }

        impl diesel::deserialize::FromSql<diesel::sql_types::Text, diesel::pg::Pg> for $name {
            fn from_sql(bytes: diesel::pg::PgValue<'_>) -> diesel::deserialize::Result<Self> {
                let raw = <String as diesel::deserialize::FromSql<
                    diesel::sql_types::Text,
                    diesel::pg::Pg,
                >>::from_sql(bytes)?;
                raw.parse::<$name>().map_err(Into::into)
            }
        }
    };
}

pub mod bank_account;
pub mod earning;
pub mod gift_card;
pub mod goal;
pub mod loyalty;
pub mod payout;
pub mod ride;

pub use bank_account::{BankAccount, BankAccountView};
pub use earning::{
    DailyEarning, Earning, EarningBreakdown, EarningTotals, EarningType, EarningsSummary,
};
pub use gift_card::{GiftCard, GiftCardStatus, GiftCardTransaction};
pub use goal::{EarningGoal, GoalPeriod, GoalProgress};
pub use loyalty::{LoyaltyTier, PointsTransaction, PointsTransactionType, RiderLoyalty};
pub use payout::{Payout, PayoutMethod, PayoutStatus};
pub use ride::{FrequentRoute, Receipt, ReceiptLineItem, Ride, RideStatus, RiderStats};

/// Rounds to whole cents, keeping the scale at two digits.
pub fn cents(amount: &BigDecimal) -> BigDecimal {
    amount.round(2).with_scale(2)
}

pub fn zero_cents() -> BigDecimal {
    BigDecimal::zero().with_scale(2)
}

/// One page of rows plus the total row count of the unpaged query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        let total_pages = (total as f64 / request.page_size as f64).ceil() as i64;
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
            total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}

/// Page/page-size pair normalised into the store's `limit`/`offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub const DEFAULT_PAGE_SIZE: i64 = 20;
    pub const MAX_PAGE_SIZE: i64 = 100;

    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = page.filter(|p| *p >= 1).unwrap_or(1);
        let page_size = page_size
            .filter(|s| *s >= 1)
            .unwrap_or(Self::DEFAULT_PAGE_SIZE)
            .min(Self::MAX_PAGE_SIZE);
        Self { page, page_size }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    /// Saturates, so an absurd page number reads past the end instead of overflowing.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}
