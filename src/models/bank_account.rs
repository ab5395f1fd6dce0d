// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::mask_account_number;
use crate::schema::bank_accounts;

/// Stored payout destination. The account number is only ever held
/// encrypted; `account_number_last4` feeds the masked view.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable)]
#[diesel(table_name = bank_accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BankAccount {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub bank_name: String,
    pub account_holder: String,
    pub account_number_encrypted: String,
    pub account_number_last4: String,
    pub routing_number: Option<String>,
    pub iban: Option<String>,
    pub swift_code: Option<String>,
    pub currency: String,
    pub is_primary: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the API returns for a bank account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccountView {
    pub id: Uuid,
    pub bank_name: String,
    pub account_holder: String,
    pub account_number: String,
    pub routing_number: Option<String>,
    pub iban: Option<String>,
    pub swift_code: Option<String>,
    pub currency: String,
    pub is_primary: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&BankAccount> for BankAccountView {
    fn from(account: &BankAccount) -> Self {
        Self {
            id: account.id,
            bank_name: account.bank_name.clone(),
            account_holder: account.account_holder.clone(),
            account_number: mask_account_number(&account.account_number_last4),
            routing_number: account.routing_number.clone(),
            iban: account.iban.clone(),
            swift_code: account.swift_code.clone(),
            currency: account.currency.clone(),
            is_primary: account.is_primary,
            is_verified: account.is_verified,
            created_at: account.created_at,
        }
    }
}
