// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use diesel::allow_tables_to_appear_in_same_query;
use diesel::joinable;
use diesel::table;

table! {
    earnings (id) {
        id -> Uuid,
        driver_id -> Uuid,
        ride_id -> Nullable<Uuid>,
        delivery_id -> Nullable<Uuid>,
        earning_type -> Varchar,
        gross_amount -> Numeric,
        commission -> Numeric,
        net_amount -> Numeric,
        currency -> Varchar,
        description -> Text,
        is_paid_out -> Bool,
        payout_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

table! {
    payouts (id) {
        id -> Uuid,
        driver_id -> Uuid,
        amount -> Numeric,
        currency -> Varchar,
        method -> Varchar,
        status -> Varchar,
        bank_account_id -> Nullable<Uuid>,
        reference -> Varchar,
        earning_count -> Int4,
        period_start -> Timestamptz,
        period_end -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
        failure_reason -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    bank_accounts (id) {
        id -> Uuid,
        driver_id -> Uuid,
        bank_name -> Varchar,
        account_holder -> Varchar,
        account_number_encrypted -> Text,
        account_number_last4 -> Varchar,
        routing_number -> Nullable<Varchar>,
        iban -> Nullable<Varchar>,
        swift_code -> Nullable<Varchar>,
        currency -> Varchar,
        is_primary -> Bool,
        is_verified -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    earning_goals (id) {
        id -> Uuid,
        driver_id -> Uuid,
        target_amount -> Numeric,
        period -> Varchar,
        current_amount -> Numeric,
        currency -> Varchar,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    gift_cards (id) {
        id -> Uuid,
        code -> Varchar,
        purchaser_id -> Uuid,
        recipient_id -> Nullable<Uuid>,
        original_amount -> Numeric,
        remaining_amount -> Numeric,
        currency -> Varchar,
        status -> Varchar,
        message -> Nullable<Text>,
        expires_at -> Nullable<Timestamptz>,
        claimed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    gift_card_transactions (id) {
        id -> Uuid,
        card_id -> Uuid,
        user_id -> Uuid,
        ride_id -> Nullable<Uuid>,
        amount -> Numeric,
        balance_before -> Numeric,
        balance_after -> Numeric,
        description -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    rider_loyalty (rider_id) {
        rider_id -> Uuid,
        available_points -> Int8,
        lifetime_points -> Int8,
        tier -> Varchar,
        updated_at -> Timestamptz,
    }
}

table! {
    points_transactions (id) {
        id -> Uuid,
        rider_id -> Uuid,
        transaction_type -> Varchar,
        points -> Int8,
        balance_after -> Int8,
        source_id -> Nullable<Uuid>,
        description -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    rides (id) {
        id -> Uuid,
        rider_id -> Uuid,
        driver_id -> Nullable<Uuid>,
        status -> Varchar,
        pickup_address -> Varchar,
        dropoff_address -> Varchar,
        distance_km -> Numeric,
        duration_minutes -> Int4,
        base_fare -> Numeric,
        distance_fare -> Numeric,
        time_fare -> Numeric,
        surge_multiplier -> Numeric,
        surge_amount -> Numeric,
        wait_time_charge -> Numeric,
        toll_charges -> Numeric,
        discount_amount -> Numeric,
        promo_code -> Nullable<Varchar>,
        tip_amount -> Numeric,
        total_fare -> Numeric,
        currency -> Varchar,
        payment_method -> Varchar,
        rating -> Nullable<Int2>,
        requested_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
        cancelled_at -> Nullable<Timestamptz>,
    }
}

joinable!(earnings -> payouts (payout_id));
joinable!(payouts -> bank_accounts (bank_account_id));
joinable!(gift_card_transactions -> gift_cards (card_id));

allow_tables_to_appear_in_same_query!(
    earnings,
    payouts,
    bank_accounts,
    earning_goals,
    gift_cards,
    gift_card_transactions,
    rider_loyalty,
    points_transactions,
    rides,
);
