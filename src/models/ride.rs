// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::rides;

text_enum! {
    pub enum RideStatus {
        Requested => "requested",
        Accepted => "accepted",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

/// Persisted ride with its final fare components. Read-only here; the
/// dispatch side of the backend owns writes.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = rides)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Ride {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: RideStatus,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub distance_km: BigDecimal,
    pub duration_minutes: i32,
    pub base_fare: BigDecimal,
    pub distance_fare: BigDecimal,
    pub time_fare: BigDecimal,
    pub surge_multiplier: BigDecimal,
    pub surge_amount: BigDecimal,
    pub wait_time_charge: BigDecimal,
    pub toll_charges: BigDecimal,
    pub discount_amount: BigDecimal,
    pub promo_code: Option<String>,
    pub tip_amount: BigDecimal,
    pub total_fare: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    pub rating: Option<i16>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptLineItem {
    pub label: String,
    pub amount: BigDecimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: String,
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub line_items: Vec<ReceiptLineItem>,
    pub subtotal: BigDecimal,
    pub fees: BigDecimal,
    pub discount: BigDecimal,
    pub tip: BigDecimal,
    pub total: BigDecimal,
    pub currency: String,
    pub payment_method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderStats {
    pub period: String,
    pub total_rides: i64,
    pub completed_rides: i64,
    pub cancelled_rides: i64,
    pub total_spent: BigDecimal,
    pub total_distance_km: BigDecimal,
    pub total_duration_minutes: i64,
    pub average_fare: BigDecimal,
    pub average_distance_km: BigDecimal,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequentRoute {
    pub pickup_address: String,
    pub dropoff_address: String,
    pub ride_count: i64,
    pub average_fare: BigDecimal,
    pub last_ride_at: DateTime<Utc>,
}
