// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

//! Read-only derivations over ledger and ride rows.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::models::{
    cents, zero_cents, DailyEarning, Earning, EarningBreakdown, EarningTotals, EarningType,
    FrequentRoute, Receipt, ReceiptLineItem, Ride, RideStatus, RiderStats,
};
use crate::store::LedgerSummary;

pub fn summarize<'a>(earnings: impl IntoIterator<Item = &'a Earning>) -> LedgerSummary {
    let mut totals = EarningTotals::default();
    let mut by_type: HashMap<EarningType, EarningBreakdown> = HashMap::new();
    for earning in earnings {
        totals.gross += &earning.gross_amount;
        totals.commission += &earning.commission;
        totals.net += &earning.net_amount;
        let entry = by_type
            .entry(earning.earning_type)
            .or_insert_with(|| EarningBreakdown {
                earning_type: earning.earning_type,
                amount: zero_cents(),
                count: 0,
            });
        entry.amount += &earning.net_amount;
        entry.count += 1;
    }
    LedgerSummary {
        totals,
        by_type: sort_breakdown(by_type.into_values().collect()),
    }
}

/// Largest net first; ties keep the declaration order of [`EarningType`].
pub fn sort_breakdown(mut rows: Vec<EarningBreakdown>) -> Vec<EarningBreakdown> {
    let rank = |t: EarningType| EarningType::ALL.iter().position(|x| *x == t).unwrap_or(usize::MAX);
    rows.sort_by(|a, b| {
        b.amount
            .cmp(&a.amount)
            .then_with(|| rank(a.earning_type).cmp(&rank(b.earning_type)))
    });
    rows
}

pub fn rollup_daily<'a>(
    earnings: impl IntoIterator<Item = &'a Earning>,
    zone: FixedOffset,
) -> Vec<DailyEarning> {
    let mut days: BTreeMap<NaiveDate, DailyEarning> = BTreeMap::new();
    for earning in earnings {
        let date = earning.created_at.with_timezone(&zone).date_naive();
        let day = days.entry(date).or_insert_with(|| DailyEarning {
            date,
            gross: zero_cents(),
            commission: zero_cents(),
            net: zero_cents(),
            count: 0,
        });
        day.gross += &earning.gross_amount;
        day.commission += &earning.commission;
        day.net += &earning.net_amount;
        day.count += 1;
    }
    days.into_values().collect()
}

/// Line items in fixed order: base, distance, time, surge, wait time, tolls,
/// discount, tip. The last five only appear when non-zero.
pub fn build_receipt(ride: &Ride, receipt_id: String) -> Receipt {
    let mut items = vec![
        item("Base fare", &ride.base_fare, None),
        item(
            "Distance",
            &ride.distance_fare,
            Some(format!("{} km", cents(&ride.distance_km))),
        ),
        item(
            "Time",
            &ride.time_fare,
            Some(format!("{} min", ride.duration_minutes)),
        ),
    ];
    if ride.surge_amount > BigDecimal::zero() {
        items.push(item(
            "Surge",
            &ride.surge_amount,
            Some(format!("{}x", cents(&ride.surge_multiplier))),
        ));
    }
    if ride.wait_time_charge > BigDecimal::zero() {
        items.push(item("Wait time", &ride.wait_time_charge, None));
    }
    if ride.toll_charges > BigDecimal::zero() {
        items.push(item("Tolls", &ride.toll_charges, None));
    }
    if ride.discount_amount > BigDecimal::zero() {
        let label = match &ride.promo_code {
            Some(code) => format!("Discount ({code})"),
            None => "Discount".to_string(),
        };
        items.push(ReceiptLineItem {
            label,
            amount: cents(&-ride.discount_amount.clone()),
            detail: None,
        });
    }
    if ride.tip_amount > BigDecimal::zero() {
        items.push(item("Tip", &ride.tip_amount, None));
    }

    let subtotal = &ride.base_fare + &ride.distance_fare + &ride.time_fare + &ride.surge_amount;
    let fees = &ride.toll_charges + &ride.wait_time_charge;

    Receipt {
        receipt_id,
        ride_id: ride.id,
        rider_id: ride.rider_id,
        driver_id: ride.driver_id,
        pickup_address: ride.pickup_address.clone(),
        dropoff_address: ride.dropoff_address.clone(),
        completed_at: ride.completed_at,
        line_items: items,
        subtotal: cents(&subtotal),
        fees: cents(&fees),
        discount: cents(&ride.discount_amount),
        tip: cents(&ride.tip_amount),
        total: cents(&ride.total_fare),
        currency: ride.currency.clone(),
        payment_method: ride.payment_method.clone(),
    }
}

fn item(label: &str, amount: &BigDecimal, detail: Option<String>) -> ReceiptLineItem {
    ReceiptLineItem {
        label: label.to_string(),
        amount: cents(amount),
        detail,
    }
}

pub fn rider_stats<'a>(rides: impl IntoIterator<Item = &'a Ride>, period: &str) -> RiderStats {
    let mut total_rides = 0i64;
    let mut cancelled_rides = 0i64;
    let mut completed_rides = 0i64;
    let mut total_spent = zero_cents();
    let mut total_distance = zero_cents();
    let mut total_duration = 0i64;
    let mut rating_sum = 0i64;
    let mut rating_count = 0i64;

    for ride in rides {
        total_rides += 1;
        match ride.status {
            RideStatus::Completed => {
                completed_rides += 1;
                total_spent += &ride.total_fare;
                total_distance += &ride.distance_km;
                total_duration += i64::from(ride.duration_minutes);
                if let Some(rating) = ride.rating {
                    rating_sum += i64::from(rating);
                    rating_count += 1;
                }
            }
            RideStatus::Cancelled => cancelled_rides += 1,
            _ => {}
        }
    }

    RiderStats {
        period: period.to_string(),
        total_rides,
        completed_rides,
        cancelled_rides,
        average_fare: average(&total_spent, completed_rides),
        average_distance_km: average(&total_distance, completed_rides),
        total_spent: cents(&total_spent),
        total_distance_km: cents(&total_distance),
        total_duration_minutes: total_duration,
        average_rating: (rating_count > 0).then(|| rating_sum as f64 / rating_count as f64),
    }
}

pub fn average(total: &BigDecimal, count: i64) -> BigDecimal {
    if count == 0 {
        return zero_cents();
    }
    cents(&(total / BigDecimal::from(count)))
}

pub fn frequent_routes<'a>(
    rides: impl IntoIterator<Item = &'a Ride>,
    limit: usize,
) -> Vec<FrequentRoute> {
    let mut groups: HashMap<(&str, &str), (i64, BigDecimal, DateTime<Utc>)> = HashMap::new();
    for ride in rides.into_iter().filter(|r| r.status == RideStatus::Completed) {
        let at = ride.completed_at.unwrap_or(ride.requested_at);
        let entry = groups
            .entry((ride.pickup_address.as_str(), ride.dropoff_address.as_str()))
            .or_insert_with(|| (0, zero_cents(), at));
        entry.0 += 1;
        entry.1 += &ride.total_fare;
        entry.2 = entry.2.max(at);
    }

    let mut routes: Vec<FrequentRoute> = groups
        .into_iter()
        .filter(|(_, (count, _, _))| *count >= 2)
        .map(|((pickup, dropoff), (count, fares, last))| FrequentRoute {
            pickup_address: pickup.to_string(),
            dropoff_address: dropoff.to_string(),
            ride_count: count,
            average_fare: average(&fares, count),
            last_ride_at: last,
        })
        .collect();
    routes.sort_by(|a, b| {
        b.ride_count
            .cmp(&a.ride_count)
            .then_with(|| b.last_ride_at.cmp(&a.last_ride_at))
    });
    routes.truncate(limit);
    routes
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;
    use uuid::Uuid;

    pub fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    pub fn completed_ride(rider_id: Uuid, driver_id: Uuid) -> Ride {
        let at = Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();
        Ride {
            id: Uuid::new_v4(),
            rider_id,
            driver_id: Some(driver_id),
            status: RideStatus::Completed,
            pickup_address: "1 Market St".into(),
            dropoff_address: "500 Airport Blvd".into(),
            distance_km: dec("12.40"),
            duration_minutes: 25,
            base_fare: dec("3.00"),
            distance_fare: dec("9.92"),
            time_fare: dec("5.00"),
            surge_multiplier: dec("1.50"),
            surge_amount: dec("4.00"),
            wait_time_charge: dec("1.00"),
            toll_charges: dec("2.50"),
            discount_amount: dec("3.00"),
            promo_code: Some("SPRING24".into()),
            tip_amount: dec("4.00"),
            // 21.92 + 3.50 - 3.00 + 4.00
            total_fare: dec("26.42"),
            currency: "USD".into(),
            payment_method: "card".into(),
            rating: Some(5),
            requested_at: at,
            completed_at: Some(at + chrono::Duration::minutes(30)),
            cancelled_at: None,
        }
    }
}
