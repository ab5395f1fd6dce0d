// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Ledger counters exposed at `/metrics`.
pub struct Metrics {
    registry: Registry,
    pub earnings_recorded: IntCounterVec,
    pub payouts_issued: IntCounter,
    pub payout_status_changes: IntCounterVec,
    pub gift_card_deductions: IntCounter,
    pub points_movements: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("rideshare".to_string()), None)?;

        let earnings_recorded = IntCounterVec::new(
            Opts::new("earnings_recorded_total", "Earnings appended to the ledger"),
            &["type"],
        )?;
        let payouts_issued = IntCounter::new("payouts_issued_total", "Payouts issued")?;
        let payout_status_changes = IntCounterVec::new(
            Opts::new("payout_status_changes_total", "Payout state machine transitions"),
            &["status"],
        )?;
        let gift_card_deductions =
            IntCounter::new("gift_card_deductions_total", "Successful gift card deductions")?;
        let points_movements = IntCounterVec::new(
            Opts::new("points_movements_total", "Loyalty points credits and debits"),
            &["type"],
        )?;

        registry.register(Box::new(earnings_recorded.clone()))?;
        registry.register(Box::new(payouts_issued.clone()))?;
        registry.register(Box::new(payout_status_changes.clone()))?;
        registry.register(Box::new(gift_card_deductions.clone()))?;
        registry.register(Box::new(points_movements.clone()))?;

        Ok(Self {
            registry,
            earnings_recorded,
            payouts_issued,
            payout_status_changes,
            gift_card_deductions,
            points_movements,
        })
    }

    /// Prometheus text exposition of every registered counter.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_prefixed_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.earnings_recorded.with_label_values(&["tip"]).inc();
        metrics.payouts_issued.inc();
        let text = metrics.render().unwrap();
        assert!(text.contains("rideshare_earnings_recorded_total{type=\"tip\"} 1"));
        assert!(text.contains("rideshare_payouts_issued_total 1"));
    }
}
