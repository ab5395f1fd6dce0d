// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PayoutIssued {
        driver_id: Uuid,
        payout_id: Uuid,
        amount: BigDecimal,
        reference: String,
    },
    BonusAwarded {
        driver_id: Uuid,
        amount: BigDecimal,
        description: String,
    },
}

impl Notification {
    pub fn recipient(&self) -> Uuid {
        match self {
            Notification::PayoutIssued { driver_id, .. } => *driver_id,
            Notification::BonusAwarded { driver_id, .. } => *driver_id,
        }
    }
}

/// Outbound user notifications. Delivery is best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log instead of a push provider.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()> {
        info!(recipient = %notification.recipient(), "Notification: {:?}", notification);
        Ok(())
    }
}

/// Sends on a detached task; failures are logged and dropped.
pub fn fire_and_forget(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(notification).await {
            warn!("Failed to deliver notification: {}", e);
        }
    });
}
