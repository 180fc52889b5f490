use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::info;

use crate::error::AppError;
use crate::mailer::Mailer;
use crate::models::{confirmation_body, unique_order_id, OrderForm, OrderRecord, CONFIRMATION_SUBJECT};
use crate::sheets::{existing_order_ids, AnalyticsStore, OrderStore};

/// Records a submitted pre-order. No payment processing here: the row is
/// appended as pending and reconciled after the operator marks it paid.
pub struct IntakeHandler {
    store: Arc<dyn OrderStore>,
}

impl IntakeHandler {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    pub async fn submit(&self, form: OrderForm) -> Result<String, AppError> {
        let orders = self.store.list_orders().await?;
        let order_id = unique_order_id(&existing_order_ids(&orders));
        let record = OrderRecord::from_form(&form, order_id.clone());

        self.store.append_order(&record).await?;
        info!("Recorded pre-order {} (total {})", order_id, record.total);
        Ok(order_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub notified: usize,
}

/// Scans the order sheet for paid-but-unnotified rows, emails each a
/// confirmation, and flips the notified flag after the send succeeds.
pub struct ReconciliationJob {
    store: Arc<dyn OrderStore>,
    mailer: Arc<dyn Mailer>,
}

impl ReconciliationJob {
    pub fn new(store: Arc<dyn OrderStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self { store, mailer }
    }

    pub async fn run(&self) -> Result<ReconciliationReport, AppError> {
        let orders = self.store.list_orders().await?;
        let due: Vec<&OrderRecord> = orders.iter().filter(|o| o.awaiting_notification()).collect();

        if due.is_empty() {
            return Ok(ReconciliationReport { notified: 0 });
        }

        self.mailer.verify().await?;

        let mut notified = 0;
        for order in due {
            // A failed send aborts the rest of the batch; rows already
            // flagged in this run stay flagged.
            self.mailer
                .send(&order.email, CONFIRMATION_SUBJECT, &confirmation_body(order))
                .await?;
            self.store.mark_notified(&order.order_id).await?;
            notified += 1;
            info!("Sent payment confirmation for order {} to {}", order.order_id, order.email);
        }

        Ok(ReconciliationReport { notified })
    }
}

/// Bumps the per-day view counter for the QR-code page.
pub struct AnalyticsCounter {
    store: Arc<dyn AnalyticsStore>,
    timezone: Tz,
}

impl AnalyticsCounter {
    pub fn new(store: Arc<dyn AnalyticsStore>, timezone: Tz) -> Self {
        Self { store, timezone }
    }

    fn today(&self) -> String {
        Utc::now().with_timezone(&self.timezone).format("%-m/%-d/%Y").to_string()
    }

    pub async fn record_view(&self) -> Result<(), AppError> {
        let today = self.today();
        let counts = self.store.view_counts().await?;
        match counts.iter().find(|row| row.date == today) {
            Some(row) => self.store.set_count(&today, row.count + 1).await?,
            None => self.store.append_count(&today, 1).await?,
        }
        Ok(())
    }
}
