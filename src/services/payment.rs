//! payment.rs
//!
//! Симулятор платежей. Реального шлюза нет: "списание" ждет искусственную
//! задержку, подписывает запись SHA-256 (как токены шлюза) и сохраняет ее
//! в хранилище. Подпись проверяется при подтверждении брони по `paymentRef`.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::PaymentConfig;
use crate::error::{ClaimError, ClaimResult};
use crate::models::{PaymentRecord, PaymentStatus, SeatClaim};
use crate::store::ClaimStore;

#[derive(Clone)]
pub struct PaymentSimulator {
    store: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
    /// Искусственная задержка "обработки" платежа.
    delay: Duration,
    /// Секрет для подписи записей.
    secret: Arc<str>,
}

impl PaymentSimulator {
    pub fn from_config(config: &PaymentConfig, store: Arc<dyn ClaimStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            delay: Duration::from_millis(config.processing_delay_ms),
            secret: Arc::from(config.signing_secret.as_str()),
        }
    }

    /// Подписывает поля платежа, по аналогии с токеном запроса к шлюзу.
    fn sign(&self, payment_id: Uuid, claim_id: Uuid, amount: i64, currency: &str) -> String {
        let token_string = format!("{}{}{}{}{}", payment_id, claim_id, amount, currency, self.secret);
        let mut hasher = Sha256::new();
        hasher.update(token_string.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn verify(&self, payment: &PaymentRecord) -> bool {
        payment.signature == self.sign(payment.id, payment.claim_id, payment.amount, &payment.currency)
    }

    /// Charges `amount` for the claim and stores a completed payment.
    pub async fn charge(&self, claim: &SeatClaim, amount: i64, currency: &str) -> ClaimResult<PaymentRecord> {
        if amount < 0 {
            return Err(ClaimError::invalid_field("price", "price cannot be negative"));
        }

        info!(claim_id = %claim.id, amount, currency, "Processing simulated payment");
        tokio::time::sleep(self.delay).await;

        let now = self.clock.now();
        let id = Uuid::new_v4();
        let payment = PaymentRecord {
            id,
            claim_id: claim.id,
            event_id: claim.event_id,
            attendee_id: claim.attendee_id,
            amount,
            currency: currency.to_string(),
            status: PaymentStatus::Completed,
            signature: self.sign(id, claim.id, amount, currency),
            refunded_amount: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_payment(&payment).await?;

        info!(payment_id = %payment.id, claim_id = %claim.id, "Payment completed");
        Ok(payment)
    }

    /// Voids a completed payment without touching its claim.
    pub async fn void(&self, payment_id: Uuid) -> ClaimResult<bool> {
        let voided = self
            .store
            .update_payment_status(
                payment_id,
                PaymentStatus::Completed,
                PaymentStatus::Cancelled,
                None,
                self.clock.now(),
            )
            .await?;
        if !voided {
            warn!(%payment_id, "Payment was not in 'completed', nothing voided");
        }
        Ok(voided)
    }

    /// Undoes [`PaymentSimulator::void`] when the cancellation could not finish.
    pub async fn restore(&self, payment_id: Uuid) -> ClaimResult<bool> {
        let restored = self
            .store
            .update_payment_status(
                payment_id,
                PaymentStatus::Cancelled,
                PaymentStatus::Completed,
                None,
                self.clock.now(),
            )
            .await?;
        if restored {
            info!(%payment_id, "Voided payment restored");
        }
        Ok(restored)
    }
}
