use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::CacheService;
use crate::error::ClaimResult;
use crate::services::reservations::{ReservationManager, SweepReport};

/// Периодическая зачистка истекших броней. Единственный авторитетный механизм
/// освобождения мест: таймеры в памяти теряются при рестарте, зачистка - нет.
#[derive(Clone)]
pub struct CleanupService {
    reservations: ReservationManager,
    cache: Option<CacheService>,
    interval: Duration,
}

impl CleanupService {
    pub fn new(reservations: ReservationManager, cache: Option<CacheService>, interval: Duration) -> Self {
        Self { reservations, cache, interval }
    }

    /// Один проход: отменяет просроченные брони и сбрасывает кеш затронутых событий.
    pub async fn run_once(&self) -> ClaimResult<SweepReport> {
        let report = self.reservations.cleanup_expired_reservations().await?;

        if let Some(cache) = &self.cache {
            for event_id in &report.events {
                cache.invalidate_seats(*event_id).await;
            }
        }
        Ok(report)
    }

    /// Запускает фоновый цикл зачистки.
    pub fn spawn(self) -> JoinHandle<()> {
        info!(interval_secs = self.interval.as_secs(), "🧹 Starting reservation sweep loop");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if report.cancelled > 0 => {
                        info!("🧹 Sweep released {} seats", report.cancelled)
                    }
                    Ok(_) => {}
                    Err(e) => error!("🧹 Sweep failed: {:?}", e),
                }
            }
        })
    }
}
