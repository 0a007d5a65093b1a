pub mod cache;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::services::{
    AvailabilityQuery, CleanupService, PaymentSimulator, ReservationManager, ReservationPolicy,
    TicketIssuance, TicketPolicy,
};
use crate::store::{ClaimStore, PgClaimStore};

// Shared state для всего приложения
pub struct AppState {
    pub config: config::Config,
    /// `None` when running on the in-memory store.
    pub db: Option<database::Database>,
    pub cache: Option<cache::CacheService>,
    pub reservations: ReservationManager,
    pub tickets: TicketIssuance,
    pub availability: AvailabilityQuery,
    pub cleanup: CleanupService,
}

impl AppState {
    /// Postgres store, optional Redis cache, wall clock.
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::connect(&config.database).await?;
        db.run_migrations().await?;

        let cache = match &config.redis.url {
            Some(url) => match redis_client::RedisClient::new(url).await {
                Ok(redis) => {
                    info!("Redis connected");
                    Some(cache::CacheService::new(redis, config.redis.seat_cache_ttl_seconds))
                }
                // Без Redis сервис работает, просто без кеша мест
                Err(e) => {
                    warn!("Redis unavailable, seat cache disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        let store: Arc<dyn ClaimStore> = Arc::new(PgClaimStore::new(&db));
        Ok(Self::from_parts(config, store, Arc::new(SystemClock), Some(db), cache))
    }

    /// Wires the services over any store and clock.
    pub fn from_parts(
        config: config::Config,
        store: Arc<dyn ClaimStore>,
        clock: Arc<dyn Clock>,
        db: Option<database::Database>,
        cache: Option<cache::CacheService>,
    ) -> Arc<Self> {
        let mut reservations = ReservationManager::new(
            store.clone(),
            clock.clone(),
            ReservationPolicy::from_config(&config.reservations, &config.tickets),
        );
        if let Some(cache) = &cache {
            reservations = reservations.with_release_notifier(spawn_seat_invalidator(cache.clone()));
        }
        let payments = PaymentSimulator::from_config(&config.payment, store.clone(), clock.clone());
        let tickets = TicketIssuance::new(
            store.clone(),
            clock.clone(),
            TicketPolicy::from_config(&config.tickets),
            payments,
        );
        let availability = AvailabilityQuery::new(store, clock);
        let cleanup = CleanupService::new(
            reservations.clone(),
            cache.clone(),
            Duration::from_secs(config.reservations.sweep_interval_seconds),
        );

        Arc::new(Self { config, db, cache, reservations, tickets, availability, cleanup })
    }

    pub async fn invalidate_seats(&self, event_id: Uuid) {
        if let Some(cache) = &self.cache {
            cache.invalidate_seats(event_id).await;
        }
    }
}

// Сбрасывает кеш мест по событиям, которые освободил таймер брони
fn spawn_seat_invalidator(cache: cache::CacheService) -> mpsc::UnboundedSender<Uuid> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Uuid>();
    tokio::spawn(async move {
        while let Some(event_id) = rx.recv().await {
            cache.invalidate_seats(event_id).await;
        }
    });
    tx
}
