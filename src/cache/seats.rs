use redis::AsyncCommands;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CacheService;
use crate::services::availability::AvailableSeats;

// Поле хеша для выборки без фильтра по категории
const ALL_CATEGORIES: &str = "*";

fn seats_key(event_id: Uuid) -> String {
    format!("seats:{}", event_id)
}

fn category_field(category: Option<&str>) -> String {
    match category {
        Some(c) => format!("category:{}", c),
        None => ALL_CATEGORIES.to_string(),
    }
}

impl CacheService {
    // Получить закешированный список свободных мест
    pub async fn get_available_seats(&self, event_id: Uuid, category: Option<&str>) -> Option<AvailableSeats> {
        match self.get_seats_from_cache(event_id, category).await {
            Ok(Some(seats)) => {
                debug!(%event_id, "Seat listing served from cache");
                Some(seats)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(%event_id, "Seat cache read failed: {}", e);
                None
            }
        }
    }

    pub async fn save_available_seats(&self, seats: &AvailableSeats) {
        if let Err(e) = self.save_seats_to_cache(seats).await {
            warn!(event_id = %seats.event_id, "Seat cache write failed: {}", e);
        }
    }

    // Сбросить кеш мест события после любой мутации заявки
    pub async fn invalidate_seats(&self, event_id: Uuid) {
        let key = seats_key(event_id);
        let mut conn = self.redis.conn.clone();
        let result: Result<(), _> = conn.del(&key).await;
        match result {
            Ok(()) => info!(%event_id, "Invalidated seats cache"),
            Err(e) => warn!(%event_id, "Failed to invalidate seats cache: {}", e),
        }
    }

    // === Работа с кешем ===
    async fn get_seats_from_cache(
        &self,
        event_id: Uuid,
        category: Option<&str>,
    ) -> Result<Option<AvailableSeats>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.hget(seats_key(event_id), category_field(category)).await?;
        let Some(data) = data else {
            return Ok(None);
        };
        let seats = serde_json::from_str(&data).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
        })?;
        Ok(Some(seats))
    }

    async fn save_seats_to_cache(&self, seats: &AvailableSeats) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(seats).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let key = seats_key(seats.event_id);
        let mut conn = self.redis.conn.clone();
        let () = conn.hset(&key, category_field(seats.category.as_deref()), data).await?;
        let () = conn.expire(&key, self.ttl_seconds).await?;
        Ok(())
    }
}
