use crate::model::schedule::{SCHEDULE_COLUMNS, Schedule};
use moka::future::Cache;
use once_cell::sync::OnceCell;
use sqlx::MySqlPool;
use std::sync::Arc;
use std::time::Duration;

type DayCache = Cache<(u64, u8), Arc<Vec<Schedule>>>;

const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// (class_id, day_of_week) => that day's lessons ordered by start time
static SCHEDULE_CACHE: OnceCell<DayCache> = OnceCell::new();

fn build(ttl: Duration) -> DayCache {
    Cache::builder()
        .max_capacity(10_000)
        .time_to_live(ttl)
        .build()
}

/// Sets the entry lifetime. Call once at startup, before the first lookup.
pub fn init(ttl: Duration) {
    if SCHEDULE_CACHE.set(build(ttl)).is_err() {
        tracing::warn!("Schedule cache already initialised, TTL unchanged");
    }
}

fn cache() -> &'static DayCache {
    SCHEDULE_CACHE.get_or_init(|| build(DEFAULT_TTL))
}

/// Lessons of `class_id` on `day_of_week`, served from cache when possible.
pub async fn day_schedules(
    pool: &MySqlPool,
    class_id: u64,
    day_of_week: u8,
) -> Result<Arc<Vec<Schedule>>, sqlx::Error> {
    let key = (class_id, day_of_week);
    if let Some(hit) = cache().get(&key).await {
        return Ok(hit);
    }

    let rows = sqlx::query_as::<_, Schedule>(&format!(
        r#"
        SELECT {SCHEDULE_COLUMNS}
        FROM schedules
        WHERE class_id = ? AND day_of_week = ?
        ORDER BY start_time
        "#
    ))
    .bind(class_id)
    .bind(day_of_week)
    .fetch_all(pool)
    .await?;

    let rows = Arc::new(rows);
    cache().insert(key, rows.clone()).await;

    tracing::debug!(class_id, day_of_week, lessons = rows.len(), "Schedule cache filled");
    Ok(rows)
}

/// Drop a cached day after any schedule write touching it.
pub async fn invalidate(class_id: u64, day_of_week: u8) {
    cache().invalidate(&(class_id, day_of_week)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_uses_the_given_lifetime() {
        let cache = build(Duration::from_secs(42));
        assert_eq!(cache.policy().time_to_live(), Some(Duration::from_secs(42)));
    }
}
