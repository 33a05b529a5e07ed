use anyhow::{Context, Result};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A school rarely has more than a few thousand accounts.
const FILTER_CAPACITY: usize = 20_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

static USERNAME_FILTER: Lazy<RwLock<CuckooFilter<String>>> =
    Lazy::new(|| RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)));

#[inline]
pub fn normalize(username: &str) -> String {
    username.trim().to_lowercase()
}

fn read() -> RwLockReadGuard<'static, CuckooFilter<String>> {
    USERNAME_FILTER.read().unwrap_or_else(|e| e.into_inner())
}

fn write() -> RwLockWriteGuard<'static, CuckooFilter<String>> {
    USERNAME_FILTER.write().unwrap_or_else(|e| e.into_inner())
}

/// False means the username is certainly free; true may be a false positive.
pub fn might_exist(username: &str) -> bool {
    read().contains(&normalize(username))
}

pub fn insert(username: &str) {
    write().add(&normalize(username));
}

pub fn remove(username: &str) {
    write().remove(&normalize(username));
}

/// true => username AVAILABLE
pub async fn is_username_available(pool: &MySqlPool, username: &str) -> Result<bool> {
    let username = normalize(username);

    // fast negative
    if !might_exist(&username) {
        return Ok(true);
    }

    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ? LIMIT 1)",
    )
    .bind(&username)
    .fetch_one(pool)
    .await
    .context("username lookup failed")?;

    Ok(!exists)
}

/// Load every username, streaming in batches so the write lock is held briefly.
pub async fn warmup_username_filter(pool: &MySqlPool, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_scalar::<_, String>("SELECT username FROM users").fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        batch.push(normalize(&row.context("DB row fetch failed")?));
        total += 1;

        if batch.len() == batch_size {
            insert_batch(&batch);
            batch.clear();
        }
    }

    if !batch.is_empty() {
        insert_batch(&batch);
    }

    tracing::info!(total, "Username filter warmup complete");
    Ok(())
}

fn insert_batch(usernames: &[String]) {
    let mut filter = write();
    for username in usernames {
        filter.add(username);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_names_are_found_case_insensitively() {
        insert("Guru.Fisika");
        assert!(might_exist("guru.fisika"));
        assert!(might_exist("  GURU.FISIKA "));

        remove("guru.fisika");
        assert!(!might_exist("guru.fisika"));
    }
}
