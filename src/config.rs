use anyhow::{Context, Result, anyhow};
use chrono::{FixedOffset, NaiveDateTime, Utc};
use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub access_token_ttl: usize,
    pub refresh_token_ttl: usize,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_refresh_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,
    pub cors_origin: String,

    // Uploads
    pub upload_dir: String,
    pub max_upload_bytes: usize,

    /// School local time, minutes east of UTC (WIB = 420)
    pub school_utc_offset_minutes: i32,
    /// Seconds between leave-permission expiry sweeps, 0 disables the task
    pub expiry_sweep_secs: u64,
    /// Lifetime of cached schedule days, in seconds
    pub schedule_cache_ttl_secs: u64,

    pub log_dir: String,
    pub log_level: tracing::Level,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests don't touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| anyhow!("{key} must be set"));

        let config = Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            access_token_ttl: parse_or(&lookup, "ACCESS_TOKEN_TTL", 900)?, // 15 min
            refresh_token_ttl: parse_or(&lookup, "REFRESH_TOKEN_TTL", 604_800)?, // 7 days

            rate_login_per_min: parse_or(&lookup, "RATE_LOGIN_PER_MIN", 60)?,
            rate_refresh_per_min: parse_or(&lookup, "RATE_REFRESH_PER_MIN", 30)?,
            rate_protected_per_min: parse_or(&lookup, "RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: lookup("API_PREFIX").unwrap_or_else(|| "/api".to_string()),
            cors_origin: lookup("CORS_ORIGIN")
                .unwrap_or_else(|| "http://localhost:5173".to_string()),

            upload_dir: lookup("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string()),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", 5 * 1024 * 1024)?,

            school_utc_offset_minutes: parse_or(&lookup, "SCHOOL_UTC_OFFSET_MINUTES", 420)?,
            expiry_sweep_secs: parse_or(&lookup, "EXPIRY_SWEEP_SECS", 300)?,
            schedule_cache_ttl_secs: parse_or(&lookup, "SCHEDULE_CACHE_TTL", 600)?,

            log_dir: lookup("LOG_DIR").unwrap_or_else(|| "logs".to_string()),
            log_level: parse_or(&lookup, "LOG_LEVEL", tracing::Level::DEBUG)?,
        };

        if config.jwt_secret.len() < 16 {
            return Err(anyhow!("JWT_SECRET must be at least 16 characters"));
        }
        config.school_offset()?;
        if config.schedule_cache_ttl_secs == 0 {
            return Err(anyhow!("SCHEDULE_CACHE_TTL must be positive"));
        }

        Ok(config)
    }

    pub fn school_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.school_utc_offset_minutes * 60).ok_or_else(|| {
            anyhow!(
                "SCHOOL_UTC_OFFSET_MINUTES out of range: {}",
                self.school_utc_offset_minutes
            )
        })
    }

    /// Current wall-clock time at the school.
    pub fn school_now(&self) -> NaiveDateTime {
        // offset is range-checked in from_env
        match self.school_offset() {
            Ok(offset) => Utc::now().with_timezone(&offset).naive_local(),
            Err(_) => Utc::now().naive_utc(),
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| anyhow!("{e}"))
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn base_vars() -> HashMap<&'static str, String> {
        HashMap::from([
            ("SERVER_ADDR", "127.0.0.1:8080".to_string()),
            ("DATABASE_URL", "mysql://root@localhost/absensi".to_string()),
            ("JWT_SECRET", "0123456789abcdef0123".to_string()),
        ])
    }

    pub(crate) fn test_config() -> Config {
        let vars = base_vars();
        Config::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    #[test]
    fn defaults_apply_when_optional_keys_missing() {
        let config = test_config();
        assert_eq!(config.access_token_ttl, 900);
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.school_utc_offset_minutes, 420);
        assert_eq!(config.log_level, tracing::Level::DEBUG);
    }

    #[test]
    fn missing_required_key_is_reported() {
        let mut vars = base_vars();
        vars.remove("JWT_SECRET");
        let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn malformed_number_names_the_key() {
        let mut vars = base_vars();
        vars.insert("EXPIRY_SWEEP_SECS", "soon".to_string());
        let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(format!("{err:#}").contains("EXPIRY_SWEEP_SECS"));
    }

    #[test]
    fn schedule_cache_ttl_is_configurable() {
        assert_eq!(test_config().schedule_cache_ttl_secs, 600);

        let mut vars = base_vars();
        vars.insert("SCHEDULE_CACHE_TTL", "60".to_string());
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.schedule_cache_ttl_secs, 60);

        vars.insert("SCHEDULE_CACHE_TTL", "0".to_string());
        assert!(Config::from_lookup(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn offset_outside_a_day_is_rejected() {
        let mut vars = base_vars();
        vars.insert("SCHOOL_UTC_OFFSET_MINUTES", "1500".to_string());
        assert!(Config::from_lookup(|k| vars.get(k).cloned()).is_err());
    }
}
