pub mod db_utils;
pub mod pagination;
pub mod schedule_cache;
pub mod uploads;
pub mod username_filter;
