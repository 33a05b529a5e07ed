use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Schedule {
    #[schema(example = 4)]
    pub id: u64,
    #[schema(example = 3)]
    pub class_id: u64,
    #[schema(example = 2)]
    pub subject_id: u64,
    /// Teacher profile id
    #[schema(example = 5)]
    pub teacher_id: u64,
    /// 1 = Monday .. 7 = Sunday
    #[schema(example = 1)]
    pub day_of_week: u8,
    #[schema(example = "07:00:00", value_type = String)]
    pub start_time: NaiveTime,
    #[schema(example = "08:30:00", value_type = String)]
    pub end_time: NaiveTime,
    pub room: Option<String>,
    pub image_path: Option<String>,
}

pub const SCHEDULE_COLUMNS: &str =
    "id, class_id, subject_id, teacher_id, day_of_week, start_time, end_time, room, image_path";

pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().number_from_monday() as u8
}

pub fn is_valid_day(day: u8) -> bool {
    (1..=7).contains(&day)
}

/// Two lessons overlap when each starts before the other ends.
pub fn overlaps(a: (NaiveTime, NaiveTime), b: (NaiveTime, NaiveTime)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn weekday_numbering_starts_monday() {
        // 2026-07-13 is a Monday
        let monday = NaiveDate::from_ymd_opt(2026, 7, 13).unwrap();
        assert_eq!(day_of_week(monday), 1);
        assert_eq!(day_of_week(monday.succ_opt().unwrap()), 2);
        let sunday = NaiveDate::from_ymd_opt(2026, 7, 19).unwrap();
        assert_eq!(day_of_week(sunday), 7);
    }

    #[test]
    fn back_to_back_lessons_do_not_overlap() {
        assert!(!overlaps((t(7, 0), t(8, 30)), (t(8, 30), t(10, 0))));
        assert!(overlaps((t(7, 0), t(8, 30)), (t(8, 0), t(9, 0))));
        assert!(overlaps((t(7, 0), t(12, 0)), (t(8, 0), t(9, 0))));
    }
}
