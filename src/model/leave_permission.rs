use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};
use utoipa::ToSchema;

use super::attendance::AttendanceStatus;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeaveType {
    /// Going home before the school day ends.
    IzinPulang,
    Dispensasi,
    Sakit,
    Izin,
}

text_column!(LeaveType);

impl LeaveType {
    /// Attendance status written for lessons the permission covers.
    pub fn excuse_status(self) -> AttendanceStatus {
        match self {
            LeaveType::Sakit => AttendanceStatus::Sakit,
            LeaveType::Izin | LeaveType::IzinPulang => AttendanceStatus::Izin,
            LeaveType::Dispensasi => AttendanceStatus::Dispen,
        }
    }

    pub fn full_day_by_default(self) -> bool {
        matches!(self, LeaveType::Sakit | LeaveType::Izin)
    }
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LeaveStatus {
    Active,
    Returned,
    Expired,
    Cancelled,
}

text_column!(LeaveStatus);

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct LeavePermission {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 12)]
    pub student_id: u64,
    #[schema(example = 3)]
    pub class_id: u64,
    /// User who granted the permission
    #[schema(example = 7)]
    pub granted_by: u64,
    pub schedule_id: Option<u64>,
    pub leave_type: LeaveType,
    #[schema(example = "2026-07-14", format = "date", value_type = String)]
    pub date: NaiveDate,
    #[schema(example = "09:30:00", value_type = String)]
    pub start_time: NaiveTime,
    #[schema(example = "11:00:00", value_type = Option<String>)]
    pub end_time: Option<NaiveTime>,
    pub reason: String,
    pub attachment_path: Option<String>,
    pub status: LeaveStatus,
    pub is_full_day: bool,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub returned_at: Option<NaiveDateTime>,
    pub returned_by: Option<u64>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancelled_by: Option<u64>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub expired_at: Option<NaiveDateTime>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

impl LeavePermission {
    pub fn is_active(&self) -> bool {
        self.status == LeaveStatus::Active
    }
}

pub const LEAVE_PERMISSION_COLUMNS: &str = "id, student_id, class_id, granted_by, schedule_id, \
     leave_type, date, start_time, end_time, reason, attachment_path, status, is_full_day, \
     returned_at, returned_by, cancelled_at, cancelled_by, expired_at, created_at";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excuse_status_per_type() {
        assert_eq!(LeaveType::Sakit.excuse_status(), AttendanceStatus::Sakit);
        assert_eq!(LeaveType::IzinPulang.excuse_status(), AttendanceStatus::Izin);
        assert_eq!(LeaveType::Dispensasi.excuse_status(), AttendanceStatus::Dispen);
    }

    #[test]
    fn wire_names_match_database_values() {
        assert_eq!(LeaveType::IzinPulang.as_ref(), "izin_pulang");
        assert_eq!("dispensasi".parse::<LeaveType>().unwrap(), LeaveType::Dispensasi);
        assert_eq!(
            serde_json::to_value(LeaveStatus::Cancelled).unwrap(),
            serde_json::json!("cancelled")
        );
        assert!("pending".parse::<LeaveStatus>().is_err());
    }
}
