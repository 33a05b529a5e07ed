use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttendanceStatus {
    Hadir,
    Terlambat,
    Sakit,
    Izin,
    Dispen,
    Alpha,
}

text_column!(AttendanceStatus);

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 6] = [
        AttendanceStatus::Hadir,
        AttendanceStatus::Terlambat,
        AttendanceStatus::Sakit,
        AttendanceStatus::Izin,
        AttendanceStatus::Dispen,
        AttendanceStatus::Alpha,
    ];

    /// The student was physically in class.
    pub fn is_present(self) -> bool {
        matches!(self, AttendanceStatus::Hadir | AttendanceStatus::Terlambat)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct Attendance {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 12)]
    pub student_id: u64,
    #[schema(example = 4)]
    pub schedule_id: u64,
    #[schema(example = "2026-07-14", format = "date", value_type = String)]
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub note: Option<String>,
    pub recorded_by: Option<u64>,
    /// Set while a leave permission owns this row.
    pub leave_permission_id: Option<u64>,
    pub absence_request_id: Option<u64>,
    /// Status the row had before a permission converted it.
    pub previous_status: Option<AttendanceStatus>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}
