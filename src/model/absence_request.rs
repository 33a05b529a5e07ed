use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};
use utoipa::ToSchema;

use super::attendance::AttendanceStatus;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AbsenceType {
    Sakit,
    Izin,
}

text_column!(AbsenceType);

impl AbsenceType {
    pub fn attendance_status(self) -> AttendanceStatus {
        match self {
            AbsenceType::Sakit => AttendanceStatus::Sakit,
            AbsenceType::Izin => AttendanceStatus::Izin,
        }
    }
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AbsenceStatus {
    Pending,
    Approved,
    Rejected,
}

text_column!(AbsenceStatus);

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct AbsenceRequest {
    pub id: u64,
    pub student_id: u64,
    pub class_id: u64,
    pub request_type: AbsenceType,
    #[schema(example = "2026-07-14", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-07-15", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    pub reason: String,
    pub attachment_path: Option<String>,
    pub status: AbsenceStatus,
    pub reviewed_by: Option<u64>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub reviewed_at: Option<NaiveDateTime>,
    pub review_note: Option<String>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

pub const ABSENCE_REQUEST_COLUMNS: &str = "id, student_id, class_id, request_type, start_date, \
     end_date, reason, attachment_path, status, reviewed_by, reviewed_at, review_note, created_at";
