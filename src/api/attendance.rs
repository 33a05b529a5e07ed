use crate::{
    auth::auth::AuthUser,
    config::Config,
    error::{ApiError, ApiResult},
    model::{
        attendance::{Attendance, AttendanceStatus},
        leave_permission::LeaveStatus,
        schedule::{SCHEDULE_COLUMNS, Schedule, day_of_week},
    },
    utils::{
        db_utils::{ColumnKind, Filters, SqlValue, Updatable, bind_all, build_update_sql, execute_update},
        pagination::{AttendancePage, Page},
    },
};
use actix_web::{HttpResponse, web};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::MySqlPool;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

const ATTENDANCE_COLUMNS: &str = "a.id, a.student_id, a.schedule_id, a.date, a.status, a.note, \
     a.recorded_by, a.leave_permission_id, a.absence_request_id, a.previous_status, a.created_at";

const UPDATABLE: &Updatable = &[
    ("status", ColumnKind::Text),
    ("note", ColumnKind::OptionalText),
];

#[derive(Debug, Deserialize, ToSchema)]
pub struct SessionEntry {
    #[schema(example = 12)]
    pub student_id: u64,
    pub status: AttendanceStatus,
    #[schema(example = "Datang 10 menit terlambat")]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordSession {
    #[schema(example = 4)]
    pub schedule_id: u64,
    /// Defaults to today
    #[schema(example = "2026-07-14", format = "date", value_type = Option<String>)]
    pub date: Option<NaiveDate>,
    pub entries: Vec<SessionEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct SkippedEntry {
    pub student_id: u64,
    /// Permission that currently owns the student's row
    pub leave_permission_id: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResult {
    #[schema(example = 30)]
    pub recorded: u32,
    pub skipped: Vec<SkippedEntry>,
}

/// Current row for a student in the session, with the status of the
/// permission that owns it (if any).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub student_id: u64,
    pub leave_permission_id: Option<u64>,
    pub owner_status: Option<LeaveStatus>,
}

#[derive(Deserialize, IntoParams)]
pub struct AttendanceFilter {
    pub class_id: Option<u64>,
    pub student_id: Option<u64>,
    pub schedule_id: Option<u64>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_from: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_to: Option<NaiveDate>,
    pub status: Option<AttendanceStatus>,
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    /// Items per page
    pub per_page: Option<u32>,
}

#[derive(Deserialize, IntoParams)]
pub struct SummaryQuery {
    /// Required for staff; students always get their own
    pub student_id: Option<u64>,
    /// Defaults to the first day of the current month
    #[param(value_type = Option<String>, format = "date")]
    pub date_from: Option<NaiveDate>,
    /// Defaults to today
    #[param(value_type = Option<String>, format = "date")]
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct AttendanceCounts {
    pub hadir: i64,
    pub terlambat: i64,
    pub sakit: i64,
    pub izin: i64,
    pub dispen: i64,
    pub alpha: i64,
    pub total: i64,
}

impl AttendanceCounts {
    pub fn from_rows(rows: &[(AttendanceStatus, i64)]) -> Self {
        let mut counts = Self::default();
        for (status, n) in rows {
            let slot = match status {
                AttendanceStatus::Hadir => &mut counts.hadir,
                AttendanceStatus::Terlambat => &mut counts.terlambat,
                AttendanceStatus::Sakit => &mut counts.sakit,
                AttendanceStatus::Izin => &mut counts.izin,
                AttendanceStatus::Dispen => &mut counts.dispen,
                AttendanceStatus::Alpha => &mut counts.alpha,
            };
            *slot += n;
            counts.total += n;
        }
        counts
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttendanceSummary {
    pub student_id: u64,
    #[schema(format = "date", value_type = String)]
    pub date_from: NaiveDate,
    #[schema(format = "date", value_type = String)]
    pub date_to: NaiveDate,
    pub counts: AttendanceCounts,
}

/// Splits a session into the entries to write and the ones an active
/// leave permission holds.
pub fn plan_session<'a>(
    entries: &'a [SessionEntry],
    class_students: &HashSet<u64>,
    existing: &[SessionRow],
) -> ApiResult<(Vec<&'a SessionEntry>, Vec<SkippedEntry>)> {
    let held: HashMap<u64, u64> = existing
        .iter()
        .filter(|row| row.owner_status == Some(LeaveStatus::Active))
        .filter_map(|row| row.leave_permission_id.map(|id| (row.student_id, id)))
        .collect();

    let mut seen = HashSet::new();
    let mut write = Vec::with_capacity(entries.len());
    let mut skipped = Vec::new();

    for entry in entries {
        if !seen.insert(entry.student_id) {
            return Err(ApiError::validation(format!(
                "Student {} appears more than once",
                entry.student_id
            )));
        }
        if !class_students.contains(&entry.student_id) {
            return Err(ApiError::validation(format!(
                "Student {} is not in this class",
                entry.student_id
            )));
        }
        if entry.note.as_ref().is_some_and(|n| n.chars().count() > 255) {
            return Err(ApiError::validation("Note must be at most 255 characters"));
        }

        match held.get(&entry.student_id) {
            Some(&leave_permission_id) => skipped.push(SkippedEntry {
                student_id: entry.student_id,
                leave_permission_id,
            }),
            None => write.push(entry),
        }
    }

    Ok((write, skipped))
}

/* =========================
Record a lesson
========================= */
#[utoipa::path(
    post,
    path = "/api/attendance/sessions",
    request_body = RecordSession,
    responses(
        (status = 200, description = "Attendance recorded", body = SessionResult),
        (status = 403, description = "Not the lesson's teacher, homeroom teacher or Admin/Waka"),
        (status = 404, description = "Schedule not found"),
        (status = 422, description = "Wrong weekday, unknown student or duplicate entry")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
#[instrument(skip(auth, pool, config, payload), fields(user_id = auth.user_id, schedule_id = payload.schedule_id))]
pub async fn record_session(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<RecordSession>,
) -> ApiResult<HttpResponse> {
    auth.require_staff()?;

    let schedule = sqlx::query_as::<_, Schedule>(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?"
    ))
    .bind(payload.schedule_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::not_found("Schedule not found"))?;

    let teaches_it = auth.teacher_id() == Some(schedule.teacher_id);
    if !teaches_it && !auth.can_manage_class(pool.get_ref(), schedule.class_id).await? {
        return Err(ApiError::forbidden(
            "Only the lesson's teacher, the homeroom teacher or Admin/Waka may record attendance",
        ));
    }

    let date = payload.date.unwrap_or(config.school_now().date());
    if day_of_week(date) != schedule.day_of_week {
        return Err(ApiError::validation("Schedule is not held on that date"));
    }

    let class_students: HashSet<u64> =
        sqlx::query_scalar::<_, u64>("SELECT id FROM student_profiles WHERE class_id = ?")
            .bind(schedule.class_id)
            .fetch_all(pool.get_ref())
            .await?
            .into_iter()
            .collect();

    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, SessionRow>(
        r#"
        SELECT a.student_id, a.leave_permission_id, lp.status AS owner_status
        FROM attendances a
        LEFT JOIN student_leave_permissions lp ON lp.id = a.leave_permission_id
        WHERE a.schedule_id = ? AND a.date = ?
        FOR UPDATE
        "#,
    )
    .bind(schedule.id)
    .bind(date)
    .fetch_all(&mut *tx)
    .await?;

    let (write, skipped) = plan_session(&payload.entries, &class_students, &existing)?;

    for entry in &write {
        sqlx::query(
            r#"
            INSERT INTO attendances (student_id, schedule_id, date, status, note, recorded_by)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                status = VALUES(status),
                note = VALUES(note),
                recorded_by = VALUES(recorded_by),
                leave_permission_id = NULL,
                absence_request_id = NULL,
                previous_status = NULL
            "#,
        )
        .bind(entry.student_id)
        .bind(schedule.id)
        .bind(date)
        .bind(entry.status)
        .bind(entry.note.as_deref().map(str::trim))
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(%date, recorded = write.len(), skipped = skipped.len(), "Attendance recorded");

    Ok(HttpResponse::Ok().json(SessionResult {
        recorded: write.len() as u32,
        skipped,
    }))
}

/* =========================
List
========================= */
#[utoipa::path(
    get,
    path = "/api/attendance",
    params(AttendanceFilter),
    responses(
        (status = 200, description = "Paginated attendance, newest first", body = AttendancePage)
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn list_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AttendanceFilter>,
) -> ApiResult<HttpResponse> {
    let page = Page::new(query.page, query.per_page);
    let mut filters = Filters::new();

    if auth.role.is_student() {
        let student_id = auth
            .student_id()
            .ok_or_else(|| ApiError::forbidden("No student profile"))?;
        filters.push("a.student_id = ?", SqlValue::U64(student_id));
    }

    filters
        .push_opt("s.class_id = ?", query.class_id)
        .push_opt("a.student_id = ?", query.student_id)
        .push_opt("a.schedule_id = ?", query.schedule_id)
        .push_opt("a.date >= ?", query.date_from)
        .push_opt("a.date <= ?", query.date_to)
        .push_opt("a.status = ?", query.status.as_ref().map(AsRef::<str>::as_ref));
    let where_sql = filters.where_clause();

    let count_sql = format!(
        "SELECT COUNT(*) FROM attendances a JOIN schedules s ON s.id = a.schedule_id{where_sql}"
    );
    let total = bind_all!(sqlx::query_scalar::<_, i64>(&count_sql), &filters.values)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        r#"
        SELECT {ATTENDANCE_COLUMNS}
        FROM attendances a
        JOIN schedules s ON s.id = a.schedule_id
        {where_sql}
        ORDER BY a.date DESC, s.start_time, a.student_id
        LIMIT ? OFFSET ?
        "#
    );
    let rows = bind_all!(sqlx::query_as::<_, Attendance>(&data_sql), &filters.values)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(page.wrap(rows, total)))
}

/* =========================
Correct a row
========================= */
#[utoipa::path(
    put,
    path = "/api/attendance/{id}",
    params(("id" = u64, Path, description = "Attendance id")),
    request_body(content = Object, description = "Any of `status`, `note`", example = json!({
        "status": "hadir",
        "note": "Salah input"
    })),
    responses(
        (status = 200, description = "Attendance updated", body = Attendance),
        (status = 403, description = "Teachers and administrators only"),
        (status = 404, description = "Attendance not found"),
        (status = 422, description = "Unknown field or status")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn update_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<Value>,
) -> ApiResult<HttpResponse> {
    auth.require_staff()?;
    let id = path.into_inner();

    let update = build_update_sql("attendances", &payload, UPDATABLE, id)?;
    if let Some(SqlValue::String(status)) = update.value_of("status") {
        AttendanceStatus::from_str(status)
            .map_err(|_| ApiError::validation(format!("Unknown attendance status {status}")))?;
    }

    let mut tx = pool.begin().await?;

    let affected = execute_update(&mut *tx, update).await?;
    if affected == 0 {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM attendances WHERE id = ?)")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            return Err(ApiError::not_found("Attendance not found"));
        }
    }

    // a manual correction detaches the row from any permission or request
    sqlx::query(
        r#"
        UPDATE attendances
        SET recorded_by = ?, leave_permission_id = NULL, absence_request_id = NULL, previous_status = NULL
        WHERE id = ?
        "#,
    )
    .bind(auth.user_id)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query_as::<_, Attendance>(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendances a WHERE a.id = ?"
    ))
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(HttpResponse::Ok().json(row))
}

/* =========================
Summary
========================= */
#[utoipa::path(
    get,
    path = "/api/attendance/summary",
    params(SummaryQuery),
    responses(
        (status = 200, description = "Counts per status", body = AttendanceSummary),
        (status = 422, description = "Missing student or reversed range")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn attendance_summary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<SummaryQuery>,
) -> ApiResult<HttpResponse> {
    let student_id = if auth.role.is_student() {
        auth.student_id()
            .ok_or_else(|| ApiError::forbidden("No student profile"))?
    } else {
        query
            .student_id
            .ok_or_else(|| ApiError::validation("student_id is required"))?
    };

    let today = config.school_now().date();
    let date_to = query.date_to.unwrap_or(today);
    let date_from = query
        .date_from
        .or_else(|| date_to.with_day(1))
        .unwrap_or(date_to);
    if date_from > date_to {
        return Err(ApiError::validation("date_from must not be after date_to"));
    }

    let rows = sqlx::query_as::<_, (AttendanceStatus, i64)>(
        r#"
        SELECT status, COUNT(*)
        FROM attendances
        WHERE student_id = ? AND date BETWEEN ? AND ?
        GROUP BY status
        "#,
    )
    .bind(student_id)
    .bind(date_from)
    .bind(date_to)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(AttendanceSummary {
        student_id,
        date_from,
        date_to,
        counts: AttendanceCounts::from_rows(&rows),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(student_id: u64, status: AttendanceStatus) -> SessionEntry {
        SessionEntry {
            student_id,
            status,
            note: None,
        }
    }

    fn class() -> HashSet<u64> {
        [1, 2, 3].into_iter().collect()
    }

    #[test]
    fn rows_held_by_active_permission_are_skipped() {
        let entries = vec![
            entry(1, AttendanceStatus::Hadir),
            entry(2, AttendanceStatus::Alpha),
            entry(3, AttendanceStatus::Terlambat),
        ];
        let existing = vec![
            SessionRow {
                student_id: 2,
                leave_permission_id: Some(40),
                owner_status: Some(LeaveStatus::Active),
            },
            // permission already returned, the teacher may overwrite
            SessionRow {
                student_id: 3,
                leave_permission_id: Some(41),
                owner_status: Some(LeaveStatus::Returned),
            },
        ];

        let (write, skipped) = plan_session(&entries, &class(), &existing).unwrap();
        let written: Vec<u64> = write.iter().map(|e| e.student_id).collect();
        assert_eq!(written, vec![1, 3]);
        assert_eq!(
            skipped,
            vec![SkippedEntry {
                student_id: 2,
                leave_permission_id: 40
            }]
        );
    }

    #[test]
    fn students_outside_the_class_are_rejected() {
        let entries = vec![entry(9, AttendanceStatus::Hadir)];
        assert!(matches!(
            plan_session(&entries, &class(), &[]),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn duplicate_students_are_rejected() {
        let entries = vec![
            entry(1, AttendanceStatus::Hadir),
            entry(1, AttendanceStatus::Alpha),
        ];
        assert!(plan_session(&entries, &class(), &[]).is_err());
    }

    #[test]
    fn counts_fill_missing_statuses_with_zero() {
        let counts = AttendanceCounts::from_rows(&[
            (AttendanceStatus::Hadir, 18),
            (AttendanceStatus::Sakit, 2),
            (AttendanceStatus::Alpha, 1),
        ]);
        assert_eq!(counts.hadir, 18);
        assert_eq!(counts.izin, 0);
        assert_eq!(counts.total, 21);
    }

    #[test]
    fn only_status_and_note_are_updatable() {
        let ok = build_update_sql("attendances", &json!({"status": "izin"}), UPDATABLE, 5).unwrap();
        assert_eq!(ok.sql, "UPDATE attendances SET status = ? WHERE id = ?");

        let err = build_update_sql("attendances", &json!({"leave_permission_id": 3}), UPDATABLE, 5);
        assert!(matches!(err, Err(ApiError::Validation(_))));
    }
}
