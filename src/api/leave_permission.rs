use crate::{
    auth::auth::AuthUser,
    config::Config,
    error::{ApiError, ApiResult},
    lifecycle::store::{self, ChangeSummary, NewLeavePermission},
    model::{
        leave_permission::{LEAVE_PERMISSION_COLUMNS, LeavePermission, LeaveStatus, LeaveType},
        role::Role,
        schedule::{SCHEDULE_COLUMNS, Schedule, day_of_week},
    },
    utils::{
        db_utils::{Filters, SqlValue, bind_all},
        pagination::{LeavePermissionPage, Page},
        uploads::{self, UploadKind},
    },
};
use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

const MAX_REASON_LEN: usize = 1000;

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantLeave {
    #[schema(example = 12)]
    pub student_id: u64,
    /// Optional, must match the student's class when given
    #[schema(example = 3)]
    pub class_id: Option<u64>,
    /// Lesson the permission is about; its times become the default window
    #[schema(example = 4)]
    pub schedule_id: Option<u64>,
    pub leave_type: LeaveType,
    /// Defaults to today
    #[schema(example = "2026-07-14", format = "date", value_type = Option<String>)]
    pub date: Option<NaiveDate>,
    /// Defaults to now (or the lesson start)
    #[schema(example = "09:30:00", value_type = Option<String>)]
    pub start_time: Option<NaiveTime>,
    /// Expected return time, if any
    #[schema(example = "11:00:00", value_type = Option<String>)]
    pub end_time: Option<NaiveTime>,
    #[schema(example = "Lomba debat tingkat kota")]
    pub reason: String,
    /// Defaults to true for `sakit`/`izin`, false otherwise
    pub is_full_day: Option<bool>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReturnLeave {
    /// Defaults to now
    #[schema(example = "10:40:00", value_type = Option<String>)]
    pub returned_at: Option<NaiveTime>,
}

#[derive(Deserialize, IntoParams)]
pub struct LeaveFilter {
    /// Filter by student profile
    pub student_id: Option<u64>,
    /// Filter by class
    pub class_id: Option<u64>,
    #[param(value_type = Option<String>, format = "date", example = "2026-07-14")]
    pub date: Option<NaiveDate>,
    pub status: Option<LeaveStatus>,
    pub leave_type: Option<LeaveType>,
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    /// Items per page
    pub per_page: Option<u32>,
}

#[derive(Deserialize, IntoParams)]
pub struct ActiveFilter {
    pub class_id: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct LeaveChangeResponse {
    #[schema(example = "Leave permission granted")]
    pub message: String,
    pub data: LeavePermission,
    pub attendance: ChangeSummary,
}

/// Student facts the grant rules check against.
#[derive(Debug, Clone, Copy)]
pub struct StudentContext {
    pub student_id: u64,
    pub class_id: u64,
}

/// Turns a request into a validated permission, filling in defaults.
pub fn validate_grant(
    payload: &GrantLeave,
    student: StudentContext,
    schedule: Option<&Schedule>,
    now: NaiveDateTime,
) -> ApiResult<NewLeavePermission> {
    if let Some(class_id) = payload.class_id {
        if class_id != student.class_id {
            return Err(ApiError::validation("Student does not belong to this class"));
        }
    }

    let reason = payload.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::validation("Reason is required"));
    }
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(ApiError::validation(format!(
            "Reason must be at most {MAX_REASON_LEN} characters"
        )));
    }

    let date = payload.date.unwrap_or(now.date());
    if date < now.date() {
        return Err(ApiError::validation("Leave permissions cannot be granted for past dates"));
    }

    if let Some(schedule) = schedule {
        if schedule.class_id != student.class_id {
            return Err(ApiError::validation("Schedule does not belong to the student's class"));
        }
        if schedule.day_of_week != day_of_week(date) {
            return Err(ApiError::validation("Schedule is not held on that date"));
        }
    }

    let is_full_day = payload
        .is_full_day
        .unwrap_or(payload.leave_type.full_day_by_default());

    let default_start = match schedule {
        Some(s) => s.start_time,
        None if date == now.date() => now.time(),
        None => NaiveTime::MIN,
    };
    let start_time = payload.start_time.unwrap_or(default_start);

    let end_time = if is_full_day {
        None
    } else {
        payload.end_time.or(schedule.map(|s| s.end_time))
    };

    if let Some(end) = end_time {
        if end <= start_time {
            return Err(ApiError::validation("end_time must be after start_time"));
        }
    }

    Ok(NewLeavePermission {
        student_id: student.student_id,
        class_id: student.class_id,
        schedule_id: schedule.map(|s| s.id),
        leave_type: payload.leave_type,
        date,
        start_time,
        end_time,
        reason: reason.to_string(),
        is_full_day,
    })
}

/// Restricts what students and class officers may see.
async fn scope_for(
    auth: &AuthUser,
    pool: &MySqlPool,
    filters: &mut Filters,
) -> ApiResult<()> {
    match auth.role {
        Role::Siswa => {
            let student_id = auth
                .student_id()
                .ok_or_else(|| ApiError::forbidden("No student profile"))?;
            filters.push("student_id = ?", SqlValue::U64(student_id));
        }
        Role::PengurusKelas => {
            let class_id = auth
                .own_class_id(pool)
                .await?
                .ok_or_else(|| ApiError::forbidden("No student profile"))?;
            filters.push("class_id = ?", SqlValue::U64(class_id));
        }
        _ => {}
    }
    Ok(())
}

async fn visible_permission(
    auth: &AuthUser,
    pool: &MySqlPool,
    id: u64,
) -> ApiResult<LeavePermission> {
    let permission = store::find_permission(pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Leave permission not found"))?;

    let visible = match auth.role {
        Role::Siswa => auth.student_id() == Some(permission.student_id),
        Role::PengurusKelas => auth.own_class_id(pool).await? == Some(permission.class_id),
        _ => true,
    };

    if visible {
        Ok(permission)
    } else {
        // don't reveal that it exists
        Err(ApiError::not_found("Leave permission not found"))
    }
}

/* =========================
Grant leave permission
========================= */
#[utoipa::path(
    post,
    path = "/api/leave-permissions",
    request_body = GrantLeave,
    responses(
        (status = 201, description = "Permission granted and attendance updated", body = LeaveChangeResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Only teachers and administrators may grant"),
        (status = 422, description = "Invalid request, or the student already has an active permission that day", body = Object, example = json!({
            "message": "Student already has an active leave permission for this date"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Permission"
)]
pub async fn grant_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<GrantLeave>,
) -> ApiResult<HttpResponse> {
    auth.require_staff()?;

    let class_id = sqlx::query_scalar::<_, u64>("SELECT class_id FROM student_profiles WHERE id = ?")
        .bind(payload.student_id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| ApiError::validation("Student not found"))?;

    let schedule = match payload.schedule_id {
        Some(schedule_id) => Some(
            sqlx::query_as::<_, Schedule>(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?"
            ))
            .bind(schedule_id)
            .fetch_optional(pool.get_ref())
            .await?
            .ok_or_else(|| ApiError::validation("Schedule not found"))?,
        ),
        None => None,
    };

    let new = validate_grant(
        &payload,
        StudentContext {
            student_id: payload.student_id,
            class_id,
        },
        schedule.as_ref(),
        config.school_now(),
    )?;

    let (permission, summary) = store::grant(pool.get_ref(), new, auth.user_id).await?;

    Ok(HttpResponse::Created().json(LeaveChangeResponse {
        message: "Leave permission granted".into(),
        data: permission,
        attendance: summary,
    }))
}

/* =========================
Mark returned
========================= */
#[utoipa::path(
    post,
    path = "/api/leave-permissions/{id}/return",
    params(("id" = u64, Path, description = "Leave permission id")),
    request_body(content = ReturnLeave, description = "Optional explicit return time"),
    responses(
        (status = 200, description = "Marked as returned", body = LeaveChangeResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Leave permission not found"),
        (status = 422, description = "Permission is not active, or the return time is invalid")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Permission"
)]
pub async fn return_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    body: Option<web::Json<ReturnLeave>>,
) -> ApiResult<HttpResponse> {
    auth.require_staff()?;
    let id = path.into_inner();

    let now = config.school_now();
    let returned_at = match body.and_then(|b| b.into_inner().returned_at) {
        Some(time) => {
            let permission = store::find_permission(pool.get_ref(), id)
                .await?
                .ok_or_else(|| ApiError::not_found("Leave permission not found"))?;
            let at = permission.date.and_time(time);
            if at > now {
                return Err(ApiError::validation("Return time cannot be in the future"));
            }
            at
        }
        None => now,
    };

    let (permission, summary) =
        store::mark_returned(pool.get_ref(), id, auth.user_id, returned_at).await?;

    Ok(HttpResponse::Ok().json(LeaveChangeResponse {
        message: "Student marked as returned".into(),
        data: permission,
        attendance: summary,
    }))
}

/* =========================
Cancel
========================= */
#[utoipa::path(
    post,
    path = "/api/leave-permissions/{id}/cancel",
    params(("id" = u64, Path, description = "Leave permission id")),
    responses(
        (status = 200, description = "Cancelled, attendance written by the permission undone", body = LeaveChangeResponse),
        (status = 403, description = "Only the granter or Admin/Waka may cancel"),
        (status = 404, description = "Leave permission not found"),
        (status = 422, description = "Permission is not active")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Permission"
)]
pub async fn cancel_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_staff()?;
    let id = path.into_inner();

    let permission = store::find_permission(pool.get_ref(), id)
        .await?
        .ok_or_else(|| ApiError::not_found("Leave permission not found"))?;

    if permission.granted_by != auth.user_id && !auth.role.is_manager() {
        return Err(ApiError::forbidden(
            "Only the granter or Admin/Waka may cancel a leave permission",
        ));
    }

    let (permission, summary) =
        store::cancel(pool.get_ref(), id, auth.user_id, config.school_now()).await?;

    Ok(HttpResponse::Ok().json(LeaveChangeResponse {
        message: "Leave permission cancelled".into(),
        data: permission,
        attendance: summary,
    }))
}

/* =========================
Expiry sweep
========================= */
#[utoipa::path(
    post,
    path = "/api/leave-permissions/check-expired",
    responses(
        (status = 200, description = "Sweep finished", body = Object, example = json!({
            "expired": 2,
            "attendance": {"created": 3, "converted": 0, "deleted": 0, "restored": 0}
        })),
        (status = 403, description = "Admin/Waka only")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Permission"
)]
pub async fn check_expired(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;

    let (expired, summary) = store::expire_due(pool.get_ref(), config.school_now()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "expired": expired,
        "attendance": summary
    })))
}

/* =========================
Reads
========================= */
#[utoipa::path(
    get,
    path = "/api/leave-permissions/{id}",
    params(("id" = u64, Path, description = "Leave permission id")),
    responses(
        (status = 200, description = "Leave permission", body = LeavePermission),
        (status = 404, description = "Leave permission not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Permission"
)]
pub async fn get_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let permission = visible_permission(&auth, pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(permission))
}

#[utoipa::path(
    get,
    path = "/api/leave-permissions",
    params(LeaveFilter),
    responses(
        (status = 200, description = "Paginated leave permissions, newest first", body = LeavePermissionPage),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Permission"
)]
pub async fn list_leaves(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<LeaveFilter>,
) -> ApiResult<HttpResponse> {
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::new();
    scope_for(&auth, pool.get_ref(), &mut filters).await?;
    filters
        .push_opt("student_id = ?", query.student_id)
        .push_opt("class_id = ?", query.class_id)
        .push_opt("date = ?", query.date)
        .push_opt("status = ?", query.status.as_ref().map(AsRef::<str>::as_ref))
        .push_opt("leave_type = ?", query.leave_type.as_ref().map(AsRef::<str>::as_ref));
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM student_leave_permissions{where_sql}");
    let total = bind_all!(sqlx::query_scalar::<_, i64>(&count_sql), &filters.values)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        r#"
        SELECT {LEAVE_PERMISSION_COLUMNS}
        FROM student_leave_permissions
        {where_sql}
        ORDER BY date DESC, start_time DESC, id DESC
        LIMIT ? OFFSET ?
        "#
    );
    let rows = bind_all!(sqlx::query_as::<_, LeavePermission>(&data_sql), &filters.values)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(page.wrap(rows, total)))
}

#[utoipa::path(
    get,
    path = "/api/leave-permissions/active",
    params(ActiveFilter),
    responses(
        (status = 200, description = "Active permissions today, by start time", body = [LeavePermission])
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Permission"
)]
pub async fn active_leaves(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<ActiveFilter>,
) -> ApiResult<HttpResponse> {
    let mut filters = Filters::new();
    scope_for(&auth, pool.get_ref(), &mut filters).await?;
    filters
        .push("status = ?", SqlValue::from(LeaveStatus::Active.as_ref()))
        .push("date = ?", config.school_now().date().into())
        .push_opt("class_id = ?", query.class_id);

    let sql = format!(
        "SELECT {LEAVE_PERMISSION_COLUMNS} FROM student_leave_permissions{} ORDER BY start_time",
        filters.where_clause()
    );
    let rows = bind_all!(sqlx::query_as::<_, LeavePermission>(&sql), &filters.values)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(rows))
}

/* =========================
Attachment
========================= */
#[utoipa::path(
    post,
    path = "/api/leave-permissions/{id}/attachment",
    params(("id" = u64, Path, description = "Leave permission id")),
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Field `file`: jpg, png or pdf"),
    responses(
        (status = 200, description = "Attachment stored", body = Object, example = json!({
            "message": "Attachment uploaded",
            "path": "attachments/0b6f7c2e-3d5a-4a8e-9d8b-2f4f5e1c9a10.pdf"
        })),
        (status = 404, description = "Leave permission not found"),
        (status = 422, description = "Missing file, wrong type or too large")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Permission"
)]
pub async fn upload_attachment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    auth.require_staff()?;
    let id = path.into_inner();

    let permission = store::find_permission(pool.get_ref(), id)
        .await?
        .ok_or_else(|| ApiError::not_found("Leave permission not found"))?;

    let stored = uploads::save_upload(payload, "file", UploadKind::Attachment, &config).await?;

    let recorded = sqlx::query("UPDATE student_leave_permissions SET attachment_path = ? WHERE id = ?")
        .bind(&stored)
        .bind(id)
        .execute(pool.get_ref())
        .await;
    uploads::discard_on_error(&config, &stored, recorded).await?;

    if let Some(old) = permission.attachment_path {
        uploads::remove_upload(&config, &old).await;
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "Attachment uploaded",
        "path": stored
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        // Tuesday
        NaiveDate::from_ymd_opt(2026, 7, 14)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn student() -> StudentContext {
        StudentContext {
            student_id: 12,
            class_id: 3,
        }
    }

    fn request(leave_type: LeaveType) -> GrantLeave {
        GrantLeave {
            student_id: 12,
            class_id: None,
            schedule_id: None,
            leave_type,
            date: None,
            start_time: None,
            end_time: None,
            reason: "  Sakit perut  ".into(),
            is_full_day: None,
        }
    }

    fn schedule(class_id: u64, day: u8) -> Schedule {
        Schedule {
            id: 4,
            class_id,
            subject_id: 2,
            teacher_id: 5,
            day_of_week: day,
            start_time: t(10, 15),
            end_time: t(11, 45),
            room: None,
            image_path: None,
        }
    }

    #[test]
    fn sick_leave_defaults_to_full_day_today() {
        let new = validate_grant(&request(LeaveType::Sakit), student(), None, now()).unwrap();
        assert!(new.is_full_day);
        assert_eq!(new.date, now().date());
        assert_eq!(new.end_time, None);
        assert_eq!(new.reason, "Sakit perut");
    }

    #[test]
    fn going_home_starts_now_when_no_time_given() {
        let new = validate_grant(&request(LeaveType::IzinPulang), student(), None, now()).unwrap();
        assert!(!new.is_full_day);
        assert_eq!(new.start_time, t(9, 15));
    }

    #[test]
    fn dispensation_for_a_lesson_takes_its_times() {
        let mut req = request(LeaveType::Dispensasi);
        req.schedule_id = Some(4);
        let lesson = schedule(3, 2);

        let new = validate_grant(&req, student(), Some(&lesson), now()).unwrap();
        assert_eq!(new.schedule_id, Some(4));
        assert_eq!(new.start_time, t(10, 15));
        assert_eq!(new.end_time, Some(t(11, 45)));
    }

    #[test]
    fn lesson_from_another_class_or_day_is_rejected() {
        let req = request(LeaveType::Dispensasi);
        assert!(validate_grant(&req, student(), Some(&schedule(9, 2)), now()).is_err());
        assert!(validate_grant(&req, student(), Some(&schedule(3, 3)), now()).is_err());
    }

    #[test]
    fn end_must_follow_start() {
        let mut req = request(LeaveType::Izin);
        req.is_full_day = Some(false);
        req.start_time = Some(t(10, 0));
        req.end_time = Some(t(10, 0));
        assert!(matches!(
            validate_grant(&req, student(), None, now()),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn full_day_ignores_end_time() {
        let mut req = request(LeaveType::Izin);
        req.start_time = Some(t(10, 0));
        req.end_time = Some(t(8, 0));
        let new = validate_grant(&req, student(), None, now()).unwrap();
        assert_eq!(new.end_time, None);
    }

    #[test]
    fn blank_reason_wrong_class_and_past_dates_are_rejected() {
        let mut req = request(LeaveType::Izin);
        req.reason = "   ".into();
        assert!(validate_grant(&req, student(), None, now()).is_err());

        let mut req = request(LeaveType::Izin);
        req.class_id = Some(4);
        assert!(validate_grant(&req, student(), None, now()).is_err());

        let mut req = request(LeaveType::Izin);
        req.date = now().date().pred_opt();
        assert!(validate_grant(&req, student(), None, now()).is_err());
    }

    #[test]
    fn future_date_without_time_starts_at_midnight() {
        let mut req = request(LeaveType::IzinPulang);
        req.date = now().date().succ_opt();
        let new = validate_grant(&req, student(), None, now()).unwrap();
        assert_eq!(new.start_time, NaiveTime::MIN);
    }
}
