use crate::{
    auth::auth::AuthUser,
    config::Config,
    error::{ApiError, ApiResult},
    lifecycle::store::{self, ChangeSummary},
    model::{
        absence_request::{ABSENCE_REQUEST_COLUMNS, AbsenceRequest, AbsenceStatus, AbsenceType},
        role::Role,
    },
    utils::{
        db_utils::{Filters, SqlValue, bind_all},
        pagination::{AbsenceRequestPage, Page},
        uploads::{self, UploadKind},
    },
};
use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

pub const MAX_SPAN_DAYS: i64 = 14;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitAbsence {
    pub request_type: AbsenceType,
    #[schema(example = "2026-07-14", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-07-15", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    #[schema(example = "Demam, surat dokter menyusul")]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReviewAbsence {
    #[schema(example = "Surat dokter sudah diterima")]
    pub note: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct AbsenceFilter {
    pub student_id: Option<u64>,
    pub class_id: Option<u64>,
    pub status: Option<AbsenceStatus>,
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    /// Items per page
    pub per_page: Option<u32>,
}

/// Checks a submission and returns the trimmed reason.
pub fn validate_submission(payload: &SubmitAbsence) -> ApiResult<String> {
    if payload.end_date < payload.start_date {
        return Err(ApiError::validation("end_date must not be before start_date"));
    }
    let span = (payload.end_date - payload.start_date).num_days() + 1;
    if span > MAX_SPAN_DAYS {
        return Err(ApiError::validation(format!(
            "An absence request may cover at most {MAX_SPAN_DAYS} days"
        )));
    }

    let reason = payload.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::validation("Reason is required"));
    }
    if reason.chars().count() > 1000 {
        return Err(ApiError::validation("Reason must be at most 1000 characters"));
    }
    Ok(reason.to_string())
}

async fn find_request(pool: &MySqlPool, id: u64) -> ApiResult<AbsenceRequest> {
    sqlx::query_as::<_, AbsenceRequest>(&format!(
        "SELECT {ABSENCE_REQUEST_COLUMNS} FROM absence_requests WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Absence request not found"))
}

async fn can_view(auth: &AuthUser, pool: &MySqlPool, request: &AbsenceRequest) -> ApiResult<bool> {
    if auth.role.is_student() {
        return Ok(auth.student_id() == Some(request.student_id));
    }
    if matches!(auth.role, Role::Guru) {
        return Ok(false);
    }
    auth.can_manage_class(pool, request.class_id).await
}

/* =========================
Submit
========================= */
#[utoipa::path(
    post,
    path = "/api/absence-requests",
    request_body = SubmitAbsence,
    responses(
        (status = 201, description = "Request submitted", body = AbsenceRequest),
        (status = 403, description = "Only students submit absence requests"),
        (status = 422, description = "Invalid dates or reason")
    ),
    security(("bearer_auth" = [])),
    tag = "Absence Request"
)]
#[instrument(skip(auth, pool, payload), fields(user_id = auth.user_id))]
pub async fn submit_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<SubmitAbsence>,
) -> ApiResult<HttpResponse> {
    let student_id = auth
        .student_id()
        .ok_or_else(|| ApiError::forbidden("Only students submit absence requests"))?;

    let reason = validate_submission(&payload)?;

    let class_id = sqlx::query_scalar::<_, u64>("SELECT class_id FROM student_profiles WHERE id = ?")
        .bind(student_id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| ApiError::forbidden("No student profile"))?;

    let result = sqlx::query(
        r#"
        INSERT INTO absence_requests (student_id, class_id, request_type, start_date, end_date, reason)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(student_id)
    .bind(class_id)
    .bind(payload.request_type)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(&reason)
    .execute(pool.get_ref())
    .await?;

    let request = find_request(pool.get_ref(), result.last_insert_id()).await?;
    info!(request_id = request.id, student_id, "Absence request submitted");

    Ok(HttpResponse::Created().json(request))
}

/* =========================
Reads
========================= */
#[utoipa::path(
    get,
    path = "/api/absence-requests",
    params(AbsenceFilter),
    responses(
        (status = 200, description = "Paginated absence requests", body = AbsenceRequestPage)
    ),
    security(("bearer_auth" = [])),
    tag = "Absence Request"
)]
pub async fn list_requests(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AbsenceFilter>,
) -> ApiResult<HttpResponse> {
    let page = Page::new(query.page, query.per_page);
    let mut filters = Filters::new();

    if auth.role.is_student() {
        let student_id = auth
            .student_id()
            .ok_or_else(|| ApiError::forbidden("No student profile"))?;
        filters.push("student_id = ?", SqlValue::U64(student_id));
    } else if !auth.role.is_manager() {
        // homeroom teachers see the classes they look after
        let teacher_id = auth
            .teacher_id()
            .ok_or_else(|| ApiError::forbidden("No teacher profile"))?;
        filters.push(
            "class_id IN (SELECT id FROM class_rooms WHERE homeroom_teacher_id = ?)",
            SqlValue::U64(teacher_id),
        );
    }

    filters
        .push_opt("student_id = ?", query.student_id)
        .push_opt("class_id = ?", query.class_id)
        .push_opt("status = ?", query.status.as_ref().map(AsRef::<str>::as_ref));
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM absence_requests{where_sql}");
    let total = bind_all!(sqlx::query_scalar::<_, i64>(&count_sql), &filters.values)
        .fetch_one(pool.get_ref())
        .await?;

    let sql = format!(
        "SELECT {ABSENCE_REQUEST_COLUMNS} FROM absence_requests{where_sql} \
         ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    let rows = bind_all!(sqlx::query_as::<_, AbsenceRequest>(&sql), &filters.values)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(page.wrap(rows, total)))
}

#[utoipa::path(
    get,
    path = "/api/absence-requests/{id}",
    params(("id" = u64, Path, description = "Absence request id")),
    responses(
        (status = 200, description = "Absence request", body = AbsenceRequest),
        (status = 404, description = "Absence request not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Absence Request"
)]
pub async fn get_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let request = find_request(pool.get_ref(), path.into_inner()).await?;
    if !can_view(&auth, pool.get_ref(), &request).await? {
        return Err(ApiError::not_found("Absence request not found"));
    }
    Ok(HttpResponse::Ok().json(request))
}

/* =========================
Review
========================= */
#[utoipa::path(
    post,
    path = "/api/absence-requests/{id}/approve",
    params(("id" = u64, Path, description = "Absence request id")),
    request_body(content = ReviewAbsence, description = "Optional review note"),
    responses(
        (status = 200, description = "Approved and attendance excused", body = ChangeSummary),
        (status = 403, description = "Homeroom teacher or Admin/Waka only"),
        (status = 404, description = "Absence request not found"),
        (status = 422, description = "Request is not pending")
    ),
    security(("bearer_auth" = [])),
    tag = "Absence Request"
)]
pub async fn approve_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    body: Option<web::Json<ReviewAbsence>>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let request = find_request(pool.get_ref(), id).await?;
    auth.require_class_manager(pool.get_ref(), request.class_id).await?;

    let note = review_note(body)?;
    let summary =
        store::approve_absence(pool.get_ref(), id, auth.user_id, note, config.school_now()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Absence request approved",
        "attendance": summary
    })))
}

#[utoipa::path(
    post,
    path = "/api/absence-requests/{id}/reject",
    params(("id" = u64, Path, description = "Absence request id")),
    request_body(content = ReviewAbsence, description = "Optional review note"),
    responses(
        (status = 200, description = "Rejected"),
        (status = 403, description = "Homeroom teacher or Admin/Waka only"),
        (status = 404, description = "Absence request not found"),
        (status = 422, description = "Request is not pending")
    ),
    security(("bearer_auth" = [])),
    tag = "Absence Request"
)]
pub async fn reject_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    body: Option<web::Json<ReviewAbsence>>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let request = find_request(pool.get_ref(), id).await?;
    auth.require_class_manager(pool.get_ref(), request.class_id).await?;

    let note = review_note(body)?;
    store::reject_absence(pool.get_ref(), id, auth.user_id, note, config.school_now()).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Absence request rejected" })))
}

fn review_note(body: Option<web::Json<ReviewAbsence>>) -> ApiResult<Option<String>> {
    let note = body
        .and_then(|b| b.into_inner().note)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    if note.as_ref().is_some_and(|n| n.chars().count() > 500) {
        return Err(ApiError::validation("Review note must be at most 500 characters"));
    }
    Ok(note)
}

/* =========================
Attachment
========================= */
#[utoipa::path(
    post,
    path = "/api/absence-requests/{id}/attachment",
    params(("id" = u64, Path, description = "Absence request id")),
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Field `file`: jpg, png or pdf"),
    responses(
        (status = 200, description = "Attachment stored"),
        (status = 404, description = "Absence request not found"),
        (status = 422, description = "Missing file, wrong type or too large")
    ),
    security(("bearer_auth" = [])),
    tag = "Absence Request"
)]
pub async fn upload_attachment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let request = find_request(pool.get_ref(), id).await?;

    // the student who filed it, or whoever may review it
    let allowed = match auth.student_id() {
        Some(student_id) => student_id == request.student_id,
        None => auth.can_manage_class(pool.get_ref(), request.class_id).await?,
    };
    if !allowed {
        return Err(ApiError::not_found("Absence request not found"));
    }

    let stored = uploads::save_upload(payload, "file", UploadKind::Attachment, &config).await?;

    let recorded = sqlx::query("UPDATE absence_requests SET attachment_path = ? WHERE id = ?")
        .bind(&stored)
        .bind(id)
        .execute(pool.get_ref())
        .await;
    uploads::discard_on_error(&config, &stored, recorded).await?;

    if let Some(old) = request.attachment_path {
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

    fn submission(start: (u32, u32), end: (u32, u32), reason: &str) -> SubmitAbsence {
        SubmitAbsence {
            request_type: AbsenceType::Sakit,
            start_date: NaiveDate::from_ymd_opt(2026, start.0, start.1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, end.0, end.1).unwrap(),
            reason: reason.into(),
        }
    }

    #[test]
    fn single_day_request_is_valid() {
        let reason = validate_submission(&submission((7, 14), (7, 14), " Demam ")).unwrap();
        assert_eq!(reason, "Demam");
    }

    #[test]
    fn fourteen_days_is_the_limit() {
        assert!(validate_submission(&submission((7, 1), (7, 14), "Rawat inap")).is_ok());
        assert!(matches!(
            validate_submission(&submission((7, 1), (7, 15), "Rawat inap")),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn reversed_range_and_blank_reason_are_rejected() {
        assert!(validate_submission(&submission((7, 15), (7, 14), "Demam")).is_err());
        assert!(validate_submission(&submission((7, 14), (7, 14), "  ")).is_err());
    }

    #[test]
    fn empty_review_note_becomes_none() {
        let body = web::Json(ReviewAbsence {
            note: Some("   ".into()),
        });
        assert_eq!(review_note(Some(body)).unwrap(), None);
        assert_eq!(review_note(None).unwrap(), None);
    }
}
