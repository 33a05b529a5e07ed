use super::{conflict, delete_row};
use crate::{
    auth::auth::AuthUser,
    config::Config,
    error::{ApiError, ApiResult},
    model::schedule::{SCHEDULE_COLUMNS, Schedule, is_valid_day, overlaps},
    utils::{
        db_utils::{ColumnKind, Filters, SqlValue, Updatable, bind_all, build_update_sql, execute_update},
        pagination::{Page, SchedulePage},
        schedule_cache,
        uploads::{self, UploadKind},
    },
};
use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use chrono::NaiveTime;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::{MySql, MySqlPool, Transaction};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

const UPDATABLE: &Updatable = &[
    ("class_id", ColumnKind::U64),
    ("subject_id", ColumnKind::U64),
    ("teacher_id", ColumnKind::U64),
    ("day_of_week", ColumnKind::U64),
    ("start_time", ColumnKind::Time),
    ("end_time", ColumnKind::Time),
    ("room", ColumnKind::OptionalText),
];

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateSchedule {
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
    #[schema(example = "Lab 2")]
    pub room: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct ScheduleFilter {
    pub class_id: Option<u64>,
    pub teacher_id: Option<u64>,
    /// 1 = Monday .. 7 = Sunday
    pub day_of_week: Option<u8>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Checks times, weekday and clashes with the class's other lessons that day.
pub fn validate_slot(
    class_id: u64,
    day: u8,
    start: NaiveTime,
    end: NaiveTime,
    same_day: &[Schedule],
    ignore_id: Option<u64>,
) -> ApiResult<()> {
    if !is_valid_day(day) {
        return Err(ApiError::validation("day_of_week must be between 1 and 7"));
    }
    if start >= end {
        return Err(ApiError::validation("start_time must be before end_time"));
    }

    let clash = same_day.iter().find(|other| {
        Some(other.id) != ignore_id
            && other.class_id == class_id
            && other.day_of_week == day
            && overlaps((start, end), (other.start_time, other.end_time))
    });

    match clash {
        Some(other) => Err(ApiError::validation(format!(
            "Overlaps schedule {} ({} - {})",
            other.id, other.start_time, other.end_time
        ))),
        None => Ok(()),
    }
}

async fn lock_day(
    tx: &mut Transaction<'_, MySql>,
    class_id: u64,
    day: u8,
) -> ApiResult<Vec<Schedule>> {
    let rows = sqlx::query_as::<_, Schedule>(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE class_id = ? AND day_of_week = ? FOR UPDATE"
    ))
    .bind(class_id)
    .bind(day)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}

async fn find_schedule(pool: &MySqlPool, id: u64) -> ApiResult<Schedule> {
    sqlx::query_as::<_, Schedule>(&format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Schedule not found"))
}

#[utoipa::path(
    post,
    path = "/api/schedules",
    request_body = CreateSchedule,
    responses(
        (status = 201, description = "Schedule created", body = Schedule),
        (status = 403, description = "Admin/Waka only"),
        (status = 422, description = "Invalid times or weekday, overlap, or unknown class/subject/teacher", body = Object, example = json!({
            "message": "Overlaps schedule 7 (07:00:00 - 08:30:00)"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Schedule"
)]
pub async fn create_schedule(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateSchedule>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    let new = payload.into_inner();

    let mut tx = pool.begin().await?;
    let same_day = lock_day(&mut tx, new.class_id, new.day_of_week).await?;
    validate_slot(new.class_id, new.day_of_week, new.start_time, new.end_time, &same_day, None)?;

    let result = sqlx::query(
        r#"
        INSERT INTO schedules (class_id, subject_id, teacher_id, day_of_week, start_time, end_time, room)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.class_id)
    .bind(new.subject_id)
    .bind(new.teacher_id)
    .bind(new.day_of_week)
    .bind(new.start_time)
    .bind(new.end_time)
    .bind(new.room.as_deref().map(str::trim))
    .execute(&mut *tx)
    .await
    .map_err(|e| conflict(e, "Class, subject or teacher not found"))?;

    tx.commit().await?;
    schedule_cache::invalidate(new.class_id, new.day_of_week).await;

    let schedule = find_schedule(pool.get_ref(), result.last_insert_id()).await?;
    info!(schedule_id = schedule.id, class_id = schedule.class_id, "Schedule created");

    Ok(HttpResponse::Created().json(schedule))
}

#[utoipa::path(
    get,
    path = "/api/schedules",
    params(ScheduleFilter),
    responses((status = 200, description = "Paginated schedules by weekday and time", body = SchedulePage)),
    security(("bearer_auth" = [])),
    tag = "Schedule"
)]
pub async fn list_schedules(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<ScheduleFilter>,
) -> ApiResult<HttpResponse> {
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::new();
    filters
        .push_opt("class_id = ?", query.class_id)
        .push_opt("teacher_id = ?", query.teacher_id)
        .push_opt("day_of_week = ?", query.day_of_week.map(u64::from));
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM schedules{where_sql}");
    let total = bind_all!(sqlx::query_scalar::<_, i64>(&count_sql), &filters.values)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules{where_sql} \
         ORDER BY day_of_week, start_time, class_id LIMIT ? OFFSET ?"
    );
    let rows = bind_all!(sqlx::query_as::<_, Schedule>(&data_sql), &filters.values)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(page.wrap(rows, total)))
}

#[utoipa::path(
    get,
    path = "/api/schedules/{id}",
    params(("id" = u64, Path, description = "Schedule id")),
    responses(
        (status = 200, description = "Schedule found", body = Schedule),
        (status = 404, description = "Schedule not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Schedule"
)]
pub async fn get_schedule(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let schedule = find_schedule(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(schedule))
}

#[utoipa::path(
    put,
    path = "/api/schedules/{id}",
    params(("id" = u64, Path, description = "Schedule id")),
    request_body(content = Object, description = "Any of the create fields", example = json!({
        "start_time": "07:30",
        "end_time": "09:00"
    })),
    responses(
        (status = 200, description = "Schedule updated", body = Schedule),
        (status = 404, description = "Schedule not found"),
        (status = 422, description = "Unknown field, invalid times, or overlap")
    ),
    security(("bearer_auth" = [])),
    tag = "Schedule"
)]
pub async fn update_schedule(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    let id = path.into_inner();

    let current = find_schedule(pool.get_ref(), id).await?;
    let update = build_update_sql("schedules", &body, UPDATABLE, id)?;

    let class_id = match update.value_of("class_id") {
        Some(SqlValue::U64(v)) => *v,
        _ => current.class_id,
    };
    let day = match update.value_of("day_of_week") {
        Some(SqlValue::U64(v)) => u8::try_from(*v).unwrap_or(0),
        _ => current.day_of_week,
    };
    let start = match update.value_of("start_time") {
        Some(SqlValue::Time(v)) => *v,
        _ => current.start_time,
    };
    let end = match update.value_of("end_time") {
        Some(SqlValue::Time(v)) => *v,
        _ => current.end_time,
    };

    let mut tx = pool.begin().await?;
    let same_day = if is_valid_day(day) {
        lock_day(&mut tx, class_id, day).await?
    } else {
        Vec::new()
    };
    validate_slot(class_id, day, start, end, &same_day, Some(id))?;

    execute_update(&mut *tx, update)
        .await
        .map_err(|e| conflict(e, "Class, subject or teacher not found"))?;
    tx.commit().await?;

    schedule_cache::invalidate(current.class_id, current.day_of_week).await;
    schedule_cache::invalidate(class_id, day).await;

    let schedule = find_schedule(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(schedule))
}

#[utoipa::path(
    delete,
    path = "/api/schedules/{id}",
    params(("id" = u64, Path, description = "Schedule id")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 404, description = "Schedule not found"),
        (status = 422, description = "Schedule already has attendance")
    ),
    security(("bearer_auth" = [])),
    tag = "Schedule"
)]
pub async fn delete_schedule(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    let id = path.into_inner();

    let schedule = find_schedule(pool.get_ref(), id).await?;
    let response = delete_row(pool.get_ref(), "schedules", id, "Schedule").await?;

    schedule_cache::invalidate(schedule.class_id, schedule.day_of_week).await;
    if let Some(image) = schedule.image_path {
        uploads::remove_upload(&config, &image).await;
    }

    Ok(response)
}

#[utoipa::path(
    post,
    path = "/api/schedules/{id}/image",
    params(("id" = u64, Path, description = "Schedule id")),
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Field `image`: jpg, png or webp"),
    responses(
        (status = 200, description = "Image stored", body = Schedule),
        (status = 404, description = "Schedule not found"),
        (status = 422, description = "Missing file, wrong type or too large")
    ),
    security(("bearer_auth" = [])),
    tag = "Schedule"
)]
pub async fn upload_image(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    let id = path.into_inner();

    let current = find_schedule(pool.get_ref(), id).await?;
    let stored = uploads::save_upload(payload, "image", UploadKind::ScheduleImage, &config).await?;

    let recorded = sqlx::query("UPDATE schedules SET image_path = ? WHERE id = ?")
        .bind(&stored)
        .bind(id)
        .execute(pool.get_ref())
        .await;
    uploads::discard_on_error(&config, &stored, recorded).await?;

    if let Some(old) = current.image_path {
        uploads::remove_upload(&config, &old).await;
    }
    schedule_cache::invalidate(current.class_id, current.day_of_week).await;

    let schedule = find_schedule(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(schedule))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn lesson(id: u64, start: NaiveTime, end: NaiveTime) -> Schedule {
        Schedule {
            id,
            class_id: 3,
            subject_id: 2,
            teacher_id: 5,
            day_of_week: 1,
            start_time: start,
            end_time: end,
            room: None,
            image_path: None,
        }
    }

    #[test]
    fn overlapping_lesson_in_same_class_is_rejected() {
        let day = vec![lesson(7, t(7, 0), t(8, 30))];
        let err = validate_slot(3, 1, t(8, 0), t(9, 0), &day, None).unwrap_err();
        assert!(matches!(err, ApiError::Validation(msg) if msg.contains("schedule 7")));
    }

    #[test]
    fn back_to_back_lessons_are_fine() {
        let day = vec![lesson(7, t(7, 0), t(8, 30))];
        assert!(validate_slot(3, 1, t(8, 30), t(10, 0), &day, None).is_ok());
    }

    #[test]
    fn a_lesson_does_not_clash_with_itself_on_update() {
        let day = vec![lesson(7, t(7, 0), t(8, 30))];
        assert!(validate_slot(3, 1, t(7, 15), t(8, 45), &day, Some(7)).is_ok());
    }

    #[test]
    fn bad_weekday_or_reversed_times_are_rejected() {
        assert!(validate_slot(3, 0, t(7, 0), t(8, 0), &[], None).is_err());
        assert!(validate_slot(3, 8, t(7, 0), t(8, 0), &[], None).is_err());
        assert!(validate_slot(3, 1, t(8, 0), t(8, 0), &[], None).is_err());
    }

    #[test]
    fn updates_whitelist_schedule_columns() {
        let update = build_update_sql(
            "schedules",
            &json!({"start_time": "07:30", "room": null}),
            UPDATABLE,
            7,
        )
        .unwrap();
        assert_eq!(update.value_of("start_time"), Some(&SqlValue::Time(t(7, 30))));
        assert_eq!(update.value_of("room"), Some(&SqlValue::Null));
        assert!(build_update_sql("schedules", &json!({"image_path": "x"}), UPDATABLE, 7).is_err());
    }
}
