use super::{apply_update, conflict, delete_row};
use crate::{
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::class_room::ClassRoom,
    utils::{
        db_utils::{ColumnKind, Filters, SqlValue, Updatable, bind_all, build_update_sql},
        pagination::{ClassRoomPage, Page},
    },
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::Value;
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

const CLASS_COLUMNS: &str = "id, name, grade, major, homeroom_teacher_id, academic_year";

const UPDATABLE: &Updatable = &[
    ("name", ColumnKind::Text),
    ("grade", ColumnKind::U64),
    ("major", ColumnKind::OptionalText),
    ("homeroom_teacher_id", ColumnKind::OptionalU64),
    ("academic_year", ColumnKind::Text),
];

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateClass {
    #[schema(example = "XI RPL 2")]
    pub name: String,
    /// 10, 11 or 12
    #[schema(example = 11)]
    pub grade: u8,
    #[schema(example = "RPL")]
    pub major: Option<String>,
    #[schema(example = 5)]
    pub homeroom_teacher_id: Option<u64>,
    #[schema(example = "2026/2027")]
    pub academic_year: String,
}

#[derive(Deserialize, IntoParams)]
pub struct ClassFilter {
    pub grade: Option<u8>,
    pub academic_year: Option<String>,
    pub homeroom_teacher_id: Option<u64>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub fn is_valid_grade(grade: u64) -> bool {
    (10..=12).contains(&grade)
}

/// `YYYY/YYYY` where the second year follows the first.
pub fn is_valid_academic_year(value: &str) -> bool {
    let Some((first, second)) = value.split_once('/') else {
        return false;
    };
    if first.len() != 4 || second.len() != 4 {
        return false;
    }
    match (first.parse::<u32>(), second.parse::<u32>()) {
        (Ok(a), Ok(b)) => b == a + 1,
        _ => false,
    }
}

async fn find_class(pool: &MySqlPool, id: u64) -> ApiResult<ClassRoom> {
    sqlx::query_as::<_, ClassRoom>(&format!("SELECT {CLASS_COLUMNS} FROM class_rooms WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Class not found"))
}

#[utoipa::path(
    post,
    path = "/api/classes",
    request_body = CreateClass,
    responses(
        (status = 201, description = "Class created", body = ClassRoom),
        (status = 403, description = "Admin/Waka only"),
        (status = 422, description = "Invalid grade or academic year, duplicate name, unknown teacher")
    ),
    security(("bearer_auth" = [])),
    tag = "Class"
)]
pub async fn create_class(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateClass>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("Name is required"));
    }
    if !is_valid_grade(payload.grade.into()) {
        return Err(ApiError::validation("grade must be 10, 11 or 12"));
    }
    let academic_year = payload.academic_year.trim();
    if !is_valid_academic_year(academic_year) {
        return Err(ApiError::validation("academic_year must look like 2026/2027"));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO class_rooms (name, grade, major, homeroom_teacher_id, academic_year)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(name)
    .bind(payload.grade)
    .bind(payload.major.as_deref().map(str::trim))
    .bind(payload.homeroom_teacher_id)
    .bind(academic_year)
    .execute(pool.get_ref())
    .await
    .map_err(|e| conflict(e, "Class name already exists this year, or teacher not found"))?;

    let class = find_class(pool.get_ref(), result.last_insert_id()).await?;
    Ok(HttpResponse::Created().json(class))
}

#[utoipa::path(
    get,
    path = "/api/classes",
    params(ClassFilter),
    responses((status = 200, description = "Paginated classes", body = ClassRoomPage)),
    security(("bearer_auth" = [])),
    tag = "Class"
)]
pub async fn list_classes(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<ClassFilter>,
) -> ApiResult<HttpResponse> {
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::new();
    filters
        .push_opt("grade = ?", query.grade.map(u64::from))
        .push_opt("academic_year = ?", query.academic_year.as_deref())
        .push_opt("homeroom_teacher_id = ?", query.homeroom_teacher_id);
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM class_rooms{where_sql}");
    let total = bind_all!(sqlx::query_scalar::<_, i64>(&count_sql), &filters.values)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {CLASS_COLUMNS} FROM class_rooms{where_sql} ORDER BY grade, name LIMIT ? OFFSET ?"
    );
    let rows = bind_all!(sqlx::query_as::<_, ClassRoom>(&data_sql), &filters.values)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(page.wrap(rows, total)))
}

#[utoipa::path(
    get,
    path = "/api/classes/{id}",
    params(("id" = u64, Path, description = "Class id")),
    responses(
        (status = 200, description = "Class found", body = ClassRoom),
        (status = 404, description = "Class not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Class"
)]
pub async fn get_class(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let class = find_class(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(class))
}

#[utoipa::path(
    put,
    path = "/api/classes/{id}",
    params(("id" = u64, Path, description = "Class id")),
    request_body(content = Object, description = "Any of `name`, `grade`, `major`, `homeroom_teacher_id`, `academic_year`"),
    responses(
        (status = 200, description = "Class updated", body = ClassRoom),
        (status = 404, description = "Class not found"),
        (status = 422, description = "Unknown field or invalid value")
    ),
    security(("bearer_auth" = [])),
    tag = "Class"
)]
pub async fn update_class(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    let id = path.into_inner();

    let update = build_update_sql("class_rooms", &body, UPDATABLE, id)?;
    if let Some(SqlValue::U64(grade)) = update.value_of("grade") {
        if !is_valid_grade(*grade) {
            return Err(ApiError::validation("grade must be 10, 11 or 12"));
        }
    }
    if let Some(SqlValue::String(year)) = update.value_of("academic_year") {
        if !is_valid_academic_year(year) {
            return Err(ApiError::validation("academic_year must look like 2026/2027"));
        }
    }

    apply_update(pool.get_ref(), "class_rooms", update, id, "Class").await?;

    let class = find_class(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(class))
}

#[utoipa::path(
    delete,
    path = "/api/classes/{id}",
    params(("id" = u64, Path, description = "Class id")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 404, description = "Class not found"),
        (status = 422, description = "Class still has students or schedules")
    ),
    security(("bearer_auth" = [])),
    tag = "Class"
)]
pub async fn delete_class(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    delete_row(pool.get_ref(), "class_rooms", path.into_inner(), "Class").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn academic_year_must_span_consecutive_years() {
        assert!(is_valid_academic_year("2026/2027"));
        assert!(!is_valid_academic_year("2026/2028"));
        assert!(!is_valid_academic_year("2026-2027"));
        assert!(!is_valid_academic_year("26/27"));
    }

    #[test]
    fn only_upper_secondary_grades() {
        assert!(is_valid_grade(10));
        assert!(is_valid_grade(12));
        assert!(!is_valid_grade(9));
        assert!(!is_valid_grade(13));
    }
}
