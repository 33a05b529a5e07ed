use super::{apply_update, conflict, delete_row, like_pattern, role_of_user};
use crate::{
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::student::{StudentProfile, is_valid_gender},
    utils::{
        db_utils::{ColumnKind, Filters, SqlValue, Updatable, bind_all, build_update_sql},
        pagination::{Page, StudentPage},
    },
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::Value;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

const STUDENT_COLUMNS: &str = "id, user_id, nis, full_name, class_id, gender, phone";

const UPDATABLE: &Updatable = &[
    ("nis", ColumnKind::Text),
    ("full_name", ColumnKind::Text),
    ("class_id", ColumnKind::U64),
    ("gender", ColumnKind::Text),
    ("phone", ColumnKind::OptionalText),
];

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateStudent {
    /// Account with the Siswa or Pengurus Kelas role
    #[schema(example = 20)]
    pub user_id: u64,
    #[schema(example = "2324101")]
    pub nis: String,
    #[schema(example = "Budi Santoso")]
    pub full_name: String,
    #[schema(example = 3)]
    pub class_id: u64,
    /// `L` or `P`
    #[schema(example = "L")]
    pub gender: String,
    pub phone: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct StudentFilter {
    pub class_id: Option<u64>,
    /// Matches name or NIS
    pub search: Option<String>,
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    /// Items per page
    pub per_page: Option<u32>,
}

async fn find_student(pool: &MySqlPool, id: u64) -> ApiResult<StudentProfile> {
    sqlx::query_as::<_, StudentProfile>(&format!(
        "SELECT {STUDENT_COLUMNS} FROM student_profiles WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Student not found"))
}

#[utoipa::path(
    post,
    path = "/api/students",
    request_body = CreateStudent,
    responses(
        (status = 201, description = "Student profile created", body = StudentProfile),
        (status = 403, description = "Admin/Waka only"),
        (status = 422, description = "Invalid field, user not a student, or NIS/user already used")
    ),
    security(("bearer_auth" = [])),
    tag = "Student"
)]
pub async fn create_student(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateStudent>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;

    if !role_of_user(pool.get_ref(), payload.user_id).await?.is_student() {
        return Err(ApiError::validation("User does not have a student role"));
    }

    let nis = payload.nis.trim();
    let full_name = payload.full_name.trim();
    if nis.is_empty() || full_name.is_empty() {
        return Err(ApiError::validation("nis and full_name are required"));
    }
    let gender = payload.gender.trim().to_uppercase();
    if !is_valid_gender(&gender) {
        return Err(ApiError::validation("gender must be L or P"));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO student_profiles (user_id, nis, full_name, class_id, gender, phone)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(payload.user_id)
    .bind(nis)
    .bind(full_name)
    .bind(payload.class_id)
    .bind(&gender)
    .bind(payload.phone.as_deref().map(str::trim))
    .execute(pool.get_ref())
    .await
    .map_err(|e| conflict(e, "NIS already used, user already has a profile, or class not found"))?;

    let student = find_student(pool.get_ref(), result.last_insert_id()).await?;
    info!(student_id = student.id, class_id = student.class_id, "Student profile created");

    Ok(HttpResponse::Created().json(student))
}

#[utoipa::path(
    get,
    path = "/api/students",
    params(StudentFilter),
    responses((status = 200, description = "Paginated students", body = StudentPage)),
    security(("bearer_auth" = [])),
    tag = "Student"
)]
pub async fn list_students(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<StudentFilter>,
) -> ApiResult<HttpResponse> {
    let page = Page::new(query.page, query.per_page);
    let mut filters = Filters::new();

    // students only see their classmates
    if auth.role.is_student() {
        let class_id = auth
            .own_class_id(pool.get_ref())
            .await?
            .ok_or_else(|| ApiError::forbidden("No student profile"))?;
        filters.push("class_id = ?", SqlValue::U64(class_id));
    }

    filters.push_opt("class_id = ?", query.class_id);
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let like = like_pattern(search);
        filters.push_group("full_name LIKE ? OR nis LIKE ?", vec![like.clone().into(), like.into()]);
    }
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM student_profiles{where_sql}");
    let total = bind_all!(sqlx::query_scalar::<_, i64>(&count_sql), &filters.values)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {STUDENT_COLUMNS} FROM student_profiles{where_sql} ORDER BY full_name LIMIT ? OFFSET ?"
    );
    let rows = bind_all!(sqlx::query_as::<_, StudentProfile>(&data_sql), &filters.values)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(page.wrap(rows, total)))
}

#[utoipa::path(
    get,
    path = "/api/students/{id}",
    params(("id" = u64, Path, description = "Student profile id")),
    responses(
        (status = 200, description = "Student found", body = StudentProfile),
        (status = 404, description = "Student not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Student"
)]
pub async fn get_student(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let student = find_student(pool.get_ref(), path.into_inner()).await?;

    if auth.role.is_student() && auth.own_class_id(pool.get_ref()).await? != Some(student.class_id) {
        return Err(ApiError::not_found("Student not found"));
    }
    Ok(HttpResponse::Ok().json(student))
}

#[utoipa::path(
    put,
    path = "/api/students/{id}",
    params(("id" = u64, Path, description = "Student profile id")),
    request_body(content = Object, description = "Any of `nis`, `full_name`, `class_id`, `gender`, `phone`"),
    responses(
        (status = 200, description = "Student updated", body = StudentProfile),
        (status = 404, description = "Student not found"),
        (status = 422, description = "Unknown field, invalid gender, duplicate NIS or unknown class")
    ),
    security(("bearer_auth" = [])),
    tag = "Student"
)]
pub async fn update_student(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    let id = path.into_inner();

    let mut update = build_update_sql("student_profiles", &body, UPDATABLE, id)?;
    if let Some(idx) = update.columns.iter().position(|c| *c == "gender") {
        let gender = match &update.values[idx] {
            SqlValue::String(g) => g.to_uppercase(),
            _ => String::new(),
        };
        if !is_valid_gender(&gender) {
            return Err(ApiError::validation("gender must be L or P"));
        }
        update.values[idx] = SqlValue::String(gender);
    }

    apply_update(pool.get_ref(), "student_profiles", update, id, "Student").await?;

    let student = find_student(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(student))
}

#[utoipa::path(
    delete,
    path = "/api/students/{id}",
    params(("id" = u64, Path, description = "Student profile id")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 404, description = "Student not found"),
        (status = 422, description = "Student still has attendance or permissions")
    ),
    security(("bearer_auth" = [])),
    tag = "Student"
)]
pub async fn delete_student(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    delete_row(pool.get_ref(), "student_profiles", path.into_inner(), "Student").await
}
