use super::{apply_update, conflict, delete_row, like_pattern, role_of_user};
use crate::{
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::{role::Role, teacher::TeacherProfile},
    utils::{
        db_utils::{ColumnKind, Filters, Updatable, bind_all, build_update_sql},
        pagination::{Page, TeacherPage},
    },
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::Value;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

const TEACHER_COLUMNS: &str = "id, user_id, nip, full_name, phone";

const UPDATABLE: &Updatable = &[
    ("nip", ColumnKind::Text),
    ("full_name", ColumnKind::Text),
    ("phone", ColumnKind::OptionalText),
];

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTeacher {
    /// Account with a teaching role (Waka, Wali Kelas or Guru)
    #[schema(example = 9)]
    pub user_id: u64,
    #[schema(example = "198703122010011002")]
    pub nip: String,
    #[schema(example = "Siti Rahma")]
    pub full_name: String,
    #[schema(example = "+6281234567890")]
    pub phone: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct TeacherFilter {
    /// Matches name or NIP
    pub search: Option<String>,
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    /// Items per page
    pub per_page: Option<u32>,
}

async fn find_teacher(pool: &MySqlPool, id: u64) -> ApiResult<TeacherProfile> {
    sqlx::query_as::<_, TeacherProfile>(&format!(
        "SELECT {TEACHER_COLUMNS} FROM teacher_profiles WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Teacher not found"))
}

#[utoipa::path(
    post,
    path = "/api/teachers",
    request_body = CreateTeacher,
    responses(
        (status = 201, description = "Teacher profile created", body = TeacherProfile),
        (status = 403, description = "Admin/Waka only"),
        (status = 422, description = "User missing, not a teacher, or NIP/user already used")
    ),
    security(("bearer_auth" = [])),
    tag = "Teacher"
)]
pub async fn create_teacher(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateTeacher>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;

    let role = role_of_user(pool.get_ref(), payload.user_id).await?;
    if !matches!(role, Role::Waka | Role::WaliKelas | Role::Guru) {
        return Err(ApiError::validation("User does not have a teaching role"));
    }

    let nip = payload.nip.trim();
    let full_name = payload.full_name.trim();
    if nip.is_empty() || full_name.is_empty() {
        return Err(ApiError::validation("nip and full_name are required"));
    }

    let result = sqlx::query(
        "INSERT INTO teacher_profiles (user_id, nip, full_name, phone) VALUES (?, ?, ?, ?)",
    )
    .bind(payload.user_id)
    .bind(nip)
    .bind(full_name)
    .bind(payload.phone.as_deref().map(str::trim))
    .execute(pool.get_ref())
    .await
    .map_err(|e| conflict(e, "NIP or user already has a teacher profile"))?;

    let teacher = find_teacher(pool.get_ref(), result.last_insert_id()).await?;
    info!(teacher_id = teacher.id, "Teacher profile created");

    Ok(HttpResponse::Created().json(teacher))
}

#[utoipa::path(
    get,
    path = "/api/teachers",
    params(TeacherFilter),
    responses((status = 200, description = "Paginated teachers", body = TeacherPage)),
    security(("bearer_auth" = [])),
    tag = "Teacher"
)]
pub async fn list_teachers(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<TeacherFilter>,
) -> ApiResult<HttpResponse> {
    auth.require_staff()?;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::new();
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let like = like_pattern(search);
        filters.push_group("full_name LIKE ? OR nip LIKE ?", vec![like.clone().into(), like.into()]);
    }
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM teacher_profiles{where_sql}");
    let total = bind_all!(sqlx::query_scalar::<_, i64>(&count_sql), &filters.values)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {TEACHER_COLUMNS} FROM teacher_profiles{where_sql} ORDER BY full_name LIMIT ? OFFSET ?"
    );
    let rows = bind_all!(sqlx::query_as::<_, TeacherProfile>(&data_sql), &filters.values)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(page.wrap(rows, total)))
}

#[utoipa::path(
    get,
    path = "/api/teachers/{id}",
    params(("id" = u64, Path, description = "Teacher profile id")),
    responses(
        (status = 200, description = "Teacher found", body = TeacherProfile),
        (status = 404, description = "Teacher not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Teacher"
)]
pub async fn get_teacher(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_staff()?;
    let teacher = find_teacher(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(teacher))
}

#[utoipa::path(
    put,
    path = "/api/teachers/{id}",
    params(("id" = u64, Path, description = "Teacher profile id")),
    request_body(content = Object, description = "Any of `nip`, `full_name`, `phone`"),
    responses(
        (status = 200, description = "Teacher updated", body = TeacherProfile),
        (status = 404, description = "Teacher not found"),
        (status = 422, description = "Unknown field or duplicate NIP")
    ),
    security(("bearer_auth" = [])),
    tag = "Teacher"
)]
pub async fn update_teacher(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    let id = path.into_inner();

    let update = build_update_sql("teacher_profiles", &body, UPDATABLE, id)?;
    apply_update(pool.get_ref(), "teacher_profiles", update, id, "Teacher").await?;

    let teacher = find_teacher(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(teacher))
}

#[utoipa::path(
    delete,
    path = "/api/teachers/{id}",
    params(("id" = u64, Path, description = "Teacher profile id")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 404, description = "Teacher not found"),
        (status = 422, description = "Teacher still has classes or schedules")
    ),
    security(("bearer_auth" = [])),
    tag = "Teacher"
)]
pub async fn delete_teacher(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    delete_row(pool.get_ref(), "teacher_profiles", path.into_inner(), "Teacher").await
}
