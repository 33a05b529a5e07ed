use super::{apply_update, conflict, delete_row, like_pattern};
use crate::{
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::subject::Subject,
    utils::{
        db_utils::{ColumnKind, Filters, Updatable, bind_all, build_update_sql},
        pagination::{Page, SubjectPage},
    },
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::Value;
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

const UPDATABLE: &Updatable = &[("code", ColumnKind::Text), ("name", ColumnKind::Text)];

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSubject {
    #[schema(example = "MTK")]
    pub code: String,
    #[schema(example = "Matematika")]
    pub name: String,
}

#[derive(Deserialize, IntoParams)]
pub struct SubjectFilter {
    /// Matches code or name
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn find_subject(pool: &MySqlPool, id: u64) -> ApiResult<Subject> {
    sqlx::query_as::<_, Subject>("SELECT id, code, name FROM subjects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Subject not found"))
}

#[utoipa::path(
    post,
    path = "/api/subjects",
    request_body = CreateSubject,
    responses(
        (status = 201, description = "Subject created", body = Subject),
        (status = 422, description = "Blank field or duplicate code")
    ),
    security(("bearer_auth" = [])),
    tag = "Subject"
)]
pub async fn create_subject(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateSubject>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;

    let code = payload.code.trim().to_uppercase();
    let name = payload.name.trim();
    if code.is_empty() || name.is_empty() {
        return Err(ApiError::validation("code and name are required"));
    }

    let result = sqlx::query("INSERT INTO subjects (code, name) VALUES (?, ?)")
        .bind(&code)
        .bind(name)
        .execute(pool.get_ref())
        .await
        .map_err(|e| conflict(e, "Subject code already exists"))?;

    let subject = find_subject(pool.get_ref(), result.last_insert_id()).await?;
    Ok(HttpResponse::Created().json(subject))
}

#[utoipa::path(
    get,
    path = "/api/subjects",
    params(SubjectFilter),
    responses((status = 200, description = "Paginated subjects", body = SubjectPage)),
    security(("bearer_auth" = [])),
    tag = "Subject"
)]
pub async fn list_subjects(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<SubjectFilter>,
) -> ApiResult<HttpResponse> {
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::new();
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let like = like_pattern(search);
        filters.push_group("code LIKE ? OR name LIKE ?", vec![like.clone().into(), like.into()]);
    }
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM subjects{where_sql}");
    let total = bind_all!(sqlx::query_scalar::<_, i64>(&count_sql), &filters.values)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql =
        format!("SELECT id, code, name FROM subjects{where_sql} ORDER BY code LIMIT ? OFFSET ?");
    let rows = bind_all!(sqlx::query_as::<_, Subject>(&data_sql), &filters.values)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(page.wrap(rows, total)))
}

#[utoipa::path(
    get,
    path = "/api/subjects/{id}",
    params(("id" = u64, Path, description = "Subject id")),
    responses(
        (status = 200, description = "Subject found", body = Subject),
        (status = 404, description = "Subject not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Subject"
)]
pub async fn get_subject(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let subject = find_subject(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(subject))
}

#[utoipa::path(
    put,
    path = "/api/subjects/{id}",
    params(("id" = u64, Path, description = "Subject id")),
    request_body(content = Object, description = "Any of `code`, `name`"),
    responses(
        (status = 200, description = "Subject updated", body = Subject),
        (status = 404, description = "Subject not found"),
        (status = 422, description = "Unknown field or duplicate code")
    ),
    security(("bearer_auth" = [])),
    tag = "Subject"
)]
pub async fn update_subject(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    let id = path.into_inner();

    let update = build_update_sql("subjects", &body, UPDATABLE, id)?;
    apply_update(pool.get_ref(), "subjects", update, id, "Subject").await?;

    let subject = find_subject(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(subject))
}

#[utoipa::path(
    delete,
    path = "/api/subjects/{id}",
    params(("id" = u64, Path, description = "Subject id")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 404, description = "Subject not found"),
        (status = 422, description = "Subject is used by a schedule")
    ),
    security(("bearer_auth" = [])),
    tag = "Subject"
)]
pub async fn delete_subject(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    delete_row(pool.get_ref(), "subjects", path.into_inner(), "Subject").await
}
