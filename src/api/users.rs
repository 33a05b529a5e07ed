use super::{apply_update, conflict, delete_row, like_pattern};
use crate::{
    auth::{auth::AuthUser, password::hash_password},
    error::{ApiError, ApiResult},
    model::{
        role::Role,
        user::{USER_COLUMNS, User},
    },
    utils::{
        db_utils::{ColumnKind, Filters, SqlValue, Updatable, bind_all, build_update_sql},
        pagination::{Page, UserPage},
        username_filter,
    },
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::MySqlPool;
use tracing::{error, info, instrument};
use utoipa::{IntoParams, ToSchema};

const MIN_PASSWORD_LEN: usize = 8;

const UPDATABLE: &Updatable = &[
    ("name", ColumnKind::Text),
    ("email", ColumnKind::OptionalText),
    ("role_id", ColumnKind::U64),
    ("is_active", ColumnKind::Bool),
    ("password", ColumnKind::Text),
];

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "bsantoso")]
    pub username: String,
    #[schema(example = "rahasia123", format = "password")]
    pub password: String,
    #[schema(example = "Budi Santoso")]
    pub name: String,
    #[schema(example = "budi@sekolah.sch.id", format = "email")]
    pub email: Option<String>,
    /// 1 admin, 2 waka, 3 wali kelas, 4 guru, 5 pengurus kelas, 6 siswa
    #[schema(example = 6)]
    pub role_id: u8,
}

#[derive(Deserialize, IntoParams)]
pub struct UserFilter {
    pub role_id: Option<u8>,
    pub is_active: Option<bool>,
    /// Matches username or name
    pub search: Option<String>,
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    /// Items per page
    pub per_page: Option<u32>,
}

#[derive(Deserialize, IntoParams)]
pub struct UsernameQuery {
    pub username: String,
}

/// Lowercase letters, digits, dot and underscore; 3 to 64 characters.
pub fn validate_username(raw: &str) -> ApiResult<String> {
    let username = username_filter::normalize(raw);
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_');

    if !(3..=64).contains(&username.len()) || !valid_chars {
        return Err(ApiError::validation(
            "Username must be 3-64 characters of a-z, 0-9, '.' or '_'",
        ));
    }
    Ok(username)
}

fn hashed(password: &str) -> ApiResult<String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    hash_password(password).map_err(|e| {
        error!(error = %e, "Password hashing failed");
        ApiError::Internal
    })
}

fn role_from(id: u64) -> ApiResult<Role> {
    u8::try_from(id)
        .ok()
        .and_then(Role::from_id)
        .ok_or_else(|| ApiError::validation(format!("Unknown role {id}")))
}

async fn find_user(pool: &MySqlPool, id: u64) -> ApiResult<User> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Create User
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 403, description = "Admin only"),
        (status = 422, description = "Invalid field or username taken", body = Object, example = json!({
            "message": "Username already taken"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
#[instrument(skip(auth, pool, payload), fields(admin_id = auth.user_id))]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUser>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;

    let username = validate_username(&payload.username)?;
    let role = role_from(payload.role_id.into())?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("Name is required"));
    }

    if !username_filter::is_username_available(pool.get_ref(), &username).await? {
        return Err(ApiError::validation("Username already taken"));
    }

    let password_hash = hashed(&payload.password)?;

    let result = sqlx::query(
        "INSERT INTO users (username, password, role_id, name, email) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&username)
    .bind(&password_hash)
    .bind(role.id())
    .bind(name)
    .bind(payload.email.as_deref().map(str::trim))
    .execute(pool.get_ref())
    .await
    .map_err(|e| conflict(e, "Username already taken"))?;

    username_filter::insert(&username);

    let user = find_user(pool.get_ref(), result.last_insert_id()).await?;
    info!(user_id = user.id, role = ?role, "User created");

    Ok(HttpResponse::Created().json(user))
}

/// List Users
#[utoipa::path(
    get,
    path = "/api/users",
    params(UserFilter),
    responses(
        (status = 200, description = "Paginated users", body = UserPage),
        (status = 403, description = "Admin/Waka only")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UserFilter>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::new();
    filters
        .push_opt("role_id = ?", query.role_id.map(u64::from))
        .push_opt("is_active = ?", query.is_active);
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let like = like_pattern(search);
        filters.push_group(
            "username LIKE ? OR name LIKE ?",
            vec![like.clone().into(), like.into()],
        );
    }
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM users{where_sql}");
    let total = bind_all!(sqlx::query_scalar::<_, i64>(&count_sql), &filters.values)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql =
        format!("SELECT {USER_COLUMNS} FROM users{where_sql} ORDER BY id DESC LIMIT ? OFFSET ?");
    let users = bind_all!(sqlx::query_as::<_, User>(&data_sql), &filters.values)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(page.wrap(users, total)))
}

/// Get User by ID
#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "User found", body = User),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn get_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;
    let user = find_user(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

/// Update User
#[utoipa::path(
    put,
    path = "/api/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    request_body(content = Object, description = "Any of `name`, `email`, `role_id`, `is_active`, `password`", example = json!({
        "name": "Budi S.",
        "is_active": false
    })),
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 404, description = "User not found"),
        (status = 422, description = "Unknown field or invalid value")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn update_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let id = path.into_inner();

    let mut payload = body.into_inner();
    if let Some(password) = payload.get_mut("password") {
        let plain = password
            .as_str()
            .ok_or_else(|| ApiError::validation("Invalid value for password"))?;
        *password = Value::String(hashed(plain)?);
    }

    let update = build_update_sql("users", &payload, UPDATABLE, id)?;
    if let Some(SqlValue::U64(role_id)) = update.value_of("role_id") {
        role_from(*role_id)?;
    }
    let deactivated = update.value_of("is_active") == Some(&SqlValue::Bool(false));
    if deactivated && id == auth.user_id {
        return Err(ApiError::validation("You cannot deactivate your own account"));
    }

    apply_update(pool.get_ref(), "users", update, id, "User").await?;

    if deactivated {
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
            .bind(id)
            .execute(pool.get_ref())
            .await?;
    }

    let user = find_user(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(user))
}

/// Delete User
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "Successfully deleted", body = Object, example = json!({
            "message": "Successfully deleted"
        })),
        (status = 404, description = "User not found"),
        (status = 422, description = "User still has a profile or records")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn delete_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let id = path.into_inner();
    if id == auth.user_id {
        return Err(ApiError::validation("You cannot delete your own account"));
    }

    let user = find_user(pool.get_ref(), id).await?;
    let response = delete_row(pool.get_ref(), "users", id, "User").await?;
    username_filter::remove(&user.username);

    info!(user_id = id, "User deleted");
    Ok(response)
}

/// Username availability
#[utoipa::path(
    get,
    path = "/api/users/username-available",
    params(UsernameQuery),
    responses(
        (status = 200, description = "Availability", body = Object, example = json!({
            "username": "bsantoso",
            "available": false
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn username_available(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UsernameQuery>,
) -> ApiResult<HttpResponse> {
    auth.require_manager()?;

    let username = validate_username(&query.username)?;
    let available = username_filter::is_username_available(pool.get_ref(), &username).await?;

    Ok(HttpResponse::Ok().json(json!({
        "username": username,
        "available": available
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_normalized_and_checked() {
        assert_eq!(validate_username("  BSantoso ").unwrap(), "bsantoso");
        assert_eq!(validate_username("siti.rahma_2").unwrap(), "siti.rahma_2");
        assert!(validate_username("ab").is_err());
        assert!(validate_username("budi santoso").is_err());
        assert!(validate_username("budi@sekolah").is_err());
    }

    #[test]
    fn short_passwords_are_rejected_before_hashing() {
        assert!(matches!(hashed("pendek"), Err(ApiError::Validation(_))));
        assert!(hashed("cukup panjang").is_ok());
    }

    #[test]
    fn role_ids_outside_the_table_are_rejected() {
        assert_eq!(role_from(6).unwrap(), Role::Siswa);
        assert!(role_from(0).is_err());
        assert!(role_from(7).is_err());
        assert!(role_from(300).is_err());
    }

    #[test]
    fn username_cannot_be_changed_through_update() {
        let err = build_update_sql("users", &json!({"username": "baru"}), UPDATABLE, 1);
        assert!(matches!(err, Err(ApiError::Validation(_))));
    }
}
