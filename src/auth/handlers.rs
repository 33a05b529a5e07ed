use crate::{
    auth::{
        auth::AuthUser,
        jwt::{generate_access_token, generate_refresh_token, verify_token},
        password::verify_password,
    },
    config::Config,
    error::{ApiError, ApiResult},
    model::{role::Role, user::User, user::USER_COLUMNS},
    models::{LoginReqDto, TokenSubject, TokenType, UserSql},
};
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySqlPool, Transaction};
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    access_token: String,
    refresh_token: String,
    #[schema(example = "wali_kelas")]
    role: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

fn token_error(e: jsonwebtoken::errors::Error) -> ApiError {
    error!(error = %e, "Failed to sign token");
    ApiError::Internal
}

/// Teacher or student profile that belongs to the user, depending on role.
async fn profile_id_for(pool: &MySqlPool, user_id: u64, role: Role) -> ApiResult<Option<u64>> {
    let sql = if role.is_student() {
        "SELECT id FROM student_profiles WHERE user_id = ?"
    } else if role == Role::Admin {
        return Ok(None);
    } else {
        "SELECT id FROM teacher_profiles WHERE user_id = ?"
    };

    let id = sqlx::query_scalar::<_, u64>(sql)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(id)
}

/// Signs an access/refresh pair and stores the refresh token's jti.
async fn issue_token_pair(
    tx: &mut Transaction<'_, sqlx::MySql>,
    subject: &TokenSubject,
    config: &Config,
) -> ApiResult<(String, String)> {
    let access_token =
        generate_access_token(subject, &config.jwt_secret, config.access_token_ttl)
            .map_err(token_error)?;

    let (refresh_token, refresh_claims) =
        generate_refresh_token(subject, &config.jwt_secret, config.refresh_token_ttl)
            .map_err(token_error)?;

    debug!(user_id = subject.user_id, jti = %refresh_claims.jti, "Storing refresh token");

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(subject.user_id)
    .bind(&refresh_claims.jti)
    .bind(refresh_claims.exp as i64)
    .execute(&mut **tx)
    .await?;

    Ok((access_token, refresh_token))
}

/// Login with username and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Token pair issued", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 422, description = "Username or password missing")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(username = %user.username)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    info!("Login request received");

    let username = user.username.trim().to_lowercase();
    if username.is_empty() || user.password.is_empty() {
        info!("Validation failed: empty username or password");
        return Err(ApiError::validation("Username or password required"));
    }

    let db_user = sqlx::query_as::<_, UserSql>(
        r#"
        SELECT id, username, password, role_id, is_active
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(&username)
    .fetch_optional(pool.get_ref())
    .await?;

    let Some(db_user) = db_user else {
        info!("Invalid credentials: user not found");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    };

    if let Err(e) = verify_password(&user.password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    if !db_user.is_active {
        info!(user_id = db_user.id, "Login refused: account disabled");
        return Err(ApiError::forbidden("Account is disabled"));
    }

    let role = Role::from_id(db_user.role_id).ok_or_else(|| {
        error!(user_id = db_user.id, role_id = db_user.role_id, "Unknown role id");
        ApiError::Internal
    })?;

    let subject = TokenSubject {
        user_id: db_user.id,
        username: db_user.username.clone(),
        role: db_user.role_id,
        profile_id: profile_id_for(pool.get_ref(), db_user.id, role).await?,
    };

    let mut tx = pool.begin().await?;
    let (access_token, refresh_token) = issue_token_pair(&mut tx, &subject, &config).await?;
    tx.commit().await?;

    // non-fatal
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(db_user.id)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    info!(user_id = db_user.id, "Login successful");

    Ok(HttpResponse::Ok().json(LoginResponse {
        access_token,
        refresh_token,
        role: role.as_ref().to_string(),
    }))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = Object, example = json!({
            "access_token": "eyJ...",
            "refresh_token": "eyJ..."
        })),
        (status = 401, description = "Refresh token invalid, revoked or expired")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_refresh", skip_all)]
pub async fn refresh_token(
    body: web::Json<RefreshRequest>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let unauthorized = || ApiError::Unauthorized("Invalid refresh token".into());

    let claims = verify_token(&body.refresh_token, &config.jwt_secret).map_err(|_| unauthorized())?;

    if claims.token_type != TokenType::Refresh {
        return Err(unauthorized());
    }

    let mut tx = pool.begin().await?;

    let record = sqlx::query_as::<_, (u64, u64, bool)>(
        "SELECT id, user_id, revoked FROM refresh_tokens WHERE jti = ? FOR UPDATE",
    )
    .bind(&claims.jti)
    .fetch_optional(&mut *tx)
    .await?;

    let (record_id, user_id) = match record {
        Some((id, user_id, false)) => (id, user_id),
        _ => {
            info!(jti = %claims.jti, "Refresh rejected: unknown or revoked token");
            return Err(unauthorized());
        }
    };

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

    // re-read the user so role changes and deactivation take effect
    let user = sqlx::query_as::<_, (String, u8, bool)>(
        "SELECT username, role_id, is_active FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (username, role_id) = match user {
        Some((username, role_id, true)) => (username, role_id),
        _ => {
            tx.commit().await?;
            return Err(unauthorized());
        }
    };

    let role = Role::from_id(role_id).ok_or_else(unauthorized)?;
    let subject = TokenSubject {
        user_id,
        username,
        role: role_id,
        profile_id: profile_id_for(pool.get_ref(), user_id, role).await?,
    };

    let (access_token, refresh_token) = issue_token_pair(&mut tx, &subject, &config).await?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(json!({
        "access_token": access_token,
        "refresh_token": refresh_token
    })))
}

/// Revoke a refresh token. Always succeeds.
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = RefreshRequest,
    responses((status = 204, description = "Logged out")),
    tag = "Auth"
)]
pub async fn logout(
    body: web::Json<RefreshRequest>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> HttpResponse {
    let claims = match verify_token(&body.refresh_token, &config.jwt_secret) {
        Ok(c) if c.token_type == TokenType::Refresh => c,
        _ => return HttpResponse::NoContent().finish(),
    };

    // idempotent
    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}

/// Current user
#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "The authenticated user", body = User),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn me(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> ApiResult<HttpResponse> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
    ))
    .bind(auth.user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(HttpResponse::Ok().json(json!({
        "user": user,
        "role": auth.role,
        "profile_id": auth.profile_id
    })))
}
