pub mod absence_request;
pub mod attendance;
pub mod classes;
pub mod leave_permission;
pub mod schedules;
pub mod students;
pub mod subjects;
pub mod teachers;
pub mod users;

use crate::{
    db::is_constraint_violation,
    error::{ApiError, ApiResult},
    model::role::Role,
    utils::db_utils::{SqlUpdate, execute_update},
};
use actix_web::HttpResponse;
use serde_json::json;
use sqlx::MySqlPool;

/// Runs a whitelisted update; 404 when the row is gone, 422 when a unique or
/// foreign key rejects the new values.
pub(crate) async fn apply_update(
    pool: &MySqlPool,
    table: &str,
    update: SqlUpdate,
    id: u64,
    what: &str,
) -> ApiResult<()> {
    match execute_update(pool, update).await {
        Ok(0) => {
            // MySQL reports 0 when nothing changed, so check the row exists
            let exists = sqlx::query_scalar::<_, bool>(&format!(
                "SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?)"
            ))
            .bind(id)
            .fetch_one(pool)
            .await?;
            if exists {
                Ok(())
            } else {
                Err(ApiError::not_found(format!("{what} not found")))
            }
        }
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => Err(ApiError::validation(format!(
            "{what} conflicts with an existing record or references a missing one"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Deletes by id; rows still referenced elsewhere are a 422.
pub(crate) async fn delete_row(
    pool: &MySqlPool,
    table: &str,
    id: u64,
    what: &str,
) -> ApiResult<HttpResponse> {
    let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
        .bind(id)
        .execute(pool)
        .await;

    match result {
        Ok(res) if res.rows_affected() == 0 => Err(ApiError::not_found(format!("{what} not found"))),
        Ok(_) => Ok(HttpResponse::Ok().json(json!({
            "message": "Successfully deleted"
        }))),
        Err(e) if is_constraint_violation(&e) => Err(ApiError::validation(format!(
            "{what} is still in use and cannot be deleted"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Maps a duplicate-key insert to 422 with `message`.
pub(crate) fn conflict(e: sqlx::Error, message: &str) -> ApiError {
    if is_constraint_violation(&e) {
        ApiError::validation(message)
    } else {
        e.into()
    }
}

/// Role of an existing user, for attaching a profile to it.
pub(crate) async fn role_of_user(pool: &MySqlPool, user_id: u64) -> ApiResult<Role> {
    let role_id = sqlx::query_scalar::<_, u8>("SELECT role_id FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::validation("User not found"))?;

    Role::from_id(role_id).ok_or_else(|| ApiError::validation(format!("Unknown role {role_id}")))
}

/// `%term%` for LIKE filters, with wildcards in the term escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" budi "), "%budi%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
