use chrono::NaiveDateTime;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct User {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = "bsantoso")]
    pub username: String,
    /// See `Role` for the id mapping
    #[schema(example = 6)]
    pub role_id: u8,
    #[schema(example = "Budi Santoso")]
    pub name: String,
    pub email: Option<String>,
    pub is_active: bool,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub last_login_at: Option<NaiveDateTime>,
}

pub const USER_COLUMNS: &str = "id, username, role_id, name, email, is_active, last_login_at";
