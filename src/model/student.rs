use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct StudentProfile {
    #[schema(example = 12)]
    pub id: u64,
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
    #[schema(nullable = true)]
    pub phone: Option<String>,
}

pub fn is_valid_gender(value: &str) -> bool {
    matches!(value, "L" | "P")
}
