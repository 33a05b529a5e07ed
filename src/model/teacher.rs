use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct TeacherProfile {
    #[schema(example = 5)]
    pub id: u64,
    #[schema(example = 9)]
    pub user_id: u64,
    #[schema(example = "198703122010011002")]
    pub nip: String,
    #[schema(example = "Siti Rahma")]
    pub full_name: String,
    #[schema(example = "+6281234567890", nullable = true)]
    pub phone: Option<String>,
}
