use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 3,
    "name": "XI RPL 2",
    "grade": 11,
    "major": "RPL",
    "homeroom_teacher_id": 5,
    "academic_year": "2026/2027"
}))]
pub struct ClassRoom {
    pub id: u64,
    pub name: String,
    pub grade: u8,
    pub major: Option<String>,
    /// Teacher profile of the Wali Kelas
    pub homeroom_teacher_id: Option<u64>,
    pub academic_year: String,
}
