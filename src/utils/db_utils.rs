use crate::error::{ApiError, ApiResult};
use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;
use sqlx::MySql;

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    Null,
}

/// Binds every `SqlValue` in order onto a `query`, `query_as` or `query_scalar`.
macro_rules! bind_all {
    ($query:expr, $values:expr) => {{
        let mut query = $query;
        for value in $values {
            query = match value {
                $crate::utils::db_utils::SqlValue::String(v) => query.bind(v.clone()),
                $crate::utils::db_utils::SqlValue::U64(v) => query.bind(*v),
                $crate::utils::db_utils::SqlValue::Bool(v) => query.bind(*v),
                $crate::utils::db_utils::SqlValue::Date(v) => query.bind(*v),
                $crate::utils::db_utils::SqlValue::Time(v) => query.bind(*v),
                $crate::utils::db_utils::SqlValue::Null => query.bind(None::<String>),
            };
        }
        query
    }};
}
pub(crate) use bind_all;

/// How a JSON field is turned into a column value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnKind {
    Text,
    OptionalText,
    U64,
    OptionalU64,
    Bool,
    Time,
}

/// Columns a caller may touch through a PUT body.
pub type Updatable = [(&'static str, ColumnKind)];

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    /// Assigned columns, in the order of `values`
    pub columns: Vec<&'static str>,
    pub values: Vec<SqlValue>,
}

fn convert(column: &str, kind: ColumnKind, value: &Value) -> ApiResult<SqlValue> {
    let invalid = || ApiError::validation(format!("Invalid value for {column}"));

    let converted = match (kind, value) {
        (ColumnKind::OptionalText | ColumnKind::OptionalU64, Value::Null) => SqlValue::Null,
        (ColumnKind::Text | ColumnKind::OptionalText, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() && kind == ColumnKind::Text {
                return Err(ApiError::validation(format!("{column} must not be empty")));
            }
            SqlValue::String(trimmed.to_string())
        }
        (ColumnKind::U64 | ColumnKind::OptionalU64, Value::Number(n)) => {
            SqlValue::U64(n.as_u64().ok_or_else(invalid)?)
        }
        (ColumnKind::Bool, Value::Bool(b)) => SqlValue::Bool(*b),
        (ColumnKind::Time, Value::String(s)) => SqlValue::Time(
            NaiveTime::parse_from_str(s, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
                .map_err(|_| invalid())?,
        ),
        _ => return Err(invalid()),
    };

    Ok(converted)
}

/// ===============================
/// Build dynamic UPDATE SQL
/// ===============================
/// Only keys listed in `allowed` are accepted; anything else is a 422 so a
/// client can never name an arbitrary column.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &Updatable,
    id_value: u64,
) -> ApiResult<SqlUpdate> {
    let obj = payload
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("Payload must be a JSON object".into()))?;

    if obj.is_empty() {
        return Err(ApiError::validation("No fields provided for update"));
    }

    let mut columns = Vec::with_capacity(obj.len());
    let mut values = Vec::with_capacity(obj.len() + 1);

    for (key, value) in obj {
        let (column, kind) = allowed
            .iter()
            .find(|(name, _)| *name == key.as_str())
            .ok_or_else(|| ApiError::validation(format!("Field {key} cannot be updated")))?;

        columns.push(*column);
        values.push(convert(column, *kind, value)?);
    }

    let set_clause = columns
        .iter()
        .map(|column| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!("UPDATE {} SET {} WHERE id = ?", table, set_clause);

    // WHERE id = ?
    values.push(SqlValue::U64(id_value));

    Ok(SqlUpdate {
        sql,
        columns,
        values,
    })
}

impl SqlUpdate {
    pub fn value_of(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| *c == column)
            .and_then(|idx| self.values.get(idx))
    }
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update<'c, E>(executor: E, update: SqlUpdate) -> Result<u64, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = MySql>,
{
    let query = bind_all!(sqlx::query(&update.sql), &update.values);
    let result = query.execute(executor).await?;
    Ok(result.rows_affected())
}

/// ===============================
/// WHERE clause builder for list endpoints
/// ===============================
#[derive(Debug, Default)]
pub struct Filters {
    conditions: Vec<String>,
    pub values: Vec<SqlValue>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, condition: &str, value: SqlValue) -> &mut Self {
        self.conditions.push(condition.to_string());
        self.values.push(value);
        self
    }

    /// A condition with several placeholders, e.g. an OR group.
    pub fn push_group(&mut self, condition: &str, values: Vec<SqlValue>) -> &mut Self {
        self.conditions.push(format!("({condition})"));
        self.values.extend(values);
        self
    }

    pub fn push_opt<T: Into<SqlValue>>(&mut self, condition: &str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.push(condition, value.into());
        }
        self
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::U64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SUBJECT_COLUMNS: &Updatable = &[
        ("code", ColumnKind::Text),
        ("name", ColumnKind::Text),
    ];

    const SCHEDULE_COLUMNS: &Updatable = &[
        ("teacher_id", ColumnKind::U64),
        ("start_time", ColumnKind::Time),
        ("room", ColumnKind::OptionalText),
    ];

    #[test]
    fn builds_update_for_whitelisted_columns() {
        let update =
            build_update_sql("subjects", &json!({"name": " Fisika "}), SUBJECT_COLUMNS, 7)
                .unwrap();
        assert_eq!(update.sql, "UPDATE subjects SET name = ? WHERE id = ?");
        assert_eq!(
            update.values,
            vec![SqlValue::String("Fisika".into()), SqlValue::U64(7)]
        );
    }

    #[test]
    fn unknown_column_is_rejected() {
        let err = build_update_sql(
            "subjects",
            &json!({"name": "x", "id = 1; DROP TABLE users; --": 1}),
            SUBJECT_COLUMNS,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn typed_columns_are_parsed() {
        let update = build_update_sql(
            "schedules",
            &json!({"teacher_id": 4, "start_time": "07:30", "room": null}),
            SCHEDULE_COLUMNS,
            2,
        )
        .unwrap();
        assert_eq!(update.value_of("teacher_id"), Some(&SqlValue::U64(4)));
        assert_eq!(
            update.value_of("start_time"),
            Some(&SqlValue::Time(NaiveTime::from_hms_opt(7, 30, 0).unwrap()))
        );
        assert_eq!(update.value_of("room"), Some(&SqlValue::Null));
        assert_eq!(update.value_of("end_time"), None);
    }

    #[test]
    fn wrong_json_type_and_blank_text_are_rejected() {
        assert!(build_update_sql("schedules", &json!({"teacher_id": "4"}), SCHEDULE_COLUMNS, 1).is_err());
        assert!(build_update_sql("subjects", &json!({"name": "  "}), SUBJECT_COLUMNS, 1).is_err());
        assert!(build_update_sql("subjects", &json!({}), SUBJECT_COLUMNS, 1).is_err());
        assert!(build_update_sql("subjects", &json!([1]), SUBJECT_COLUMNS, 1).is_err());
    }

    #[test]
    fn filters_join_conditions() {
        let mut filters = Filters::new();
        assert_eq!(filters.where_clause(), "");

        filters
            .push_opt("class_id = ?", Some(3u64))
            .push_opt::<u64>("student_id = ?", None)
            .push("status = ?", "active".into());
        assert_eq!(filters.where_clause(), " WHERE class_id = ? AND status = ?");
        assert_eq!(filters.values.len(), 2);
    }
}
