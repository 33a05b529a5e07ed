use super::plan::{
    self, AttendanceChange, ExistingRow, LeaveTerms, Owner, Slot,
};
use crate::db::{DUPLICATE_KEY, MISSING_REFERENCE, mysql_error_number};
use crate::error::{ApiError, ApiResult};
use crate::model::absence_request::{AbsenceRequest, AbsenceStatus};
use crate::model::leave_permission::{
    LEAVE_PERMISSION_COLUMNS, LeavePermission, LeaveStatus, LeaveType,
};
use crate::model::schedule::day_of_week;
use crate::utils::schedule_cache;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use sqlx::{MySql, MySqlConnection, MySqlPool, Transaction};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

/// What a lifecycle step did to attendance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct ChangeSummary {
    pub created: u32,
    pub converted: u32,
    pub deleted: u32,
    pub restored: u32,
}

impl ChangeSummary {
    fn add(&mut self, other: ChangeSummary) {
        self.created += other.created;
        self.converted += other.converted;
        self.deleted += other.deleted;
        self.restored += other.restored;
    }
}

/// Validated input for a new permission.
#[derive(Debug, Clone)]
pub struct NewLeavePermission {
    pub student_id: u64,
    pub class_id: u64,
    pub schedule_id: Option<u64>,
    pub leave_type: LeaveType,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub reason: String,
    pub is_full_day: bool,
}

pub async fn day_slots(pool: &MySqlPool, class_id: u64, date: NaiveDate) -> ApiResult<Vec<Slot>> {
    let lessons = schedule_cache::day_schedules(pool, class_id, day_of_week(date)).await?;
    Ok(lessons.iter().map(Slot::from).collect())
}

async fn lock_day_rows(
    conn: &mut MySqlConnection,
    student_id: u64,
    date: NaiveDate,
) -> ApiResult<Vec<ExistingRow>> {
    let rows = sqlx::query_as::<_, ExistingRow>(
        r#"
        SELECT id, schedule_id, status, leave_permission_id, absence_request_id, previous_status
        FROM attendances
        WHERE student_id = ? AND date = ?
        FOR UPDATE
        "#,
    )
    .bind(student_id)
    .bind(date)
    .fetch_all(conn)
    .await?;

    Ok(rows)
}

/// Writes `changes` for one student and day.
async fn apply_changes(
    conn: &mut MySqlConnection,
    student_id: u64,
    date: NaiveDate,
    owner: Owner,
    actor: u64,
    changes: &[AttendanceChange],
) -> ApiResult<ChangeSummary> {
    let (leave_permission_id, absence_request_id) = match owner {
        Owner::LeavePermission(id) => (Some(id), None),
        Owner::AbsenceRequest(id) => (None, Some(id)),
    };

    let mut summary = ChangeSummary::default();

    for change in changes {
        match change {
            AttendanceChange::Create {
                schedule_id,
                status,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO attendances
                        (student_id, schedule_id, date, status, recorded_by,
                         leave_permission_id, absence_request_id)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(student_id)
                .bind(*schedule_id)
                .bind(date)
                .bind(*status)
                .bind(actor)
                .bind(leave_permission_id)
                .bind(absence_request_id)
                .execute(&mut *conn)
                .await?;
                summary.created += 1;
            }
            AttendanceChange::Convert {
                attendance_id,
                from,
                to,
            } => {
                sqlx::query(
                    r#"
                    UPDATE attendances
                    SET status = ?, previous_status = ?, recorded_by = ?,
                        leave_permission_id = ?, absence_request_id = ?
                    WHERE id = ?
                    "#,
                )
                .bind(*to)
                .bind(*from)
                .bind(actor)
                .bind(leave_permission_id)
                .bind(absence_request_id)
                .bind(*attendance_id)
                .execute(&mut *conn)
                .await?;
                summary.converted += 1;
            }
            AttendanceChange::Release {
                attendance_id,
                restore: None,
            } => {
                sqlx::query("DELETE FROM attendances WHERE id = ?")
                    .bind(*attendance_id)
                    .execute(&mut *conn)
                    .await?;
                summary.deleted += 1;
            }
            AttendanceChange::Release {
                attendance_id,
                restore: Some(previous),
            } => {
                sqlx::query(
                    r#"
                    UPDATE attendances
                    SET status = ?, previous_status = NULL, leave_permission_id = NULL
                    WHERE id = ?
                    "#,
                )
                .bind(*previous)
                .bind(*attendance_id)
                .execute(&mut *conn)
                .await?;
                summary.restored += 1;
            }
        }
    }

    debug!(?owner, student_id, %date, ?summary, "Attendance synchronised");
    Ok(summary)
}

pub async fn find_permission<'c, E>(executor: E, id: u64) -> ApiResult<Option<LeavePermission>>
where
    E: sqlx::Executor<'c, Database = MySql>,
{
    let permission = sqlx::query_as::<_, LeavePermission>(&format!(
        "SELECT {LEAVE_PERMISSION_COLUMNS} FROM student_leave_permissions WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(permission)
}

/// Loads and row-locks an active permission, 404/422 otherwise.
async fn lock_active(tx: &mut Transaction<'_, MySql>, id: u64) -> ApiResult<LeavePermission> {
    let permission = sqlx::query_as::<_, LeavePermission>(&format!(
        "SELECT {LEAVE_PERMISSION_COLUMNS} FROM student_leave_permissions WHERE id = ? FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Leave permission not found"))?;

    if !permission.is_active() {
        return Err(ApiError::validation(format!(
            "Leave permission is already {}",
            permission.status.as_ref()
        )));
    }

    Ok(permission)
}

/// Grant a permission and write the attendance it implies, atomically.
#[instrument(skip(pool, new), fields(student_id = new.student_id, date = %new.date))]
pub async fn grant(
    pool: &MySqlPool,
    new: NewLeavePermission,
    granted_by: u64,
) -> ApiResult<(LeavePermission, ChangeSummary)> {
    let slots = day_slots(pool, new.class_id, new.date).await?;

    let mut tx = pool.begin().await?;

    // Grants for one student queue on this row lock, so the lookup below
    // always sees a committed competitor.
    let student = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM student_profiles WHERE id = ? FOR UPDATE",
    )
    .bind(new.student_id)
    .fetch_optional(&mut *tx)
    .await?;
    if student.is_none() {
        return Err(ApiError::validation("Student not found"));
    }

    let existing_active = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM student_leave_permissions WHERE student_id = ? AND active_date = ?",
    )
    .bind(new.student_id)
    .bind(new.date)
    .fetch_optional(&mut *tx)
    .await?;
    grant_conflict(existing_active)?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO student_leave_permissions
            (student_id, class_id, granted_by, schedule_id, leave_type, date,
             start_time, end_time, reason, status, is_full_day)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)
        "#,
    )
    .bind(new.student_id)
    .bind(new.class_id)
    .bind(granted_by)
    .bind(new.schedule_id)
    .bind(new.leave_type)
    .bind(new.date)
    .bind(new.start_time)
    .bind(new.end_time)
    .bind(&new.reason)
    .bind(new.is_full_day)
    .execute(&mut *tx)
    .await;

    let id = match inserted {
        Ok(result) => result.last_insert_id(),
        Err(e) => match insert_failure(mysql_error_number(&e)) {
            Some(mapped) => return Err(mapped),
            None => return Err(e.into()),
        },
    };

    let permission = find_permission(&mut *tx, id)
        .await?
        .ok_or(ApiError::Internal)?;

    let existing = lock_day_rows(&mut tx, new.student_id, new.date).await?;
    let changes = plan::plan_grant(&LeaveTerms::from(&permission), &slots, &existing);
    let summary = apply_changes(
        &mut tx,
        new.student_id,
        new.date,
        Owner::LeavePermission(id),
        granted_by,
        &changes,
    )
    .await?;

    tx.commit().await?;

    info!(permission_id = id, leave_type = new.leave_type.as_ref(), ?summary, "Leave permission granted");
    Ok((permission, summary))
}

fn duplicate_active() -> ApiError {
    ApiError::validation("Student already has an active leave permission for this date")
}

/// At most one active permission per student and day.
fn grant_conflict(existing_active: Option<u64>) -> ApiResult<()> {
    match existing_active {
        Some(active_id) => {
            info!(active_id, "Grant refused: student already has an active permission");
            Err(duplicate_active())
        }
        None => Ok(()),
    }
}

/// Maps a failed permission insert by MySQL error number. `None` leaves the
/// error to the generic 500 path.
fn insert_failure(number: Option<u16>) -> Option<ApiError> {
    match number? {
        DUPLICATE_KEY => Some(duplicate_active()),
        MISSING_REFERENCE => Some(ApiError::validation(
            "Student, class or schedule no longer exists",
        )),
        _ => None,
    }
}

/// Student is back. `returned_at` is wall-clock time at the school.
#[instrument(skip(pool))]
pub async fn mark_returned(
    pool: &MySqlPool,
    id: u64,
    actor: u64,
    returned_at: NaiveDateTime,
) -> ApiResult<(LeavePermission, ChangeSummary)> {
    let mut tx = pool.begin().await?;
    let permission = lock_active(&mut tx, id).await?;

    if returned_at.date() != permission.date || returned_at.time() < permission.start_time {
        return Err(ApiError::validation(
            "Return time must be on the permission date and not before its start",
        ));
    }

    let slots = day_slots(pool, permission.class_id, permission.date).await?;
    let existing = lock_day_rows(&mut tx, permission.student_id, permission.date).await?;
    let changes = plan::plan_return(
        &LeaveTerms::from(&permission),
        returned_at.time(),
        &slots,
        &existing,
    );
    let summary = apply_changes(
        &mut tx,
        permission.student_id,
        permission.date,
        Owner::LeavePermission(id),
        actor,
        &changes,
    )
    .await?;

    sqlx::query(
        r#"
        UPDATE student_leave_permissions
        SET status = ?, returned_at = ?, returned_by = ?
        WHERE id = ?
        "#,
    )
    .bind(LeaveStatus::Returned)
    .bind(returned_at)
    .bind(actor)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let updated = find_permission(&mut *tx, id).await?.ok_or(ApiError::Internal)?;
    tx.commit().await?;

    info!(permission_id = id, ?summary, "Leave permission returned");
    Ok((updated, summary))
}

#[instrument(skip(pool))]
pub async fn cancel(
    pool: &MySqlPool,
    id: u64,
    actor: u64,
    now: NaiveDateTime,
) -> ApiResult<(LeavePermission, ChangeSummary)> {
    let mut tx = pool.begin().await?;
    let permission = lock_active(&mut tx, id).await?;

    let existing = lock_day_rows(&mut tx, permission.student_id, permission.date).await?;
    let changes = plan::plan_cancel(&LeaveTerms::from(&permission), &existing);
    let summary = apply_changes(
        &mut tx,
        permission.student_id,
        permission.date,
        Owner::LeavePermission(id),
        actor,
        &changes,
    )
    .await?;

    sqlx::query(
        r#"
        UPDATE student_leave_permissions
        SET status = ?, cancelled_at = ?, cancelled_by = ?
        WHERE id = ?
        "#,
    )
    .bind(LeaveStatus::Cancelled)
    .bind(now)
    .bind(actor)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let updated = find_permission(&mut *tx, id).await?.ok_or(ApiError::Internal)?;
    tx.commit().await?;

    info!(permission_id = id, ?summary, "Leave permission cancelled");
    Ok((updated, summary))
}

/// Expire one permission if it is still active and due. Returns whether it expired.
async fn expire_one(
    pool: &MySqlPool,
    id: u64,
    now: NaiveDateTime,
) -> ApiResult<Option<ChangeSummary>> {
    let mut tx = pool.begin().await?;

    let permission = match lock_active(&mut tx, id).await {
        Ok(p) => p,
        // returned or cancelled since the scan
        Err(ApiError::Validation(_)) | Err(ApiError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    let terms = LeaveTerms::from(&permission);
    if !plan::is_due(&terms, now) {
        return Ok(None);
    }

    let slots = day_slots(pool, permission.class_id, permission.date).await?;
    let existing = lock_day_rows(&mut tx, permission.student_id, permission.date).await?;
    let changes = plan::plan_expiry(&terms, now, &slots, &existing);
    let summary = apply_changes(
        &mut tx,
        permission.student_id,
        permission.date,
        Owner::LeavePermission(id),
        permission.granted_by,
        &changes,
    )
    .await?;

    sqlx::query("UPDATE student_leave_permissions SET status = ?, expired_at = ? WHERE id = ?")
        .bind(LeaveStatus::Expired)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(summary))
}

/// Sweep: expire every active permission that is due at `now`.
#[instrument(skip(pool))]
pub async fn expire_due(pool: &MySqlPool, now: NaiveDateTime) -> ApiResult<(u32, ChangeSummary)> {
    // coarse prefilter, `is_due` makes the exact call per row
    let candidates = sqlx::query_scalar::<_, u64>(
        r#"
        SELECT id FROM student_leave_permissions
        WHERE status = 'active'
          AND (date < ? OR (date = ? AND is_full_day = FALSE AND end_time IS NOT NULL AND end_time <= ?))
        ORDER BY id
        "#,
    )
    .bind(now.date())
    .bind(now.date())
    .bind(now.time())
    .fetch_all(pool)
    .await?;

    let mut expired = 0u32;
    let mut total = ChangeSummary::default();

    for id in candidates {
        match expire_one(pool, id, now).await {
            Ok(Some(summary)) => {
                expired += 1;
                total.add(summary);
            }
            Ok(None) => {}
            Err(e) => warn!(permission_id = id, error = %e, "Failed to expire leave permission"),
        }
    }

    if expired > 0 {
        info!(expired, summary = ?total, "Expired leave permissions");
    }
    Ok((expired, total))
}

/// Approve a pending absence request and excuse every lesson in its range.
#[instrument(skip(pool, note))]
pub async fn approve_absence(
    pool: &MySqlPool,
    request_id: u64,
    reviewer: u64,
    note: Option<String>,
    now: NaiveDateTime,
) -> ApiResult<ChangeSummary> {
    let mut tx = pool.begin().await?;

    let request = lock_pending_absence(&mut tx, request_id).await?;
    let status = request.request_type.attendance_status();

    let mut total = ChangeSummary::default();
    let mut date = request.start_date;
    while date <= request.end_date {
        let slots = day_slots(pool, request.class_id, date).await?;
        if !slots.is_empty() {
            let existing = lock_day_rows(&mut tx, request.student_id, date).await?;
            let changes = plan::plan_absence_day(request_id, status, &slots, &existing);
            let summary = apply_changes(
                &mut tx,
                request.student_id,
                date,
                Owner::AbsenceRequest(request_id),
                reviewer,
                &changes,
            )
            .await?;
            total.add(summary);
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    review_absence(&mut tx, request_id, AbsenceStatus::Approved, reviewer, note, now).await?;
    tx.commit().await?;

    info!(request_id, summary = ?total, "Absence request approved");
    Ok(total)
}

pub async fn reject_absence(
    pool: &MySqlPool,
    request_id: u64,
    reviewer: u64,
    note: Option<String>,
    now: NaiveDateTime,
) -> ApiResult<()> {
    let mut tx = pool.begin().await?;
    lock_pending_absence(&mut tx, request_id).await?;
    review_absence(&mut tx, request_id, AbsenceStatus::Rejected, reviewer, note, now).await?;
    tx.commit().await?;

    info!(request_id, "Absence request rejected");
    Ok(())
}

async fn lock_pending_absence(
    tx: &mut Transaction<'_, MySql>,
    request_id: u64,
) -> ApiResult<AbsenceRequest> {
    let request = sqlx::query_as::<_, AbsenceRequest>(&format!(
        "SELECT {} FROM absence_requests WHERE id = ? FOR UPDATE",
        crate::model::absence_request::ABSENCE_REQUEST_COLUMNS
    ))
    .bind(request_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Absence request not found"))?;

    if request.status != AbsenceStatus::Pending {
        return Err(ApiError::validation(format!(
            "Absence request is already {}",
            request.status.as_ref()
        )));
    }

    Ok(request)
}

async fn review_absence(
    tx: &mut Transaction<'_, MySql>,
    request_id: u64,
    status: AbsenceStatus,
    reviewer: u64,
    note: Option<String>,
    now: NaiveDateTime,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        UPDATE absence_requests
        SET status = ?, reviewed_by = ?, reviewed_at = ?, review_note = ?
        WHERE id = ?
        "#,
    )
    .bind(status)
    .bind(reviewer)
    .bind(now)
    .bind(note)
    .bind(request_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_active_grant_for_the_day_is_refused() {
        let err = grant_conflict(Some(17)).unwrap_err();
        assert!(
            matches!(&err, ApiError::Validation(msg) if msg.contains("already has an active leave permission"))
        );
        assert_eq!(
            actix_web::ResponseError::status_code(&err),
            actix_web::http::StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn grant_proceeds_without_an_active_permission() {
        assert!(grant_conflict(None).is_ok());
    }

    #[test]
    fn duplicate_key_on_insert_is_the_active_permission_conflict() {
        let err = insert_failure(Some(DUPLICATE_KEY)).unwrap();
        assert!(
            matches!(&err, ApiError::Validation(msg) if msg.contains("already has an active leave permission"))
        );
    }

    #[test]
    fn missing_reference_on_insert_is_not_reported_as_duplicate() {
        let err = insert_failure(Some(MISSING_REFERENCE)).unwrap();
        assert!(
            matches!(&err, ApiError::Validation(msg) if msg.contains("no longer exists"))
        );
    }

    #[test]
    fn other_insert_failures_fall_through() {
        // lock wait timeout, deadlock, connection loss
        assert!(insert_failure(Some(1205)).is_none());
        assert!(insert_failure(Some(1213)).is_none());
        assert!(insert_failure(None).is_none());
    }
}
