//! Attendance bookkeeping for leave permissions and absence requests.
//!
//! Planning is pure: given the lessons of a day ("slots") and the student's
//! attendance rows for that day, each function returns the changes to make.
//! `store` applies them inside a transaction.

use crate::model::attendance::AttendanceStatus;
use crate::model::leave_permission::{LeavePermission, LeaveType};
use crate::model::schedule::Schedule;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// One lesson of the day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub schedule_id: u64,
    pub start_time: NaiveTime,
}

impl From<&Schedule> for Slot {
    fn from(s: &Schedule) -> Self {
        Slot {
            schedule_id: s.id,
            start_time: s.start_time,
        }
    }
}

/// The student's attendance row for one lesson on the permission date.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ExistingRow {
    pub id: u64,
    pub schedule_id: u64,
    pub status: AttendanceStatus,
    pub leave_permission_id: Option<u64>,
    pub absence_request_id: Option<u64>,
    pub previous_status: Option<AttendanceStatus>,
}

/// Who takes ownership of rows a plan creates or converts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    LeavePermission(u64),
    AbsenceRequest(u64),
}

impl Owner {
    fn owns(self, row: &ExistingRow) -> bool {
        match self {
            Owner::LeavePermission(id) => row.leave_permission_id == Some(id),
            Owner::AbsenceRequest(id) => row.absence_request_id == Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceChange {
    Create {
        schedule_id: u64,
        status: AttendanceStatus,
    },
    /// Turn an `alpha` row into an excused one, remembering the old status.
    Convert {
        attendance_id: u64,
        from: AttendanceStatus,
        to: AttendanceStatus,
    },
    /// Give an owned row back: delete it when `restore` is None, otherwise
    /// put the remembered status back.
    Release {
        attendance_id: u64,
        restore: Option<AttendanceStatus>,
    },
}

/// The parts of a leave permission that drive attendance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeaveTerms {
    pub id: u64,
    pub leave_type: LeaveType,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub is_full_day: bool,
}

impl From<&LeavePermission> for LeaveTerms {
    fn from(p: &LeavePermission) -> Self {
        LeaveTerms {
            id: p.id,
            leave_type: p.leave_type,
            date: p.date,
            start_time: p.start_time,
            end_time: p.end_time,
            is_full_day: p.is_full_day,
        }
    }
}

impl LeaveTerms {
    fn owner(&self) -> Owner {
        Owner::LeavePermission(self.id)
    }

    /// End time that matters for partial-day permissions.
    fn partial_end(&self) -> Option<NaiveTime> {
        if self.is_full_day { None } else { self.end_time }
    }

    /// Lessons the permission excuses.
    pub fn covers(&self, slot: &Slot) -> bool {
        if self.is_full_day {
            return true;
        }
        slot.start_time >= self.start_time
            && self.end_time.is_none_or(|end| slot.start_time < end)
    }

    /// Lessons after the expected return time.
    fn after_return_deadline(&self, slot: &Slot) -> bool {
        self.partial_end().is_some_and(|end| slot.start_time >= end)
    }
}

/// Create missing rows and convert unowned `alpha` rows to `status`.
/// Rows with any other status were recorded by a teacher and stay as they are.
fn mark<'a>(
    slots: impl IntoIterator<Item = &'a Slot>,
    existing: &[ExistingRow],
    status: AttendanceStatus,
    owner: Owner,
) -> Vec<AttendanceChange> {
    let mut changes = Vec::new();

    for slot in slots {
        match existing.iter().find(|r| r.schedule_id == slot.schedule_id) {
            None => changes.push(AttendanceChange::Create {
                schedule_id: slot.schedule_id,
                status,
            }),
            Some(row)
                if row.status == AttendanceStatus::Alpha
                    && status != AttendanceStatus::Alpha
                    && row.leave_permission_id.is_none()
                    && !owner.owns(row) =>
            {
                changes.push(AttendanceChange::Convert {
                    attendance_id: row.id,
                    from: row.status,
                    to: status,
                });
            }
            Some(_) => {}
        }
    }

    changes
}

fn release(row: &ExistingRow) -> AttendanceChange {
    AttendanceChange::Release {
        attendance_id: row.id,
        restore: row.previous_status,
    }
}

/// Attendance written when the permission is granted.
pub fn plan_grant(terms: &LeaveTerms, slots: &[Slot], existing: &[ExistingRow]) -> Vec<AttendanceChange> {
    let status = terms.leave_type.excuse_status();

    if terms.is_full_day {
        mark(slots, existing, status, terms.owner())
    } else if terms.leave_type == LeaveType::Dispensasi {
        // settled on return or expiry
        Vec::new()
    } else {
        mark(
            slots.iter().filter(|s| terms.covers(s)),
            existing,
            status,
            terms.owner(),
        )
    }
}

/// Student came back at `returned_at`.
///
/// Lessons that start later are handed back (the student attends them).
/// Lessons that already started keep their rows; a dispensation fills in the
/// ones it covered, and lessons missed after the agreed end time count as `alpha`.
pub fn plan_return(
    terms: &LeaveTerms,
    returned_at: NaiveTime,
    slots: &[Slot],
    existing: &[ExistingRow],
) -> Vec<AttendanceChange> {
    let start_of = |schedule_id: u64| {
        slots
            .iter()
            .find(|s| s.schedule_id == schedule_id)
            .map(|s| s.start_time)
    };

    let mut changes: Vec<AttendanceChange> = existing
        .iter()
        .filter(|row| terms.owner().owns(row))
        .filter(|row| start_of(row.schedule_id).is_some_and(|start| start > returned_at))
        .map(release)
        .collect();

    let started: Vec<&Slot> = slots.iter().filter(|s| s.start_time <= returned_at).collect();

    if terms.leave_type == LeaveType::Dispensasi && !terms.is_full_day {
        changes.extend(mark(
            started.iter().copied().filter(|s| terms.covers(s)),
            existing,
            AttendanceStatus::Dispen,
            terms.owner(),
        ));
    }

    changes.extend(mark(
        started.iter().copied().filter(|s| terms.after_return_deadline(s)),
        existing,
        AttendanceStatus::Alpha,
        terms.owner(),
    ));

    changes
}

/// Undo everything the permission did to attendance.
pub fn plan_cancel(terms: &LeaveTerms, existing: &[ExistingRow]) -> Vec<AttendanceChange> {
    existing
        .iter()
        .filter(|row| terms.owner().owns(row))
        .map(release)
        .collect()
}

/// An active permission is due once its day is over, or once a partial-day
/// permission is past its end time. Expiry does not wait for the day's
/// remaining lessons, see [`plan_expiry`].
pub fn is_due(terms: &LeaveTerms, now: NaiveDateTime) -> bool {
    let today = now.date();
    if terms.date < today {
        return true;
    }
    terms.date == today && terms.partial_end().is_some_and(|end| now.time() >= end)
}

/// Attendance written when an active permission runs out without a return.
///
/// Only lessons that have started by `now` are marked `alpha`. A same-day
/// sweep shortly after `end_time` usually finds none; the expired permission
/// is not revisited, so those later lessons are left to the teacher's session.
/// Only a permission first swept after its day is over gets them all.
pub fn plan_expiry(
    terms: &LeaveTerms,
    now: NaiveDateTime,
    slots: &[Slot],
    existing: &[ExistingRow],
) -> Vec<AttendanceChange> {
    let day_over = terms.date < now.date();
    let started = |s: &&Slot| day_over || s.start_time <= now.time();

    let mut changes = Vec::new();

    if terms.leave_type == LeaveType::Dispensasi && !terms.is_full_day {
        changes.extend(mark(
            slots.iter().filter(|s| terms.covers(s)),
            existing,
            AttendanceStatus::Dispen,
            terms.owner(),
        ));
    }

    changes.extend(mark(
        slots
            .iter()
            .filter(|s| terms.after_return_deadline(s))
            .filter(started),
        existing,
        AttendanceStatus::Alpha,
        terms.owner(),
    ));

    changes
}

/// Excuse every lesson of one day covered by an approved absence request.
pub fn plan_absence_day(
    request_id: u64,
    status: AttendanceStatus,
    slots: &[Slot],
    existing: &[ExistingRow],
) -> Vec<AttendanceChange> {
    mark(slots, existing, status, Owner::AbsenceRequest(request_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERMISSION: u64 = 40;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 14).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_time(t(h, m))
    }

    /// Lessons 1..=4 at 07:00, 08:30, 10:15, 12:30
    fn slots() -> Vec<Slot> {
        [(1, t(7, 0)), (2, t(8, 30)), (3, t(10, 15)), (4, t(12, 30))]
            .into_iter()
            .map(|(schedule_id, start_time)| Slot {
                schedule_id,
                start_time,
            })
            .collect()
    }

    fn terms(leave_type: LeaveType, start: NaiveTime, end: Option<NaiveTime>, full: bool) -> LeaveTerms {
        LeaveTerms {
            id: PERMISSION,
            leave_type,
            date: day(),
            start_time: start,
            end_time: end,
            is_full_day: full,
        }
    }

    fn row(id: u64, schedule_id: u64, status: AttendanceStatus) -> ExistingRow {
        ExistingRow {
            id,
            schedule_id,
            status,
            leave_permission_id: None,
            absence_request_id: None,
            previous_status: None,
        }
    }

    fn owned(mut r: ExistingRow, previous: Option<AttendanceStatus>) -> ExistingRow {
        r.leave_permission_id = Some(PERMISSION);
        r.previous_status = previous;
        r
    }

    fn created(changes: &[AttendanceChange]) -> Vec<(u64, AttendanceStatus)> {
        changes
            .iter()
            .filter_map(|c| match c {
                AttendanceChange::Create {
                    schedule_id,
                    status,
                } => Some((*schedule_id, *status)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn full_day_sick_leave_marks_every_lesson() {
        let sakit = terms(LeaveType::Sakit, t(6, 45), None, true);
        let changes = plan_grant(&sakit, &slots(), &[]);

        assert_eq!(
            created(&changes),
            vec![
                (1, AttendanceStatus::Sakit),
                (2, AttendanceStatus::Sakit),
                (3, AttendanceStatus::Sakit),
                (4, AttendanceStatus::Sakit),
            ]
        );
    }

    #[test]
    fn going_home_marks_remaining_lessons_only() {
        let pulang = terms(LeaveType::IzinPulang, t(10, 0), None, false);
        let existing = [row(100, 1, AttendanceStatus::Hadir), row(101, 2, AttendanceStatus::Hadir)];

        let changes = plan_grant(&pulang, &slots(), &existing);
        assert_eq!(
            created(&changes),
            vec![(3, AttendanceStatus::Izin), (4, AttendanceStatus::Izin)]
        );
    }

    #[test]
    fn dispensation_grant_leaves_attendance_alone() {
        let dispen = terms(LeaveType::Dispensasi, t(8, 0), Some(t(11, 0)), false);
        assert!(plan_grant(&dispen, &slots(), &[]).is_empty());
    }

    #[test]
    fn grant_converts_alpha_but_not_recorded_presence() {
        let izin = terms(LeaveType::Izin, t(7, 0), None, true);
        let existing = [
            row(100, 1, AttendanceStatus::Alpha),
            row(101, 2, AttendanceStatus::Hadir),
            row(102, 3, AttendanceStatus::Sakit),
        ];

        let changes = plan_grant(&izin, &slots(), &existing);
        assert_eq!(
            changes,
            vec![
                AttendanceChange::Convert {
                    attendance_id: 100,
                    from: AttendanceStatus::Alpha,
                    to: AttendanceStatus::Izin,
                },
                AttendanceChange::Create {
                    schedule_id: 4,
                    status: AttendanceStatus::Izin,
                },
            ]
        );
    }

    #[test]
    fn partial_window_respects_end_time() {
        let izin = terms(LeaveType::Izin, t(8, 0), Some(t(10, 15)), false);
        let changes = plan_grant(&izin, &slots(), &[]);
        // lesson 3 starts exactly at the end time and is not covered
        assert_eq!(created(&changes), vec![(2, AttendanceStatus::Izin)]);
    }

    #[test]
    fn early_return_does_not_alter_past_attendance() {
        let pulang = terms(LeaveType::IzinPulang, t(8, 0), Some(t(13, 0)), false);
        let existing = [
            row(100, 1, AttendanceStatus::Hadir),
            owned(row(101, 2, AttendanceStatus::Izin), None),
            owned(row(102, 3, AttendanceStatus::Izin), None),
            owned(row(103, 4, AttendanceStatus::Izin), Some(AttendanceStatus::Alpha)),
        ];

        let changes = plan_return(&pulang, t(10, 0), &slots(), &existing);

        // lessons 1 and 2 already happened: no change touches rows 100 or 101
        assert_eq!(
            changes,
            vec![
                AttendanceChange::Release {
                    attendance_id: 102,
                    restore: None,
                },
                AttendanceChange::Release {
                    attendance_id: 103,
                    restore: Some(AttendanceStatus::Alpha),
                },
            ]
        );
    }

    #[test]
    fn dispensation_return_fills_covered_lessons() {
        let dispen = terms(LeaveType::Dispensasi, t(8, 0), Some(t(12, 0)), false);
        let existing = [row(100, 1, AttendanceStatus::Hadir), row(101, 2, AttendanceStatus::Alpha)];

        let changes = plan_return(&dispen, t(11, 0), &slots(), &existing);
        assert_eq!(
            changes,
            vec![
                AttendanceChange::Convert {
                    attendance_id: 101,
                    from: AttendanceStatus::Alpha,
                    to: AttendanceStatus::Dispen,
                },
                AttendanceChange::Create {
                    schedule_id: 3,
                    status: AttendanceStatus::Dispen,
                },
            ]
        );
    }

    #[test]
    fn late_return_marks_lessons_missed_after_deadline() {
        let dispen = terms(LeaveType::Dispensasi, t(8, 0), Some(t(10, 0)), false);
        let changes = plan_return(&dispen, t(12, 45), &slots(), &[]);
        assert_eq!(
            created(&changes),
            vec![
                (2, AttendanceStatus::Dispen),
                (3, AttendanceStatus::Alpha),
                (4, AttendanceStatus::Alpha),
            ]
        );
    }

    #[test]
    fn cancel_releases_only_owned_rows() {
        let sakit = terms(LeaveType::Sakit, t(7, 0), None, true);
        let mut other = row(104, 4, AttendanceStatus::Izin);
        other.leave_permission_id = Some(PERMISSION + 1);
        let existing = [
            owned(row(100, 1, AttendanceStatus::Sakit), None),
            owned(row(101, 2, AttendanceStatus::Sakit), Some(AttendanceStatus::Alpha)),
            row(102, 3, AttendanceStatus::Hadir),
            other,
        ];

        assert_eq!(
            plan_cancel(&sakit, &existing),
            vec![
                AttendanceChange::Release {
                    attendance_id: 100,
                    restore: None,
                },
                AttendanceChange::Release {
                    attendance_id: 101,
                    restore: Some(AttendanceStatus::Alpha),
                },
            ]
        );
    }

    #[test]
    fn due_rules() {
        let partial = terms(LeaveType::Dispensasi, t(8, 0), Some(t(10, 0)), false);
        assert!(!is_due(&partial, at(9, 59)));
        assert!(is_due(&partial, at(10, 0)));

        let open_ended = terms(LeaveType::IzinPulang, t(9, 0), None, false);
        assert!(!is_due(&open_ended, at(23, 59)));
        assert!(is_due(&open_ended, at(23, 59) + chrono::Duration::minutes(1)));

        // full-day ignores a stray end time
        let full = terms(LeaveType::Sakit, t(7, 0), Some(t(9, 0)), true);
        assert!(!is_due(&full, at(15, 0)));

        let future = LeaveTerms {
            date: day().succ_opt().unwrap(),
            ..partial
        };
        assert!(!is_due(&future, at(11, 0)));
    }

    #[test]
    fn expiry_marks_alpha_only_for_started_lessons() {
        let izin = terms(LeaveType::Izin, t(7, 0), Some(t(10, 0)), false);
        let existing = [owned(row(100, 1, AttendanceStatus::Izin), None), owned(row(101, 2, AttendanceStatus::Izin), None)];

        let changes = plan_expiry(&izin, at(11, 0), &slots(), &existing);
        assert_eq!(created(&changes), vec![(3, AttendanceStatus::Alpha)]);

        // swept the next morning: the whole afternoon is counted
        let next_day = day().succ_opt().unwrap().and_time(t(6, 0));
        let changes = plan_expiry(&izin, next_day, &slots(), &existing);
        assert_eq!(
            created(&changes),
            vec![(3, AttendanceStatus::Alpha), (4, AttendanceStatus::Alpha)]
        );
    }

    #[test]
    fn sweep_right_after_deadline_expires_without_marking() {
        let izin = terms(LeaveType::Izin, t(7, 0), Some(t(10, 0)), false);
        let sweep = at(10, 5);

        assert!(is_due(&izin, sweep));
        // lesson 3 starts at 10:15, after the sweep
        assert!(plan_expiry(&izin, sweep, &slots(), &[]).is_empty());
    }

    #[test]
    fn expiry_keeps_teacher_records() {
        let dispen = terms(LeaveType::Dispensasi, t(8, 0), Some(t(10, 0)), false);
        let existing = [row(100, 2, AttendanceStatus::Dispen), row(101, 3, AttendanceStatus::Hadir)];

        let changes = plan_expiry(&dispen, at(13, 0), &slots(), &existing);
        assert_eq!(created(&changes), vec![(4, AttendanceStatus::Alpha)]);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn full_day_expiry_changes_nothing() {
        let sakit = terms(LeaveType::Sakit, t(7, 0), None, true);
        let next_day = day().succ_opt().unwrap().and_time(t(6, 0));
        assert!(plan_expiry(&sakit, next_day, &slots(), &[]).is_empty());
    }

    #[test]
    fn absence_day_skips_rows_owned_by_a_leave_permission() {
        let mut leave_owned = row(100, 1, AttendanceStatus::Alpha);
        leave_owned.leave_permission_id = Some(9);
        let existing = [leave_owned, row(101, 2, AttendanceStatus::Alpha)];

        let changes = plan_absence_day(5, AttendanceStatus::Sakit, &slots(), &existing);
        assert_eq!(
            changes,
            vec![
                AttendanceChange::Convert {
                    attendance_id: 101,
                    from: AttendanceStatus::Alpha,
                    to: AttendanceStatus::Sakit,
                },
                AttendanceChange::Create {
                    schedule_id: 3,
                    status: AttendanceStatus::Sakit,
                },
                AttendanceChange::Create {
                    schedule_id: 4,
                    status: AttendanceStatus::Sakit,
                },
            ]
        );
    }
}
