use crate::model::{
    absence_request::AbsenceRequest, attendance::Attendance, class_room::ClassRoom,
    leave_permission::LeavePermission, schedule::Schedule, student::StudentProfile,
    subject::Subject, teacher::TeacherProfile, user::User,
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
    pub offset: u64,
}

impl Page {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        let per_page = per_page.unwrap_or(10).clamp(1, 100);
        let page = page.unwrap_or(1).max(1);
        let offset = (page as u64 - 1) * per_page as u64;

        Self {
            page,
            per_page,
            offset,
        }
    }

    pub fn wrap<T>(self, data: Vec<T>, total: i64) -> Paginated<T> {
        Paginated {
            data,
            page: self.page,
            per_page: self.per_page,
            total,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[aliases(
    UserPage = Paginated<User>,
    TeacherPage = Paginated<TeacherProfile>,
    StudentPage = Paginated<StudentProfile>,
    ClassRoomPage = Paginated<ClassRoom>,
    SubjectPage = Paginated<Subject>,
    SchedulePage = Paginated<Schedule>,
    AttendancePage = Paginated<Attendance>,
    AbsenceRequestPage = Paginated<AbsenceRequest>,
    LeavePermissionPage = Paginated<LeavePermission>
)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 10)]
    pub per_page: u32,
    #[schema(example = 1)]
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_offset() {
        assert_eq!(
            Page::new(None, None),
            Page {
                page: 1,
                per_page: 10,
                offset: 0
            }
        );
        assert_eq!(Page::new(Some(3), Some(20)).offset, 40);
    }

    #[test]
    fn bounds_are_clamped() {
        let page = Page::new(Some(0), Some(1000));
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, 100);
        assert_eq!(Page::new(None, Some(0)).per_page, 1);
    }
}
