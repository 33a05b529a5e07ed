use crate::api::{
    absence_request::{ReviewAbsence, SubmitAbsence},
    attendance::{AttendanceCounts, AttendanceSummary, RecordSession, SessionEntry, SessionResult, SkippedEntry},
    classes::CreateClass,
    leave_permission::{GrantLeave, LeaveChangeResponse, ReturnLeave},
    schedules::CreateSchedule,
    students::CreateStudent,
    subjects::CreateSubject,
    teachers::CreateTeacher,
    users::CreateUser,
};
use crate::auth::handlers::{LoginResponse, RefreshRequest};
use crate::lifecycle::store::ChangeSummary;
use crate::model::{
    absence_request::{AbsenceRequest, AbsenceStatus, AbsenceType},
    attendance::{Attendance, AttendanceStatus},
    class_room::ClassRoom,
    leave_permission::{LeavePermission, LeaveStatus, LeaveType},
    role::Role,
    schedule::Schedule,
    student::StudentProfile,
    subject::Subject,
    teacher::TeacherProfile,
    user::User,
};
use crate::models::LoginReqDto;
use crate::utils::pagination::{
    AbsenceRequestPage, AttendancePage, ClassRoomPage, LeavePermissionPage, SchedulePage,
    StudentPage, SubjectPage, TeacherPage, UserPage,
};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "School Attendance API",
        version = "1.0.0",
        description = r#"
## School attendance and leave permissions

Backend for recording lesson attendance in a vocational high school and for the
permissions that excuse students from lessons.

### Key Features
- **Leave permissions** granted by teachers (`izin_pulang`, `dispensasi`, `sakit`, `izin`)
  - Attendance for covered lessons is written, restored and expired automatically
- **Absence requests** filed by students and reviewed by the homeroom teacher
- **Attendance** recorded per lesson, with per-student summaries
- **Roster**: users, teachers, students, classes, subjects and the weekly schedule

### Security
Endpoints under the API prefix need a **JWT Bearer** access token from `/auth/login`.
Roles: Admin, Waka, Wali Kelas, Guru, Pengurus Kelas, Siswa.

### Response Format
- JSON bodies, errors as `{"message": "..."}`
- List endpoints are paginated with `page` and `per_page`
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,
        crate::auth::handlers::me,

        crate::api::leave_permission::grant_leave,
        crate::api::leave_permission::list_leaves,
        crate::api::leave_permission::active_leaves,
        crate::api::leave_permission::get_leave,
        crate::api::leave_permission::return_leave,
        crate::api::leave_permission::cancel_leave,
        crate::api::leave_permission::check_expired,
        crate::api::leave_permission::upload_attachment,

        crate::api::absence_request::submit_request,
        crate::api::absence_request::list_requests,
        crate::api::absence_request::get_request,
        crate::api::absence_request::approve_request,
        crate::api::absence_request::reject_request,
        crate::api::absence_request::upload_attachment,

        crate::api::attendance::record_session,
        crate::api::attendance::list_attendance,
        crate::api::attendance::update_attendance,
        crate::api::attendance::attendance_summary,

        crate::api::users::create_user,
        crate::api::users::list_users,
        crate::api::users::get_user,
        crate::api::users::update_user,
        crate::api::users::delete_user,
        crate::api::users::username_available,

        crate::api::teachers::create_teacher,
        crate::api::teachers::list_teachers,
        crate::api::teachers::get_teacher,
        crate::api::teachers::update_teacher,
        crate::api::teachers::delete_teacher,

        crate::api::students::create_student,
        crate::api::students::list_students,
        crate::api::students::get_student,
        crate::api::students::update_student,
        crate::api::students::delete_student,

        crate::api::classes::create_class,
        crate::api::classes::list_classes,
        crate::api::classes::get_class,
        crate::api::classes::update_class,
        crate::api::classes::delete_class,

        crate::api::subjects::create_subject,
        crate::api::subjects::list_subjects,
        crate::api::subjects::get_subject,
        crate::api::subjects::update_subject,
        crate::api::subjects::delete_subject,

        crate::api::schedules::create_schedule,
        crate::api::schedules::list_schedules,
        crate::api::schedules::get_schedule,
        crate::api::schedules::update_schedule,
        crate::api::schedules::delete_schedule,
        crate::api::schedules::upload_image
    ),
    components(
        schemas(
            LoginReqDto,
            LoginResponse,
            RefreshRequest,
            Role,
            User,
            CreateUser,
            UserPage,
            TeacherProfile,
            CreateTeacher,
            TeacherPage,
            StudentProfile,
            CreateStudent,
            StudentPage,
            ClassRoom,
            CreateClass,
            ClassRoomPage,
            Subject,
            CreateSubject,
            SubjectPage,
            Schedule,
            CreateSchedule,
            SchedulePage,
            LeaveType,
            LeaveStatus,
            LeavePermission,
            GrantLeave,
            ReturnLeave,
            LeaveChangeResponse,
            LeavePermissionPage,
            ChangeSummary,
            AbsenceType,
            AbsenceStatus,
            AbsenceRequest,
            SubmitAbsence,
            ReviewAbsence,
            AbsenceRequestPage,
            AttendanceStatus,
            Attendance,
            RecordSession,
            SessionEntry,
            SessionResult,
            SkippedEntry,
            AttendanceCounts,
            AttendanceSummary,
            AttendancePage
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, token refresh and the current user"),
        (name = "Leave Permission", description = "Teacher-granted leave and its effect on attendance"),
        (name = "Absence Request", description = "Student-filed absence requests"),
        (name = "Attendance", description = "Lesson attendance"),
        (name = "User", description = "Accounts (Admin)"),
        (name = "Teacher", description = "Teacher profiles"),
        (name = "Student", description = "Student profiles"),
        (name = "Class", description = "Class rooms"),
        (name = "Subject", description = "Subjects"),
        (name = "Schedule", description = "Weekly lesson schedule"),
    )
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme the paths refer to.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_lifecycle_paths_and_bearer_scheme() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/leave-permissions/{id}/return"));
        assert!(doc.paths.paths.contains_key("/api/attendance/sessions"));

        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
