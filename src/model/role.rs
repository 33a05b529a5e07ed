use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Admin = 1,
    Waka = 2,
    WaliKelas = 3,
    Guru = 4,
    PengurusKelas = 5,
    Siswa = 6,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Waka),
            3 => Some(Role::WaliKelas),
            4 => Some(Role::Guru),
            5 => Some(Role::PengurusKelas),
            6 => Some(Role::Siswa),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Admin and Waka manage the whole school.
    pub fn is_manager(self) -> bool {
        matches!(self, Role::Admin | Role::Waka)
    }

    /// Anyone who teaches or administers.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Waka | Role::WaliKelas | Role::Guru)
    }

    /// Roles backed by a student profile.
    pub fn is_student(self) -> bool {
        matches!(self, Role::PengurusKelas | Role::Siswa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for id in 1..=6 {
            let role = Role::from_id(id).unwrap();
            assert_eq!(role.id(), id);
        }
        assert_eq!(Role::from_id(0), None);
        assert_eq!(Role::from_id(7), None);
    }

    #[test]
    fn groups_do_not_overlap_between_staff_and_students() {
        for id in 1..=6 {
            let role = Role::from_id(id).unwrap();
            assert_ne!(role.is_staff(), role.is_student(), "{role:?}");
        }
        assert!(Role::Waka.is_manager());
        assert!(!Role::WaliKelas.is_manager());
    }

    #[test]
    fn parses_snake_case_names() {
        assert_eq!("wali_kelas".parse::<Role>().unwrap(), Role::WaliKelas);
        assert_eq!(Role::PengurusKelas.as_ref(), "pengurus_kelas");
    }
}
