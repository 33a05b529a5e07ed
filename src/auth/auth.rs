use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::model::role::Role;
use crate::models::TokenType;
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, http::header::HeaderMap};
use futures::future::{Ready, ready};
use sqlx::MySqlPool;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,

    /// Teacher profile for staff roles, student profile for student roles
    pub profile_id: Option<u64>,
}

/// Resolves the bearer access token in `headers` into an `AuthUser`.
pub fn authenticate(headers: &HeaderMap, config: &Config) -> ApiResult<AuthUser> {
    let header = headers
        .get("Authorization")
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".into()))?
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Invalid Authorization header encoding".into()))?;

    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        ApiError::Unauthorized("Authorization header must start with Bearer".into())
    })?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;

    if claims.token_type != TokenType::Access {
        return Err(ApiError::Unauthorized("Access token required".into()));
    }

    let role = Role::from_id(claims.role)
        .ok_or_else(|| ApiError::Unauthorized("Invalid role".into()))?;

    Ok(AuthUser {
        user_id: claims.user_id,
        username: claims.sub,
        role,
        profile_id: claims.profile_id,
    })
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // the middleware has usually done the work already
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let result = match req.app_data::<actix_web::web::Data<Config>>() {
            Some(config) => authenticate(req.headers(), config),
            None => {
                tracing::error!("Config missing from app data");
                Err(ApiError::Internal)
            }
        };

        ready(result)
    }
}

impl AuthUser {
    pub fn require_admin(&self) -> ApiResult<()> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ApiError::forbidden("Admin only"))
        }
    }

    pub fn require_manager(&self) -> ApiResult<()> {
        if self.role.is_manager() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Admin/Waka only"))
        }
    }

    pub fn require_staff(&self) -> ApiResult<()> {
        if self.role.is_staff() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Teachers and administrators only"))
        }
    }

    /// Student profile of the caller, for student roles.
    pub fn student_id(&self) -> Option<u64> {
        if self.role.is_student() {
            self.profile_id
        } else {
            None
        }
    }

    /// Teacher profile of the caller, for teaching roles.
    pub fn teacher_id(&self) -> Option<u64> {
        if matches!(self.role, Role::WaliKelas | Role::Guru | Role::Waka) {
            self.profile_id
        } else {
            None
        }
    }

    /// Managers, or the Wali Kelas of `class_id`.
    pub async fn can_manage_class(&self, pool: &MySqlPool, class_id: u64) -> ApiResult<bool> {
        if self.role.is_manager() {
            return Ok(true);
        }
        let Some(teacher_id) = self.teacher_id() else {
            return Ok(false);
        };

        let homeroom = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM class_rooms WHERE id = ? AND homeroom_teacher_id = ?)",
        )
        .bind(class_id)
        .bind(teacher_id)
        .fetch_one(pool)
        .await?;

        Ok(homeroom)
    }

    pub async fn require_class_manager(&self, pool: &MySqlPool, class_id: u64) -> ApiResult<()> {
        if self.can_manage_class(pool, class_id).await? {
            Ok(())
        } else {
            Err(ApiError::forbidden(
                "Only the homeroom teacher or Admin/Waka may do this",
            ))
        }
    }

    /// Class of the caller's student profile.
    pub async fn own_class_id(&self, pool: &MySqlPool) -> ApiResult<Option<u64>> {
        let Some(student_id) = self.student_id() else {
            return Ok(None);
        };

        let class_id =
            sqlx::query_scalar::<_, u64>("SELECT class_id FROM student_profiles WHERE id = ?")
                .bind(student_id)
                .fetch_optional(pool)
                .await?;

        Ok(class_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{generate_access_token, generate_refresh_token};
    use crate::config::tests::test_config;
    use crate::models::TokenSubject;
    use actix_web::http::header::{AUTHORIZATION, HeaderValue};

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn subject(role: Role) -> TokenSubject {
        TokenSubject {
            user_id: 3,
            username: "guru.mtk".into(),
            role: role.id(),
            profile_id: Some(8),
        }
    }

    #[test]
    fn access_token_authenticates() {
        let config = test_config();
        let token =
            generate_access_token(&subject(Role::Guru), &config.jwt_secret, 60).unwrap();

        let user = authenticate(&headers_with(&token), &config).unwrap();
        assert_eq!(user.role, Role::Guru);
        assert_eq!(user.teacher_id(), Some(8));
        assert_eq!(user.student_id(), None);
    }

    #[test]
    fn refresh_token_cannot_be_used_as_access_token() {
        let config = test_config();
        let (token, _) =
            generate_refresh_token(&subject(Role::Admin), &config.jwt_secret, 60).unwrap();

        assert!(matches!(
            authenticate(&headers_with(&token), &config),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let config = test_config();
        assert!(matches!(
            authenticate(&HeaderMap::new(), &config),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn guards_follow_role_groups() {
        let siswa = AuthUser {
            user_id: 1,
            username: "siswa".into(),
            role: Role::Siswa,
            profile_id: Some(12),
        };
        assert!(siswa.require_staff().is_err());
        assert_eq!(siswa.student_id(), Some(12));

        let waka = AuthUser {
            role: Role::Waka,
            ..siswa.clone()
        };
        assert!(waka.require_manager().is_ok());
        assert!(waka.require_admin().is_err());
    }
}
