use crate::{
    api::{
        absence_request, attendance, classes, leave_permission, schedules, students, subjects,
        teachers, users,
    },
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);

    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_else(GovernorConfig::default);
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(refresh_limiter)
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes; fixed segments are registered before `/{id}`
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(protected_limiter)
            .service(web::resource("/me").route(web::get().to(handlers::me)))
            .service(
                web::scope("/leave-permissions")
                    .service(
                        web::resource("")
                            .route(web::get().to(leave_permission::list_leaves))
                            .route(web::post().to(leave_permission::grant_leave)),
                    )
                    .service(
                        web::resource("/active")
                            .route(web::get().to(leave_permission::active_leaves)),
                    )
                    .service(
                        web::resource("/check-expired")
                            .route(web::post().to(leave_permission::check_expired)),
                    )
                    .service(
                        web::resource("/{id}").route(web::get().to(leave_permission::get_leave)),
                    )
                    .service(
                        web::resource("/{id}/return")
                            .route(web::post().to(leave_permission::return_leave)),
                    )
                    .service(
                        web::resource("/{id}/cancel")
                            .route(web::post().to(leave_permission::cancel_leave)),
                    )
                    .service(
                        web::resource("/{id}/attachment")
                            .route(web::post().to(leave_permission::upload_attachment)),
                    ),
            )
            .service(
                web::scope("/absence-requests")
                    .service(
                        web::resource("")
                            .route(web::get().to(absence_request::list_requests))
                            .route(web::post().to(absence_request::submit_request)),
                    )
                    .service(
                        web::resource("/{id}").route(web::get().to(absence_request::get_request)),
                    )
                    .service(
                        web::resource("/{id}/approve")
                            .route(web::post().to(absence_request::approve_request)),
                    )
                    .service(
                        web::resource("/{id}/reject")
                            .route(web::post().to(absence_request::reject_request)),
                    )
                    .service(
                        web::resource("/{id}/attachment")
                            .route(web::post().to(absence_request::upload_attachment)),
                    ),
            )
            .service(
                web::scope("/attendance")
                    .service(web::resource("").route(web::get().to(attendance::list_attendance)))
                    .service(
                        web::resource("/sessions").route(web::post().to(attendance::record_session)),
                    )
                    .service(
                        web::resource("/summary")
                            .route(web::get().to(attendance::attendance_summary)),
                    )
                    .service(
                        web::resource("/{id}").route(web::put().to(attendance::update_attendance)),
                    ),
            )
            .service(
                web::scope("/users")
                    .service(
                        web::resource("")
                            .route(web::get().to(users::list_users))
                            .route(web::post().to(users::create_user)),
                    )
                    .service(
                        web::resource("/username-available")
                            .route(web::get().to(users::username_available)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(users::get_user))
                            .route(web::put().to(users::update_user))
                            .route(web::delete().to(users::delete_user)),
                    ),
            )
            .service(
                web::scope("/teachers")
                    .service(
                        web::resource("")
                            .route(web::get().to(teachers::list_teachers))
                            .route(web::post().to(teachers::create_teacher)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(teachers::get_teacher))
                            .route(web::put().to(teachers::update_teacher))
                            .route(web::delete().to(teachers::delete_teacher)),
                    ),
            )
            .service(
                web::scope("/students")
                    .service(
                        web::resource("")
                            .route(web::get().to(students::list_students))
                            .route(web::post().to(students::create_student)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(students::get_student))
                            .route(web::put().to(students::update_student))
                            .route(web::delete().to(students::delete_student)),
                    ),
            )
            .service(
                web::scope("/classes")
                    .service(
                        web::resource("")
                            .route(web::get().to(classes::list_classes))
                            .route(web::post().to(classes::create_class)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(classes::get_class))
                            .route(web::put().to(classes::update_class))
                            .route(web::delete().to(classes::delete_class)),
                    ),
            )
            .service(
                web::scope("/subjects")
                    .service(
                        web::resource("")
                            .route(web::get().to(subjects::list_subjects))
                            .route(web::post().to(subjects::create_subject)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(subjects::get_subject))
                            .route(web::put().to(subjects::update_subject))
                            .route(web::delete().to(subjects::delete_subject)),
                    ),
            )
            .service(
                web::scope("/schedules")
                    .service(
                        web::resource("")
                            .route(web::get().to(schedules::list_schedules))
                            .route(web::post().to(schedules::create_schedule)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(schedules::get_schedule))
                            .route(web::put().to(schedules::update_schedule))
                            .route(web::delete().to(schedules::delete_schedule)),
                    )
                    .service(
                        web::resource("/{id}/image")
                            .route(web::post().to(schedules::upload_image)),
                    ),
            ),
    );
}

// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns new token pair, old refresh token revoked

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::generate_refresh_token;
    use crate::config::tests::test_config;
    use crate::models::TokenSubject;
    use actix_web::{App, http::StatusCode, test};
    use std::net::SocketAddr;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    macro_rules! app {
        ($config:expr) => {{
            let config = $config;
            test::init_service(
                App::new()
                    .app_data(web::Data::new(config.clone()))
                    .configure(|cfg| configure(cfg, config.clone())),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn protected_routes_require_a_token() {
        let app = app!(test_config());

        for uri in ["/api/me", "/api/leave-permissions", "/api/attendance/summary"] {
            let req = test::TestRequest::get().uri(uri).peer_addr(peer()).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[actix_web::test]
    async fn refresh_token_is_not_accepted_as_bearer() {
        let config = test_config();
        let subject = TokenSubject {
            user_id: 1,
            username: "admin".into(),
            role: 1,
            profile_id: None,
        };
        let (token, _) =
            generate_refresh_token(&subject, &config.jwt_secret, config.refresh_token_ttl).unwrap();
        let app = app!(config);

        let req = test::TestRequest::post()
            .uri("/api/leave-permissions/check-expired")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["message"].is_string());
    }
}
