use crate::auth::auth::authenticate;
use crate::config::Config;
use crate::error::ApiError;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};

/// Rejects requests without a valid access token and stores the caller in
/// request extensions for the `AuthUser` extractor.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let outcome = match req.app_data::<Data<Config>>() {
        Some(config) => authenticate(req.headers(), config),
        None => {
            tracing::error!("App config missing");
            Err(ApiError::Internal)
        }
    };

    match outcome {
        Ok(auth_user) => {
            tracing::debug!(
                user_id = auth_user.user_id,
                role = auth_user.role.as_ref(),
                path = req.path(),
                "Authenticated request"
            );
            req.extensions_mut().insert(auth_user);
            next.call(req).await
        }
        Err(e) => {
            let resp = e.error_response();
            Ok(req.into_response(resp))
        }
    }
}
