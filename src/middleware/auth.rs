use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::AuthError;
use crate::response::AppError;
use crate::state::AppState;

/// Resolves the bearer token and stores the [`crate::auth::AuthUser`] in the request
/// extensions for the handlers behind it.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = crate::auth::extract_token(req.headers()) else {
        return AppError::unauthorized("Authentication required").into_response();
    };

    let secret = state.config().jwt_secret.as_deref();
    match crate::auth::verify_request_token(state.db().pool(), secret, &token).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(AuthError::MissingSecret) => {
            tracing::error!("JWT_SECRET is not configured, rejecting authenticated request");
            AppError::service_unavailable("Authentication is not configured").into_response()
        }
        Err(AuthError::Database(err)) => {
            tracing::error!(error = %err, "user lookup failed during authentication");
            AppError::service_unavailable("Database unavailable").into_response()
        }
        Err(err) => {
            tracing::debug!(error = %err, "token rejected");
            AppError::unauthorized("Invalid or expired token").into_response()
        }
    }
}
