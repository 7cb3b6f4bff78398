//! Bearer token middleware and role guards

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use learnhub_shared::{UserId, UserRole};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::support::model::Actor;

/// Authenticated caller, inserted as a request extension by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    /// None when the token carries a role this service does not know
    pub role: Option<UserRole>,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn from_claims(claims: super::Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role.parse().ok(),
            email: claims.email,
        }
    }

    pub fn require_student(&self) -> ApiResult<UserId> {
        match self.role {
            Some(UserRole::Student) => Ok(self.user_id),
            _ => Err(ApiError::Forbidden("Student role required".to_string())),
        }
    }

    pub fn require_manager(&self) -> ApiResult<UserId> {
        match self.role {
            Some(role) if role.is_support_staff() => Ok(self.user_id),
            _ => Err(ApiError::Forbidden("Manager role required".to_string())),
        }
    }

    /// The caller as a support participant
    pub fn actor(&self) -> ApiResult<Actor> {
        match self.role {
            Some(UserRole::Student) => Ok(Actor::Student(self.user_id)),
            Some(role) if role.is_support_staff() => Ok(Actor::Manager(self.user_id)),
            _ => Err(ApiError::Forbidden("Support chat is not available for this role".to_string())),
        }
    }
}

/// Extract the bearer token from an Authorization header value
fn bearer_token(value: &str) -> Option<&str> {
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

/// Reject requests without a valid access token
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(ApiError::Unauthorized)?;

    let claims = state.jwt.validate_access_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        ApiError::from(e)
    })?;

    request.extensions_mut().insert(AuthUser::from_claims(claims));
    Ok(next.run(request).await)
}
