use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::{
    api::state::AppState,
    error::AppError,
    service::Payer,
};

#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub user_id: i64,
    pub email: String,
}

impl CurrentUser {
    pub fn as_payer(&self) -> Payer {
        Payer {
            user_id: self.user_id,
            email: self.email.clone(),
        }
    }
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AppError::Unauthorized)?;

    let claims = state.service_context.auth_service.validate_token(token)?;

    request.extensions_mut().insert(CurrentUser {
        user_id: claims.sub,
        email: claims.email,
    });

    Ok(next.run(request).await)
}
