use axum::Json;

use crate::auth::AuthenticatedUser;

/// Echoes the identity carried by the bearer token.
pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}
