use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::RequireAuth;
use crate::domain::Role;

#[derive(Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub role: Role,
    pub email: Option<String>,
}

/// Get the resolved caller identity
pub async fn get_me(auth: RequireAuth) -> Json<MeResponse> {
    Json(MeResponse {
        id: auth.principal.id,
        role: auth.principal.role,
        email: auth.email.clone(),
    })
}
