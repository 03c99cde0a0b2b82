use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::user::UserPublic;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginData {
    pub user: UserPublic,
    pub access_token: String,
    pub refresh_token: String,
}

/// Body carrier for the refresh endpoint; cookie and header carriers take
/// precedence, so the field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshData {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccountRequest {
    pub full_name: String,
    pub email: String,
}
