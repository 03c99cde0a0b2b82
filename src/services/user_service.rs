use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use std::path::{Path, PathBuf};

use crate::{
    auth::tokens::{issue_token_pair, TokenPair},
    dto::users::{LoginRequest, UpdateAccountRequest},
    errors::{AppError, AuthFailure},
    media::upload_and_discard,
    models::user::{UserDoc, UserPublic},
    password::{hash_password, verify_password},
    state::AppState,
    store::ImageField,
};

/// Registration input after multipart parsing; file fields point at spooled
/// temp files owned by this form until uploaded or discarded.
#[derive(Debug, Default)]
pub struct RegisterForm {
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub avatar: Option<PathBuf>,
    pub cover_image: Option<PathBuf>,
}

impl RegisterForm {
    /// Best-effort removal of any temp files still on disk.
    pub async fn discard_files(&self) {
        if let Some(path) = &self.avatar {
            let _ = tokio::fs::remove_file(path).await;
        }
        if let Some(path) = &self.cover_image {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

pub async fn register(state: &AppState, form: RegisterForm) -> Result<UserPublic, AppError> {
    let result = register_inner(state, &form).await;
    // uploads already removed their temp files; this sweeps whatever an
    // early return left behind
    form.discard_files().await;
    result
}

async fn register_inner(state: &AppState, form: &RegisterForm) -> Result<UserPublic, AppError> {
    let full_name = form.full_name.trim().to_string();
    let email = form.email.trim().to_lowercase();
    let username = form.username.trim().to_lowercase();

    if [
        full_name.as_str(),
        email.as_str(),
        username.as_str(),
        form.password.trim(),
    ]
    .iter()
    .any(|field| field.is_empty())
    {
        return Err(AppError::Validation(
            "full name, email, username and password are required".into(),
        ));
    }

    if state
        .store
        .find_by_username_or_email(Some(&username), Some(&email))
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(
            "user with given email or username already exists".into(),
        ));
    }

    let avatar_path = form
        .avatar
        .as_deref()
        .ok_or_else(|| AppError::Validation("avatar image is required".into()))?;

    // hash before uploading so a weak password cannot orphan an upload
    let password_hash = hash_password(&form.password)?;

    let avatar = upload_and_discard(state.media.as_ref(), avatar_path)
        .await
        .map_err(|e| AppError::Upload(format!("uploading avatar image: {e}")))?;

    // cover image is optional and a failed upload degrades to none
    let cover_image = match form.cover_image.as_deref() {
        Some(path) => upload_and_discard(state.media.as_ref(), path)
            .await
            .ok()
            .map(|m| m.url),
        None => None,
    };

    let user = UserDoc {
        id: ObjectId::new(),
        username,
        email,
        full_name,
        avatar: avatar.url,
        cover_image,
        password_hash,
        refresh_token: None,
        created_at: BsonDateTime::now(),
    };

    state.store.insert(&user).await?;

    tracing::info!(user_id = %user.id, "user registered");

    Ok(user.into())
}

pub async fn login(
    state: &AppState,
    req: LoginRequest,
) -> Result<(UserPublic, TokenPair), AppError> {
    let username = req
        .username
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let email = req
        .email
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    if username.is_none() && email.is_none() {
        return Err(AppError::Validation("email or username is required".into()));
    }

    let user = state
        .store
        .find_by_username_or_email(username.as_deref(), email.as_deref())
        .await?
        .ok_or(AppError::NotFound)?;

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(AppError::Auth(AuthFailure::Invalid));
    }

    let pair = issue_token_pair(state, user.id).await?;

    Ok((user.into(), pair))
}

pub async fn update_account(
    state: &AppState,
    user_id: ObjectId,
    req: UpdateAccountRequest,
) -> Result<UserPublic, AppError> {
    let full_name = req.full_name.trim();
    let email = req.email.trim().to_lowercase();

    if full_name.is_empty() || email.is_empty() {
        return Err(AppError::Validation(
            "full name and email are required".into(),
        ));
    }

    let user = state
        .store
        .update_account(user_id, full_name, &email)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(user.into())
}

/// Uploads a spooled image and swaps the corresponding URL on the user
/// record. The temp file is removed whether or not the upload succeeds.
pub async fn update_image(
    state: &AppState,
    user_id: ObjectId,
    field: ImageField,
    local_path: &Path,
) -> Result<UserPublic, AppError> {
    let media = upload_and_discard(state.media.as_ref(), local_path)
        .await
        .map_err(|e| AppError::Upload(format!("uploading {}: {e}", field.label())))?;

    let user = state
        .store
        .set_image(user_id, field, &media.url)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(user.into())
}
