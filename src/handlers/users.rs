use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    auth::tokens::{
        self, clearing_cookie, refresh_token_from_carriers, session_cookie, AuthUser,
        ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE,
    },
    dto::users::{
        ChangePasswordRequest, LoginData, LoginRequest, RefreshData, RefreshRequest,
        UpdateAccountRequest,
    },
    errors::AppError,
    media::spool_to_temp,
    models::user::UserPublic,
    response::ApiResponse,
    services::user_service::{self, RegisterForm},
    state::AppState,
    store::ImageField,
};

fn bad_part(e: MultipartError) -> AppError {
    AppError::Validation(format!("malformed multipart body: {e}"))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<UserPublic>>), AppError> {
    let form = parse_register_form(&state, multipart).await?;
    let user = user_service::register(&state, form).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(
            StatusCode::CREATED,
            user,
            "user registered successfully",
        )),
    ))
}

/// Every error exit sweeps already-spooled temp files. The temp directory
/// sits under the publicly served tree, so nothing may linger there after a
/// failed parse.
async fn parse_register_form(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<RegisterForm, AppError> {
    let mut form = RegisterForm::default();

    match fill_register_form(state, &mut multipart, &mut form).await {
        Ok(()) => Ok(form),
        Err(e) => {
            form.discard_files().await;
            Err(e)
        }
    }
}

async fn fill_register_form(
    state: &AppState,
    multipart: &mut Multipart,
    form: &mut RegisterForm,
) -> Result<(), AppError> {
    while let Some(field) = multipart.next_field().await.map_err(bad_part)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        match name.as_str() {
            "full_name" => form.full_name = field.text().await.map_err(bad_part)?,
            "email" => form.email = field.text().await.map_err(bad_part)?,
            "username" => form.username = field.text().await.map_err(bad_part)?,
            "password" => form.password = field.text().await.map_err(bad_part)?,
            "avatar" | "cover_image" => {
                let file_name = field.file_name().unwrap_or("upload").to_owned();
                let bytes = field.bytes().await.map_err(bad_part)?;
                let path = spool_to_temp(&state.cfg.temp_dir, &file_name, &bytes)
                    .await
                    .map_err(|e| AppError::Internal(format!("spooling upload: {e}")))?;

                if name == "avatar" {
                    form.avatar = Some(path);
                } else {
                    form.cover_image = Some(path);
                }
            }
            _ => {}
        }
    }

    Ok(())
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<ApiResponse<LoginData>>), AppError> {
    let (user, pair) = user_service::login(&state, req).await?;

    let jar = jar
        .add(session_cookie(ACCESS_TOKEN_COOKIE, pair.access_token.clone()))
        .add(session_cookie(
            REFRESH_TOKEN_COOKIE,
            pair.refresh_token.clone(),
        ));

    Ok((
        jar,
        Json(ApiResponse::new(
            StatusCode::OK,
            LoginData {
                user,
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "user logged in successfully",
        )),
    ))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiResponse<Value>>), AppError> {
    tokens::revoke_refresh_token(&state, auth.id).await?;

    let jar = jar
        .remove(clearing_cookie(ACCESS_TOKEN_COOKIE))
        .remove(clearing_cookie(REFRESH_TOKEN_COOKIE));

    Ok((
        jar,
        Json(ApiResponse::new(
            StatusCode::OK,
            json!({}),
            "user logged out successfully",
        )),
    ))
}

pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(CookieJar, Json<ApiResponse<RefreshData>>), AppError> {
    // a missing or non-JSON body is not an error here, the token may arrive
    // on the cookie or header carrier instead
    let body: Option<RefreshRequest> = serde_json::from_slice(&body).ok();
    let incoming = refresh_token_from_carriers(&jar, body.as_ref(), &headers);

    let (_, pair) = tokens::rotate_refresh_token(&state, incoming.as_deref()).await?;

    let jar = jar
        .add(session_cookie(ACCESS_TOKEN_COOKIE, pair.access_token.clone()))
        .add(session_cookie(
            REFRESH_TOKEN_COOKIE,
            pair.refresh_token.clone(),
        ));

    Ok((
        jar,
        Json(ApiResponse::new(
            StatusCode::OK,
            RefreshData {
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "access token refreshed successfully",
        )),
    ))
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    if req.old_password.trim().is_empty() || req.new_password.trim().is_empty() {
        return Err(AppError::Validation(
            "old password and new password are required".into(),
        ));
    }

    tokens::change_password(&state, auth.id, &req.old_password, &req.new_password).await?;

    Ok(Json(ApiResponse::new(
        StatusCode::OK,
        json!({}),
        "password changed successfully",
    )))
}

pub async fn me(auth: AuthUser) -> Json<ApiResponse<UserPublic>> {
    Json(ApiResponse::new(
        StatusCode::OK,
        auth.user,
        "current user fetched successfully",
    ))
}

pub async fn update_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<Json<ApiResponse<UserPublic>>, AppError> {
    let user = user_service::update_account(&state, auth.id, req).await?;

    Ok(Json(ApiResponse::new(
        StatusCode::OK,
        user,
        "account details updated successfully",
    )))
}

pub async fn update_avatar(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    multipart: Multipart,
) -> Result<Json<ApiResponse<UserPublic>>, AppError> {
    let path = spool_single_file(&state, multipart, "avatar").await?;
    let user = user_service::update_image(&state, auth.id, ImageField::Avatar, &path).await?;

    Ok(Json(ApiResponse::new(
        StatusCode::OK,
        user,
        "avatar updated successfully",
    )))
}

pub async fn update_cover_image(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    multipart: Multipart,
) -> Result<Json<ApiResponse<UserPublic>>, AppError> {
    let path = spool_single_file(&state, multipart, "cover_image").await?;
    let user = user_service::update_image(&state, auth.id, ImageField::CoverImage, &path).await?;

    Ok(Json(ApiResponse::new(
        StatusCode::OK,
        user,
        "cover image updated successfully",
    )))
}

/// Pulls the one expected file field out of a multipart body and spools it
/// to the temp directory.
async fn spool_single_file(
    state: &AppState,
    mut multipart: Multipart,
    field_name: &str,
) -> Result<PathBuf, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(bad_part)? {
        if field.name() != Some(field_name) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_owned();
        let bytes = field.bytes().await.map_err(bad_part)?;

        return spool_to_temp(&state.cfg.temp_dir, &file_name, &bytes)
            .await
            .map_err(|e| AppError::Internal(format!("spooling upload: {e}")));
    }

    Err(AppError::Validation(format!(
        "{field_name} file is required"
    )))
}
