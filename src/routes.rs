use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::services::ServeDir;

use crate::{handlers::users, state::AppState};

pub fn app_router(state: Arc<AppState>) -> Router {
    let users = Router::new()
        .route("/register", post(users::register))
        .route("/login", post(users::login))
        .route("/logout", post(users::logout))
        .route("/refresh-token", post(users::refresh_token))
        .route("/change-password", post(users::change_password))
        .route("/me", get(users::me))
        .route("/update-account", patch(users::update_account))
        .route("/avatar", patch(users::update_avatar))
        .route("/cover-image", patch(users::update_cover_image));

    Router::new()
        .nest("/api/v1/users", users)
        .fallback_service(ServeDir::new(&state.cfg.public_dir))
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024))
        .with_state(state)
}
