use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
    RequestPartsExt,
};
use axum_extra::{
    extract::cookie::{Cookie, CookieJar},
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use mongodb::bson::oid::ObjectId;
use std::sync::Arc;

use crate::{
    auth::jwt::{decode_token, make_token, new_access_claims, new_refresh_claims},
    dto::users::RefreshRequest,
    errors::{AppError, AuthFailure},
    models::user::{UserDoc, UserPublic},
    password::{hash_password, verify_password},
    state::AppState,
};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Mints a fresh access/refresh pair for an existing user and persists the
/// refresh token on the user record, overwriting any prior value. A user has
/// at most one live refresh token, so issuing here implicitly revokes every
/// previously issued one.
pub async fn issue_token_pair(
    state: &AppState,
    user_id: ObjectId,
) -> Result<TokenPair, AppError> {
    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let access_token = make_token(
        &new_access_claims(user.id.to_hex(), state.cfg.access_token_ttl_seconds),
        &state.keys.access,
    )?;
    let refresh_token = make_token(
        &new_refresh_claims(user.id.to_hex(), state.cfg.refresh_token_ttl_seconds),
        &state.keys.refresh,
    )?;

    state
        .store
        .set_refresh_token(user.id, Some(&refresh_token))
        .await
        .map_err(|e| AppError::Internal(format!("persisting refresh token: {e}")))?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Validates a presented refresh token and rotates it: signature and expiry
/// via the refresh key, then exact string equality against the value stored
/// on the user record. A token that fails the equality check was rotated out
/// or revoked and is reported as stale.
///
/// There is no version check on the stored value, so two refreshes racing
/// with the same token can both pass the comparison; the later write wins and
/// the earlier pair becomes unusable.
pub async fn rotate_refresh_token(
    state: &AppState,
    incoming: Option<&str>,
) -> Result<(ObjectId, TokenPair), AppError> {
    let incoming = incoming.ok_or(AppError::Auth(AuthFailure::Missing))?;

    let data = decode_token(incoming, &state.keys.refresh)?;
    let user_id = ObjectId::parse_str(&data.claims.sub)
        .map_err(|_| AppError::Auth(AuthFailure::Invalid))?;

    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or(AppError::Auth(AuthFailure::Invalid))?;

    match user.refresh_token.as_deref() {
        Some(stored) if stored == incoming => {}
        _ => return Err(AppError::Auth(AuthFailure::Stale)),
    }

    let pair = issue_token_pair(state, user_id).await?;
    Ok((user_id, pair))
}

/// Clears the stored refresh token; any outstanding refresh token for this
/// user fails the equality check from now on. Idempotent.
pub async fn revoke_refresh_token(state: &AppState, user_id: ObjectId) -> Result<(), AppError> {
    state.store.set_refresh_token(user_id, None).await?;
    Ok(())
}

/// Gate for protected operations: decodes the access token and loads the
/// user it names. Access tokens are stateless, so this never consults the
/// stored refresh token.
pub async fn verify_access_token(
    state: &AppState,
    token: Option<&str>,
) -> Result<UserDoc, AppError> {
    let token = token.ok_or(AppError::Auth(AuthFailure::Missing))?;

    let data = decode_token(token, &state.keys.access)?;
    let user_id = ObjectId::parse_str(&data.claims.sub)
        .map_err(|_| AppError::Auth(AuthFailure::Invalid))?;

    state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or(AppError::Auth(AuthFailure::Invalid))
}

/// Replaces the credential after verifying the old one. Leaves the stored
/// refresh token as-is, so existing sessions survive a password change.
pub async fn change_password(
    state: &AppState,
    user_id: ObjectId,
    old_password: &str,
    new_password: &str,
) -> Result<(), AppError> {
    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    if !verify_password(old_password, &user.password_hash)? {
        return Err(AppError::Auth(AuthFailure::Invalid));
    }

    let hash = hash_password(new_password)?;
    state.store.set_password_hash(user_id, &hash).await?;
    Ok(())
}

/// Authenticated user attached to protected routes. Credential and session
/// fields are stripped before handler code sees the user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: ObjectId,
    pub user: UserPublic,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = match jar.get(ACCESS_TOKEN_COOKIE) {
            Some(cookie) => Some(cookie.value().to_owned()),
            None => parts
                .extract::<TypedHeader<Authorization<Bearer>>>()
                .await
                .ok()
                .map(|TypedHeader(Authorization(bearer))| bearer.token().to_owned()),
        };

        let user = verify_access_token(state, token.as_deref()).await?;
        Ok(Self {
            id: user.id,
            user: user.into(),
        })
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_owned())
}

/// Carrier precedence for a presented refresh token: cookie, then request
/// body, then `Authorization: Bearer` header. First present wins.
pub fn refresh_token_from_carriers(
    jar: &CookieJar,
    body: Option<&RefreshRequest>,
    headers: &HeaderMap,
) -> Option<String> {
    jar.get(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_owned())
        .or_else(|| body.and_then(|b| b.refresh_token.clone()))
        .or_else(|| bearer_token(headers))
}

pub fn session_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .path("/")
        .build()
}

pub fn clearing_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .http_only(true)
        .secure(true)
        .path("/")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fake::FakeMediaStore;
    use crate::store::memory::MemoryUserStore;
    use mongodb::bson::DateTime as BsonDateTime;

    const PASSWORD: &str = "correct horse battery staple";

    fn user_doc(id: ObjectId) -> UserDoc {
        UserDoc {
            id,
            username: "jash".into(),
            email: "jash@example.com".into(),
            full_name: "Jash Patel".into(),
            avatar: "https://media.test/avatar.png".into(),
            cover_image: None,
            password_hash: hash_password(PASSWORD).unwrap(),
            refresh_token: None,
            created_at: BsonDateTime::now(),
        }
    }

    fn seeded_state() -> (AppState, ObjectId, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        let id = ObjectId::new();
        store.seed(user_doc(id));

        let state = AppState::for_tests(store.clone(), Arc::new(FakeMediaStore::new()));
        (state, id, store)
    }

    #[tokio::test]
    async fn issue_then_verify_access_round_trips() {
        let (state, id, _) = seeded_state();

        let pair = issue_token_pair(&state, id).await.unwrap();
        let user = verify_access_token(&state, Some(&pair.access_token))
            .await
            .unwrap();

        assert_eq!(user.id, id);
    }

    #[tokio::test]
    async fn issue_for_unknown_user_is_not_found() {
        let (state, _, _) = seeded_state();

        let err = issue_token_pair(&state, ObjectId::new()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn issue_persists_refresh_token_on_user_record() {
        let (state, id, store) = seeded_state();

        let pair = issue_token_pair(&state, id).await.unwrap();
        assert_eq!(
            store.get(id).unwrap().refresh_token.as_deref(),
            Some(pair.refresh_token.as_str())
        );
    }

    #[tokio::test]
    async fn verify_access_rejects_missing_and_foreign_tokens() {
        let (state, id, _) = seeded_state();
        let pair = issue_token_pair(&state, id).await.unwrap();

        let err = verify_access_token(&state, None).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::Missing)));

        // a refresh token must never pass the access gate
        let err = verify_access_token(&state, Some(&pair.refresh_token))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::Invalid)));
    }

    #[tokio::test]
    async fn rotation_invalidates_prior_tokens_and_revoke_ends_the_session() {
        let (state, id, _) = seeded_state();

        let r1 = issue_token_pair(&state, id).await.unwrap().refresh_token;

        let (_, pair2) = rotate_refresh_token(&state, Some(&r1)).await.unwrap();
        let r2 = pair2.refresh_token;

        let err = rotate_refresh_token(&state, Some(&r1)).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::Stale)));

        let (_, pair3) = rotate_refresh_token(&state, Some(&r2)).await.unwrap();
        let r3 = pair3.refresh_token;

        revoke_refresh_token(&state, id).await.unwrap();

        let err = rotate_refresh_token(&state, Some(&r3)).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::Stale)));
    }

    #[tokio::test]
    async fn rotate_rejects_missing_and_garbage_tokens() {
        let (state, _, _) = seeded_state();

        let err = rotate_refresh_token(&state, None).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::Missing)));

        let err = rotate_refresh_token(&state, Some("not-a-token"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::Invalid)));
    }

    #[tokio::test]
    async fn rotate_rejects_token_for_unknown_user() {
        let (state, _, _) = seeded_state();

        let token = make_token(
            &new_refresh_claims(ObjectId::new().to_hex(), 3600),
            &state.keys.refresh,
        )
        .unwrap();

        let err = rotate_refresh_token(&state, Some(&token)).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::Invalid)));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let (state, id, store) = seeded_state();
        issue_token_pair(&state, id).await.unwrap();

        revoke_refresh_token(&state, id).await.unwrap();
        revoke_refresh_token(&state, id).await.unwrap();

        assert!(store.get(id).unwrap().refresh_token.is_none());
    }

    #[tokio::test]
    async fn change_password_with_wrong_old_leaves_hash_unchanged() {
        let (state, id, store) = seeded_state();
        let before = store.get(id).unwrap().password_hash;

        let err = change_password(&state, id, "wrong password", "a new password")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::Invalid)));

        let after = store.get(id).unwrap().password_hash;
        assert_eq!(before, after);
        assert!(verify_password(PASSWORD, &after).unwrap());
        assert!(!verify_password("a new password", &after).unwrap());
    }

    #[tokio::test]
    async fn change_password_swaps_which_credential_verifies() {
        let (state, id, store) = seeded_state();

        change_password(&state, id, PASSWORD, "a new password")
            .await
            .unwrap();

        let hash = store.get(id).unwrap().password_hash;
        assert!(verify_password("a new password", &hash).unwrap());
        assert!(!verify_password(PASSWORD, &hash).unwrap());
    }

    #[test]
    fn carrier_precedence_is_cookie_then_body_then_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            "Bearer header-token".parse().unwrap(),
        );
        let body = RefreshRequest {
            refresh_token: Some("body-token".into()),
        };

        let jar = CookieJar::new().add(Cookie::new(REFRESH_TOKEN_COOKIE, "cookie-token"));
        assert_eq!(
            refresh_token_from_carriers(&jar, Some(&body), &headers).as_deref(),
            Some("cookie-token")
        );

        let jar = CookieJar::new();
        assert_eq!(
            refresh_token_from_carriers(&jar, Some(&body), &headers).as_deref(),
            Some("body-token")
        );
        assert_eq!(
            refresh_token_from_carriers(&jar, None, &headers).as_deref(),
            Some("header-token")
        );

        let empty = HeaderMap::new();
        assert_eq!(refresh_token_from_carriers(&jar, None, &empty), None);
    }

    #[test]
    fn session_cookies_are_http_only_and_secure() {
        let cookie = session_cookie(ACCESS_TOKEN_COOKIE, "tok".into());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
    }

    #[tokio::test]
    async fn change_password_does_not_revoke_the_active_session() {
        let (state, id, store) = seeded_state();
        let pair = issue_token_pair(&state, id).await.unwrap();

        change_password(&state, id, PASSWORD, "a new password")
            .await
            .unwrap();

        assert_eq!(
            store.get(id).unwrap().refresh_token.as_deref(),
            Some(pair.refresh_token.as_str())
        );
        rotate_refresh_token(&state, Some(&pair.refresh_token))
            .await
            .unwrap();
    }
}
