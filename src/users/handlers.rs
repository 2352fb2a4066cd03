use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, State},
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use bytes::Bytes;
use time::Duration as TimeDuration;
use tracing::{info, instrument, warn};

use super::{
    dto::{
        ChangePasswordRequest, LoginData, LoginRequest, PublicUser, RefreshRequest,
        RefreshedTokens, UpdateAccountRequest,
    },
    jwt::{AuthUser, JwtKeys, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE},
    password::{hash_password, verify_password},
    repo::{NewUser, User},
    services::{self, TokenPair},
};
use crate::{
    error::{ApiError, ApiResult},
    response::ApiResponse,
    state::AppState,
};

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/change-password", post(change_password))
        .route("/current-user", get(current_user))
        .route("/update-account", patch(update_account))
        .route("/avatar", patch(update_avatar))
        .route("/cover-image", patch(update_cover_image))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

// --- cookie helpers ---

fn token_cookie(name: &'static str, value: String, ttl: std::time::Duration) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_http_only(true);
    cookie.set_secure(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookie.set_max_age(TimeDuration::seconds(ttl.as_secs() as i64));
    cookie
}

fn set_auth_cookies(jar: CookieJar, keys: &JwtKeys, pair: &TokenPair) -> CookieJar {
    jar.add(token_cookie(
        ACCESS_TOKEN_COOKIE,
        pair.access_token.clone(),
        keys.access_ttl(),
    ))
    .add(token_cookie(
        REFRESH_TOKEN_COOKIE,
        pair.refresh_token.clone(),
        keys.refresh_ttl(),
    ))
}

fn clear_auth_cookies(jar: CookieJar) -> CookieJar {
    let mut access = Cookie::new(ACCESS_TOKEN_COOKIE, "");
    access.set_path("/");
    let mut refresh = Cookie::new(REFRESH_TOKEN_COOKIE, "");
    refresh.set_path("/");
    jar.remove(access).remove(refresh)
}

// --- multipart helpers ---

struct FilePart {
    body: Bytes,
    content_type: String,
}

#[derive(Default)]
struct RegisterForm {
    full_name: Option<String>,
    email: Option<String>,
    username: Option<String>,
    password: Option<String>,
    avatar: Option<FilePart>,
    cover_image: Option<FilePart>,
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Malformed multipart body: {e}"))
}

async fn read_file_part(field: axum::extract::multipart::Field<'_>) -> ApiResult<FilePart> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field.bytes().await.map_err(multipart_error)?;
    Ok(FilePart { body, content_type })
}

async fn collect_register_form(mut multipart: Multipart) -> ApiResult<RegisterForm> {
    let mut form = RegisterForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("fullName") => form.full_name = Some(field.text().await.map_err(multipart_error)?),
            Some("email") => form.email = Some(field.text().await.map_err(multipart_error)?),
            Some("username") => form.username = Some(field.text().await.map_err(multipart_error)?),
            Some("password") => form.password = Some(field.text().await.map_err(multipart_error)?),
            Some("avatar") => form.avatar = Some(read_file_part(field).await?),
            Some("coverImage") => form.cover_image = Some(read_file_part(field).await?),
            _ => {}
        }
    }
    Ok(form)
}

/// Pull the single expected file out of a multipart body, matching by field
/// name.
async fn single_file_part(mut multipart: Multipart, field_name: &str) -> ApiResult<Option<FilePart>> {
    let mut part = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(|s| s.to_string());
        if name.as_deref() == Some(field_name) {
            part = Some(read_file_part(field).await?);
        }
    }
    Ok(part)
}

// --- handlers ---

#[instrument(skip(state, multipart))]
pub async fn register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<ApiResponse<PublicUser>> {
    let form = collect_register_form(multipart).await?;

    let (Some(full_name), Some(email), Some(username), Some(password)) = (
        services::trimmed(form.full_name.as_deref()),
        services::trimmed(form.email.as_deref()),
        services::trimmed(form.username.as_deref()),
        services::trimmed(form.password.as_deref()),
    ) else {
        return Err(ApiError::BadRequest("All fields are required".into()));
    };

    let email = email.to_lowercase();
    let username = username.to_lowercase();

    if !services::is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::BadRequest("Invalid email".into()));
    }

    if User::find_by_username_or_email(&state.db, &username, &email)
        .await?
        .is_some()
    {
        warn!(username = %username, "duplicate registration attempt");
        return Err(ApiError::Conflict(
            "User with email or username already exists".into(),
        ));
    }

    let Some(avatar) = form.avatar else {
        return Err(ApiError::BadRequest("Avatar file is required".into()));
    };

    // Avatar first; its failure aborts registration. A failed cover upload
    // is tolerated and the field left empty.
    let avatar_url =
        services::upload_image(&state, "avatars", avatar.body, &avatar.content_type).await?;
    let cover_image_url = match form.cover_image {
        Some(cover) => {
            match services::upload_image(&state, "covers", cover.body, &cover.content_type).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(error = %e, "cover image upload failed, continuing without it");
                    None
                }
            }
        }
        None => None,
    };

    let password_hash = hash_password(&password).map_err(|e| ApiError::Internal(e.to_string()))?;

    let created = User::create(
        &state.db,
        NewUser {
            username: &username,
            email: &email,
            full_name: &full_name,
            password_hash: &password_hash,
            avatar_url: &avatar_url,
            cover_image_url: cover_image_url.as_deref(),
        },
    )
    .await?;

    // Defensive re-fetch; a missing row here means the store is inconsistent.
    let user = User::find_by_id(&state.db, created.id).await?.ok_or_else(|| {
        ApiError::Internal("Something went wrong while registering the user".into())
    })?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(ApiResponse::created(
        PublicUser::from(user),
        "User registered successfully",
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<(CookieJar, ApiResponse<LoginData>)> {
    let username = services::trimmed(payload.username.as_deref()).map(|u| u.to_lowercase());
    let email = services::trimmed(payload.email.as_deref()).map(|e| e.to_lowercase());

    // Either identifier is enough.
    if username.is_none() && email.is_none() {
        return Err(ApiError::BadRequest("username or email is required".into()));
    }

    let user = User::find_by_username_or_email(
        &state.db,
        username.as_deref().unwrap_or_default(),
        email.as_deref().unwrap_or_default(),
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?;

    let ok = verify_password(&payload.password, &user.password_hash)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    let pair = services::issue_token_pair(&state, user.id).await?;
    let keys = JwtKeys::from_ref(&state);
    let jar = set_auth_cookies(jar, &keys, &pair);

    info!(user_id = %user.id, username = %user.username, "user logged in");
    Ok((
        jar,
        ApiResponse::ok(
            LoginData {
                user: user.into(),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> ApiResult<(CookieJar, ApiResponse<RefreshedTokens>)> {
    let presented = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| payload.and_then(|Json(p)| p.refresh_token))
        .ok_or_else(|| ApiError::Unauthorized("Unauthorized request".into()))?;

    let (user, pair) = services::rotate_refresh_token(&state, &presented).await?;

    let keys = JwtKeys::from_ref(&state);
    let jar = set_auth_cookies(jar, &keys, &pair);

    info!(user_id = %user.id, "refresh token rotated");
    Ok((
        jar,
        ApiResponse::ok(
            RefreshedTokens {
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "Access token refreshed",
        ),
    ))
}

#[instrument(skip(state, jar))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    jar: CookieJar,
) -> ApiResult<(CookieJar, ApiResponse<serde_json::Value>)> {
    // Clearing the stored token is the sole revocation mechanism for
    // outstanding refresh tokens.
    User::set_refresh_token(&state.db, user_id, None).await?;
    let jar = clear_auth_cookies(jar);

    info!(user_id = %user_id, "user logged out");
    Ok((
        jar,
        ApiResponse::ok(serde_json::json!({}), "User logged out"),
    ))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    if payload.new_password.trim().is_empty() {
        return Err(ApiError::BadRequest("New password is required".into()));
    }
    if payload.new_password != payload.confirm_password {
        return Err(ApiError::BadRequest(
            "New password and confirm password do not match".into(),
        ));
    }

    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?;

    let ok = verify_password(&payload.old_password, &user.password_hash)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !ok {
        return Err(ApiError::BadRequest("Invalid old password".into()));
    }

    let new_hash =
        hash_password(&payload.new_password).map_err(|e| ApiError::Internal(e.to_string()))?;
    User::set_password_hash(&state.db, user_id, &new_hash).await?;

    info!(user_id = %user_id, "password changed");
    Ok(ApiResponse::ok(
        serde_json::json!({}),
        "Password changed successfully",
    ))
}

#[instrument(skip(state))]
pub async fn current_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<ApiResponse<PublicUser>> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?;
    Ok(ApiResponse::ok(
        user.into(),
        "Current user fetched successfully",
    ))
}

#[instrument(skip(state, payload))]
pub async fn update_account(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateAccountRequest>,
) -> ApiResult<ApiResponse<PublicUser>> {
    let (Some(full_name), Some(email)) = (
        services::trimmed(Some(payload.full_name.as_str())),
        services::trimmed(Some(payload.email.as_str())),
    ) else {
        return Err(ApiError::BadRequest("All fields are required".into()));
    };

    let email = email.to_lowercase();
    if !services::is_valid_email(&email) {
        return Err(ApiError::BadRequest("Invalid email".into()));
    }

    let user = User::update_account(&state.db, user_id, &full_name, &email).await?;

    info!(user_id = %user_id, "account details updated");
    Ok(ApiResponse::ok(
        user.into(),
        "Account details updated successfully",
    ))
}

#[instrument(skip(state, multipart))]
pub async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    multipart: Multipart,
) -> ApiResult<ApiResponse<PublicUser>> {
    let part = single_file_part(multipart, "avatar")
        .await?
        .ok_or_else(|| ApiError::BadRequest("Avatar file is required".into()))?;

    let previous = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?
        .avatar_url;

    let url = services::upload_image(&state, "avatars", part.body, &part.content_type).await?;
    let user = User::set_avatar_url(&state.db, user_id, &url).await?;

    services::delete_replaced_image(&state, &previous).await;

    info!(user_id = %user_id, "avatar updated");
    Ok(ApiResponse::ok(user.into(), "Avatar updated successfully"))
}

#[instrument(skip(state, multipart))]
pub async fn update_cover_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    multipart: Multipart,
) -> ApiResult<ApiResponse<PublicUser>> {
    let part = single_file_part(multipart, "coverImage")
        .await?
        .ok_or_else(|| ApiError::BadRequest("Cover image file is required".into()))?;

    let previous = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?
        .cover_image_url;

    let url = services::upload_image(&state, "covers", part.body, &part.content_type).await?;
    let user = User::set_cover_image_url(&state.db, user_id, &url).await?;

    if let Some(previous) = previous {
        services::delete_replaced_image(&state, &previous).await;
    }

    info!(user_id = %user_id, "cover image updated");
    Ok(ApiResponse::ok(
        user.into(),
        "Cover image updated successfully",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;

    // The cookie helpers only need keys, not the full app state.
    fn make_keys() -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            access_secret: "test-access-secret".into(),
            refresh_secret: "test-refresh-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            access_ttl_minutes: 5,
            refresh_ttl_minutes: 60,
        })
    }

    #[test]
    fn auth_cookies_are_http_only_and_secure() {
        let keys = make_keys();
        let pair = TokenPair {
            access_token: "a.b.c".into(),
            refresh_token: "d.e.f".into(),
        };
        let jar = set_auth_cookies(CookieJar::new(), &keys, &pair);

        for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE] {
            let cookie = jar.get(name).expect("cookie set");
            assert_eq!(cookie.http_only(), Some(true));
            assert_eq!(cookie.secure(), Some(true));
            assert_eq!(cookie.path(), Some("/"));
        }
        assert_eq!(jar.get(ACCESS_TOKEN_COOKIE).unwrap().value(), "a.b.c");
        assert_eq!(jar.get(REFRESH_TOKEN_COOKIE).unwrap().value(), "d.e.f");
    }

    #[test]
    fn refresh_cookie_outlives_access_cookie() {
        let keys = make_keys();
        let pair = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
        };
        let jar = set_auth_cookies(CookieJar::new(), &keys, &pair);
        let access_age = jar.get(ACCESS_TOKEN_COOKIE).unwrap().max_age().unwrap();
        let refresh_age = jar.get(REFRESH_TOKEN_COOKIE).unwrap().max_age().unwrap();
        assert!(refresh_age > access_age);
    }

    #[test]
    fn clear_auth_cookies_removes_both() {
        let keys = make_keys();
        let pair = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
        };
        let jar = set_auth_cookies(CookieJar::new(), &keys, &pair);
        let jar = clear_auth_cookies(jar);
        assert!(jar.get(ACCESS_TOKEN_COOKIE).is_none());
        assert!(jar.get(REFRESH_TOKEN_COOKIE).is_none());
    }
}
