use axum::extract::FromRef;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{jwt::JwtKeys, repo::User};
use crate::{error::ApiError, state::AppState};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trim a field and reject it when empty.
pub(crate) fn trimmed(value: Option<&str>) -> Option<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => None,
    }
}

/// Access/refresh token pair as handed to the client.
#[derive(Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Sign both tokens and persist the refresh token on the user record. The
/// persist step is what makes the refresh token usable later: verification
/// requires an exact match against the stored value.
pub async fn issue_token_pair(state: &AppState, user_id: Uuid) -> Result<TokenPair, ApiError> {
    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(user_id).map_err(|e| {
        error!(error = %e, "jwt sign access failed");
        ApiError::Internal(e.to_string())
    })?;
    let refresh_token = keys.sign_refresh(user_id).map_err(|e| {
        error!(error = %e, "jwt sign refresh failed");
        ApiError::Internal(e.to_string())
    })?;
    User::set_refresh_token(&state.db, user_id, Some(&refresh_token)).await?;
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Why a presented refresh token was rejected. `Invalid` covers bad
/// signature, expiry and wrong kind; `ExpiredOrReused` means the token was
/// well-formed but no longer matches the stored one — either superseded by
/// rotation or replayed after theft.
#[derive(Debug, PartialEq, Eq)]
pub enum RefreshRejection {
    Invalid,
    ExpiredOrReused,
}

impl From<RefreshRejection> for ApiError {
    fn from(r: RefreshRejection) -> Self {
        match r {
            RefreshRejection::Invalid => ApiError::Unauthorized("Invalid refresh token".into()),
            RefreshRejection::ExpiredOrReused => {
                ApiError::Unauthorized("Refresh token is expired or used".into())
            }
        }
    }
}

pub(crate) fn check_refresh_reuse(
    presented: &str,
    stored: Option<&str>,
) -> Result<(), RefreshRejection> {
    match stored {
        Some(current) if current == presented => Ok(()),
        _ => Err(RefreshRejection::ExpiredOrReused),
    }
}

/// Verify a presented refresh token, require it to match the stored one,
/// then rotate: sign a fresh pair and persist the new refresh token. The
/// old token is superseded the moment the write lands.
pub async fn rotate_refresh_token(
    state: &AppState,
    presented: &str,
) -> Result<(User, TokenPair), ApiError> {
    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify_refresh(presented).map_err(|e| {
        debug!(error = %e, "refresh token failed verification");
        ApiError::from(RefreshRejection::Invalid)
    })?;

    // A missing user presents as no stored token: either way the token no
    // longer has a live counterpart in the store.
    let user = User::find_by_id(&state.db, claims.sub).await?;
    let stored = user.as_ref().and_then(|u| u.refresh_token.as_deref());
    if let Err(rejection) = check_refresh_reuse(presented, stored) {
        warn!(user_id = %claims.sub, known_user = user.is_some(), "refresh token reuse or stale rotation detected");
        return Err(rejection.into());
    }
    let user = user.ok_or_else(|| ApiError::Internal("user record vanished mid-refresh".into()))?;

    let pair = issue_token_pair(state, user.id).await?;
    Ok((user, pair))
}

/// Upload an image to object storage under `{slot}/{uuid}.{ext}` and return
/// its public URL. Upload failures surface as `BadRequest`: the caller
/// cannot proceed without a usable URL.
pub async fn upload_image(
    state: &AppState,
    slot: &str,
    body: Bytes,
    content_type: &str,
) -> Result<String, ApiError> {
    let ext = ext_from_mime(content_type)
        .ok_or_else(|| ApiError::BadRequest(format!("Unsupported image type: {content_type}")))?;
    let key = format!("{}/{}.{}", slot, Uuid::new_v4(), ext);
    state
        .storage
        .upload(&key, body, content_type)
        .await
        .map_err(|e| {
            error!(error = %e, key = %key, "image upload failed");
            ApiError::BadRequest("Image upload failed".into())
        })
}

/// Best-effort removal of a replaced media object. Failures are logged and
/// swallowed; the record update already succeeded.
pub async fn delete_replaced_image(state: &AppState, old_url: &str) {
    let Some(key) = state.storage.key_for_url(old_url) else {
        debug!(url = %old_url, "replaced image not in our storage, skipping delete");
        return;
    };
    if let Err(e) = state.storage.delete_object(&key).await {
        warn!(error = %e, key = %key, "failed to delete replaced image");
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;

    #[test]
    fn email_regex_accepts_and_rejects() {
        assert!(is_valid_email("ada@x.io"));
        assert!(is_valid_email("first.last@sub.example.com"));
        assert!(!is_valid_email("ada"));
        assert!(!is_valid_email("ada@"));
        assert!(!is_valid_email("ada@x"));
        assert!(!is_valid_email("a da@x.io"));
    }

    #[test]
    fn trimmed_rejects_blank_fields() {
        assert_eq!(trimmed(Some("  ada ")), Some("ada".to_string()));
        assert_eq!(trimmed(Some("   ")), None);
        assert_eq!(trimmed(Some("")), None);
        assert_eq!(trimmed(None), None);
    }

    #[test]
    fn refresh_reuse_requires_exact_store_match() {
        assert!(check_refresh_reuse("tok", Some("tok")).is_ok());
        assert_eq!(
            check_refresh_reuse("old-tok", Some("rotated-tok")),
            Err(RefreshRejection::ExpiredOrReused)
        );
        // Logout clears the stored token, and a deleted user has no stored
        // token at all; any refresh afterwards must fail the same way.
        assert_eq!(
            check_refresh_reuse("tok", None),
            Err(RefreshRejection::ExpiredOrReused)
        );
    }

    #[test]
    fn refresh_rejections_map_to_unauthorized() {
        let invalid: ApiError = RefreshRejection::Invalid.into();
        let reused: ApiError = RefreshRejection::ExpiredOrReused.into();
        assert!(matches!(invalid, ApiError::Unauthorized(_)));
        match reused {
            ApiError::Unauthorized(msg) => assert_eq!(msg, "Refresh token is expired or used"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/heic"), Some("heic"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn upload_image_yields_url_and_rejects_unknown_mime() {
        let state = AppState::fake();

        let url = upload_image(&state, "avatars", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        assert!(url.starts_with("https://fake.local/avatars/"));
        assert!(url.ends_with(".png"));

        let err = upload_image(&state, "avatars", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
