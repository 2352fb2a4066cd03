use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::User;

/// Request body for login. At least one of `email` / `username` is required.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: String,
}

/// Request body for token refresh; the cookie takes precedence when both
/// the cookie and the body carry a token.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    pub full_name: String,
    pub email: String,
}

/// Public part of the user returned to the client. Never carries the
/// password hash or the stored refresh token.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            full_name: u.full_name,
            avatar_url: u.avatar_url,
            cover_image_url: u.cover_image_url,
            created_at: u.created_at,
        }
    }
}

/// Response payload for login: the user plus both tokens (tokens are also
/// set as cookies).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

/// Response payload for a successful token refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "ada".into(),
            email: "ada@x.io".into(),
            full_name: "Ada Lovelace".into(),
            password_hash: "$argon2id$hash".into(),
            refresh_token: Some("jwt".into()),
            avatar_url: "https://cdn.example/avatars/a.png".into(),
            cover_image_url: Some("https://cdn.example/covers/c.png".into()),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn public_user_is_camel_case_and_sans_credentials() {
        let json = serde_json::to_value(PublicUser::from(sample_user())).unwrap();
        assert_eq!(json["fullName"], "Ada Lovelace");
        assert!(json["avatarUrl"].as_str().unwrap().contains("avatars"));
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("password_hash").is_none());
        assert!(json.get("refreshToken").is_none());
    }

    #[test]
    fn login_data_echoes_both_tokens() {
        let data = LoginData {
            user: sample_user().into(),
            access_token: "a.b.c".into(),
            refresh_token: "d.e.f".into(),
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["accessToken"], "a.b.c");
        assert_eq!(json["refreshToken"], "d.e.f");
        assert_eq!(json["user"]["username"], "ada");
    }

    #[test]
    fn refresh_request_accepts_missing_token() {
        let req: RefreshRequest = serde_json::from_str("{}").unwrap();
        assert!(req.refresh_token.is_none());
        let req: RefreshRequest =
            serde_json::from_str(r#"{"refreshToken":"x.y.z"}"#).unwrap();
        assert_eq!(req.refresh_token.as_deref(), Some("x.y.z"));
    }
}
