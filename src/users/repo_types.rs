use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String, // stored lower-cased, unique
    pub email: String,    // stored lower-cased, unique
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>, // current refresh JWT, cleared on logout
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_never_leaks_credentials() {
        let user = User {
            id: Uuid::new_v4(),
            username: "ada".into(),
            email: "ada@x.io".into(),
            full_name: "Ada Lovelace".into(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$abc$def".into(),
            refresh_token: Some("some.jwt.value".into()),
            avatar_url: "https://cdn.example/avatars/a.png".into(),
            cover_image_url: None,
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("refresh_token").is_none());
        assert_eq!(json["username"], "ada");
    }
}
