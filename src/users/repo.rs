use sqlx::PgPool;
use uuid::Uuid;

pub use super::repo_types::User;

const USER_COLUMNS: &str = "id, username, email, full_name, password_hash, refresh_token, \
                            avatar_url, cover_image_url, created_at";

/// Fields required to insert a new user. `username` and `email` must already
/// be lower-cased by the caller.
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub full_name: &'a str,
    pub password_hash: &'a str,
    pub avatar_url: &'a str,
    pub cover_image_url: Option<&'a str>,
}

impl User {
    /// Find a user matching either the username or the email.
    pub async fn find_by_username_or_email(
        db: &PgPool,
        username: &str,
        email: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $2"
        ))
        .bind(username)
        .bind(email)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn create(db: &PgPool, new: NewUser<'_>) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, email, full_name, password_hash, avatar_url, cover_image_url) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(new.username)
        .bind(new.email)
        .bind(new.full_name)
        .bind(new.password_hash)
        .bind(new.avatar_url)
        .bind(new.cover_image_url)
        .fetch_one(db)
        .await
    }

    /// Store the current refresh token, or clear it with `None` (logout).
    /// Single-row atomic update; concurrent writers are last-write-wins.
    pub async fn set_refresh_token(
        db: &PgPool,
        id: Uuid,
        token: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn set_password_hash(
        db: &PgPool,
        id: Uuid,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn update_account(
        db: &PgPool,
        id: Uuid,
        full_name: &str,
        email: &str,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET full_name = $2, email = $3 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(full_name)
        .bind(email)
        .fetch_one(db)
        .await
    }

    pub async fn set_avatar_url(db: &PgPool, id: Uuid, url: &str) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET avatar_url = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(url)
        .fetch_one(db)
        .await
    }

    pub async fn set_cover_image_url(
        db: &PgPool,
        id: Uuid,
        url: &str,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET cover_image_url = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(url)
        .fetch_one(db)
        .await
    }
}
