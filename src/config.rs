use serde::Deserialize;

/// JWT settings. Access and refresh tokens are signed with separate secrets
/// so a leaked access secret cannot be used to mint refresh tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// S3/MinIO settings for avatar and cover-image storage.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base URL under which uploaded objects are publicly reachable.
    /// Defaults to `{endpoint}/{bucket}` (path-style).
    pub public_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            access_secret: std::env::var("ACCESS_TOKEN_SECRET")?,
            refresh_secret: std::env::var("REFRESH_TOKEN_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "cliphub".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "cliphub-users".into()),
            access_ttl_minutes: std::env::var("ACCESS_TOKEN_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
            refresh_ttl_minutes: std::env::var("REFRESH_TOKEN_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 14),
        };
        let storage = StorageConfig {
            endpoint: std::env::var("S3_ENDPOINT")?,
            bucket: std::env::var("S3_BUCKET")?,
            access_key: std::env::var("S3_ACCESS_KEY")?,
            secret_key: std::env::var("S3_SECRET_KEY")?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
            public_base: std::env::var("S3_PUBLIC_BASE").ok(),
        };
        Ok(Self {
            database_url,
            jwt,
            storage,
        })
    }
}
