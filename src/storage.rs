use anyhow::Context;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use axum::async_trait;
use bytes::Bytes;

use crate::config::StorageConfig;

/// Object storage for user media. `upload` returns the public URL of the
/// stored object; `key_for_url` inverts that mapping so a replaced object
/// can be deleted.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn upload(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
    fn key_for_url(&self, url: &str) -> Option<String>;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
    public_base: String,
}

impl Storage {
    pub async fn new(cfg: &StorageConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                cfg.access_key.clone(),
                cfg.secret_key.clone(),
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        let public_base = cfg.public_base.clone().unwrap_or_else(|| {
            format!("{}/{}", cfg.endpoint.trim_end_matches('/'), cfg.bucket)
        });

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            public_base,
        })
    }
}

#[async_trait]
impl StorageClient for Storage {
    async fn upload(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {}", key))?;
        Ok(format!("{}/{}", self.public_base, key))
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("s3 delete_object {}", key))?;
        Ok(())
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&format!("{}/", self.public_base))
            .map(|k| k.to_string())
    }
}
