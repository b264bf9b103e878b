use std::path::{Component, Path, PathBuf};

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

use crate::config::{S3Config, StorageConfig};

/// Public disk holding profile images. Paths are relative, e.g. `profile-images/x.png`.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn put(&self, path: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn exists(&self, path: &str) -> anyhow::Result<bool>;
    /// Removing a path that does not exist succeeds.
    async fn delete(&self, path: &str) -> anyhow::Result<()>;
}

pub async fn from_config(cfg: &StorageConfig) -> anyhow::Result<std::sync::Arc<dyn FileStore>> {
    Ok(match cfg {
        StorageConfig::Local { root } => std::sync::Arc::new(LocalDisk::new(root.clone())),
        StorageConfig::S3(s3) => std::sync::Arc::new(S3Disk::new(s3).await?),
    })
}

#[derive(Clone)]
pub struct LocalDisk {
    root: PathBuf,
}

impl LocalDisk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let rel = Path::new(path);
        let clean = !path.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        anyhow::ensure!(clean, "refusing storage path {path:?}");
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl FileStore for LocalDisk {
    async fn put(&self, path: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        let full = self.resolve(path)?;
        if let Some(dir) = full.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create dir {}", dir.display()))?;
        }
        tokio::fs::write(&full, &body)
            .await
            .with_context(|| format!("write {}", full.display()))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        let full = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .with_context(|| format!("stat {}", full.display()))
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", full.display())),
        }
    }
}

#[derive(Clone)]
pub struct S3Disk {
    client: Client,
    bucket: String,
}

impl S3Disk {
    pub async fn new(cfg: &S3Config) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
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

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
        })
    }
}

#[async_trait]
impl FileStore for S3Disk {
    async fn put(&self, path: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("s3 put_object")?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = e.into_service_error();
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(anyhow::Error::new(err).context("s3 head_object"))
                }
            }
        }
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }
}
