use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

/// Where uploaded profile images live.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum StorageConfig {
    Local { root: PathBuf },
    S3(S3Config),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Public base URL, used to build `<app_url>/storage/<path>` image links.
    pub app_url: String,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let app_url = std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:8080".into());

        let driver = std::env::var("STORAGE_DRIVER").unwrap_or_else(|_| "local".into());
        let storage = match driver.as_str() {
            "local" => StorageConfig::Local {
                root: std::env::var("STORAGE_ROOT")
                    .unwrap_or_else(|_| "storage/app/public".into())
                    .into(),
            },
            "s3" => StorageConfig::S3(S3Config {
                endpoint: std::env::var("S3_ENDPOINT").context("S3_ENDPOINT must be set")?,
                bucket: std::env::var("S3_BUCKET").context("S3_BUCKET must be set")?,
                access_key: std::env::var("S3_ACCESS_KEY").context("S3_ACCESS_KEY must be set")?,
                secret_key: std::env::var("S3_SECRET_KEY").context("S3_SECRET_KEY must be set")?,
                region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
            }),
            other => anyhow::bail!("unknown STORAGE_DRIVER {other:?}, expected local or s3"),
        };

        Ok(Self {
            database_url,
            app_url,
            storage,
        })
    }
}
