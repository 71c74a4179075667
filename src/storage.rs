//! Filesystem object storage.
//!
//! Objects live at `<root>/<bucket>/<key>`. Upload credentials are random
//! tokens remembered in memory with their object, content type and expiry;
//! a write presented with a credential is checked against all three.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::services::{ObjectRef, ObjectStorage, UploadCredential};

const TOKEN_LEN: usize = 32;

#[derive(Debug, Clone)]
struct Grant {
    object: ObjectRef,
    content_type: String,
    expires_at: DateTime<Utc>,
}

/// Object storage rooted at a local directory.
pub struct FsObjectStorage {
    root: PathBuf,
    grants: Mutex<HashMap<String, Grant>>,
}

impl FsObjectStorage {
    /// Storage keeping `<bucket>/<key>` files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            grants: Mutex::new(HashMap::new()),
        }
    }

    /// Filesystem path of an object. Keys may not escape the bucket.
    pub fn object_path(&self, object: &ObjectRef) -> Result<PathBuf> {
        let relative = Path::new(&object.bucket).join(&object.key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid object location {}/{}", object.bucket, object.key);
        }
        Ok(self.root.join(relative))
    }

    /// Write an object directly.
    pub async fn put_object(&self, object: &ObjectRef, bytes: &[u8]) -> Result<()> {
        let path = self.object_path(object)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write object {}", object.key))?;
        debug!(key = %object.key, bytes = bytes.len(), "Stored object");
        Ok(())
    }

    /// Write an object using a previously issued credential.
    ///
    /// The credential is single-use.
    pub async fn put_with_credential(&self, url: &str, content_type: &str, bytes: &[u8]) -> Result<ObjectRef> {
        let token = url
            .rsplit_once("token=")
            .map(|(_, token)| token)
            .ok_or_else(|| anyhow!("Upload URL carries no token"))?;

        let grant = {
            let mut grants = self
                .grants
                .lock()
                .map_err(|_| anyhow!("Upload credential table is poisoned"))?;
            grants
                .remove(token)
                .ok_or_else(|| anyhow!("Unknown or already used upload credential"))?
        };

        if grant.expires_at < Utc::now() {
            bail!("Upload credential expired at {}", grant.expires_at);
        }
        if grant.content_type != content_type {
            bail!(
                "Upload credential is for content type {}, not {}",
                grant.content_type,
                content_type
            );
        }

        self.put_object(&grant.object, bytes).await?;
        Ok(grant.object)
    }
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn object_size(&self, object: &ObjectRef) -> Result<u64> {
        let path = self.object_path(object)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Object {} not found", object.key))?;
        Ok(metadata.len())
    }

    async fn read_object(&self, object: &ObjectRef) -> Result<Vec<u8>> {
        let path = self.object_path(object)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read object {}", object.key))
    }

    async fn issue_upload_credential(
        &self,
        object: &ObjectRef,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<UploadCredential> {
        let path = self.object_path(object)?;
        let expires_in = chrono::Duration::from_std(expires_in).context("Upload expiry out of range")?;
        let expires_at = Utc::now() + expires_in;
        let token = random_token();

        self.grants
            .lock()
            .map_err(|_| anyhow!("Upload credential table is poisoned"))?
            .insert(
                token.clone(),
                Grant {
                    object: object.clone(),
                    content_type: content_type.to_string(),
                    expires_at,
                },
            );

        Ok(UploadCredential {
            url: format!(
                "file://{}?expires={}&token={}",
                path.display(),
                expires_at.timestamp(),
                token
            ),
            expires_at,
        })
    }
}
